/// Connection table hooks driven by the defense controller.
pub trait ConnectionTable: Send + Sync {
    /// Evict a random sample of connection entries. Returns how many were
    /// dropped.
    fn random_drop_entry(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_table_is_object_safe() {
        fn _check(port: &dyn ConnectionTable) {
            let _ = port.random_drop_entry();
        }
    }
}
