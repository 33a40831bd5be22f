use domain::common::error::DomainError;

/// Source of system memory figures for the defense controller.
pub trait MemoryInfoPort: Send + Sync {
    /// Free plus buffered memory, in pages.
    fn available_pages(&self) -> Result<u64, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_info_port_is_object_safe() {
        fn _check(port: &dyn MemoryInfoPort) {
            let _ = port.available_pages();
        }
    }
}
