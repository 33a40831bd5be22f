// Focused sub-traits for recording Prometheus metrics, grouped by concern.
//
// All methods take `&self`; the implementation uses atomic operations
// (interior mutability via `prometheus-client`).
//
// Default implementations are no-ops, so test mocks implement only the
// sub-traits relevant to the service under test.

// ── Registry metrics ───────────────────────────────────────────────

pub trait RegistryMetrics: Send + Sync {
    /// Set the number of hashed virtual services.
    fn set_services(&self, _count: u64) {}

    /// Set the number of destinations linked to hashed services.
    fn set_destinations(&self, _count: u64) {}

    /// Set the number of destinations waiting in the trash.
    fn set_trash_destinations(&self, _count: u64) {}
}

// ── Control-plane metrics ──────────────────────────────────────────

pub trait ControlMetrics: Send + Sync {
    /// Record an administrative command with its result label
    /// (`ok` or an error label such as `already_exists`).
    fn record_control_command(&self, _command: &str, _result: &str) {}
}

// ── Defense metrics ────────────────────────────────────────────────

pub trait DefenseMetrics: Send + Sync {
    /// Set the current mode (0..=3) of a defense policy.
    fn set_defense_state(&self, _policy: &str, _mode: u8) {}

    /// Set the packet drop countdown period (0 = not dropping).
    fn set_drop_rate(&self, _rate: u32) {}

    /// Set the last observed free plus buffered memory, in pages.
    fn set_available_memory_pages(&self, _pages: u64) {}

    /// Set whether available memory is below the threshold.
    fn set_low_memory(&self, _low: bool) {}
}

// ── Composite super-trait ──────────────────────────────────────────

/// Unified metrics port composing all sub-traits.
///
/// Services accept `Arc<dyn MetricsPort>` for full access.
pub trait MetricsPort: RegistryMetrics + ControlMetrics + DefenseMetrics {}

/// Blanket implementation: any type implementing all sub-traits automatically
/// implements `MetricsPort`.
impl<T> MetricsPort for T where T: RegistryMetrics + ControlMetrics + DefenseMetrics {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_port_is_object_safe() {
        fn _check(port: &dyn MetricsPort) {
            port.set_services(1);
            port.set_destinations(2);
            port.set_trash_destinations(0);
            port.record_control_command("add", "ok");
            port.set_defense_state("drop_entry", 1);
            port.set_drop_rate(0);
            port.set_available_memory_pages(4096);
            port.set_low_memory(false);
        }
    }

    /// A minimal mock only needs empty trait impls.
    #[test]
    fn minimal_mock_compiles() {
        struct MinimalMock;
        impl RegistryMetrics for MinimalMock {}
        impl ControlMetrics for MinimalMock {}
        impl DefenseMetrics for MinimalMock {}

        let mock = MinimalMock;
        let port: &dyn MetricsPort = &mock;
        port.record_control_command("flush", "ok");
    }
}
