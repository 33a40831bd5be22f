use ports::secondary::metrics_port::{ControlMetrics, DefenseMetrics, RegistryMetrics};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ── Label types ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CommandLabels {
    pub command: String,
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PolicyLabels {
    pub policy: String,
}

// ── Daemon metrics registry ─────────────────────────────────────────

/// Prometheus metrics registry for the daemon.
///
/// All metric families use interior mutability (atomics), so recording
/// metrics only requires `&self`. Wrap in `Arc` for multi-task sharing.
pub struct DaemonMetrics {
    registry: Registry,
    pub services: Gauge,
    pub destinations: Gauge,
    pub trash_destinations: Gauge,
    pub control_commands_total: Family<CommandLabels, Counter>,
    pub defense_state: Family<PolicyLabels, Gauge>,
    pub drop_rate: Gauge,
    pub available_memory_pages: Gauge,
    pub low_memory: Gauge,
}

impl DaemonMetrics {
    /// Create a new metrics registry with all metrics registered under
    /// the `ipvsd` prefix.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("ipvsd");

        let services = Gauge::default();
        registry.register("services", "Hashed virtual services", services.clone());

        let destinations = Gauge::default();
        registry.register(
            "destinations",
            "Destinations linked to hashed services",
            destinations.clone(),
        );

        let trash_destinations = Gauge::default();
        registry.register(
            "trash_destinations",
            "Removed destinations still referenced by connections",
            trash_destinations.clone(),
        );

        let control_commands_total = Family::<CommandLabels, Counter>::default();
        registry.register(
            "control_commands",
            "Administrative commands by opcode and result",
            control_commands_total.clone(),
        );

        let defense_state = Family::<PolicyLabels, Gauge>::default();
        registry.register(
            "defense_state",
            "Defense policy mode (0=off, 1=auto-off, 2=auto-on, 3=on)",
            defense_state.clone(),
        );

        let drop_rate = Gauge::default();
        registry.register(
            "drop_rate",
            "Packet drop countdown period (0=not dropping)",
            drop_rate.clone(),
        );

        let available_memory_pages = Gauge::default();
        registry.register(
            "available_memory_pages",
            "Free plus buffered memory at the last defense tick, in pages",
            available_memory_pages.clone(),
        );

        let low_memory = Gauge::default();
        registry.register(
            "low_memory",
            "Available memory below the defense threshold (1=yes)",
            low_memory.clone(),
        );

        Self {
            registry,
            services,
            destinations,
            trash_destinations,
            control_commands_total,
            defense_state,
            drop_rate,
            available_memory_pages,
            low_memory,
        }
    }

    /// Encode all registered metrics to `OpenMetrics` text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "metrics encoding failed");
        }
        buffer
    }
}

impl Default for DaemonMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn gauge_value(v: u64) -> i64 {
    v.try_into().unwrap_or(i64::MAX)
}

// ── Sub-trait implementations ──────────────────────────────────────

impl RegistryMetrics for DaemonMetrics {
    fn set_services(&self, count: u64) {
        self.services.set(gauge_value(count));
    }

    fn set_destinations(&self, count: u64) {
        self.destinations.set(gauge_value(count));
    }

    fn set_trash_destinations(&self, count: u64) {
        self.trash_destinations.set(gauge_value(count));
    }
}

impl ControlMetrics for DaemonMetrics {
    fn record_control_command(&self, command: &str, result: &str) {
        self.control_commands_total
            .get_or_create(&CommandLabels {
                command: command.to_string(),
                result: result.to_string(),
            })
            .inc();
    }
}

impl DefenseMetrics for DaemonMetrics {
    fn set_defense_state(&self, policy: &str, mode: u8) {
        self.defense_state
            .get_or_create(&PolicyLabels {
                policy: policy.to_string(),
            })
            .set(i64::from(mode));
    }

    fn set_drop_rate(&self, rate: u32) {
        self.drop_rate.set(i64::from(rate));
    }

    fn set_available_memory_pages(&self, pages: u64) {
        self.available_memory_pages.set(gauge_value(pages));
    }

    fn set_low_memory(&self, low: bool) {
        self.low_memory.set(i64::from(low));
    }
}

// MetricsPort is automatically implemented via the blanket impl
// since DaemonMetrics implements all sub-traits.
