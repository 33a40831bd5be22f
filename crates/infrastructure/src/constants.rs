use std::time::Duration;

// ── Paths and ports ────────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ipvsd/config.yaml";
pub const DEFAULT_CONTROL_SOCKET: &str = "/run/ipvsd/control.sock";
pub const DEFAULT_HTTP_PORT: u16 = 8080;

// ── Periodic work ──────────────────────────────────────────────────

pub const DEFAULT_DEFENSE_TICK_MS: u64 = 1000;
pub const ESTIMATOR_PERIOD: Duration = Duration::from_secs(2);
pub const ROUTE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

// ── Control transport ──────────────────────────────────────────────

/// Largest argument or reply carried by one control frame.
pub const MAX_CONTROL_FRAME: usize = 1 << 20;

// ── Timeouts ───────────────────────────────────────────────────────

pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const CLIENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── Host files ─────────────────────────────────────────────────────

pub const PROC_MEMINFO: &str = "/proc/meminfo";
pub const PROC_FIB_TRIE: &str = "/proc/net/fib_trie";
