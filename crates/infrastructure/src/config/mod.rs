//! Daemon configuration: structs, parsing, and validation.
//!
//! The config module is split across several sub-modules:
//! - `common`: shared helpers and `ConfigError`
//! - `defense`, `tunables`, `service`, `auth`: section-specific configs

mod auth;
mod common;
mod defense;
mod service;
mod tunables;

// ── Public re-exports ─────────────────────────────────────────────

pub use auth::{ApiKeyConfig, AuthConfig};
pub use common::{ConfigError, parse_ipv4};
pub use defense::DefenseConfig;
pub use service::{DestBootstrapConfig, ServiceBootstrapConfig};
pub use tunables::{TimeoutsConfig, TunablesConfig};

use std::path::Path;

use domain::auth::rbac::Role;
use domain::defense::entity::DefenseSettings;
use domain::timeout::entity::ProtocolTimeouts;
use domain::tunables::entity::TunableSettings;
use domain::virtualserver::entity::{DestConfig, ServiceConfig};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CONTROL_SOCKET, DEFAULT_HTTP_PORT};
use common::{MAX_API_KEYS, MAX_BOOTSTRAP_SERVICES, check_limit, warn_if_world_readable};

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentInfo,

    #[serde(default)]
    pub defense: DefenseConfig,

    #[serde(default)]
    pub tunables: TunablesConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Services created at startup, in order.
    #[serde(default)]
    pub services: Vec<ServiceBootstrapConfig>,
}

impl AgentConfig {
    /// Load config from a YAML file.
    ///
    /// On Unix, logs a warning if the config file is world-readable,
    /// since it may contain API keys.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        warn_if_world_readable(path, "config file");
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Return a copy of the config with API key secrets masked.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut sanitized = self.clone();
        for key in &mut sanitized.auth.api_keys {
            key.key = "***".to_string();
        }
        sanitized
    }

    /// Validate the config after deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.http_port == 0 {
            return Err(ConfigError::Validation {
                field: "agent.http_port".to_string(),
                message: "port must be non-zero".to_string(),
            });
        }
        if self.agent.bind_address.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::Validation {
                field: "agent.bind_address".to_string(),
                message: format!("invalid IP address '{}'", self.agent.bind_address),
            });
        }
        if self.agent.control_socket.is_empty() {
            return Err(ConfigError::Validation {
                field: "agent.control_socket".to_string(),
                message: "socket path must not be empty".to_string(),
            });
        }

        self.defense.validate()?;
        self.tunables.validate()?;

        check_limit("auth.api_keys", self.auth.api_keys.len(), MAX_API_KEYS)?;
        for (idx, key) in self.auth.api_keys.iter().enumerate() {
            if key.name.is_empty() || key.key.is_empty() {
                return Err(ConfigError::Validation {
                    field: format!("auth.api_keys[{idx}]"),
                    message: "name and key must not be empty".to_string(),
                });
            }
            key.role
                .parse::<Role>()
                .map_err(|_| ConfigError::InvalidValue {
                    field: format!("auth.api_keys[{idx}].role"),
                    value: key.role.clone(),
                    expected: "admin, viewer".to_string(),
                })?;
        }

        check_limit("services", self.services.len(), MAX_BOOTSTRAP_SERVICES)?;
        self.bootstrap_services().map(|_| ())
    }

    // ── Domain conversions ────────────────────────────────────────

    pub fn defense_settings(&self) -> Result<DefenseSettings, ConfigError> {
        self.defense.to_settings()
    }

    pub fn tunable_settings(&self) -> Result<TunableSettings, ConfigError> {
        self.tunables.to_settings()
    }

    pub fn protocol_timeouts(&self) -> ProtocolTimeouts {
        self.timeouts.to_timeouts()
    }

    /// Services and their destinations to create at startup.
    pub fn bootstrap_services(&self) -> Result<Vec<(ServiceConfig, Vec<DestConfig>)>, ConfigError> {
        self.services
            .iter()
            .enumerate()
            .map(|(idx, s)| s.to_configs(idx))
            .collect()
    }
}

// ── Agent info ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentInfo {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// IP address for the HTTP API to bind to.
    /// Defaults to `127.0.0.1` (localhost only).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Path of the Unix control socket.
    #[serde(default = "default_control_socket")]
    pub control_socket: String,

    /// Peer uids granted the administrative capability on the control socket.
    #[serde(default = "default_admin_uids")]
    pub admin_uids: Vec<u32>,
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            control_socket: default_control_socket(),
            admin_uids: default_admin_uids(),
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_log_format() -> LogFormat {
    LogFormat::Json
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}
fn default_control_socket() -> String {
    DEFAULT_CONTROL_SOCKET.to_string()
}
fn default_admin_uids() -> Vec<u32> {
    vec![0]
}

// ── Log level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(format!(
                "invalid log level '{s}': expected error|warn|info|debug|trace"
            )),
        }
    }
}

// ── Log format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            _ => Err(format!("invalid log format '{s}': expected json|text")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::defense::entity::DefenseMode;
    use std::io::Write;

    const FULL_YAML: &str = r#"
agent:
  log_level: debug
  log_format: text
  bind_address: 0.0.0.0
  http_port: 9090
  control_socket: /tmp/ipvsd.sock
  admin_uids: [0, 1000]
defense:
  amemthresh: 2048
  am_droprate: 5
  drop_entry: 1
  secure_tcp: 3
  tick_interval_ms: 500
tunables:
  expire_nodest_conn: true
  sync_threshold: [5, 60]
timeouts:
  tcp: 600
auth:
  api_keys:
    - { name: ops, key: "s3cret", role: admin }
    - { name: grafana, key: "view" }
services:
  - protocol: tcp
    address: 10.0.0.1
    port: 80
    scheduler: rr
    destinations:
      - { address: 10.0.0.2, port: 8080, weight: 1, forward: masq }
  - fwmark: 7
    scheduler: rr
"#;

    // ── Loading ───────────────────────────────────────────────────

    #[test]
    fn load_empty_config_uses_defaults() {
        let config = AgentConfig::from_yaml("{}").unwrap();
        assert_eq!(config.agent.log_level, LogLevel::Info);
        assert_eq!(config.agent.log_format, LogFormat::Json);
        assert_eq!(config.agent.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.agent.control_socket, DEFAULT_CONTROL_SOCKET);
        assert_eq!(config.agent.admin_uids, vec![0]);
        assert_eq!(config.defense_settings().unwrap(), DefenseSettings::default());
        assert_eq!(config.protocol_timeouts(), ProtocolTimeouts::default());
        assert!(config.services.is_empty());
        assert!(!config.auth.enabled());
    }

    #[test]
    fn load_full_config() {
        let config = AgentConfig::from_yaml(FULL_YAML).unwrap();
        assert_eq!(config.agent.log_level, LogLevel::Debug);
        assert_eq!(config.agent.log_format, LogFormat::Text);
        assert_eq!(config.agent.http_port, 9090);
        assert_eq!(config.agent.admin_uids, vec![0, 1000]);

        let defense = config.defense_settings().unwrap();
        assert_eq!(defense.amemthresh, 2048);
        assert_eq!(defense.drop_entry, DefenseMode::AutoOff);
        assert_eq!(defense.secure_tcp, DefenseMode::On);

        let tunables = config.tunable_settings().unwrap();
        assert!(tunables.expire_nodest_conn);
        assert_eq!(tunables.sync_threshold.threshold(), 5);
        assert_eq!(tunables.sync_threshold.period(), 60);

        assert_eq!(config.protocol_timeouts().tcp, 600);
        assert_eq!(config.auth.api_keys[1].role, "viewer");

        let services = config.bootstrap_services().unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].1.len(), 1);
        assert!(services[1].0.key.is_fwmark());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL_YAML.as_bytes()).unwrap();
        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.agent.http_port, 9090);
    }

    #[test]
    fn load_missing_file_fails() {
        let err = AgentConfig::load(Path::new("/nonexistent/ipvsd.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    // ── Validation ────────────────────────────────────────────────

    #[test]
    fn unknown_field_rejected() {
        let err = AgentConfig::from_yaml("bogus: 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn zero_http_port_rejected() {
        let err = AgentConfig::from_yaml("agent:\n  http_port: 0\n").unwrap_err();
        assert!(err.to_string().contains("agent.http_port"));
    }

    #[test]
    fn bad_bind_address_rejected() {
        assert!(AgentConfig::from_yaml("agent:\n  bind_address: localhost\n").is_err());
    }

    #[test]
    fn bad_defense_mode_rejected() {
        let err = AgentConfig::from_yaml("defense:\n  drop_packet: 9\n").unwrap_err();
        assert!(err.to_string().contains("defense.drop_packet"));
    }

    #[test]
    fn bad_sync_threshold_rejected() {
        assert!(AgentConfig::from_yaml("tunables:\n  sync_threshold: [10, 5]\n").is_err());
    }

    #[test]
    fn bad_api_key_role_rejected() {
        let yaml = "auth:\n  api_keys:\n    - { name: x, key: y, role: root }\n";
        let err = AgentConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("auth.api_keys[0].role"));
    }

    #[test]
    fn bad_service_rejected() {
        let yaml = "services:\n  - { fwmark: 1, address: 10.0.0.1, scheduler: rr }\n";
        assert!(AgentConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn sanitized_masks_keys() {
        let config = AgentConfig::from_yaml(FULL_YAML).unwrap();
        let sanitized = config.sanitized();
        assert!(sanitized.auth.api_keys.iter().all(|k| k.key == "***"));
        assert_eq!(config.auth.api_keys[0].key, "s3cret");
    }

    // ── LogLevel ──────────────────────────────────────────────────

    #[test]
    fn log_level_as_str() {
        assert_eq!(LogLevel::Info.as_str(), "info");
        assert_eq!(LogLevel::Error.as_str(), "error");
        assert_eq!(LogLevel::Debug.as_str(), "debug");
    }

    #[test]
    fn log_level_to_tracing() {
        assert_eq!(LogLevel::Info.to_tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
    }

    #[test]
    fn log_level_from_str() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    // ── LogFormat ─────────────────────────────────────────────────

    #[test]
    fn log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
