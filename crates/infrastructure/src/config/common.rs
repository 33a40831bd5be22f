//! Shared parsing helpers and error types used across all config modules.

use std::net::Ipv4Addr;
use std::path::Path;

use tracing::warn;

// ── Security limits ────────────────────────────────────────────────

/// Maximum bootstrap services.
pub(super) const MAX_BOOTSTRAP_SERVICES: usize = 4096;
/// Maximum destinations per bootstrap service.
pub(super) const MAX_BOOTSTRAP_DESTS: usize = 1024;
/// Maximum API keys.
pub(super) const MAX_API_KEYS: usize = 256;

// ── Config errors ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("invalid value '{value}' for field '{field}': expected one of {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}

// ── Parsing helpers ────────────────────────────────────────────────

/// Parse a dotted-quad IPv4 address into a host-order `u32`.
pub fn parse_ipv4(field: &str, s: &str) -> Result<u32, ConfigError> {
    s.parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| ConfigError::Validation {
            field: field.to_string(),
            message: format!("invalid IPv4 address '{s}'"),
        })
}

/// Log a warning when `path` is readable by everyone.
#[cfg(unix)]
pub(super) fn warn_if_world_readable(path: &Path, label: &str) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o004 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{mode:04o}"),
                "{label} is world-readable, consider chmod 640 or stricter",
            );
        }
    }
}

#[cfg(not(unix))]
pub(super) fn warn_if_world_readable(_path: &Path, _label: &str) {}

/// Enforce a maximum count on a config collection.
pub(super) fn check_limit(field: &str, count: usize, max: usize) -> Result<(), ConfigError> {
    if count > max {
        return Err(ConfigError::Validation {
            field: field.to_string(),
            message: format!("count {count} exceeds maximum {max}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ipv4_host_order() {
        assert_eq!(parse_ipv4("x", "10.0.0.1").unwrap(), 0x0A00_0001);
        assert_eq!(parse_ipv4("x", "255.255.255.0").unwrap(), 0xFFFF_FF00);
    }

    #[test]
    fn parse_ipv4_rejects_garbage() {
        let err = parse_ipv4("services[0].address", "10.0.0").unwrap_err();
        assert!(err.to_string().contains("services[0].address"));
        assert!(parse_ipv4("x", "::1").is_err());
    }

    #[test]
    fn check_limit_boundary() {
        assert!(check_limit("x", 4, 4).is_ok());
        assert!(check_limit("x", 5, 4).is_err());
    }

    #[test]
    fn yaml_errors_convert() {
        let err: ConfigError = serde_yaml_ng::from_str::<u32>("[").unwrap_err().into();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
