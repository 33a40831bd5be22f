//! Runtime switches and protocol timeouts.

use domain::timeout::entity::ProtocolTimeouts;
use domain::tunables::entity::{DEFAULT_SYNC_THRESHOLD, SyncThreshold, TunableSettings};
use serde::{Deserialize, Serialize};

use super::common::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunablesConfig {
    #[serde(default)]
    pub cache_bypass: bool,

    #[serde(default)]
    pub expire_nodest_conn: bool,

    #[serde(default)]
    pub nat_icmp_send: bool,

    /// `[threshold, period]` with `0 <= threshold < period`.
    #[serde(default = "default_sync_threshold")]
    pub sync_threshold: [i32; 2],
}

impl Default for TunablesConfig {
    fn default() -> Self {
        Self {
            cache_bypass: false,
            expire_nodest_conn: false,
            nat_icmp_send: false,
            sync_threshold: DEFAULT_SYNC_THRESHOLD,
        }
    }
}

fn default_sync_threshold() -> [i32; 2] {
    DEFAULT_SYNC_THRESHOLD
}

impl TunablesConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        self.to_settings().map(|_| ())
    }

    pub fn to_settings(&self) -> Result<TunableSettings, ConfigError> {
        let sync_threshold =
            SyncThreshold::try_from(self.sync_threshold).map_err(|_| ConfigError::Validation {
                field: "tunables.sync_threshold".to_string(),
                message: format!(
                    "expected 0 <= threshold < period, got [{}, {}]",
                    self.sync_threshold[0], self.sync_threshold[1]
                ),
            })?;
        Ok(TunableSettings {
            cache_bypass: self.cache_bypass,
            expire_nodest_conn: self.expire_nodest_conn,
            nat_icmp_send: self.nat_icmp_send,
            sync_threshold,
        })
    }
}

/// Connection timeouts in seconds. Zero keeps the built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    #[serde(default)]
    pub tcp: u32,

    #[serde(default)]
    pub tcp_fin: u32,

    #[serde(default)]
    pub udp: u32,
}

impl TimeoutsConfig {
    pub fn to_timeouts(&self) -> ProtocolTimeouts {
        let mut timeouts = ProtocolTimeouts::default();
        timeouts.merge_nonzero(&ProtocolTimeouts {
            tcp: self.tcp,
            tcp_fin: self.tcp_fin,
            udp: self.udp,
        });
        timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::timeout::entity::{DEFAULT_TCP_FIN_TIMEOUT, DEFAULT_UDP_TIMEOUT};

    #[test]
    fn default_tunables() {
        let settings = TunablesConfig::default().to_settings().unwrap();
        assert_eq!(settings, TunableSettings::default());
    }

    #[test]
    fn sync_threshold_order_enforced() {
        let cfg = TunablesConfig {
            sync_threshold: [50, 50],
            ..TunablesConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("tunables.sync_threshold"));

        let cfg = TunablesConfig {
            sync_threshold: [-1, 10],
            ..TunablesConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_timeouts_keep_defaults() {
        let cfg = TimeoutsConfig {
            tcp: 60,
            ..TimeoutsConfig::default()
        };
        let t = cfg.to_timeouts();
        assert_eq!(t.tcp, 60);
        assert_eq!(t.tcp_fin, DEFAULT_TCP_FIN_TIMEOUT);
        assert_eq!(t.udp, DEFAULT_UDP_TIMEOUT);
    }
}
