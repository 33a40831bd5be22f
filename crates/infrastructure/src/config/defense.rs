//! Memory-pressure defense configuration.

use std::time::Duration;

use domain::defense::entity::{DEFAULT_AM_DROPRATE, DEFAULT_AMEMTHRESH, DefenseMode, DefenseSettings};
use serde::{Deserialize, Serialize};

use super::common::ConfigError;
use crate::constants::DEFAULT_DEFENSE_TICK_MS;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefenseConfig {
    /// Low-memory threshold in pages.
    #[serde(default = "default_amemthresh")]
    pub amemthresh: u64,

    /// Drop period used while `drop_packet` is forced on.
    #[serde(default = "default_am_droprate")]
    pub am_droprate: u32,

    /// Policy modes: 0=off, 1=auto (idle), 2=auto (engaged), 3=on.
    #[serde(default)]
    pub drop_entry: u8,

    #[serde(default)]
    pub drop_packet: u8,

    #[serde(default)]
    pub secure_tcp: u8,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for DefenseConfig {
    fn default() -> Self {
        Self {
            amemthresh: DEFAULT_AMEMTHRESH,
            am_droprate: DEFAULT_AM_DROPRATE,
            drop_entry: 0,
            drop_packet: 0,
            secure_tcp: 0,
            tick_interval_ms: DEFAULT_DEFENSE_TICK_MS,
        }
    }
}

fn default_amemthresh() -> u64 {
    DEFAULT_AMEMTHRESH
}

fn default_am_droprate() -> u32 {
    DEFAULT_AM_DROPRATE
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_DEFENSE_TICK_MS
}

fn mode(field: &str, v: u8) -> Result<DefenseMode, ConfigError> {
    DefenseMode::from_u8(v).ok_or_else(|| ConfigError::InvalidValue {
        field: format!("defense.{field}"),
        value: v.to_string(),
        expected: "0, 1, 2, 3".to_string(),
    })
}

impl DefenseConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.amemthresh == 0 {
            return Err(ConfigError::Validation {
                field: "defense.amemthresh".to_string(),
                message: "threshold must be greater than zero".to_string(),
            });
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Validation {
                field: "defense.tick_interval_ms".to_string(),
                message: "tick interval must be greater than zero".to_string(),
            });
        }
        self.to_settings().map(|_| ())
    }

    pub fn to_settings(&self) -> Result<DefenseSettings, ConfigError> {
        Ok(DefenseSettings {
            amemthresh: self.amemthresh,
            am_droprate: self.am_droprate,
            drop_entry: mode("drop_entry", self.drop_entry)?,
            drop_packet: mode("drop_packet", self.drop_packet)?,
            secure_tcp: mode("secure_tcp", self.secure_tcp)?,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
