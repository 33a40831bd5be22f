use serde::{Deserialize, Serialize};

use ipvs_common::control::TimeoutUser;

pub const DEFAULT_TCP_TIMEOUT: u32 = 15 * 60;
pub const DEFAULT_TCP_FIN_TIMEOUT: u32 = 2 * 60;
pub const DEFAULT_UDP_TIMEOUT: u32 = 5 * 60;

/// Connection timeouts in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolTimeouts {
    pub tcp: u32,
    pub tcp_fin: u32,
    pub udp: u32,
}

impl Default for ProtocolTimeouts {
    fn default() -> Self {
        Self {
            tcp: DEFAULT_TCP_TIMEOUT,
            tcp_fin: DEFAULT_TCP_FIN_TIMEOUT,
            udp: DEFAULT_UDP_TIMEOUT,
        }
    }
}

impl ProtocolTimeouts {
    /// Overwrite the fields that are nonzero in `update`.
    pub fn merge_nonzero(&mut self, update: &Self) {
        if update.tcp != 0 {
            self.tcp = update.tcp;
        }
        if update.tcp_fin != 0 {
            self.tcp_fin = update.tcp_fin;
        }
        if update.udp != 0 {
            self.udp = update.udp;
        }
    }

    pub fn from_user(u: &TimeoutUser) -> Self {
        Self {
            tcp: u.tcp_timeout,
            tcp_fin: u.tcp_fin_timeout,
            udp: u.udp_timeout,
        }
    }

    pub fn to_user(&self) -> TimeoutUser {
        TimeoutUser {
            tcp_timeout: self.tcp,
            tcp_fin_timeout: self.tcp_fin,
            udp_timeout: self.udp,
        }
    }
}
