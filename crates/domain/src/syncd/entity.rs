use serde::{Deserialize, Serialize};

use ipvs_common::control::{DaemonUser, IP_VS_STATE_BACKUP, IP_VS_STATE_MASTER};

use super::error::SyncError;

/// Role of a connection-sync daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRole {
    Master,
    Backup,
}

impl SyncRole {
    pub fn from_state(state: i32) -> Result<Self, SyncError> {
        match state {
            IP_VS_STATE_MASTER => Ok(Self::Master),
            IP_VS_STATE_BACKUP => Ok(Self::Backup),
            other => Err(SyncError::InvalidState(other)),
        }
    }

    pub fn state(self) -> i32 {
        match self {
            Self::Master => IP_VS_STATE_MASTER,
            Self::Backup => IP_VS_STATE_BACKUP,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Backup => "backup",
        }
    }
}

impl std::fmt::Display for SyncRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(Self::Master),
            "backup" => Ok(Self::Backup),
            other => Err(format!("unknown sync role: {other}")),
        }
    }
}

/// Parameters of a running daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncDaemonInfo {
    pub role: SyncRole,
    pub mcast_ifn: String,
    pub syncid: u8,
}

impl SyncDaemonInfo {
    pub fn to_user(&self) -> DaemonUser {
        DaemonUser::new(self.role.state(), &self.mcast_ifn, i32::from(self.syncid))
    }
}
