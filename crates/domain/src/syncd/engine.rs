use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::info;

use ipvs_common::control::IP_VS_IFNAME_MAXLEN;

use crate::common::error::DomainError;

use super::entity::{SyncDaemonInfo, SyncRole};
use super::error::SyncError;

#[derive(Debug, Default)]
struct Roles {
    master: Option<SyncDaemonInfo>,
    backup: Option<SyncDaemonInfo>,
}

impl Roles {
    fn slot(&mut self, role: SyncRole) -> &mut Option<SyncDaemonInfo> {
        match role {
            SyncRole::Master => &mut self.master,
            SyncRole::Backup => &mut self.backup,
        }
    }
}

/// Start/stop bookkeeping for the master and backup sync daemons.
#[derive(Debug, Default)]
pub struct SyncDaemon {
    roles: Mutex<Roles>,
}

impl SyncDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `role`. The sync id is truncated to its low byte.
    pub fn start(&self, state: i32, mcast_ifn: &str, syncid: i32) -> Result<(), DomainError> {
        let role = SyncRole::from_state(state)?;
        if mcast_ifn.len() >= IP_VS_IFNAME_MAXLEN {
            return Err(SyncError::InterfaceTooLong {
                max: IP_VS_IFNAME_MAXLEN - 1,
            }
            .into());
        }
        let mut roles = self.lock();
        let slot = roles.slot(role);
        if slot.is_some() {
            return Err(SyncError::AlreadyRunning {
                role: role.as_str(),
            }
            .into());
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let syncid = syncid as u8;
        *slot = Some(SyncDaemonInfo {
            role,
            mcast_ifn: mcast_ifn.to_string(),
            syncid,
        });
        info!(%role, mcast_ifn, syncid, "sync daemon started");
        Ok(())
    }

    pub fn stop(&self, state: i32) -> Result<(), DomainError> {
        let role = SyncRole::from_state(state)?;
        let mut roles = self.lock();
        if roles.slot(role).take().is_none() {
            return Err(SyncError::NotRunning {
                role: role.as_str(),
            }
            .into());
        }
        info!(%role, "sync daemon stopped");
        Ok(())
    }

    pub fn get(&self, role: SyncRole) -> Option<SyncDaemonInfo> {
        self.lock().slot(role).clone()
    }

    /// Combined state bits of the running roles.
    pub fn state(&self) -> i32 {
        let roles = self.lock();
        roles.master.as_ref().map_or(0, |i| i.role.state())
            | roles.backup.as_ref().map_or(0, |i| i.role.state())
    }

    fn lock(&self) -> MutexGuard<'_, Roles> {
        self.roles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
