use thiserror::Error;

use crate::common::error::DomainError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync {role} daemon already running")]
    AlreadyRunning { role: &'static str },

    #[error("sync {role} daemon not running")]
    NotRunning { role: &'static str },

    #[error("invalid sync daemon state {0}")]
    InvalidState(i32),

    #[error("multicast interface name longer than {max} bytes")]
    InterfaceTooLong { max: usize },
}

impl From<SyncError> for DomainError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::AlreadyRunning { .. } => Self::AlreadyExists(e.to_string()),
            SyncError::NotRunning { .. } => Self::NoSuchService(e.to_string()),
            SyncError::InvalidState(_) | SyncError::InterfaceTooLong { .. } => {
                Self::InvalidArgument(e.to_string())
            }
        }
    }
}
