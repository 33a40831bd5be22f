use thiserror::Error;

use crate::common::error::DomainError;

#[derive(Debug, Error)]
pub enum IpvsError {
    #[error("scheduler {name} not found")]
    SchedulerNotFound { name: String },

    #[error("service {key} already exists")]
    ServiceExists { key: String },

    #[error("service {key} not found")]
    ServiceNotFound { key: String },

    #[error("destination {dest} already exists")]
    DestExists { dest: String },

    #[error("destination {dest} not found")]
    DestNotFound { dest: String },

    #[error("server weight {weight} less than zero")]
    NegativeWeight { weight: i32 },

    #[error("destination {dest} is neither local nor unicast")]
    InvalidDestAddress { dest: String },

    #[error("unsupported protocol {protocol}")]
    UnsupportedProtocol { protocol: u16 },
}

impl From<IpvsError> for DomainError {
    fn from(e: IpvsError) -> Self {
        match e {
            IpvsError::SchedulerNotFound { .. } | IpvsError::DestNotFound { .. } => {
                Self::NotFound(e.to_string())
            }
            IpvsError::ServiceExists { .. } | IpvsError::DestExists { .. } => {
                Self::AlreadyExists(e.to_string())
            }
            IpvsError::ServiceNotFound { .. } => Self::NoSuchService(e.to_string()),
            IpvsError::NegativeWeight { .. } => Self::OutOfRange(e.to_string()),
            IpvsError::InvalidDestAddress { .. } => Self::InvalidArgument(e.to_string()),
            IpvsError::UnsupportedProtocol { .. } => Self::BadAddress(e.to_string()),
        }
    }
}
