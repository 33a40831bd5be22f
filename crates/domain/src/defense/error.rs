use thiserror::Error;

use crate::common::error::DomainError;

#[derive(Debug, Error)]
pub enum DefenseError {
    #[error("invalid {policy} mode {value}: must be 0..=3")]
    InvalidMode { policy: &'static str, value: i64 },

    #[error("amemthresh must be > 0")]
    InvalidThreshold,
}

impl From<DefenseError> for DomainError {
    fn from(e: DefenseError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}
