use thiserror::Error;

pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const ESRCH: i32 = 3;
pub const EIO: i32 = 5;
pub const ENOMEM: i32 = 12;
pub const EFAULT: i32 = 14;
pub const EBUSY: i32 = 16;
pub const EEXIST: i32 = 17;
pub const EINVAL: i32 = 22;
pub const ERANGE: i32 = 34;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("no such service: {0}")]
    NoSuchService(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("busy: {0}")]
    Busy(String),

    #[error("bad address: {0}")]
    BadAddress(String),

    #[error("engine error: {0}")]
    EngineError(String),
}

impl DomainError {
    /// Positive errno reported to administrative clients.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound(_) => ENOENT,
            Self::NoSuchService(_) => ESRCH,
            Self::AlreadyExists(_) => EEXIST,
            Self::InvalidArgument(_) => EINVAL,
            Self::OutOfRange(_) => ERANGE,
            Self::OutOfMemory(_) => ENOMEM,
            Self::PermissionDenied => EPERM,
            Self::Busy(_) => EBUSY,
            Self::BadAddress(_) => EFAULT,
            Self::EngineError(_) => EIO,
        }
    }

    /// Rebuild an error from a positive errno, as received over the wire.
    pub fn from_errno(errno: i32, context: &str) -> Self {
        let msg = context.to_string();
        match errno {
            EPERM => Self::PermissionDenied,
            ENOENT => Self::NotFound(msg),
            ESRCH => Self::NoSuchService(msg),
            EEXIST => Self::AlreadyExists(msg),
            EINVAL => Self::InvalidArgument(msg),
            ERANGE => Self::OutOfRange(msg),
            ENOMEM => Self::OutOfMemory(msg),
            EBUSY => Self::Busy(msg),
            EFAULT => Self::BadAddress(msg),
            other => Self::EngineError(format!("{msg} (errno {other})")),
        }
    }

    /// Short stable label used in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NoSuchService(_) => "no_such_service",
            Self::AlreadyExists(_) => "already_exists",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::OutOfRange(_) => "out_of_range",
            Self::OutOfMemory(_) => "out_of_memory",
            Self::PermissionDenied => "permission_denied",
            Self::Busy(_) => "busy",
            Self::BadAddress(_) => "bad_address",
            Self::EngineError(_) => "engine_error",
        }
    }
}

impl From<ipvs_common::WireError> for DomainError {
    fn from(err: ipvs_common::WireError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}
