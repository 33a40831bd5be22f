use std::path::Path;

use domain::common::error::DomainError;
use ipvs_common::frame::{FrameKind, RequestHeader};
use tokio::net::UnixStream;

use super::io::{FrameError, read_response, write_request};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("daemon replied: {0}")]
    Remote(DomainError),
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Frame(FrameError::Io(e))
    }
}

/// Client side of the control socket. One request in flight at a time.
pub struct ControlClient {
    stream: UnixStream,
    max_frame: usize,
}

impl ControlClient {
    pub async fn connect(path: &Path, max_frame: usize) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self { stream, max_frame })
    }

    pub async fn set(&mut self, cmd: u32, arg: &[u8]) -> Result<(), ClientError> {
        self.call(FrameKind::Set, cmd, arg).await.map(|_| ())
    }

    pub async fn get(&mut self, cmd: u32, arg: &[u8]) -> Result<Vec<u8>, ClientError> {
        self.call(FrameKind::Get, cmd, arg).await
    }

    async fn call(&mut self, kind: FrameKind, cmd: u32, arg: &[u8]) -> Result<Vec<u8>, ClientError> {
        let len = u32::try_from(arg.len()).map_err(|_| FrameError::TooLarge {
            len: arg.len(),
            max: self.max_frame,
        })?;
        write_request(&mut self.stream, RequestHeader { kind, cmd, len }, arg).await?;
        let (header, body) = read_response(&mut self.stream, self.max_frame).await?;
        if header.errno != 0 {
            return Err(ClientError::Remote(DomainError::from_errno(
                header.errno,
                &format!("command {cmd}"),
            )));
        }
        Ok(body)
    }
}
