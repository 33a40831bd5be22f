use ipvs_common::WireError;
use ipvs_common::frame::{
    REQUEST_HEADER_LEN, RESPONSE_HEADER_LEN, RequestHeader, ResponseHeader,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Transport errors on the control socket.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Wire(#[from] WireError),

    #[error("frame of {len} bytes exceeds limit {max}")]
    TooLarge { len: usize, max: usize },
}

const U32_MAX: usize = 0xFFFF_FFFF;

fn check_len(len: u32, max: usize) -> Result<usize, FrameError> {
    let len = usize::try_from(len).unwrap_or(usize::MAX);
    if len > max {
        return Err(FrameError::TooLarge { len, max });
    }
    Ok(len)
}

/// Read one request. Returns `None` on a clean EOF before the header.
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<Option<(RequestHeader, Vec<u8>)>, FrameError> {
    let mut header = [0u8; REQUEST_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = RequestHeader::decode(&header)?;
    let mut arg = vec![0u8; check_len(header.len, max)?];
    reader.read_exact(&mut arg).await?;
    Ok(Some((header, arg)))
}

pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: RequestHeader,
    arg: &[u8],
) -> Result<(), FrameError> {
    writer.write_all(&header.encode()).await?;
    writer.write_all(arg).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<(ResponseHeader, Vec<u8>), FrameError> {
    let mut header = [0u8; RESPONSE_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let header = ResponseHeader::decode(&header)?;
    let mut body = vec![0u8; check_len(header.len, max)?];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    errno: i32,
    body: &[u8],
) -> Result<(), FrameError> {
    let len = u32::try_from(body.len()).map_err(|_| FrameError::TooLarge {
        len: body.len(),
        max: U32_MAX,
    })?;
    writer
        .write_all(&ResponseHeader { errno, len }.encode())
        .await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}
