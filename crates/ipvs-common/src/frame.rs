//! Framing for the control socket.
//!
//! A request is a 9-byte header (`kind: u8`, `cmd: u32`, `len: u32`)
//! followed by `len` argument bytes. A response is an 8-byte header
//! (`errno: i32`, `len: u32`) followed by `len` reply bytes. All header
//! integers are little-endian. `errno` is zero on success.

use crate::codec::{Reader, WireError, Writer};

pub const REQUEST_HEADER_LEN: usize = 9;
pub const RESPONSE_HEADER_LEN: usize = 8;

/// Direction of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Set = 1,
    Get = 2,
}

impl FrameKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Set),
            2 => Some(Self::Get),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub kind: FrameKind,
    pub cmd: u32,
    pub len: u32,
}

impl RequestHeader {
    pub fn encode(&self) -> [u8; REQUEST_HEADER_LEN] {
        let mut w = Writer::with_capacity(REQUEST_HEADER_LEN);
        w.bytes(&[self.kind as u8]);
        w.u32_le(self.cmd);
        w.u32_le(self.len);
        let mut out = [0u8; REQUEST_HEADER_LEN];
        out.copy_from_slice(&w.into_inner());
        out
    }

    pub fn decode(buf: &[u8; REQUEST_HEADER_LEN]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let [kind] = r.array::<1>()?;
        let kind = FrameKind::from_u8(kind).ok_or(WireError::UnknownCommand(u32::from(kind)))?;
        Ok(Self {
            kind,
            cmd: r.u32_le()?,
            len: r.u32_le()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub errno: i32,
    pub len: u32,
}

impl ResponseHeader {
    pub fn encode(&self) -> [u8; RESPONSE_HEADER_LEN] {
        let mut w = Writer::with_capacity(RESPONSE_HEADER_LEN);
        w.i32_le(self.errno);
        w.u32_le(self.len);
        let mut out = [0u8; RESPONSE_HEADER_LEN];
        out.copy_from_slice(&w.into_inner());
        out
    }

    pub fn decode(buf: &[u8; RESPONSE_HEADER_LEN]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        Ok(Self {
            errno: r.i32_le()?,
            len: r.u32_le()?,
        })
    }
}
