use thiserror::Error;

/// Errors raised while decoding a wire record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("truncated record: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("bad argument length for {command}: got {got}, expected {expected}")]
    BadLength {
        command: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("unknown command {0}")]
    UnknownCommand(u32),
}

/// Cursor over a borrowed byte slice.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                needed: self.pos + n,
                available: self.buf.len(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), WireError> {
        self.take(n).map(|_| ())
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u16_le(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32_le(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32_le(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn u64_le(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn u16_be(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u32_be(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_be_bytes(self.array()?))
    }
}

/// Growable output buffer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    pub fn u16_le(&mut self, v: u16) {
        self.bytes(&v.to_le_bytes());
    }

    pub fn u32_le(&mut self, v: u32) {
        self.bytes(&v.to_le_bytes());
    }

    pub fn i32_le(&mut self, v: i32) {
        self.bytes(&v.to_le_bytes());
    }

    pub fn u64_le(&mut self, v: u64) {
        self.bytes(&v.to_le_bytes());
    }

    pub fn u16_be(&mut self, v: u16) {
        self.bytes(&v.to_be_bytes());
    }

    pub fn u32_be(&mut self, v: u32) {
        self.bytes(&v.to_be_bytes());
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// A fixed-size record with a defined byte layout.
pub trait WireRecord: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    fn write(&self, w: &mut Writer);

    fn read(r: &mut Reader<'_>) -> Result<Self, WireError>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::SIZE);
        self.write(&mut w);
        w.into_inner()
    }

    /// Decode from the first `SIZE` bytes of `buf`.
    fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        Self::read(&mut Reader::new(buf))
    }
}

/// Interpret a NUL-padded fixed buffer as a string, stopping at the first NUL.
/// Invalid UTF-8 yields an empty string.
pub fn c_str(bytes: &[u8]) -> &str {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).unwrap_or("")
}

/// Copy `s` into a NUL-terminated fixed buffer, truncating to `N - 1` bytes.
pub fn to_c_array<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let n = s.len().min(N.saturating_sub(1));
    out[..n].copy_from_slice(&s.as_bytes()[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reports_truncation() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert_eq!(r.u16_le().unwrap(), 0x0201);
        assert_eq!(
            r.u32_le(),
            Err(WireError::Truncated {
                needed: 6,
                available: 3
            })
        );
    }

    #[test]
    fn big_endian_helpers() {
        let mut w = Writer::default();
        w.u32_be(0x0A00_0001);
        w.u16_be(80);
        let bytes = w.into_inner();
        assert_eq!(bytes, vec![10, 0, 0, 1, 0, 80]);

        let mut r = Reader::new(&bytes);
        assert_eq!(r.u32_be().unwrap(), 0x0A00_0001);
        assert_eq!(r.u16_be().unwrap(), 80);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn c_str_stops_at_nul() {
        assert_eq!(c_str(b"rr\0\0junk"), "rr");
        assert_eq!(c_str(b"wlc"), "wlc");
        assert_eq!(c_str(&[0xFF, 0xFE, 0]), "");
    }

    #[test]
    fn to_c_array_truncates_and_terminates() {
        let a: [u8; 4] = to_c_array("abcdef");
        assert_eq!(&a, b"abc\0");
        let b: [u8; 4] = to_c_array("");
        assert_eq!(b, [0; 4]);
    }
}
