use crate::codec::{Reader, WireError, WireRecord, Writer};
use crate::stats::StatsUser;

/// Real-server descriptor as sent by administrative clients.
///
/// Layout (24 bytes):
///   0..4    addr (network order)
///   4..6    port (network order)
///   6..8    padding
///   8..12   conn_flags
///   12..16  weight
///   16..20  u_threshold
///   20..24  l_threshold
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestUser {
    /// Host order in memory.
    pub addr: u32,
    /// Host order in memory.
    pub port: u16,
    pub _pad: [u8; 2],
    pub conn_flags: u32,
    pub weight: i32,
    pub u_threshold: u32,
    pub l_threshold: u32,
}

impl WireRecord for DestUser {
    const SIZE: usize = 24;

    fn write(&self, w: &mut Writer) {
        w.u32_be(self.addr);
        w.u16_be(self.port);
        w.zeros(2);
        w.u32_le(self.conn_flags);
        w.i32_le(self.weight);
        w.u32_le(self.u_threshold);
        w.u32_le(self.l_threshold);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let addr = r.u32_be()?;
        let port = r.u16_be()?;
        r.skip(2)?;
        Ok(Self {
            addr,
            port,
            _pad: [0; 2],
            conn_flags: r.u32_le()?,
            weight: r.i32_le()?,
            u_threshold: r.u32_le()?,
            l_threshold: r.u32_le()?,
        })
    }
}

/// A destination with its connection counters and statistics.
///
/// Layout (96 bytes):
///   0..24   DestUser
///   24..36  activeconns, inactconns, persistconns
///   36..40  padding
///   40..96  StatsUser
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestEntry {
    pub dest: DestUser,
    pub activeconns: u32,
    pub inactconns: u32,
    pub persistconns: u32,
    pub _pad: u32,
    pub stats: StatsUser,
}

impl WireRecord for DestEntry {
    const SIZE: usize = 96;

    fn write(&self, w: &mut Writer) {
        self.dest.write(w);
        w.u32_le(self.activeconns);
        w.u32_le(self.inactconns);
        w.u32_le(self.persistconns);
        w.zeros(4);
        self.stats.write(w);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let dest = DestUser::read(r)?;
        let activeconns = r.u32_le()?;
        let inactconns = r.u32_le()?;
        let persistconns = r.u32_le()?;
        r.skip(4)?;
        Ok(Self {
            dest,
            activeconns,
            inactconns,
            persistconns,
            _pad: 0,
            stats: StatsUser::read(r)?,
        })
    }
}

/// Header of a `GET_DESTS` request and reply, naming the service by
/// fwmark or by `(protocol, addr, port)`. The reply carries `num_dests`
/// `DestEntry` records after the header.
///
/// Layout (24 bytes):
///   0..2    protocol
///   2..4    padding
///   4..8    addr (network order)
///   8..10   port (network order)
///   10..12  padding
///   12..16  fwmark
///   16..20  num_dests
///   20..24  padding
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetDests {
    pub protocol: u16,
    pub _pad0: [u8; 2],
    pub addr: u32,
    pub port: u16,
    pub _pad1: [u8; 2],
    pub fwmark: u32,
    pub num_dests: u32,
    pub _pad2: u32,
}

impl GetDests {
    /// Total buffer length for a reply holding `n` entries.
    pub fn reply_len(n: usize) -> usize {
        Self::SIZE + n * DestEntry::SIZE
    }
}

impl WireRecord for GetDests {
    const SIZE: usize = 24;

    fn write(&self, w: &mut Writer) {
        w.u16_le(self.protocol);
        w.zeros(2);
        w.u32_be(self.addr);
        w.u16_be(self.port);
        w.zeros(2);
        w.u32_le(self.fwmark);
        w.u32_le(self.num_dests);
        w.zeros(4);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let protocol = r.u16_le()?;
        r.skip(2)?;
        let addr = r.u32_be()?;
        let port = r.u16_be()?;
        r.skip(2)?;
        let fwmark = r.u32_le()?;
        let num_dests = r.u32_le()?;
        r.skip(4)?;
        Ok(Self {
            protocol,
            addr,
            port,
            fwmark,
            num_dests,
            ..Default::default()
        })
    }
}
