use crate::codec::{Reader, WireError, WireRecord, Writer, c_str, to_c_array};
use crate::control::IP_VS_SCHEDNAME_MAXLEN;
use crate::stats::StatsUser;

/// Virtual service descriptor as sent by administrative clients.
///
/// A service is identified either by `fwmark` (when nonzero) or by the
/// `(protocol, addr, port)` triple.
///
/// Layout (44 bytes):
///   0..2    protocol
///   2..4    padding
///   4..8    addr (network order)
///   8..10   port (network order)
///   10..12  padding
///   12..16  fwmark
///   16..32  sched_name (NUL-terminated)
///   32..36  flags
///   36..40  timeout (seconds)
///   40..44  netmask (network order)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceUser {
    pub protocol: u16,
    pub _pad0: [u8; 2],
    /// Host order in memory.
    pub addr: u32,
    /// Host order in memory.
    pub port: u16,
    pub _pad1: [u8; 2],
    pub fwmark: u32,
    pub sched_name: [u8; IP_VS_SCHEDNAME_MAXLEN],
    pub flags: u32,
    pub timeout: u32,
    /// Host order in memory.
    pub netmask: u32,
}

impl ServiceUser {
    pub fn sched_name(&self) -> &str {
        c_str(&self.sched_name)
    }

    pub fn set_sched_name(&mut self, name: &str) {
        self.sched_name = to_c_array(name);
    }
}

impl WireRecord for ServiceUser {
    const SIZE: usize = 44;

    fn write(&self, w: &mut Writer) {
        w.u16_le(self.protocol);
        w.zeros(2);
        w.u32_be(self.addr);
        w.u16_be(self.port);
        w.zeros(2);
        w.u32_le(self.fwmark);
        w.bytes(&self.sched_name);
        w.u32_le(self.flags);
        w.u32_le(self.timeout);
        w.u32_be(self.netmask);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let protocol = r.u16_le()?;
        r.skip(2)?;
        let addr = r.u32_be()?;
        let port = r.u16_be()?;
        r.skip(2)?;
        Ok(Self {
            protocol,
            addr,
            port,
            fwmark: r.u32_le()?,
            sched_name: r.array()?,
            flags: r.u32_le()?,
            timeout: r.u32_le()?,
            netmask: r.u32_be()?,
            ..Default::default()
        })
    }
}

/// A service with its destination count and statistics.
///
/// Layout (104 bytes): `ServiceUser` at 0, `num_dests` at 44,
/// `StatsUser` at 48.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceEntry {
    pub service: ServiceUser,
    pub num_dests: u32,
    pub stats: StatsUser,
}

impl WireRecord for ServiceEntry {
    const SIZE: usize = 104;

    fn write(&self, w: &mut Writer) {
        self.service.write(w);
        w.u32_le(self.num_dests);
        self.stats.write(w);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            service: ServiceUser::read(r)?,
            num_dests: r.u32_le()?,
            stats: StatsUser::read(r)?,
        })
    }
}

/// Header of a `GET_SERVICES` request and reply. The reply carries
/// `num_services` `ServiceEntry` records after the header.
///
/// Size: 8 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetServices {
    pub num_services: u32,
    pub _pad: u32,
}

impl GetServices {
    /// Total buffer length for a reply holding `n` entries.
    pub fn reply_len(n: usize) -> usize {
        Self::SIZE + n * ServiceEntry::SIZE
    }
}

impl WireRecord for GetServices {
    const SIZE: usize = 8;

    fn write(&self, w: &mut Writer) {
        w.u32_le(self.num_services);
        w.zeros(4);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let num_services = r.u32_le()?;
        r.skip(4)?;
        Ok(Self {
            num_services,
            _pad: 0,
        })
    }
}
