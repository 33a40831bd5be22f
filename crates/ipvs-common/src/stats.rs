use crate::codec::{Reader, WireError, WireRecord, Writer};

/// Traffic counters and estimated rates.
///
/// Layout (56 bytes, 8-byte aligned):
///   0..12   conns, inpkts, outpkts
///   12..16  padding
///   16..32  inbytes, outbytes
///   32..52  cps, inpps, outpps, inbps, outbps
///   52..56  padding
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsUser {
    pub conns: u32,
    pub inpkts: u32,
    pub outpkts: u32,
    pub _pad0: u32,
    pub inbytes: u64,
    pub outbytes: u64,
    pub cps: u32,
    pub inpps: u32,
    pub outpps: u32,
    pub inbps: u32,
    pub outbps: u32,
    pub _pad1: u32,
}

impl WireRecord for StatsUser {
    const SIZE: usize = 56;

    fn write(&self, w: &mut Writer) {
        w.u32_le(self.conns);
        w.u32_le(self.inpkts);
        w.u32_le(self.outpkts);
        w.zeros(4);
        w.u64_le(self.inbytes);
        w.u64_le(self.outbytes);
        w.u32_le(self.cps);
        w.u32_le(self.inpps);
        w.u32_le(self.outpps);
        w.u32_le(self.inbps);
        w.u32_le(self.outbps);
        w.zeros(4);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let conns = r.u32_le()?;
        let inpkts = r.u32_le()?;
        let outpkts = r.u32_le()?;
        r.skip(4)?;
        let inbytes = r.u64_le()?;
        let outbytes = r.u64_le()?;
        let cps = r.u32_le()?;
        let inpps = r.u32_le()?;
        let outpps = r.u32_le()?;
        let inbps = r.u32_le()?;
        let outbps = r.u32_le()?;
        r.skip(4)?;
        Ok(Self {
            conns,
            inpkts,
            outpkts,
            _pad0: 0,
            inbytes,
            outbytes,
            cps,
            inpps,
            outpps,
            inbps,
            outbps,
            _pad1: 0,
        })
    }
}
