use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use ipvs_common::stats::StatsUser;

/// Point-in-time copy of a statistics block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub conns: u32,
    pub inpkts: u32,
    pub outpkts: u32,
    pub inbytes: u64,
    pub outbytes: u64,
    pub cps: u32,
    pub inpps: u32,
    pub outpps: u32,
    pub inbps: u32,
    pub outbps: u32,
}

impl StatsSnapshot {
    pub fn to_user(&self) -> StatsUser {
        StatsUser {
            conns: self.conns,
            inpkts: self.inpkts,
            outpkts: self.outpkts,
            inbytes: self.inbytes,
            outbytes: self.outbytes,
            cps: self.cps,
            inpps: self.inpps,
            outpps: self.outpps,
            inbps: self.inbps,
            outbps: self.outbps,
            ..Default::default()
        }
    }
}

/// Fixed-point EWMA state kept alongside the counters.
///
/// Packet and connection rates are scaled by 2^10, byte rates by 2^5.
#[derive(Debug, Default)]
struct RateState {
    last_conns: u32,
    last_inpkts: u32,
    last_outpkts: u32,
    last_inbytes: u64,
    last_outbytes: u64,
    cps: i64,
    inpps: i64,
    outpps: i64,
    inbps: i64,
    outbps: i64,
}

#[derive(Debug, Default)]
struct StatsInner {
    counters: StatsSnapshot,
    rates: RateState,
}

/// Traffic counters for a service, a destination, or the whole registry.
#[derive(Debug, Default)]
pub struct Stats {
    inner: Mutex<StatsInner>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new connection scheduled through this block.
    pub fn record_conn(&self) {
        let mut inner = self.lock();
        inner.counters.conns = inner.counters.conns.wrapping_add(1);
    }

    /// Count one client-to-server packet of `bytes` length.
    pub fn record_inbound(&self, bytes: u64) {
        let mut inner = self.lock();
        inner.counters.inpkts = inner.counters.inpkts.wrapping_add(1);
        inner.counters.inbytes = inner.counters.inbytes.wrapping_add(bytes);
    }

    /// Count one server-to-client packet of `bytes` length.
    pub fn record_outbound(&self, bytes: u64) {
        let mut inner = self.lock();
        inner.counters.outpkts = inner.counters.outpkts.wrapping_add(1);
        inner.counters.outbytes = inner.counters.outbytes.wrapping_add(bytes);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().counters
    }

    /// Clear counters and rates and restart the estimator from zero.
    pub fn zero(&self) {
        let mut inner = self.lock();
        inner.counters = StatsSnapshot::default();
        inner.rates = RateState::default();
    }

    /// Seed the estimator from the current counters and rates.
    pub(crate) fn start_estimation(&self) {
        let mut inner = self.lock();
        let c = inner.counters;
        inner.rates = RateState {
            last_conns: c.conns,
            last_inpkts: c.inpkts,
            last_outpkts: c.outpkts,
            last_inbytes: c.inbytes,
            last_outbytes: c.outbytes,
            cps: i64::from(c.cps) << 10,
            inpps: i64::from(c.inpps) << 10,
            outpps: i64::from(c.outpps) << 10,
            inbps: i64::from(c.inbps) << 5,
            outbps: i64::from(c.outbps) << 5,
        };
    }

    /// Fold one estimation interval into the rate fields.
    pub(crate) fn estimate(&self) {
        let mut guard = self.lock();
        let StatsInner { counters, rates } = &mut *guard;

        counters.cps = ewma_packets(&mut rates.cps, &mut rates.last_conns, counters.conns);
        counters.inpps = ewma_packets(&mut rates.inpps, &mut rates.last_inpkts, counters.inpkts);
        counters.outpps = ewma_packets(
            &mut rates.outpps,
            &mut rates.last_outpkts,
            counters.outpkts,
        );
        counters.inbps = ewma_bytes(&mut rates.inbps, &mut rates.last_inbytes, counters.inbytes);
        counters.outbps = ewma_bytes(
            &mut rates.outbps,
            &mut rates.last_outbytes,
            counters.outbytes,
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn ewma_packets(avg: &mut i64, last: &mut u32, now: u32) -> u32 {
    let rate = i64::from(now.wrapping_sub(*last)) << 9;
    *last = now;
    *avg += (rate - *avg) >> 2;
    u32::try_from((*avg + 0x1FF) >> 10).unwrap_or(0)
}

fn ewma_bytes(avg: &mut i64, last: &mut u64, now: u64) -> u32 {
    let delta = i64::try_from(now.wrapping_sub(*last)).unwrap_or(i64::MAX >> 4);
    let rate = delta.min(i64::MAX >> 4) << 4;
    *last = now;
    *avg += (rate - *avg) >> 2;
    u32::try_from((*avg + 0xF) >> 5).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::new();
        stats.record_conn();
        stats.record_inbound(100);
        stats.record_inbound(40);
        stats.record_outbound(1500);

        let snap = stats.snapshot();
        assert_eq!(snap.conns, 1);
        assert_eq!(snap.inpkts, 2);
        assert_eq!(snap.inbytes, 140);
        assert_eq!(snap.outpkts, 1);
        assert_eq!(snap.outbytes, 1500);
    }

    #[test]
    fn estimate_converges_towards_rate() {
        let stats = Stats::new();
        stats.start_estimation();
        for _ in 0..100 {
            stats.record_conn();
        }
        stats.estimate();
        // 100 conns over a 2s interval, first EWMA step weighs 1/4.
        assert_eq!(stats.snapshot().cps, 12);

        for _ in 0..20 {
            for _ in 0..100 {
                stats.record_conn();
            }
            stats.estimate();
        }
        assert_eq!(stats.snapshot().cps, 50);
    }

    #[test]
    fn byte_rate_estimate() {
        let stats = Stats::new();
        stats.start_estimation();
        for _ in 0..30 {
            stats.record_inbound(2000);
            stats.estimate();
        }
        // 2000 bytes every 2s settles at 1000 B/s.
        assert_eq!(stats.snapshot().inbps, 1000);
    }

    #[test]
    fn zero_clears_counters_and_rates() {
        let stats = Stats::new();
        stats.start_estimation();
        stats.record_conn();
        stats.record_outbound(64);
        stats.estimate();
        stats.zero();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());

        stats.estimate();
        assert_eq!(stats.snapshot().cps, 0);
    }

    #[test]
    fn snapshot_to_user_copies_every_field() {
        let snap = StatsSnapshot {
            conns: 1,
            inpkts: 2,
            outpkts: 3,
            inbytes: 4,
            outbytes: 5,
            cps: 6,
            inpps: 7,
            outpps: 8,
            inbps: 9,
            outbps: 10,
        };
        let user = snap.to_user();
        assert_eq!(user.conns, 1);
        assert_eq!(user.outbytes, 5);
        assert_eq!(user.outbps, 10);
    }
}
