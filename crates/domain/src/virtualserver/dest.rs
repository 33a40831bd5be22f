use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use ipvs_common::control::{IP_VS_DEST_F_AVAILABLE, IP_VS_DEST_F_OVERLOAD};

use crate::common::entity::fmt_addr_port;
use crate::stats::entity::Stats;

use super::entity::{DestConfig, DestSnapshot, ForwardMethod, ServiceKey};
use super::service::ServiceId;

static NEXT_DEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a destination allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DestId(u64);

impl DestId {
    fn next() -> Self {
        Self(NEXT_DEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for DestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dest#{}", self.0)
    }
}

/// A real server behind a virtual service.
///
/// `refcnt` counts structural owners: the service destination list or the
/// trash (exactly one of them at a time) plus every outstanding
/// [`DestHold`]. Tunable fields are atomics so the forwarding path can read
/// them without taking the registry lock.
#[derive(Debug)]
pub struct Destination {
    id: DestId,
    addr: u32,
    port: u16,
    /// Identity of the service this destination was created for.
    vkey: ServiceKey,
    svc: Mutex<Option<ServiceId>>,
    weight: AtomicI32,
    conn_flags: AtomicU32,
    flags: AtomicU32,
    u_threshold: AtomicU32,
    l_threshold: AtomicU32,
    activeconns: AtomicU32,
    inactconns: AtomicU32,
    persistconns: AtomicU32,
    refcnt: AtomicUsize,
    rs_hashed: AtomicBool,
    stats: Arc<Stats>,
}

impl Destination {
    pub(crate) fn new(vkey: ServiceKey, addr: u32, port: u16) -> Self {
        Self {
            id: DestId::next(),
            addr,
            port,
            vkey,
            svc: Mutex::new(None),
            weight: AtomicI32::new(0),
            conn_flags: AtomicU32::new(0),
            flags: AtomicU32::new(0),
            u_threshold: AtomicU32::new(0),
            l_threshold: AtomicU32::new(0),
            activeconns: AtomicU32::new(0),
            inactconns: AtomicU32::new(0),
            persistconns: AtomicU32::new(0),
            refcnt: AtomicUsize::new(0),
            rs_hashed: AtomicBool::new(false),
            stats: Arc::new(Stats::new()),
        }
    }

    pub fn id(&self) -> DestId {
        self.id
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn vkey(&self) -> &ServiceKey {
        &self.vkey
    }

    /// Owning service, if still bound.
    pub fn service_id(&self) -> Option<ServiceId> {
        *self.svc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn weight(&self) -> i32 {
        self.weight.load(Ordering::Acquire)
    }

    pub fn conn_flags(&self) -> u32 {
        self.conn_flags.load(Ordering::Acquire)
    }

    pub fn forward(&self) -> ForwardMethod {
        ForwardMethod::from_conn_flags(self.conn_flags())
    }

    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    pub fn is_available(&self) -> bool {
        self.flags() & IP_VS_DEST_F_AVAILABLE != 0
    }

    pub fn is_overloaded(&self) -> bool {
        self.flags() & IP_VS_DEST_F_OVERLOAD != 0
    }

    /// Raised by the forwarding path when `u_threshold` is crossed.
    pub fn set_overloaded(&self, overloaded: bool) {
        if overloaded {
            self.flags.fetch_or(IP_VS_DEST_F_OVERLOAD, Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!IP_VS_DEST_F_OVERLOAD, Ordering::AcqRel);
        }
    }

    pub fn u_threshold(&self) -> u32 {
        self.u_threshold.load(Ordering::Acquire)
    }

    pub fn l_threshold(&self) -> u32 {
        self.l_threshold.load(Ordering::Acquire)
    }

    pub fn refcnt(&self) -> usize {
        self.refcnt.load(Ordering::Acquire)
    }

    /// Whether the destination sits in the real-server reverse index.
    pub fn is_rs_hashed(&self) -> bool {
        self.rs_hashed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Per-state connection counters, maintained by the connection table.
    pub fn set_connection_counts(&self, active: u32, inactive: u32, persistent: u32) {
        self.activeconns.store(active, Ordering::Release);
        self.inactconns.store(inactive, Ordering::Release);
        self.persistconns.store(persistent, Ordering::Release);
    }

    /// Take an external reference, as a live connection does.
    pub fn hold(self: &Arc<Self>) -> DestHold {
        self.refcnt.fetch_add(1, Ordering::AcqRel);
        DestHold {
            dest: Arc::clone(self),
        }
    }

    pub fn snapshot(&self) -> DestSnapshot {
        DestSnapshot {
            addr: self.addr,
            port: self.port,
            conn_flags: self.conn_flags(),
            weight: self.weight(),
            u_threshold: self.u_threshold(),
            l_threshold: self.l_threshold(),
            flags: self.flags(),
            activeconns: self.activeconns.load(Ordering::Acquire),
            inactconns: self.inactconns.load(Ordering::Acquire),
            persistconns: self.persistconns.load(Ordering::Acquire),
            refcnt: self.refcnt(),
            stats: self.stats.snapshot(),
        }
    }

    /// Match used by the trash scan: same real server, same service identity.
    pub(crate) fn matches_service(&self, key: &ServiceKey, addr: u32, port: u16) -> bool {
        self.addr == addr
            && self.port == port
            && self.vkey.fwmark == key.fwmark
            && self.vkey.protocol == key.protocol
            && (key.is_fwmark() || (self.vkey.addr == key.addr && self.vkey.port == key.port))
    }

    // ── Registry-owned mutation ───────────────────────────────────

    pub(crate) fn inc_ref(&self) -> usize {
        self.refcnt.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one reference and return the remaining count.
    pub(crate) fn dec_ref(&self) -> usize {
        release_ref(&self.refcnt, self.id)
    }

    pub(crate) fn set_service(&self, svc: Option<ServiceId>) -> Option<ServiceId> {
        std::mem::replace(
            &mut *self.svc.lock().unwrap_or_else(PoisonError::into_inner),
            svc,
        )
    }

    pub(crate) fn set_rs_hashed(&self, hashed: bool) {
        self.rs_hashed.store(hashed, Ordering::Release);
    }

    pub(crate) fn set_available(&self, available: bool) {
        if available {
            self.flags.fetch_or(IP_VS_DEST_F_AVAILABLE, Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!IP_VS_DEST_F_AVAILABLE, Ordering::AcqRel);
        }
    }

    /// Store weight, thresholds and the already-derived connection flags.
    ///
    /// The overload mark is cleared when the upper threshold is removed or
    /// raised above its previous value.
    pub(crate) fn apply(&self, conn_flags: u32, udest: &DestConfig) {
        self.weight.store(udest.weight, Ordering::Release);
        self.conn_flags.store(conn_flags, Ordering::Release);
        self.set_available(true);

        let old_u = self.u_threshold();
        if udest.u_threshold == 0 || udest.u_threshold > old_u {
            self.set_overloaded(false);
        }
        self.u_threshold.store(udest.u_threshold, Ordering::Release);
        self.l_threshold.store(udest.l_threshold, Ordering::Release);
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&fmt_addr_port(self.addr, self.port))
    }
}

fn release_ref(refcnt: &AtomicUsize, id: DestId) -> usize {
    match refcnt.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1)) {
        Ok(prev) => prev - 1,
        Err(_) => {
            tracing::error!(dest = %id, "destination refcnt underflow");
            0
        }
    }
}

/// An external reference to a destination, released on drop.
#[derive(Debug)]
pub struct DestHold {
    dest: Arc<Destination>,
}

impl DestHold {
    pub fn destination(&self) -> &Arc<Destination> {
        &self.dest
    }
}

impl std::ops::Deref for DestHold {
    type Target = Destination;

    fn deref(&self) -> &Destination {
        &self.dest
    }
}

impl Drop for DestHold {
    fn drop(&mut self) {
        release_ref(&self.dest.refcnt, self.dest.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::entity::Protocol;

    fn make_dest() -> Arc<Destination> {
        Arc::new(Destination::new(
            ServiceKey::addr(Protocol::Tcp, 0x0A00_0001, 80),
            0x0A00_0002,
            8080,
        ))
    }

    #[test]
    fn hold_counts_refs_until_dropped() {
        let dest = make_dest();
        assert_eq!(dest.refcnt(), 0);
        let h1 = dest.hold();
        let h2 = dest.hold();
        assert_eq!(dest.refcnt(), 2);
        drop(h1);
        assert_eq!(h2.refcnt(), 1);
        drop(h2);
        assert_eq!(dest.refcnt(), 0);
    }

    #[test]
    fn dec_ref_never_underflows() {
        let dest = make_dest();
        assert_eq!(dest.dec_ref(), 0);
        assert_eq!(dest.refcnt(), 0);
    }

    #[test]
    fn apply_sets_available_and_thresholds() {
        let dest = make_dest();
        let mut udest = DestConfig::new(0x0A00_0002, 8080, 3);
        udest.u_threshold = 100;
        udest.l_threshold = 10;
        dest.apply(0x100, &udest);

        assert_eq!(dest.weight(), 3);
        assert!(dest.is_available());
        assert_eq!(dest.u_threshold(), 100);
        assert_eq!(dest.l_threshold(), 10);
        assert_eq!(dest.conn_flags(), 0x100);
    }

    #[test]
    fn overload_cleared_only_when_threshold_relaxed() {
        let dest = make_dest();
        let mut udest = DestConfig::new(0x0A00_0002, 8080, 1);
        udest.u_threshold = 100;
        dest.apply(0, &udest);
        dest.set_overloaded(true);

        udest.u_threshold = 50;
        dest.apply(0, &udest);
        assert!(dest.is_overloaded());

        udest.u_threshold = 200;
        dest.apply(0, &udest);
        assert!(!dest.is_overloaded());

        dest.set_overloaded(true);
        udest.u_threshold = 0;
        dest.apply(0, &udest);
        assert!(!dest.is_overloaded());
    }

    #[test]
    fn trash_match_requires_same_service_identity() {
        let dest = make_dest();
        let key = ServiceKey::addr(Protocol::Tcp, 0x0A00_0001, 80);
        assert!(dest.matches_service(&key, 0x0A00_0002, 8080));
        assert!(!dest.matches_service(&key, 0x0A00_0002, 8081));
        assert!(!dest.matches_service(
            &ServiceKey::addr(Protocol::Tcp, 0x0A00_0001, 81),
            0x0A00_0002,
            8080
        ));
        assert!(!dest.matches_service(
            &ServiceKey::addr(Protocol::Udp, 0x0A00_0001, 80),
            0x0A00_0002,
            8080
        ));
    }

    #[test]
    fn trash_match_for_fwmark_ignores_virtual_address() {
        let dest = Arc::new(Destination::new(
            ServiceKey::fwmark(Protocol::Tcp, 9),
            0x0A00_0002,
            8080,
        ));
        let mut key = ServiceKey::fwmark(Protocol::Tcp, 9);
        key.addr = 0xDEAD_BEEF;
        assert!(dest.matches_service(&key, 0x0A00_0002, 8080));
        assert!(!dest.matches_service(&ServiceKey::fwmark(Protocol::Tcp, 10), 0x0A00_0002, 8080));
    }

    #[test]
    fn set_service_returns_previous_binding() {
        let dest = make_dest();
        let id = ServiceId::next_for_test();
        assert_eq!(dest.set_service(Some(id)), None);
        assert_eq!(dest.service_id(), Some(id));
        assert_eq!(dest.set_service(None), Some(id));
    }
}
