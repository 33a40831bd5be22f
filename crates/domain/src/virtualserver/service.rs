use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use ipvs_common::control::IP_VS_SVC_F_HASHED;

use crate::stats::entity::Stats;

use super::dest::Destination;
use super::entity::{ServiceConfig, ServiceKey, ServiceSnapshot};
use super::scheduler::BoundScheduler;

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a service allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ServiceId(u64);

impl ServiceId {
    fn next() -> Self {
        Self(NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn next_for_test() -> Self {
        Self::next()
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "svc#{}", self.0)
    }
}

/// Mutable part of a service, swapped atomically with respect to readers.
#[derive(Debug)]
pub(crate) struct ServiceState {
    pub(crate) flags: u32,
    pub(crate) timeout: u32,
    pub(crate) netmask: u32,
    pub(crate) scheduler: Option<BoundScheduler>,
    pub(crate) dests: Vec<Arc<Destination>>,
}

impl ServiceState {
    pub(crate) fn notify_scheduler(&self) {
        if let Some(sched) = &self.scheduler {
            sched.update_service(&self.dests);
        }
    }
}

/// A virtual service.
///
/// `usecnt` counts in-flight holders ([`ServiceGuard`]s); `refcnt` counts
/// structural references (the hash table and every bound destination).
#[derive(Debug)]
pub struct Service {
    id: ServiceId,
    key: ServiceKey,
    usecnt: AtomicUsize,
    refcnt: AtomicUsize,
    quiesce: Mutex<()>,
    released: Condvar,
    state: RwLock<ServiceState>,
    stats: Arc<Stats>,
}

impl Service {
    pub(crate) fn new(conf: &ServiceConfig) -> Self {
        Self {
            id: ServiceId::next(),
            key: conf.key,
            usecnt: AtomicUsize::new(0),
            refcnt: AtomicUsize::new(0),
            quiesce: Mutex::new(()),
            released: Condvar::new(),
            state: RwLock::new(ServiceState {
                flags: conf.flags & !IP_VS_SVC_F_HASHED,
                timeout: conf.timeout,
                netmask: conf.netmask,
                scheduler: None,
                dests: Vec::new(),
            }),
            stats: Arc::new(Stats::new()),
        }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn usecnt(&self) -> usize {
        self.usecnt.load(Ordering::Acquire)
    }

    pub fn refcnt(&self) -> usize {
        self.refcnt.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn flags(&self) -> u32 {
        self.read_state().flags
    }

    pub fn is_hashed(&self) -> bool {
        self.flags() & IP_VS_SVC_F_HASHED != 0
    }

    pub fn timeout(&self) -> u32 {
        self.read_state().timeout
    }

    pub fn netmask(&self) -> u32 {
        self.read_state().netmask
    }

    pub fn scheduler_name(&self) -> Option<String> {
        self.read_state()
            .scheduler
            .as_ref()
            .map(|s| s.name().to_string())
    }

    pub fn num_dests(&self) -> usize {
        self.read_state().dests.len()
    }

    /// Destinations in list order (most recently added first).
    pub fn destinations(&self) -> Vec<Arc<Destination>> {
        self.read_state().dests.clone()
    }

    pub fn lookup_dest(&self, addr: u32, port: u16) -> Option<Arc<Destination>> {
        self.read_state()
            .dests
            .iter()
            .find(|d| d.addr() == addr && d.port() == port)
            .cloned()
    }

    /// Ask the bound scheduler for a destination.
    pub fn schedule(&self) -> Option<Arc<Destination>> {
        let state = self.read_state();
        state.scheduler.as_ref()?.schedule(&state.dests)
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        let state = self.read_state();
        ServiceSnapshot {
            key: self.key,
            scheduler: state
                .scheduler
                .as_ref()
                .map(|s| s.name().to_string())
                .unwrap_or_default(),
            flags: state.flags,
            timeout: state.timeout,
            netmask: state.netmask,
            num_dests: u32::try_from(state.dests.len()).unwrap_or(u32::MAX),
            stats: self.stats.snapshot(),
        }
    }

    // ── Use and reference counting ────────────────────────────────

    pub(crate) fn acquire(self: &Arc<Self>) -> ServiceGuard {
        self.usecnt.fetch_add(1, Ordering::AcqRel);
        ServiceGuard {
            svc: Arc::clone(self),
        }
    }

    fn put(&self) {
        if self
            .usecnt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err()
        {
            tracing::error!(service = %self.key, "service usecnt underflow");
        }
        let _quiesce = self.quiesce.lock().unwrap_or_else(PoisonError::into_inner);
        self.released.notify_all();
    }

    /// Block until at most `allowed` holders remain.
    ///
    /// The caller must not be waiting on anything a remaining holder needs
    /// to make progress; a holder that never releases stalls the caller.
    pub(crate) fn wait_while_used(&self, allowed: usize) {
        let mut quiesce = self.quiesce.lock().unwrap_or_else(PoisonError::into_inner);
        while self.usecnt.load(Ordering::Acquire) > allowed {
            quiesce = self
                .released
                .wait(quiesce)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn inc_ref(&self) -> usize {
        self.refcnt.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one structural reference and return the remaining count.
    pub(crate) fn dec_ref(&self) -> usize {
        match self
            .refcnt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(prev) => prev - 1,
            Err(_) => {
                tracing::error!(service = %self.key, "service refcnt underflow");
                0
            }
        }
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, ServiceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_state(&self) -> RwLockWriteGuard<'_, ServiceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A counted use of a service, obtained from a registry lookup.
///
/// Dropping the guard releases the use and wakes any mutator waiting for
/// the service to become quiescent.
#[derive(Debug)]
pub struct ServiceGuard {
    svc: Arc<Service>,
}

impl ServiceGuard {
    pub fn service(&self) -> &Arc<Service> {
        &self.svc
    }
}

impl Clone for ServiceGuard {
    fn clone(&self) -> Self {
        self.svc.acquire()
    }
}

impl std::ops::Deref for ServiceGuard {
    type Target = Service;

    fn deref(&self) -> &Service {
        &self.svc
    }
}

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        self.svc.put();
    }
}
