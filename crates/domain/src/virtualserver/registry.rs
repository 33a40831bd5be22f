use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, error, info, trace};

use ipvs_common::control::{
    IP_VS_CONN_F_FWD_MASK, IP_VS_CONN_F_INACTIVE, IP_VS_CONN_F_LOCALNODE, IP_VS_CONN_F_NOOUTPUT,
    IP_VS_SVC_F_HASHED,
};

use crate::common::entity::{Protocol, fmt_addr_port};
use crate::common::error::DomainError;
use crate::stats::entity::Stats;
use crate::stats::estimator::Estimator;

use super::dest::Destination;
use super::entity::{
    DestConfig, DestSnapshot, FTPDATA, FTPPORT, PROT_SOCK, RTAB_SIZE, RouteType, SVC_TAB_SIZE,
    ServiceConfig, ServiceKey, ServiceSnapshot, rs_hashkey, svc_fwm_hashkey, svc_hashkey,
};
use super::error::IpvsError;
use super::scheduler::{BoundScheduler, SchedulerRegistry};
use super::service::{Service, ServiceGuard, ServiceId};

/// Service hash tables, the entity arena they index, and the trash.
#[derive(Debug)]
struct Tables {
    svc_table: Vec<Vec<ServiceId>>,
    fwm_table: Vec<Vec<ServiceId>>,
    /// Every allocated service, hashed or waiting for its last reference.
    arena: HashMap<ServiceId, Arc<Service>>,
    trash: Vec<Arc<Destination>>,
    ftpsvc_counter: usize,
    nullsvc_counter: usize,
    num_services: usize,
}

impl Tables {
    fn new() -> Self {
        Self {
            svc_table: vec![Vec::new(); SVC_TAB_SIZE],
            fwm_table: vec![Vec::new(); SVC_TAB_SIZE],
            arena: HashMap::new(),
            trash: Vec::new(),
            ftpsvc_counter: 0,
            nullsvc_counter: 0,
            num_services: 0,
        }
    }

    /// Insert `svc` at the head of its bucket and take the table reference.
    fn hash(&mut self, svc: &Service) -> bool {
        let mut state = svc.write_state();
        if state.flags & IP_VS_SVC_F_HASHED != 0 {
            error!(service = %svc.key(), "request for already hashed service");
            return false;
        }
        let key = svc.key();
        let table = if key.is_fwmark() {
            &mut self.fwm_table
        } else {
            &mut self.svc_table
        };
        table[key.bucket()].insert(0, svc.id());
        state.flags |= IP_VS_SVC_F_HASHED;
        svc.inc_ref();
        true
    }

    /// Remove `svc` from its bucket and drop the table reference.
    fn unhash(&mut self, svc: &Service) -> bool {
        let mut state = svc.write_state();
        if state.flags & IP_VS_SVC_F_HASHED == 0 {
            error!(service = %svc.key(), "request for unhash of unhashed service");
            return false;
        }
        let key = svc.key();
        let table = if key.is_fwmark() {
            &mut self.fwm_table
        } else {
            &mut self.svc_table
        };
        table[key.bucket()].retain(|id| *id != svc.id());
        state.flags &= !IP_VS_SVC_F_HASHED;
        svc.dec_ref();
        true
    }

    fn find_addr(&self, protocol: Protocol, addr: u32, port: u16) -> Option<&Arc<Service>> {
        let bucket = svc_hashkey(protocol, addr, port);
        self.svc_table[bucket]
            .iter()
            .filter_map(|id| self.arena.get(id))
            .find(|s| {
                let k = s.key();
                k.addr == addr && k.port == port && k.protocol == protocol
            })
    }

    fn find_fwm(&self, fwmark: u32) -> Option<&Arc<Service>> {
        let bucket = svc_fwm_hashkey(fwmark);
        self.fwm_table[bucket]
            .iter()
            .filter_map(|id| self.arena.get(id))
            .find(|s| s.key().fwmark == fwmark)
    }

    fn find_exact(&self, key: &ServiceKey) -> Option<&Arc<Service>> {
        if key.is_fwmark() {
            self.find_fwm(key.fwmark)
        } else {
            self.find_addr(key.protocol, key.addr, key.port)
        }
    }

    fn bucket_mut(&mut self, fwm: bool, idx: usize) -> &mut Vec<ServiceId> {
        if fwm {
            &mut self.fwm_table[idx]
        } else {
            &mut self.svc_table[idx]
        }
    }

    /// Hashed services in table order: address buckets, then fwmark buckets.
    fn hashed(&self) -> impl Iterator<Item = &Arc<Service>> {
        self.svc_table
            .iter()
            .chain(self.fwm_table.iter())
            .flatten()
            .filter_map(|id| self.arena.get(id))
    }

    fn bind(dest: &Destination, svc: &Service) {
        svc.inc_ref();
        dest.set_service(Some(svc.id()));
    }

    /// Clear the back-reference of `dest`, freeing its service on the last
    /// reference.
    fn unbind(&mut self, dest: &Destination) {
        let Some(id) = dest.set_service(None) else {
            return;
        };
        let Some(svc) = self.arena.get(&id) else {
            return;
        };
        if svc.dec_ref() == 0 {
            debug!(service = %svc.key(), "service released by last destination");
            self.arena.remove(&id);
        }
    }
}

/// The virtual-service registry.
///
/// Lock order: `tables`, then a service's state, then `rs_table`.
#[derive(Debug)]
pub struct Registry {
    tables: RwLock<Tables>,
    /// Reverse index of masquerading destinations by real address.
    rs_table: RwLock<Vec<Vec<Arc<Destination>>>>,
    schedulers: Arc<SchedulerRegistry>,
    estimator: Arc<Estimator>,
    stats: Arc<Stats>,
}

impl Registry {
    pub fn new(schedulers: Arc<SchedulerRegistry>, estimator: Arc<Estimator>) -> Self {
        let stats = Arc::new(Stats::new());
        estimator.register(&stats);
        Self {
            tables: RwLock::new(Tables::new()),
            rs_table: RwLock::new(vec![Vec::new(); RTAB_SIZE]),
            schedulers,
            estimator,
            stats,
        }
    }

    pub fn schedulers(&self) -> &Arc<SchedulerRegistry> {
        &self.schedulers
    }

    pub fn estimator(&self) -> &Arc<Estimator> {
        &self.estimator
    }

    /// Registry-wide traffic counters.
    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    // ── Lookup ────────────────────────────────────────────────────

    /// Resolve the service for a packet.
    ///
    /// The fwmark table is consulted first when `fwmark` is nonzero. An
    /// address miss on TCP falls back to the FTP control port for passive
    /// data connections, then to the catch-all port 0 service.
    pub fn lookup(
        &self,
        fwmark: u32,
        protocol: Protocol,
        addr: u32,
        port: u16,
    ) -> Option<ServiceGuard> {
        let tables = self.read_tables();

        let hit = (fwmark != 0)
            .then(|| tables.find_fwm(fwmark))
            .flatten()
            .or_else(|| tables.find_addr(protocol, addr, port))
            .or_else(|| {
                let ftp_data = protocol == Protocol::Tcp
                    && tables.ftpsvc_counter > 0
                    && (port == FTPDATA || port >= PROT_SOCK);
                ftp_data
                    .then(|| tables.find_addr(protocol, addr, FTPPORT))
                    .flatten()
            })
            .or_else(|| {
                (tables.nullsvc_counter > 0)
                    .then(|| tables.find_addr(protocol, addr, 0))
                    .flatten()
            });

        let guard = hit.map(Service::acquire);
        trace!(
            fwmark,
            service = %fmt_addr_port(addr, port),
            %protocol,
            hit = guard.is_some(),
            "lookup service"
        );
        guard
    }

    /// Exact lookup by identity, without fallbacks.
    pub fn find_service(&self, key: &ServiceKey) -> Option<ServiceGuard> {
        self.read_tables().find_exact(key).map(Service::acquire)
    }

    /// Resolve a masquerading real server by its own address.
    pub fn lookup_real_service(
        &self,
        protocol: Protocol,
        addr: u32,
        port: u16,
    ) -> Option<Arc<Destination>> {
        let rs = self.rs_table.read().unwrap_or_else(PoisonError::into_inner);
        rs[rs_hashkey(addr, port)]
            .iter()
            .find(|d| {
                d.addr() == addr
                    && d.port() == port
                    && (d.vkey().protocol == protocol || d.vkey().is_fwmark())
            })
            .cloned()
    }

    // ── Service lifecycle ─────────────────────────────────────────

    /// Create and hash a service. The returned guard is the creator's use.
    pub fn add_service(&self, conf: &ServiceConfig) -> Result<ServiceGuard, DomainError> {
        let sched = self
            .schedulers
            .get(&conf.scheduler)
            .ok_or_else(|| IpvsError::SchedulerNotFound {
                name: conf.scheduler.clone(),
            })?;

        let mut tables = self.write_tables();
        if tables.find_exact(&conf.key).is_some() {
            return Err(IpvsError::ServiceExists {
                key: conf.key.to_string(),
            }
            .into());
        }

        let svc = Arc::new(Service::new(conf));
        let bound = BoundScheduler::bind(sched, &conf.key, &[])?;
        svc.write_state().scheduler = Some(bound);

        if !conf.key.is_fwmark() {
            if conf.key.port == FTPPORT {
                tables.ftpsvc_counter += 1;
            } else if conf.key.port == 0 {
                tables.nullsvc_counter += 1;
            }
        }

        self.estimator.register(svc.stats());
        tables.num_services += 1;
        tables.arena.insert(svc.id(), Arc::clone(&svc));
        tables.hash(&svc);

        info!(service = %conf.key, scheduler = %conf.scheduler, "service added");
        Ok(svc.acquire())
    }

    /// Update flags, timeout and netmask, rebinding the scheduler when the
    /// name changes. A failed rebind keeps the previous scheduler.
    pub fn edit_service(&self, svc: &ServiceGuard, conf: &ServiceConfig) -> Result<(), DomainError> {
        let sched = self
            .schedulers
            .get(&conf.scheduler)
            .ok_or_else(|| IpvsError::SchedulerNotFound {
                name: conf.scheduler.clone(),
            })?;

        let _tables = self.write_tables();
        svc.wait_while_used(1);

        let mut state = svc.write_state();
        state.flags = (conf.flags & !IP_VS_SVC_F_HASHED) | (state.flags & IP_VS_SVC_F_HASHED);
        state.timeout = conf.timeout;
        state.netmask = conf.netmask;

        let current = state.scheduler.as_ref().map(BoundScheduler::name);
        if current != Some(sched.name()) {
            let bound = BoundScheduler::bind(sched, svc.key(), &state.dests)?;
            state.scheduler = Some(bound);
            info!(service = %svc.key(), scheduler = %conf.scheduler, "scheduler rebound");
        }
        debug!(service = %svc.key(), "service edited");
        Ok(())
    }

    /// Unhash and tear down a service after in-flight users leave.
    pub fn del_service(&self, svc: &ServiceGuard) -> Result<(), DomainError> {
        let mut tables = self.write_tables();
        if !tables.unhash(svc) {
            return Err(IpvsError::ServiceNotFound {
                key: svc.key().to_string(),
            }
            .into());
        }
        svc.wait_while_used(1);
        self.delete_service(&mut tables, svc.service());
        info!(service = %svc.key(), "service deleted");
        Ok(())
    }

    /// Delete every service in both tables.
    ///
    /// The caller must not hold a [`ServiceGuard`] while flushing.
    pub fn flush(&self) {
        for fwm in [false, true] {
            for idx in 0..SVC_TAB_SIZE {
                loop {
                    let mut tables = self.write_tables();
                    let Some(id) = tables.bucket_mut(fwm, idx).first().copied() else {
                        break;
                    };
                    let Some(svc) = tables.arena.get(&id).cloned() else {
                        error!(service = %id, "hashed service missing from arena");
                        tables.bucket_mut(fwm, idx).remove(0);
                        continue;
                    };
                    tables.unhash(&svc);
                    svc.wait_while_used(0);
                    self.delete_service(&mut tables, &svc);
                }
            }
        }
        let purged = self.purge_trash();
        info!(purged, "registry flushed");
    }

    fn delete_service(&self, tables: &mut Tables, svc: &Arc<Service>) {
        tables.num_services = tables.num_services.saturating_sub(1);
        self.estimator.unregister(svc.stats());

        let dests = {
            let mut state = svc.write_state();
            state.scheduler = None;
            std::mem::take(&mut state.dests)
        };
        for dest in &dests {
            dest.set_available(false);
            self.delete_dest(tables, dest);
        }

        let key = svc.key();
        if !key.is_fwmark() {
            if key.port == FTPPORT {
                tables.ftpsvc_counter = tables.ftpsvc_counter.saturating_sub(1);
            } else if key.port == 0 {
                tables.nullsvc_counter = tables.nullsvc_counter.saturating_sub(1);
            }
        }

        if svc.refcnt() == 0 {
            tables.arena.remove(&svc.id());
            debug!(service = %key, "service freed");
        } else {
            debug!(service = %key, refcnt = svc.refcnt(), "service kept by trashed destinations");
        }
    }

    // ── Destination lifecycle ─────────────────────────────────────

    /// Add a destination, recycling a matching trash entry when present.
    pub fn add_dest(
        &self,
        svc: &ServiceGuard,
        udest: &DestConfig,
        route: RouteType,
    ) -> Result<Arc<Destination>, DomainError> {
        if udest.weight < 0 {
            return Err(IpvsError::NegativeWeight {
                weight: udest.weight,
            }
            .into());
        }
        let dest_name = fmt_addr_port(udest.addr, udest.port);

        let mut tables = self.write_tables();
        if svc.lookup_dest(udest.addr, udest.port).is_some() {
            return Err(IpvsError::DestExists { dest: dest_name }.into());
        }

        if let Some(dest) = self.trash_get_dest(&mut tables, svc.key(), udest.addr, udest.port) {
            self.update_dest(&mut tables, svc, &dest, udest, route);
            tables.trash.retain(|d| !Arc::ptr_eq(d, &dest));
            self.estimator.register(dest.stats());

            svc.wait_while_used(1);
            let mut state = svc.write_state();
            state.dests.insert(0, Arc::clone(&dest));
            state.notify_scheduler();
            info!(
                service = %svc.key(),
                dest = %dest_name,
                refcnt = dest.refcnt(),
                "destination restored from trash"
            );
            return Ok(dest);
        }

        if !matches!(route, RouteType::Local | RouteType::Unicast) {
            return Err(IpvsError::InvalidDestAddress { dest: dest_name }.into());
        }

        let dest = Arc::new(Destination::new(*svc.key(), udest.addr, udest.port));
        self.update_dest(&mut tables, svc, &dest, udest, route);
        self.estimator.register(dest.stats());
        dest.inc_ref();

        svc.wait_while_used(1);
        let mut state = svc.write_state();
        state.dests.insert(0, Arc::clone(&dest));
        state.notify_scheduler();
        info!(service = %svc.key(), dest = %dest_name, weight = udest.weight, "destination added");
        Ok(dest)
    }

    pub fn edit_dest(
        &self,
        svc: &ServiceGuard,
        udest: &DestConfig,
        route: RouteType,
    ) -> Result<(), DomainError> {
        if udest.weight < 0 {
            return Err(IpvsError::NegativeWeight {
                weight: udest.weight,
            }
            .into());
        }

        let mut tables = self.write_tables();
        let dest = svc
            .lookup_dest(udest.addr, udest.port)
            .ok_or_else(|| IpvsError::DestNotFound {
                dest: fmt_addr_port(udest.addr, udest.port),
            })?;
        self.update_dest(&mut tables, svc, &dest, udest, route);
        svc.wait_while_used(1);
        svc.read_state().notify_scheduler();
        debug!(service = %svc.key(), dest = %dest, weight = udest.weight, "destination edited");
        Ok(())
    }

    pub fn del_dest(&self, svc: &ServiceGuard, addr: u32, port: u16) -> Result<(), DomainError> {
        let mut tables = self.write_tables();
        let dest = svc
            .lookup_dest(addr, port)
            .ok_or_else(|| IpvsError::DestNotFound {
                dest: fmt_addr_port(addr, port),
            })?;

        svc.wait_while_used(1);
        {
            let mut state = svc.write_state();
            dest.set_available(false);
            state.dests.retain(|d| !Arc::ptr_eq(d, &dest));
            state.notify_scheduler();
        }
        self.delete_dest(&mut tables, &dest);
        info!(service = %svc.key(), dest = %dest, "destination deleted");
        Ok(())
    }

    /// Apply `udest` to `dest` and bind it to `svc`.
    ///
    /// A local address forces local-node forwarding. Only masquerading
    /// destinations stay in the real-server index.
    fn update_dest(
        &self,
        tables: &mut Tables,
        svc: &Service,
        dest: &Arc<Destination>,
        udest: &DestConfig,
        route: RouteType,
    ) {
        let mut conn_flags = udest.conn_flags | IP_VS_CONN_F_INACTIVE;
        if route == RouteType::Local {
            conn_flags = (conn_flags & !IP_VS_CONN_F_FWD_MASK) | IP_VS_CONN_F_LOCALNODE;
        }

        if conn_flags & IP_VS_CONN_F_FWD_MASK != 0 {
            conn_flags |= IP_VS_CONN_F_NOOUTPUT;
            self.rs_unhash(dest);
        } else {
            self.rs_hash(dest);
        }
        dest.apply(conn_flags, udest);

        match dest.service_id() {
            None => Tables::bind(dest, svc),
            Some(id) if id != svc.id() => {
                tables.unbind(dest);
                Tables::bind(dest, svc);
                dest.stats().zero();
            }
            Some(_) => {}
        }
    }

    /// Drop the list reference of an unlinked destination; free it or move
    /// it to the trash if something still holds it.
    fn delete_dest(&self, tables: &mut Tables, dest: &Arc<Destination>) {
        self.estimator.unregister(dest.stats());
        self.rs_unhash(dest);

        if dest.dec_ref() == 0 {
            if let Some(id) = dest.set_service(None)
                && let Some(svc) = tables.arena.get(&id)
            {
                svc.dec_ref();
            }
            debug!(dest = %dest, "destination freed");
        } else {
            debug!(dest = %dest, refcnt = dest.refcnt(), "moving destination into trash");
            tables.trash.insert(0, Arc::clone(dest));
            dest.inc_ref();
        }
    }

    /// Find a reusable trash entry for `key`, purging unreferenced entries
    /// encountered on the way.
    fn trash_get_dest(
        &self,
        tables: &mut Tables,
        key: &ServiceKey,
        addr: u32,
        port: u16,
    ) -> Option<Arc<Destination>> {
        let mut i = 0;
        while i < tables.trash.len() {
            let dest = Arc::clone(&tables.trash[i]);
            trace!(dest = %dest, refcnt = dest.refcnt(), "destination still in trash");
            if dest.matches_service(key, addr, port) {
                return Some(dest);
            }
            if dest.refcnt() == 1 {
                tables.trash.remove(i);
                Self::free_trashed(tables, &dest);
                continue;
            }
            i += 1;
        }
        None
    }

    fn free_trashed(tables: &mut Tables, dest: &Destination) {
        debug!(dest = %dest, "removing destination from trash");
        dest.dec_ref();
        tables.unbind(dest);
    }

    /// Free every trash entry no longer held from outside. Returns the
    /// number of entries freed.
    pub fn purge_trash(&self) -> usize {
        let mut tables = self.write_tables();
        let (free, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut tables.trash)
            .into_iter()
            .partition(|d| d.refcnt() == 1);
        tables.trash = keep;
        for dest in &free {
            Self::free_trashed(&mut tables, dest);
        }
        free.len()
    }

    /// Free the whole trash regardless of outstanding holders. Used at
    /// shutdown once the tables are flushed.
    pub fn trash_cleanup(&self) {
        let mut tables = self.write_tables();
        let trash = std::mem::take(&mut tables.trash);
        for dest in &trash {
            if dest.refcnt() > 1 {
                error!(dest = %dest, refcnt = dest.refcnt(), "freeing held destination at cleanup");
            }
            Self::free_trashed(&mut tables, dest);
        }
    }

    fn rs_hash(&self, dest: &Arc<Destination>) -> bool {
        let mut rs = self.rs_table.write().unwrap_or_else(PoisonError::into_inner);
        if dest.is_rs_hashed() {
            return false;
        }
        rs[rs_hashkey(dest.addr(), dest.port())].insert(0, Arc::clone(dest));
        dest.set_rs_hashed(true);
        true
    }

    fn rs_unhash(&self, dest: &Arc<Destination>) {
        let mut rs = self.rs_table.write().unwrap_or_else(PoisonError::into_inner);
        if dest.is_rs_hashed() {
            rs[rs_hashkey(dest.addr(), dest.port())].retain(|d| !Arc::ptr_eq(d, dest));
            dest.set_rs_hashed(false);
        }
    }

    // ── Statistics ────────────────────────────────────────────────

    /// Clear the counters of a service and all its destinations.
    pub fn zero_service(&self, svc: &Service) {
        let _tables = self.write_tables();
        for dest in &svc.read_state().dests {
            dest.stats().zero();
        }
        svc.stats().zero();
    }

    /// Clear every service, every destination and the global counters.
    pub fn zero_all(&self) {
        let services: Vec<Arc<Service>> = self.read_tables().hashed().cloned().collect();
        for svc in &services {
            self.zero_service(svc);
        }
        self.stats.zero();
    }

    // ── Introspection ─────────────────────────────────────────────

    pub fn num_services(&self) -> usize {
        self.read_tables().num_services
    }

    /// Destinations linked to hashed services.
    pub fn num_destinations(&self) -> usize {
        self.read_tables().hashed().map(|s| s.num_dests()).sum()
    }

    pub fn trash_len(&self) -> usize {
        self.read_tables().trash.len()
    }

    pub fn trash(&self) -> Vec<Arc<Destination>> {
        self.read_tables().trash.clone()
    }

    /// Services still allocated, including unhashed ones kept alive by
    /// trashed destinations.
    pub fn allocated_services(&self) -> usize {
        self.read_tables().arena.len()
    }

    pub fn is_allocated(&self, id: ServiceId) -> bool {
        self.read_tables().arena.contains_key(&id)
    }

    pub fn ftpsvc_count(&self) -> usize {
        self.read_tables().ftpsvc_counter
    }

    pub fn nullsvc_count(&self) -> usize {
        self.read_tables().nullsvc_counter
    }

    /// Hashed services in table order.
    pub fn services(&self) -> Vec<Arc<Service>> {
        self.read_tables().hashed().cloned().collect()
    }

    pub fn service_snapshots(&self) -> Vec<ServiceSnapshot> {
        self.read_tables().hashed().map(|s| s.snapshot()).collect()
    }

    pub fn dest_snapshots(&self, svc: &Service) -> Vec<DestSnapshot> {
        let _tables = self.read_tables();
        svc.read_state().dests.iter().map(|d| d.snapshot()).collect()
    }

    /// Every hashed service with its destinations, taken under one read lock.
    pub fn table_snapshot(&self) -> Vec<(ServiceSnapshot, Vec<DestSnapshot>)> {
        let tables = self.read_tables();
        tables
            .hashed()
            .map(|s| {
                let dests = s.read_state().dests.iter().map(|d| d.snapshot()).collect();
                (s.snapshot(), dests)
            })
            .collect()
    }

    fn read_tables(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tables(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}
