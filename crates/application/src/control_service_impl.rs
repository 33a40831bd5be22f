use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use domain::common::entity::Protocol;
use domain::common::error::DomainError;
use domain::syncd::engine::SyncDaemon;
use domain::syncd::entity::SyncRole;
use domain::timeout::entity::ProtocolTimeouts;
use domain::virtualserver::entity::{
    DestConfig, DestSnapshot, ServiceConfig, ServiceKey, ServiceSnapshot,
};
use domain::virtualserver::error::IpvsError;
use domain::virtualserver::registry::Registry;
use domain::virtualserver::service::ServiceGuard;
use ipvs_common::codec::{WireError, WireRecord, Writer};
use ipvs_common::control::{
    DaemonUser, GetCommand, GetInfo, IP_VS_CONN_TAB_SIZE, IP_VS_VERSION_CODE, SetCommand,
    TimeoutUser, version_banner,
};
use ipvs_common::dest::{DestUser, GetDests};
use ipvs_common::service::{GetServices, ServiceEntry, ServiceUser};
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::protocol_timeout::ProtocolTimeoutTable;
use ports::secondary::route_classifier::RouteClassifier;

use crate::report;

/// Identity of an administrative client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
    /// Holds the network-administration capability.
    pub admin: bool,
}

impl Caller {
    pub fn admin(uid: u32) -> Self {
        Self { uid, admin: true }
    }

    pub fn unprivileged(uid: u32) -> Self {
        Self { uid, admin: false }
    }
}

/// A decoded set command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetRequest {
    AddService(ServiceConfig),
    EditService(ServiceConfig),
    DelService(ServiceKey),
    Flush,
    AddDest(ServiceKey, DestConfig),
    EditDest(ServiceKey, DestConfig),
    DelDest {
        service: ServiceKey,
        addr: u32,
        port: u16,
    },
    SetTimeout(ProtocolTimeouts),
    StartDaemon {
        state: i32,
        mcast_ifn: String,
        syncid: i32,
    },
    StopDaemon {
        state: i32,
    },
    /// `None` zeroes every service and the global counters.
    Zero(Option<ServiceKey>),
}

impl SetRequest {
    /// Decode a raw set command. The argument length must match the
    /// opcode exactly.
    pub fn decode(cmd: u32, arg: &[u8]) -> Result<Self, DomainError> {
        let command = SetCommand::from_u32(cmd).ok_or(WireError::UnknownCommand(cmd))?;
        expect_len(command.as_str(), arg, command.arg_len())?;

        let req = match command {
            SetCommand::Flush => Self::Flush,
            SetCommand::Timeout => {
                Self::SetTimeout(ProtocolTimeouts::from_user(&TimeoutUser::from_bytes(arg)?))
            }
            SetCommand::StartDaemon => {
                let d = DaemonUser::from_bytes(arg)?;
                Self::StartDaemon {
                    state: d.state,
                    mcast_ifn: d.mcast_ifn().to_string(),
                    syncid: d.syncid,
                }
            }
            SetCommand::StopDaemon => Self::StopDaemon {
                state: DaemonUser::from_bytes(arg)?.state,
            },
            SetCommand::Add => Self::AddService(service_arg(arg)?),
            SetCommand::Edit => Self::EditService(service_arg(arg)?),
            SetCommand::Del => Self::DelService(service_arg(arg)?.key),
            SetCommand::Zero => {
                let key = service_arg(arg)?.key;
                if key.fwmark == 0 && key.addr == 0 && key.port == 0 {
                    Self::Zero(None)
                } else {
                    Self::Zero(Some(key))
                }
            }
            SetCommand::AddDest => Self::AddDest(service_arg(arg)?.key, dest_arg(arg)?),
            SetCommand::EditDest => Self::EditDest(service_arg(arg)?.key, dest_arg(arg)?),
            SetCommand::DelDest => {
                let d = dest_arg(arg)?;
                Self::DelDest {
                    service: service_arg(arg)?.key,
                    addr: d.addr,
                    port: d.port,
                }
            }
        };
        Ok(req)
    }

    /// Encode back into `(opcode, argument)`.
    pub fn encode(&self) -> (u32, Vec<u8>) {
        let mut w = Writer::with_capacity(self.command().arg_len());
        match self {
            Self::AddService(conf) | Self::EditService(conf) => conf.to_user().write(&mut w),
            Self::DelService(key) => service_user(key).write(&mut w),
            Self::Flush => {}
            Self::AddDest(key, dest) | Self::EditDest(key, dest) => {
                service_user(key).write(&mut w);
                dest.to_user().write(&mut w);
            }
            Self::DelDest {
                service,
                addr,
                port,
            } => {
                service_user(service).write(&mut w);
                DestUser {
                    addr: *addr,
                    port: *port,
                    ..Default::default()
                }
                .write(&mut w);
            }
            Self::SetTimeout(t) => t.to_user().write(&mut w),
            Self::StartDaemon {
                state,
                mcast_ifn,
                syncid,
            } => DaemonUser::new(*state, mcast_ifn, *syncid).write(&mut w),
            Self::StopDaemon { state } => DaemonUser::new(*state, "", 0).write(&mut w),
            Self::Zero(key) => match key {
                Some(key) => service_user(key).write(&mut w),
                None => ServiceUser::default().write(&mut w),
            },
        }
        (self.command().to_u32(), w.into_inner())
    }

    pub fn command(&self) -> SetCommand {
        match self {
            Self::AddService(_) => SetCommand::Add,
            Self::EditService(_) => SetCommand::Edit,
            Self::DelService(_) => SetCommand::Del,
            Self::Flush => SetCommand::Flush,
            Self::AddDest(..) => SetCommand::AddDest,
            Self::EditDest(..) => SetCommand::EditDest,
            Self::DelDest { .. } => SetCommand::DelDest,
            Self::SetTimeout(_) => SetCommand::Timeout,
            Self::StartDaemon { .. } => SetCommand::StartDaemon,
            Self::StopDaemon { .. } => SetCommand::StopDaemon,
            Self::Zero(_) => SetCommand::Zero,
        }
    }
}

fn expect_len(command: &'static str, arg: &[u8], expected: usize) -> Result<(), WireError> {
    if arg.len() == expected {
        Ok(())
    } else {
        Err(WireError::BadLength {
            command,
            got: arg.len(),
            expected,
        })
    }
}

fn service_arg(arg: &[u8]) -> Result<ServiceConfig, WireError> {
    ServiceUser::from_bytes(arg).map(|u| ServiceConfig::from_user(&u))
}

fn dest_arg(arg: &[u8]) -> Result<DestConfig, WireError> {
    let tail = arg.get(ServiceUser::SIZE..).unwrap_or_default();
    DestUser::from_bytes(tail).map(|u| DestConfig::from_user(&u))
}

fn service_user(key: &ServiceKey) -> ServiceUser {
    ServiceUser {
        protocol: key.protocol.to_u16(),
        addr: key.addr,
        port: key.port,
        fwmark: key.fwmark,
        ..Default::default()
    }
}

fn key_from_wire(protocol: u16, addr: u32, port: u16, fwmark: u32) -> ServiceKey {
    ServiceKey {
        protocol: Protocol::from_u16(protocol),
        addr,
        port,
        fwmark,
    }
}

/// Application-level control plane for the virtual-service registry.
///
/// Every administrative command runs under a single mutex, so commands are
/// totally ordered. Packet-path lookups go straight to the registry and
/// never take it.
pub struct ControlAppService {
    registry: Arc<Registry>,
    syncd: Arc<SyncDaemon>,
    timeouts: Arc<dyn ProtocolTimeoutTable>,
    routes: Arc<dyn RouteClassifier>,
    metrics: Arc<dyn MetricsPort>,
    admin: Mutex<()>,
}

impl ControlAppService {
    pub fn new(
        registry: Arc<Registry>,
        syncd: Arc<SyncDaemon>,
        timeouts: Arc<dyn ProtocolTimeoutTable>,
        routes: Arc<dyn RouteClassifier>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        Self {
            registry,
            syncd,
            timeouts,
            routes,
            metrics,
            admin: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    // ── Wire entry points ─────────────────────────────────────────

    /// Run a raw set command on behalf of `caller`.
    pub fn set_ctl(&self, caller: &Caller, cmd: u32, arg: &[u8]) -> Result<(), DomainError> {
        let name = SetCommand::from_u32(cmd).map_or("unknown", SetCommand::as_str);
        if !caller.admin {
            warn!(uid = caller.uid, command = name, "set command without admin capability");
            let err = DomainError::PermissionDenied;
            self.record(name, Err(&err));
            return Err(err);
        }
        match SetRequest::decode(cmd, arg) {
            Ok(req) => self.execute(&req),
            Err(e) => {
                debug!(command = name, len = arg.len(), error = %e, "set command rejected");
                self.record(name, Err(&e));
                Err(e)
            }
        }
    }

    /// Run a raw get command on behalf of `caller` and return the reply.
    pub fn get_ctl(&self, caller: &Caller, cmd: u32, arg: &[u8]) -> Result<Vec<u8>, DomainError> {
        let name = GetCommand::from_u32(cmd).map_or("unknown", GetCommand::as_str);
        let result = if caller.admin {
            self.get_reply(cmd, arg)
        } else {
            warn!(uid = caller.uid, command = name, "get command without admin capability");
            Err(DomainError::PermissionDenied)
        };
        self.record(name, result.as_ref().map(|_| ()));
        debug!(command = name, ok = result.is_ok(), "get command");
        result
    }

    // ── Typed operations ──────────────────────────────────────────

    /// Execute a decoded set command under the administrative mutex.
    pub fn execute(&self, req: &SetRequest) -> Result<(), DomainError> {
        let result = {
            let _admin = self.lock_admin();
            self.apply(req)
        };
        let name = req.command().as_str();
        match &result {
            Ok(()) => debug!(command = name, "set command applied"),
            Err(e) => debug!(command = name, error = %e, "set command failed"),
        }
        self.record(name, result.as_ref().map(|_| ()));
        self.refresh_gauges();
        result
    }

    pub fn add_service(&self, conf: &ServiceConfig) -> Result<(), DomainError> {
        self.execute(&SetRequest::AddService(conf.clone()))
    }

    pub fn add_dest(&self, key: &ServiceKey, dest: &DestConfig) -> Result<(), DomainError> {
        self.execute(&SetRequest::AddDest(*key, *dest))
    }

    pub fn flush(&self) -> Result<(), DomainError> {
        self.execute(&SetRequest::Flush)
    }

    pub fn timeouts(&self) -> ProtocolTimeouts {
        self.timeouts.timeouts()
    }

    pub fn info(&self) -> GetInfo {
        GetInfo {
            version: IP_VS_VERSION_CODE,
            size: IP_VS_CONN_TAB_SIZE,
            num_services: u32::try_from(self.registry.num_services()).unwrap_or(u32::MAX),
        }
    }

    pub fn services(&self) -> Vec<ServiceSnapshot> {
        self.registry.service_snapshots()
    }

    pub fn dests(&self, key: &ServiceKey) -> Result<Vec<DestSnapshot>, DomainError> {
        let svc = self.exact_service(key)?;
        Ok(self.registry.dest_snapshots(&svc))
    }

    // ── Text reports ──────────────────────────────────────────────

    /// Service table report.
    pub fn ip_vs_report(&self) -> String {
        report::render_services(&self.registry.table_snapshot())
    }

    /// Global statistics report.
    pub fn stats_report(&self) -> String {
        report::render_stats(&self.registry.stats().snapshot())
    }

    /// Read `length` bytes of the service table report at `offset`.
    pub fn read_ip_vs(&self, offset: usize, length: usize) -> Vec<u8> {
        report::read_at(&self.ip_vs_report(), offset, length).to_vec()
    }

    /// Read `length` bytes of the statistics report at `offset`.
    pub fn read_stats(&self, offset: usize, length: usize) -> Vec<u8> {
        report::read_at(&self.stats_report(), offset, length).to_vec()
    }

    // ── Internals ─────────────────────────────────────────────────

    fn apply(&self, req: &SetRequest) -> Result<(), DomainError> {
        match req {
            SetRequest::Flush => {
                self.registry.flush();
                Ok(())
            }
            SetRequest::SetTimeout(update) => {
                let mut current = self.timeouts.timeouts();
                current.merge_nonzero(update);
                self.timeouts.set_timeouts(&current);
                Ok(())
            }
            SetRequest::StartDaemon {
                state,
                mcast_ifn,
                syncid,
            } => self.syncd.start(*state, mcast_ifn, *syncid),
            SetRequest::StopDaemon { state } => self.syncd.stop(*state),
            SetRequest::Zero(None) => {
                self.registry.zero_all();
                Ok(())
            }
            SetRequest::AddService(conf) => {
                check_protocol(&conf.key)?;
                // The creator's use ends here.
                self.registry.add_service(conf).map(drop)
            }
            SetRequest::EditService(conf) => {
                let svc = self.exact_service(&conf.key)?;
                self.registry.edit_service(&svc, conf)
            }
            SetRequest::DelService(key) => {
                let svc = self.exact_service(key)?;
                self.registry.del_service(&svc)
            }
            SetRequest::Zero(Some(key)) => {
                let svc = self.exact_service(key)?;
                self.registry.zero_service(&svc);
                Ok(())
            }
            SetRequest::AddDest(key, udest) => {
                let svc = self.exact_service(key)?;
                let route = self.routes.classify(udest.addr);
                self.registry.add_dest(&svc, udest, route).map(drop)
            }
            SetRequest::EditDest(key, udest) => {
                let svc = self.exact_service(key)?;
                let route = self.routes.classify(udest.addr);
                self.registry.edit_dest(&svc, udest, route)
            }
            SetRequest::DelDest {
                service,
                addr,
                port,
            } => {
                let svc = self.exact_service(service)?;
                self.registry.del_dest(&svc, *addr, *port)
            }
        }
    }

    /// Exact lookup for commands that name an existing service. A fwmark
    /// service registered under another protocol does not match.
    fn exact_service(&self, key: &ServiceKey) -> Result<ServiceGuard, DomainError> {
        check_protocol(key)?;
        self.registry
            .find_service(key)
            .filter(|svc| svc.key().protocol == key.protocol)
            .ok_or_else(|| {
                IpvsError::ServiceNotFound {
                    key: key.to_string(),
                }
                .into()
            })
    }

    fn get_reply(&self, cmd: u32, arg: &[u8]) -> Result<Vec<u8>, DomainError> {
        let command = GetCommand::from_u32(cmd).ok_or(WireError::UnknownCommand(cmd))?;
        let name = command.as_str();
        if !command.is_variable() {
            expect_len(name, arg, command.arg_len())?;
        }

        let _admin = self.lock_admin();
        match command {
            GetCommand::Version => {
                let mut reply = version_banner().into_bytes();
                reply.push(0);
                Ok(reply)
            }
            GetCommand::Info => Ok(self.info().to_bytes()),
            GetCommand::Services => {
                let header = GetServices::from_bytes(arg)?;
                let len = GetServices::reply_len(header.num_services as usize);
                expect_len(name, arg, len)?;

                let mut w = Writer::with_capacity(len);
                header.write(&mut w);
                for snap in self
                    .registry
                    .service_snapshots()
                    .iter()
                    .take(header.num_services as usize)
                {
                    snap.to_entry().write(&mut w);
                }
                w.zeros(len - w.len());
                Ok(w.into_inner())
            }
            GetCommand::Service => {
                let entry = ServiceEntry::from_bytes(arg)?;
                let u = entry.service;
                let key = key_from_wire(u.protocol, u.addr, u.port, u.fwmark);
                let svc = self.registry.find_service(&key).ok_or_else(|| {
                    DomainError::from(IpvsError::ServiceNotFound {
                        key: key.to_string(),
                    })
                })?;
                Ok(svc.snapshot().to_entry().to_bytes())
            }
            GetCommand::Dests => {
                let header = GetDests::from_bytes(arg)?;
                let len = GetDests::reply_len(header.num_dests as usize);
                expect_len(name, arg, len)?;

                let key = key_from_wire(header.protocol, header.addr, header.port, header.fwmark);
                let svc = self.registry.find_service(&key).ok_or_else(|| {
                    DomainError::from(IpvsError::ServiceNotFound {
                        key: key.to_string(),
                    })
                })?;

                let mut w = Writer::with_capacity(len);
                header.write(&mut w);
                for d in self
                    .registry
                    .dest_snapshots(&svc)
                    .iter()
                    .take(header.num_dests as usize)
                {
                    d.to_entry().write(&mut w);
                }
                w.zeros(len - w.len());
                Ok(w.into_inner())
            }
            GetCommand::Timeout => Ok(self.timeouts.timeouts().to_user().to_bytes()),
            GetCommand::Daemon => {
                let mut w = Writer::with_capacity(DaemonUser::SIZE * 2);
                for role in [SyncRole::Master, SyncRole::Backup] {
                    self.syncd
                        .get(role)
                        .map_or_else(DaemonUser::default, |info| info.to_user())
                        .write(&mut w);
                }
                Ok(w.into_inner())
            }
        }
    }

    fn lock_admin(&self) -> MutexGuard<'_, ()> {
        self.admin.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, command: &str, result: Result<(), &DomainError>) {
        let label = match result {
            Ok(()) => "ok",
            Err(e) => e.as_str(),
        };
        self.metrics.record_control_command(command, label);
    }

    fn refresh_gauges(&self) {
        self.metrics
            .set_services(self.registry.num_services() as u64);
        self.metrics
            .set_destinations(self.registry.num_destinations() as u64);
        self.metrics
            .set_trash_destinations(self.registry.trash_len() as u64);
    }
}

fn check_protocol(key: &ServiceKey) -> Result<(), DomainError> {
    if key.protocol.is_supported() {
        Ok(())
    } else {
        Err(IpvsError::UnsupportedProtocol {
            protocol: key.protocol.to_u16(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::common::error::{EEXIST, EFAULT, EINVAL, ENOENT, EPERM, ESRCH};
    use domain::stats::estimator::Estimator;
    use domain::virtualserver::entity::{ForwardMethod, RouteType};
    use domain::virtualserver::scheduler::SchedulerRegistry;
    use ipvs_common::control::{
        IP_VS_SO_GET_DAEMON, IP_VS_SO_GET_DESTS, IP_VS_SO_GET_INFO, IP_VS_SO_GET_SERVICE,
        IP_VS_SO_GET_SERVICES, IP_VS_SO_GET_TIMEOUT, IP_VS_SO_GET_VERSION, IP_VS_SO_SET_ADD,
        IP_VS_SO_SET_INSERT, IP_VS_SO_SET_MAX, IP_VS_STATE_BACKUP, IP_VS_STATE_MASTER,
    };
    use ipvs_common::dest::DestEntry;
    use ports::test_utils::{FirstScheduler, MemoryTimeouts, RecordingMetrics, StaticRoutes};

    const VIP: u32 = 0x0A00_0001;
    const RIP: u32 = 0x0A00_0002;

    fn make_service_with(
        routes: StaticRoutes,
    ) -> (ControlAppService, Arc<RecordingMetrics>, Arc<MemoryTimeouts>) {
        let schedulers = Arc::new(SchedulerRegistry::new());
        schedulers.register(FirstScheduler::new("rr")).unwrap();
        schedulers.register(FirstScheduler::new("wlc")).unwrap();
        let registry = Arc::new(Registry::new(schedulers, Arc::new(Estimator::new())));
        let metrics = Arc::new(RecordingMetrics::default());
        let timeouts = Arc::new(MemoryTimeouts::default());
        let svc = ControlAppService::new(
            registry,
            Arc::new(SyncDaemon::new()),
            Arc::clone(&timeouts) as Arc<dyn ProtocolTimeoutTable>,
            Arc::new(routes),
            Arc::clone(&metrics) as Arc<dyn MetricsPort>,
        );
        (svc, metrics, timeouts)
    }

    fn make_control() -> ControlAppService {
        make_service_with(StaticRoutes::default()).0
    }

    fn admin() -> Caller {
        Caller::admin(0)
    }

    fn tcp_key() -> ServiceKey {
        ServiceKey::addr(Protocol::Tcp, VIP, 80)
    }

    fn set(ctl: &ControlAppService, req: &SetRequest) -> Result<(), DomainError> {
        let (cmd, arg) = req.encode();
        ctl.set_ctl(&admin(), cmd, &arg)
    }

    fn add_tcp(ctl: &ControlAppService) {
        set(ctl, &SetRequest::AddService(ServiceConfig::new(tcp_key(), "rr"))).unwrap();
    }

    fn errno(r: Result<impl Sized, DomainError>) -> i32 {
        r.err().map_or(0, |e| e.errno())
    }

    // ── Decoding ──────────────────────────────────────────────────

    #[test]
    fn decode_rejects_wrong_length() {
        let err = SetRequest::decode(IP_VS_SO_SET_ADD, &[0u8; 10]).unwrap_err();
        assert_eq!(err.errno(), EINVAL);
    }

    #[test]
    fn decode_rejects_reserved_and_out_of_range() {
        assert_eq!(
            SetRequest::decode(IP_VS_SO_SET_INSERT, &[]).unwrap_err().errno(),
            EINVAL
        );
        assert_eq!(
            SetRequest::decode(IP_VS_SO_SET_MAX + 1, &[]).unwrap_err().errno(),
            EINVAL
        );
    }

    #[test]
    fn decode_zero_all_descriptor() {
        let (cmd, arg) = SetRequest::Zero(None).encode();
        assert_eq!(SetRequest::decode(cmd, &arg).unwrap(), SetRequest::Zero(None));
    }

    #[test]
    fn decode_deldest_reads_both_halves() {
        let req = SetRequest::DelDest {
            service: tcp_key(),
            addr: RIP,
            port: 8080,
        };
        let (cmd, arg) = req.encode();
        assert_eq!(arg.len(), ServiceUser::SIZE + DestUser::SIZE);
        assert_eq!(SetRequest::decode(cmd, &arg).unwrap(), req);
    }

    // ── Set dispatch ──────────────────────────────────────────────

    #[test]
    fn unprivileged_caller_is_refused() {
        let ctl = make_control();
        let (cmd, arg) = SetRequest::Flush.encode();
        assert_eq!(errno(ctl.set_ctl(&Caller::unprivileged(1000), cmd, &arg)), EPERM);
        assert_eq!(
            errno(ctl.get_ctl(&Caller::unprivileged(1000), IP_VS_SO_GET_INFO, &[0; 12])),
            EPERM
        );
    }

    #[test]
    fn add_then_duplicate() {
        let ctl = make_control();
        add_tcp(&ctl);
        let again = set(&ctl, &SetRequest::AddService(ServiceConfig::new(tcp_key(), "rr")));
        assert_eq!(errno(again), EEXIST);
        assert_eq!(ctl.registry().num_services(), 1);
    }

    #[test]
    fn unsupported_protocol_is_efault() {
        let ctl = make_control();
        let key = ServiceKey::addr(Protocol::Other(132), VIP, 80);
        let r = set(&ctl, &SetRequest::AddService(ServiceConfig::new(key, "rr")));
        assert_eq!(errno(r), EFAULT);
    }

    #[test]
    fn unknown_scheduler_is_enoent() {
        let ctl = make_control();
        let r = set(&ctl, &SetRequest::AddService(ServiceConfig::new(tcp_key(), "sed")));
        assert_eq!(errno(r), ENOENT);
    }

    #[test]
    fn commands_on_missing_service_are_esrch() {
        let ctl = make_control();
        let dest = DestConfig::new(RIP, 8080, 1);
        assert_eq!(errno(set(&ctl, &SetRequest::DelService(tcp_key()))), ESRCH);
        assert_eq!(
            errno(set(&ctl, &SetRequest::EditService(ServiceConfig::new(tcp_key(), "rr")))),
            ESRCH
        );
        assert_eq!(errno(set(&ctl, &SetRequest::AddDest(tcp_key(), dest))), ESRCH);
        assert_eq!(errno(set(&ctl, &SetRequest::Zero(Some(tcp_key())))), ESRCH);
    }

    #[test]
    fn fwmark_protocol_mismatch_is_esrch() {
        let ctl = make_control();
        let key = ServiceKey::fwmark(Protocol::Tcp, 7);
        set(&ctl, &SetRequest::AddService(ServiceConfig::new(key, "rr"))).unwrap();
        let udp = ServiceKey::fwmark(Protocol::Udp, 7);
        assert_eq!(errno(set(&ctl, &SetRequest::DelService(udp))), ESRCH);
        set(&ctl, &SetRequest::DelService(key)).unwrap();
    }

    #[test]
    fn dest_lifecycle_through_wire() {
        let ctl = make_control();
        add_tcp(&ctl);
        let dest = DestConfig::new(RIP, 8080, 1);
        set(&ctl, &SetRequest::AddDest(tcp_key(), dest)).unwrap();
        assert_eq!(errno(set(&ctl, &SetRequest::AddDest(tcp_key(), dest))), EEXIST);

        let heavier = DestConfig { weight: 9, ..dest };
        set(&ctl, &SetRequest::EditDest(tcp_key(), heavier)).unwrap();
        assert_eq!(ctl.dests(&tcp_key()).unwrap()[0].weight, 9);

        let del = SetRequest::DelDest {
            service: tcp_key(),
            addr: RIP,
            port: 8080,
        };
        set(&ctl, &del).unwrap();
        assert_eq!(errno(set(&ctl, &del)), ENOENT);
    }

    #[test]
    fn local_destination_becomes_localnode() {
        let routes = StaticRoutes::default().with(RIP, RouteType::Local);
        let (ctl, _, _) = make_service_with(routes);
        add_tcp(&ctl);
        let dest = DestConfig::new(RIP, 80, 1).with_forward(ForwardMethod::Tunnel);
        set(&ctl, &SetRequest::AddDest(tcp_key(), dest)).unwrap();
        assert_eq!(
            ctl.dests(&tcp_key()).unwrap()[0].forward(),
            ForwardMethod::LocalNode
        );
    }

    #[test]
    fn non_unicast_destination_is_rejected() {
        let routes = StaticRoutes::default().with(0xE000_0001, RouteType::Other);
        let (ctl, _, _) = make_service_with(routes);
        add_tcp(&ctl);
        let dest = DestConfig::new(0xE000_0001, 80, 1);
        assert_eq!(errno(set(&ctl, &SetRequest::AddDest(tcp_key(), dest))), EINVAL);
    }

    #[test]
    fn timeout_set_keeps_zero_fields() {
        let (ctl, _, timeouts) = make_service_with(StaticRoutes::default());
        let update = ProtocolTimeouts {
            tcp: 60,
            tcp_fin: 0,
            udp: 0,
        };
        set(&ctl, &SetRequest::SetTimeout(update)).unwrap();
        let t = timeouts.timeouts();
        assert_eq!(t.tcp, 60);
        assert_eq!(t.tcp_fin, ProtocolTimeouts::default().tcp_fin);
        assert_eq!(t.udp, ProtocolTimeouts::default().udp);
    }

    #[test]
    fn daemon_start_stop() {
        let ctl = make_control();
        let start = SetRequest::StartDaemon {
            state: IP_VS_STATE_MASTER,
            mcast_ifn: "eth0".to_string(),
            syncid: 0x1FF,
        };
        set(&ctl, &start).unwrap();
        assert_eq!(errno(set(&ctl, &start)), EEXIST);

        let reply = ctl.get_ctl(&admin(), IP_VS_SO_GET_DAEMON, &[0; 48]).unwrap();
        let master = DaemonUser::from_bytes(&reply[..24]).unwrap();
        let backup = DaemonUser::from_bytes(&reply[24..]).unwrap();
        assert_eq!(master.state, IP_VS_STATE_MASTER);
        assert_eq!(master.mcast_ifn(), "eth0");
        assert_eq!(master.syncid, 0xFF);
        assert_eq!(backup, DaemonUser::default());

        let stop_backup = SetRequest::StopDaemon {
            state: IP_VS_STATE_BACKUP,
        };
        assert_eq!(errno(set(&ctl, &stop_backup)), ESRCH);
        set(
            &ctl,
            &SetRequest::StopDaemon {
                state: IP_VS_STATE_MASTER,
            },
        )
        .unwrap();
    }

    #[test]
    fn zero_all_clears_counters() {
        let ctl = make_control();
        add_tcp(&ctl);
        ctl.registry().stats().record_conn();
        let svc = ctl.registry().find_service(&tcp_key()).unwrap();
        svc.stats().record_inbound(100);
        drop(svc);

        set(&ctl, &SetRequest::Zero(None)).unwrap();
        assert_eq!(ctl.registry().stats().snapshot().conns, 0);
        assert_eq!(ctl.services()[0].stats.inbytes, 0);
    }

    #[test]
    fn flush_empties_registry() {
        let ctl = make_control();
        add_tcp(&ctl);
        set(&ctl, &SetRequest::AddDest(tcp_key(), DestConfig::new(RIP, 80, 1))).unwrap();
        set(&ctl, &SetRequest::Flush).unwrap();
        assert_eq!(ctl.registry().num_services(), 0);
        assert_eq!(ctl.registry().trash_len(), 0);
    }

    #[test]
    fn commands_are_recorded() {
        let (ctl, metrics, _) = make_service_with(StaticRoutes::default());
        add_tcp(&ctl);
        let _ = set(&ctl, &SetRequest::DelService(ServiceKey::addr(Protocol::Tcp, VIP, 81)));
        let cmds = metrics.commands();
        assert_eq!(cmds[0], ("add".to_string(), "ok".to_string()));
        assert_eq!(cmds[1], ("del".to_string(), "no_such_service".to_string()));
        assert_eq!(metrics.services.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    // ── Get dispatch ──────────────────────────────────────────────

    #[test]
    fn version_reply_is_banner_with_nul() {
        let ctl = make_control();
        let reply = ctl.get_ctl(&admin(), IP_VS_SO_GET_VERSION, &[0; 64]).unwrap();
        assert_eq!(reply.len(), 44);
        assert_eq!(reply.last(), Some(&0));
        assert!(reply.starts_with(b"IP Virtual Server version 1.2.1"));
    }

    #[test]
    fn info_counts_services() {
        let ctl = make_control();
        add_tcp(&ctl);
        let reply = ctl.get_ctl(&admin(), IP_VS_SO_GET_INFO, &[0; 12]).unwrap();
        let info = GetInfo::from_bytes(&reply).unwrap();
        assert_eq!(info.version, 0x0001_0201);
        assert_eq!(info.size, 4096);
        assert_eq!(info.num_services, 1);
    }

    #[test]
    fn get_rejects_wrong_length() {
        let ctl = make_control();
        assert_eq!(errno(ctl.get_ctl(&admin(), IP_VS_SO_GET_INFO, &[0; 8])), EINVAL);
        assert_eq!(errno(ctl.get_ctl(&admin(), IP_VS_SO_GET_TIMEOUT, &[])), EINVAL);
    }

    #[test]
    fn services_reply_matches_requested_count() {
        let ctl = make_control();
        add_tcp(&ctl);
        set(
            &ctl,
            &SetRequest::AddService(ServiceConfig::new(ServiceKey::fwmark(Protocol::Tcp, 3), "wlc")),
        )
        .unwrap();

        let header = GetServices {
            num_services: 3,
            _pad: 0,
        };
        let mut arg = header.to_bytes();
        arg.resize(GetServices::reply_len(3), 0);
        let reply = ctl.get_ctl(&admin(), IP_VS_SO_GET_SERVICES, &arg).unwrap();
        assert_eq!(reply.len(), GetServices::reply_len(3));

        let first = ServiceEntry::from_bytes(&reply[8..]).unwrap();
        assert_eq!(first.service.addr, VIP);
        assert_eq!(first.service.sched_name(), "rr");
        let second = ServiceEntry::from_bytes(&reply[8 + 104..]).unwrap();
        assert_eq!(second.service.fwmark, 3);
        assert!(reply[8 + 208..].iter().all(|&b| b == 0));

        let short = &arg[..arg.len() - 1];
        assert_eq!(errno(ctl.get_ctl(&admin(), IP_VS_SO_GET_SERVICES, short)), EINVAL);
    }

    #[test]
    fn service_reply_by_key() {
        let ctl = make_control();
        add_tcp(&ctl);
        let query = ServiceEntry {
            service: service_user(&tcp_key()),
            ..Default::default()
        };
        let reply = ctl
            .get_ctl(&admin(), IP_VS_SO_GET_SERVICE, &query.to_bytes())
            .unwrap();
        let entry = ServiceEntry::from_bytes(&reply).unwrap();
        assert_eq!(entry.service.port, 80);
        assert_eq!(entry.num_dests, 0);

        let missing = ServiceEntry {
            service: service_user(&ServiceKey::addr(Protocol::Udp, VIP, 80)),
            ..Default::default()
        };
        assert_eq!(
            errno(ctl.get_ctl(&admin(), IP_VS_SO_GET_SERVICE, &missing.to_bytes())),
            ESRCH
        );
    }

    #[test]
    fn dests_reply_in_list_order() {
        let ctl = make_control();
        add_tcp(&ctl);
        for port in [8080, 8081] {
            set(&ctl, &SetRequest::AddDest(tcp_key(), DestConfig::new(RIP, port, 1))).unwrap();
        }
        let header = GetDests {
            protocol: Protocol::Tcp.to_u16(),
            addr: VIP,
            port: 80,
            num_dests: 2,
            ..Default::default()
        };
        let mut arg = header.to_bytes();
        arg.resize(GetDests::reply_len(2), 0);
        let reply = ctl.get_ctl(&admin(), IP_VS_SO_GET_DESTS, &arg).unwrap();
        let first = DestEntry::from_bytes(&reply[24..]).unwrap();
        let second = DestEntry::from_bytes(&reply[24 + 96..]).unwrap();
        // New destinations go to the head of the list.
        assert_eq!(first.dest.port, 8081);
        assert_eq!(second.dest.port, 8080);
    }

    #[test]
    fn timeout_reply() {
        let ctl = make_control();
        let reply = ctl.get_ctl(&admin(), IP_VS_SO_GET_TIMEOUT, &[0; 12]).unwrap();
        let t = TimeoutUser::from_bytes(&reply).unwrap();
        assert_eq!(t.tcp_timeout, 900);
        assert_eq!(t.tcp_fin_timeout, 120);
        assert_eq!(t.udp_timeout, 300);
    }

    #[test]
    fn unknown_get_is_einval() {
        let ctl = make_control();
        assert_eq!(errno(ctl.get_ctl(&admin(), IP_VS_SO_GET_DAEMON + 1, &[])), EINVAL);
    }

    #[test]
    fn every_set_command_rejects_off_by_one_lengths() {
        let ctl = make_control();
        for cmd in SetCommand::ALL {
            let exact = cmd.arg_len();
            for len in [exact.wrapping_sub(1), exact + 1] {
                if len == usize::MAX {
                    continue;
                }
                let arg = vec![0u8; len];
                assert_eq!(
                    errno(ctl.set_ctl(&admin(), cmd.to_u32(), &arg)),
                    EINVAL,
                    "{cmd} with {len} bytes (exact {exact})"
                );
            }
        }
        assert_eq!(ctl.registry().num_services(), 0);
    }

    #[test]
    fn every_get_command_rejects_off_by_one_lengths() {
        let ctl = make_control();
        add_tcp(&ctl);
        for cmd in GetCommand::ALL {
            let exact = cmd.arg_len();
            for len in [exact - 1, exact + 1] {
                let arg = vec![0u8; len];
                assert_eq!(
                    errno(ctl.get_ctl(&admin(), cmd.to_u32(), &arg)),
                    EINVAL,
                    "{cmd} with {len} bytes (exact {exact})"
                );
            }
        }
    }

    #[test]
    fn dests_buffer_one_byte_short_is_einval() {
        let ctl = make_control();
        add_tcp(&ctl);
        set(&ctl, &SetRequest::AddDest(tcp_key(), DestConfig::new(RIP, 8080, 1))).unwrap();
        let header = GetDests {
            protocol: Protocol::Tcp.to_u16(),
            addr: VIP,
            port: 80,
            num_dests: 1,
            ..Default::default()
        };
        let mut arg = header.to_bytes();
        arg.resize(GetDests::reply_len(1), 0);
        assert!(ctl.get_ctl(&admin(), IP_VS_SO_GET_DESTS, &arg).is_ok());

        let short = &arg[..arg.len() - 1];
        assert_eq!(errno(ctl.get_ctl(&admin(), IP_VS_SO_GET_DESTS, short)), EINVAL);
        arg.push(0);
        assert_eq!(errno(ctl.get_ctl(&admin(), IP_VS_SO_GET_DESTS, &arg)), EINVAL);
    }

    // ── Reports ───────────────────────────────────────────────────

    #[test]
    fn reports_follow_registry() {
        let ctl = make_control();
        add_tcp(&ctl);
        set(&ctl, &SetRequest::AddDest(tcp_key(), DestConfig::new(RIP, 8080, 2))).unwrap();
        let text = ctl.ip_vs_report();
        assert_eq!(text.len(), 5 * 64);
        assert!(text.contains("TCP  0A000001:0050 rr"));
        assert!(text.contains("  -> 0A000002:1F90      Masq    2"));

        assert_eq!(ctl.read_ip_vs(0, 3), b"IP ".to_vec());
        assert_eq!(ctl.read_stats(0, 1000).len(), report::STATS_REPORT_LEN);
    }
}
