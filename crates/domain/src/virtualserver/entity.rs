use serde::Serialize;

use ipvs_common::control::{
    IP_VS_CONN_F_BYPASS, IP_VS_CONN_F_DROUTE, IP_VS_CONN_F_FWD_MASK, IP_VS_CONN_F_LOCALNODE,
    IP_VS_CONN_F_MASQ, IP_VS_CONN_F_TUNNEL, IP_VS_SVC_F_PERSISTENT,
};
use ipvs_common::dest::{DestEntry, DestUser};
use ipvs_common::service::{ServiceEntry, ServiceUser};

use crate::common::entity::{Protocol, fmt_addr_port};
use crate::stats::entity::StatsSnapshot;

pub const SVC_TAB_BITS: u32 = 8;
pub const SVC_TAB_SIZE: usize = 1 << SVC_TAB_BITS;
const SVC_TAB_MASK: u32 = (1 << SVC_TAB_BITS) - 1;

pub const RTAB_BITS: u32 = 4;
pub const RTAB_SIZE: usize = 1 << RTAB_BITS;
const RTAB_MASK: u32 = (1 << RTAB_BITS) - 1;

pub const FTPPORT: u16 = 21;
pub const FTPDATA: u16 = 20;
pub const PROT_SOCK: u16 = 1024;

/// Bucket of a `(protocol, addr, port)` service.
pub fn svc_hashkey(protocol: Protocol, addr: u32, port: u16) -> usize {
    let porth = u32::from(port);
    let key = u32::from(protocol.to_u16()) ^ addr ^ (porth >> SVC_TAB_BITS) ^ porth;
    (key & SVC_TAB_MASK) as usize
}

/// Bucket of a firewall-mark service.
pub fn svc_fwm_hashkey(fwmark: u32) -> usize {
    (fwmark & SVC_TAB_MASK) as usize
}

/// Bucket of a real server in the reverse index.
pub fn rs_hashkey(addr: u32, port: u16) -> usize {
    let porth = u32::from(port);
    ((addr ^ (porth >> RTAB_BITS) ^ porth) & RTAB_MASK) as usize
}

/// Identity of a virtual service.
///
/// A nonzero `fwmark` selects the firewall-mark table and makes `addr` and
/// `port` irrelevant for lookups; they are still stored as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceKey {
    pub protocol: Protocol,
    pub addr: u32,
    pub port: u16,
    pub fwmark: u32,
}

impl ServiceKey {
    pub fn addr(protocol: Protocol, addr: u32, port: u16) -> Self {
        Self {
            protocol,
            addr,
            port,
            fwmark: 0,
        }
    }

    pub fn fwmark(protocol: Protocol, fwmark: u32) -> Self {
        Self {
            protocol,
            addr: 0,
            port: 0,
            fwmark,
        }
    }

    pub fn is_fwmark(&self) -> bool {
        self.fwmark != 0
    }

    /// Bucket in whichever table this key belongs to.
    pub fn bucket(&self) -> usize {
        if self.is_fwmark() {
            svc_fwm_hashkey(self.fwmark)
        } else {
            svc_hashkey(self.protocol, self.addr, self.port)
        }
    }

    /// Whether a service with this key answers to `other` as an exact match.
    pub fn matches(&self, other: &Self) -> bool {
        if self.is_fwmark() || other.is_fwmark() {
            self.fwmark == other.fwmark
        } else {
            self.protocol == other.protocol && self.addr == other.addr && self.port == other.port
        }
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_fwmark() {
            write!(f, "FWM {}", self.fwmark)
        } else {
            write!(f, "{} {}", self.protocol, fmt_addr_port(self.addr, self.port))
        }
    }
}

/// How packets reach a real server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardMethod {
    Masq,
    LocalNode,
    Tunnel,
    DirectRoute,
    Bypass,
}

impl ForwardMethod {
    /// Decode the forwarding bits of a connection-flags word.
    pub fn from_conn_flags(flags: u32) -> Self {
        match flags & IP_VS_CONN_F_FWD_MASK {
            IP_VS_CONN_F_LOCALNODE => Self::LocalNode,
            IP_VS_CONN_F_TUNNEL => Self::Tunnel,
            IP_VS_CONN_F_DROUTE => Self::DirectRoute,
            IP_VS_CONN_F_BYPASS => Self::Bypass,
            _ => Self::Masq,
        }
    }

    pub fn to_conn_flags(self) -> u32 {
        match self {
            Self::Masq => IP_VS_CONN_F_MASQ,
            Self::LocalNode => IP_VS_CONN_F_LOCALNODE,
            Self::Tunnel => IP_VS_CONN_F_TUNNEL,
            Self::DirectRoute => IP_VS_CONN_F_DROUTE,
            Self::Bypass => IP_VS_CONN_F_BYPASS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Masq => "masq",
            Self::LocalNode => "local",
            Self::Tunnel => "tunnel",
            Self::DirectRoute => "route",
            Self::Bypass => "bypass",
        }
    }

    /// Column label used by the textual service report.
    pub fn report_name(self) -> &'static str {
        match self {
            Self::LocalNode => "Local",
            Self::Tunnel => "Tunnel",
            Self::DirectRoute => "Route",
            Self::Masq | Self::Bypass => "Masq",
        }
    }
}

impl std::fmt::Display for ForwardMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ForwardMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "masq" | "nat" | "masquerade" => Ok(Self::Masq),
            "local" | "localnode" => Ok(Self::LocalNode),
            "tunnel" | "tun" | "ipip" => Ok(Self::Tunnel),
            "route" | "droute" | "dr" | "gatewaying" => Ok(Self::DirectRoute),
            other => Err(format!("unknown forwarding method: {other}")),
        }
    }
}

/// Route classification of a destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteType {
    /// Address is assigned to this host.
    Local,
    /// Regular unicast address reachable through a route.
    Unicast,
    /// Broadcast, multicast, unreachable and anything else.
    Other,
}

/// Administrative parameters of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub key: ServiceKey,
    pub scheduler: String,
    pub flags: u32,
    /// Persistence timeout in seconds.
    pub timeout: u32,
    pub netmask: u32,
}

impl ServiceConfig {
    pub fn new(key: ServiceKey, scheduler: &str) -> Self {
        Self {
            key,
            scheduler: scheduler.to_string(),
            flags: 0,
            timeout: 0,
            netmask: u32::MAX,
        }
    }

    pub fn from_user(u: &ServiceUser) -> Self {
        Self {
            key: ServiceKey {
                protocol: Protocol::from_u16(u.protocol),
                addr: u.addr,
                port: u.port,
                fwmark: u.fwmark,
            },
            scheduler: u.sched_name().to_string(),
            flags: u.flags,
            timeout: u.timeout,
            netmask: u.netmask,
        }
    }

    pub fn to_user(&self) -> ServiceUser {
        let mut u = ServiceUser {
            protocol: self.key.protocol.to_u16(),
            addr: self.key.addr,
            port: self.key.port,
            fwmark: self.key.fwmark,
            flags: self.flags,
            timeout: self.timeout,
            netmask: self.netmask,
            ..Default::default()
        };
        u.set_sched_name(&self.scheduler);
        u
    }

    pub fn persistent(mut self, timeout: u32) -> Self {
        self.flags |= IP_VS_SVC_F_PERSISTENT;
        self.timeout = timeout;
        self
    }
}

/// Administrative parameters of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestConfig {
    pub addr: u32,
    pub port: u16,
    pub conn_flags: u32,
    pub weight: i32,
    pub u_threshold: u32,
    pub l_threshold: u32,
}

impl DestConfig {
    pub fn new(addr: u32, port: u16, weight: i32) -> Self {
        Self {
            addr,
            port,
            conn_flags: IP_VS_CONN_F_MASQ,
            weight,
            u_threshold: 0,
            l_threshold: 0,
        }
    }

    pub fn with_forward(mut self, method: ForwardMethod) -> Self {
        self.conn_flags = (self.conn_flags & !IP_VS_CONN_F_FWD_MASK) | method.to_conn_flags();
        self
    }

    pub fn from_user(u: &DestUser) -> Self {
        Self {
            addr: u.addr,
            port: u.port,
            conn_flags: u.conn_flags,
            weight: u.weight,
            u_threshold: u.u_threshold,
            l_threshold: u.l_threshold,
        }
    }

    pub fn to_user(&self) -> DestUser {
        DestUser {
            addr: self.addr,
            port: self.port,
            conn_flags: self.conn_flags,
            weight: self.weight,
            u_threshold: self.u_threshold,
            l_threshold: self.l_threshold,
            ..Default::default()
        }
    }
}

/// Read-consistent view of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSnapshot {
    pub key: ServiceKey,
    pub scheduler: String,
    pub flags: u32,
    pub timeout: u32,
    pub netmask: u32,
    pub num_dests: u32,
    pub stats: StatsSnapshot,
}

impl ServiceSnapshot {
    pub fn is_persistent(&self) -> bool {
        self.flags & IP_VS_SVC_F_PERSISTENT != 0
    }

    pub fn to_entry(&self) -> ServiceEntry {
        let mut service = ServiceUser {
            protocol: self.key.protocol.to_u16(),
            addr: self.key.addr,
            port: self.key.port,
            fwmark: self.key.fwmark,
            flags: self.flags,
            timeout: self.timeout,
            netmask: self.netmask,
            ..Default::default()
        };
        service.set_sched_name(&self.scheduler);
        ServiceEntry {
            service,
            num_dests: self.num_dests,
            stats: self.stats.to_user(),
        }
    }
}

/// Read-consistent view of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DestSnapshot {
    pub addr: u32,
    pub port: u16,
    pub conn_flags: u32,
    pub weight: i32,
    pub u_threshold: u32,
    pub l_threshold: u32,
    pub flags: u32,
    pub activeconns: u32,
    pub inactconns: u32,
    pub persistconns: u32,
    pub refcnt: usize,
    pub stats: StatsSnapshot,
}

impl DestSnapshot {
    pub fn forward(&self) -> ForwardMethod {
        ForwardMethod::from_conn_flags(self.conn_flags)
    }

    pub fn to_entry(&self) -> DestEntry {
        DestEntry {
            dest: DestUser {
                addr: self.addr,
                port: self.port,
                conn_flags: self.conn_flags,
                weight: self.weight,
                u_threshold: self.u_threshold,
                l_threshold: self.l_threshold,
                ..Default::default()
            },
            activeconns: self.activeconns,
            inactconns: self.inactconns,
            persistconns: self.persistconns,
            stats: self.stats.to_user(),
            ..Default::default()
        }
    }
}
