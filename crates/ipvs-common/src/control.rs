use crate::codec::{Reader, WireError, WireRecord, Writer, c_str, to_c_array};
use crate::dest::{DestUser, GetDests};
use crate::service::{GetServices, ServiceEntry, ServiceUser};

// ── Version ────────────────────────────────────────────────────────

/// Encoded as `major << 16 | minor << 8 | patch`.
pub const IP_VS_VERSION_CODE: u32 = 0x0001_0201;
/// Connection table size reported by `VERSION` and `INFO`.
pub const IP_VS_CONN_TAB_SIZE: u32 = 4096;

pub const fn version_triplet(code: u32) -> (u32, u32, u32) {
    ((code >> 16) & 0xFF, (code >> 8) & 0xFF, code & 0xFF)
}

/// `IP Virtual Server version 1.2.1 (size=4096)`
pub fn version_banner() -> String {
    let (major, minor, patch) = version_triplet(IP_VS_VERSION_CODE);
    format!("IP Virtual Server version {major}.{minor}.{patch} (size={IP_VS_CONN_TAB_SIZE})")
}

// ── Flags ──────────────────────────────────────────────────────────

pub const IP_VS_SVC_F_PERSISTENT: u32 = 0x0001;
pub const IP_VS_SVC_F_HASHED: u32 = 0x0002;

pub const IP_VS_DEST_F_AVAILABLE: u32 = 0x0001;
pub const IP_VS_DEST_F_OVERLOAD: u32 = 0x0002;

pub const IP_VS_CONN_F_FWD_MASK: u32 = 0x0007;
pub const IP_VS_CONN_F_MASQ: u32 = 0x0000;
pub const IP_VS_CONN_F_LOCALNODE: u32 = 0x0001;
pub const IP_VS_CONN_F_TUNNEL: u32 = 0x0002;
pub const IP_VS_CONN_F_DROUTE: u32 = 0x0003;
pub const IP_VS_CONN_F_BYPASS: u32 = 0x0004;
pub const IP_VS_CONN_F_NOOUTPUT: u32 = 0x0080;
pub const IP_VS_CONN_F_INACTIVE: u32 = 0x0100;

pub const IP_VS_STATE_NONE: i32 = 0x0000;
pub const IP_VS_STATE_MASTER: i32 = 0x0001;
pub const IP_VS_STATE_BACKUP: i32 = 0x0002;

pub const IPPROTO_TCP: u16 = 6;
pub const IPPROTO_UDP: u16 = 17;

pub const IP_VS_SCHEDNAME_MAXLEN: usize = 16;
pub const IP_VS_IFNAME_MAXLEN: usize = 16;

// ── Opcodes ────────────────────────────────────────────────────────

pub const IP_VS_BASE_CTL: u32 = 64 + 1024 + 64;

pub const IP_VS_SO_SET_NONE: u32 = IP_VS_BASE_CTL;
pub const IP_VS_SO_SET_INSERT: u32 = IP_VS_BASE_CTL + 1;
pub const IP_VS_SO_SET_ADD: u32 = IP_VS_BASE_CTL + 2;
pub const IP_VS_SO_SET_EDIT: u32 = IP_VS_BASE_CTL + 3;
pub const IP_VS_SO_SET_DEL: u32 = IP_VS_BASE_CTL + 4;
pub const IP_VS_SO_SET_FLUSH: u32 = IP_VS_BASE_CTL + 5;
pub const IP_VS_SO_SET_LIST: u32 = IP_VS_BASE_CTL + 6;
pub const IP_VS_SO_SET_ADDDEST: u32 = IP_VS_BASE_CTL + 7;
pub const IP_VS_SO_SET_DELDEST: u32 = IP_VS_BASE_CTL + 8;
pub const IP_VS_SO_SET_EDITDEST: u32 = IP_VS_BASE_CTL + 9;
pub const IP_VS_SO_SET_TIMEOUT: u32 = IP_VS_BASE_CTL + 10;
pub const IP_VS_SO_SET_STARTDAEMON: u32 = IP_VS_BASE_CTL + 11;
pub const IP_VS_SO_SET_STOPDAEMON: u32 = IP_VS_BASE_CTL + 12;
pub const IP_VS_SO_SET_RESTORE: u32 = IP_VS_BASE_CTL + 13;
pub const IP_VS_SO_SET_SAVE: u32 = IP_VS_BASE_CTL + 14;
pub const IP_VS_SO_SET_ZERO: u32 = IP_VS_BASE_CTL + 15;
pub const IP_VS_SO_SET_MAX: u32 = IP_VS_SO_SET_ZERO;

pub const IP_VS_SO_GET_VERSION: u32 = IP_VS_BASE_CTL;
pub const IP_VS_SO_GET_INFO: u32 = IP_VS_BASE_CTL + 1;
pub const IP_VS_SO_GET_SERVICES: u32 = IP_VS_BASE_CTL + 2;
pub const IP_VS_SO_GET_SERVICE: u32 = IP_VS_BASE_CTL + 3;
pub const IP_VS_SO_GET_DESTS: u32 = IP_VS_BASE_CTL + 4;
pub const IP_VS_SO_GET_DEST: u32 = IP_VS_BASE_CTL + 5;
pub const IP_VS_SO_GET_TIMEOUT: u32 = IP_VS_BASE_CTL + 6;
pub const IP_VS_SO_GET_DAEMON: u32 = IP_VS_BASE_CTL + 7;
pub const IP_VS_SO_GET_MAX: u32 = IP_VS_SO_GET_DAEMON;

/// Administrative set commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetCommand {
    Add,
    Edit,
    Del,
    Flush,
    AddDest,
    DelDest,
    EditDest,
    Timeout,
    StartDaemon,
    StopDaemon,
    Zero,
}

impl SetCommand {
    pub const ALL: [Self; 11] = [
        Self::Add,
        Self::Edit,
        Self::Del,
        Self::Flush,
        Self::AddDest,
        Self::DelDest,
        Self::EditDest,
        Self::Timeout,
        Self::StartDaemon,
        Self::StopDaemon,
        Self::Zero,
    ];

    pub fn from_u32(cmd: u32) -> Option<Self> {
        match cmd {
            IP_VS_SO_SET_ADD => Some(Self::Add),
            IP_VS_SO_SET_EDIT => Some(Self::Edit),
            IP_VS_SO_SET_DEL => Some(Self::Del),
            IP_VS_SO_SET_FLUSH => Some(Self::Flush),
            IP_VS_SO_SET_ADDDEST => Some(Self::AddDest),
            IP_VS_SO_SET_DELDEST => Some(Self::DelDest),
            IP_VS_SO_SET_EDITDEST => Some(Self::EditDest),
            IP_VS_SO_SET_TIMEOUT => Some(Self::Timeout),
            IP_VS_SO_SET_STARTDAEMON => Some(Self::StartDaemon),
            IP_VS_SO_SET_STOPDAEMON => Some(Self::StopDaemon),
            IP_VS_SO_SET_ZERO => Some(Self::Zero),
            _ => None,
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Self::Add => IP_VS_SO_SET_ADD,
            Self::Edit => IP_VS_SO_SET_EDIT,
            Self::Del => IP_VS_SO_SET_DEL,
            Self::Flush => IP_VS_SO_SET_FLUSH,
            Self::AddDest => IP_VS_SO_SET_ADDDEST,
            Self::DelDest => IP_VS_SO_SET_DELDEST,
            Self::EditDest => IP_VS_SO_SET_EDITDEST,
            Self::Timeout => IP_VS_SO_SET_TIMEOUT,
            Self::StartDaemon => IP_VS_SO_SET_STARTDAEMON,
            Self::StopDaemon => IP_VS_SO_SET_STOPDAEMON,
            Self::Zero => IP_VS_SO_SET_ZERO,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Del => "del",
            Self::Flush => "flush",
            Self::AddDest => "adddest",
            Self::DelDest => "deldest",
            Self::EditDest => "editdest",
            Self::Timeout => "timeout",
            Self::StartDaemon => "startdaemon",
            Self::StopDaemon => "stopdaemon",
            Self::Zero => "zero",
        }
    }

    /// Exact argument length the command accepts.
    pub fn arg_len(self) -> usize {
        match self {
            Self::Add | Self::Edit | Self::Del | Self::Zero => ServiceUser::SIZE,
            Self::AddDest | Self::DelDest | Self::EditDest => ServiceUser::SIZE + DestUser::SIZE,
            Self::Flush => 0,
            Self::Timeout => TimeoutUser::SIZE,
            Self::StartDaemon | Self::StopDaemon => DaemonUser::SIZE,
        }
    }
}

impl std::fmt::Display for SetCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Argument length table indexed by `cmd - IP_VS_BASE_CTL`.
///
/// Reserved opcodes inside the range carry a zero length; `None` means the
/// opcode is outside the set range entirely.
pub fn set_arglen(cmd: u32) -> Option<usize> {
    if !(IP_VS_BASE_CTL..=IP_VS_SO_SET_MAX).contains(&cmd) {
        return None;
    }
    Some(SetCommand::from_u32(cmd).map_or(0, SetCommand::arg_len))
}

/// Administrative get commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GetCommand {
    Version,
    Info,
    Services,
    Service,
    Dests,
    Timeout,
    Daemon,
}

impl GetCommand {
    pub const ALL: [Self; 7] = [
        Self::Version,
        Self::Info,
        Self::Services,
        Self::Service,
        Self::Dests,
        Self::Timeout,
        Self::Daemon,
    ];

    pub fn from_u32(cmd: u32) -> Option<Self> {
        match cmd {
            IP_VS_SO_GET_VERSION => Some(Self::Version),
            IP_VS_SO_GET_INFO => Some(Self::Info),
            IP_VS_SO_GET_SERVICES => Some(Self::Services),
            IP_VS_SO_GET_SERVICE => Some(Self::Service),
            IP_VS_SO_GET_DESTS => Some(Self::Dests),
            IP_VS_SO_GET_TIMEOUT => Some(Self::Timeout),
            IP_VS_SO_GET_DAEMON => Some(Self::Daemon),
            _ => None,
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Self::Version => IP_VS_SO_GET_VERSION,
            Self::Info => IP_VS_SO_GET_INFO,
            Self::Services => IP_VS_SO_GET_SERVICES,
            Self::Service => IP_VS_SO_GET_SERVICE,
            Self::Dests => IP_VS_SO_GET_DESTS,
            Self::Timeout => IP_VS_SO_GET_TIMEOUT,
            Self::Daemon => IP_VS_SO_GET_DAEMON,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Version => "get_version",
            Self::Info => "get_info",
            Self::Services => "get_services",
            Self::Service => "get_service",
            Self::Dests => "get_dests",
            Self::Timeout => "get_timeout",
            Self::Daemon => "get_daemon",
        }
    }

    /// Length of the argument block the caller must send.
    pub fn arg_len(self) -> usize {
        match self {
            Self::Version => VERSION_BUF_LEN,
            Self::Info => GetInfo::SIZE,
            Self::Services => GetServices::SIZE,
            Self::Service => ServiceEntry::SIZE,
            Self::Dests => GetDests::SIZE,
            Self::Timeout => TimeoutUser::SIZE,
            Self::Daemon => DaemonUser::SIZE * 2,
        }
    }

    /// Whether the reply size depends on a count carried in the argument.
    pub fn is_variable(self) -> bool {
        matches!(self, Self::Services | Self::Dests)
    }
}

impl std::fmt::Display for GetCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Buffer size callers reserve for the `VERSION` string.
pub const VERSION_BUF_LEN: usize = 64;

/// Argument length table indexed by `cmd - IP_VS_BASE_CTL`.
pub fn get_arglen(cmd: u32) -> Option<usize> {
    if !(IP_VS_BASE_CTL..=IP_VS_SO_GET_MAX).contains(&cmd) {
        return None;
    }
    Some(GetCommand::from_u32(cmd).map_or(0, GetCommand::arg_len))
}

// ── Timeouts ───────────────────────────────────────────────────────

/// Protocol timeouts in seconds.
///
/// Size: 12 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutUser {
    pub tcp_timeout: u32,
    pub tcp_fin_timeout: u32,
    pub udp_timeout: u32,
}

impl WireRecord for TimeoutUser {
    const SIZE: usize = 12;

    fn write(&self, w: &mut Writer) {
        w.u32_le(self.tcp_timeout);
        w.u32_le(self.tcp_fin_timeout);
        w.u32_le(self.udp_timeout);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            tcp_timeout: r.u32_le()?,
            tcp_fin_timeout: r.u32_le()?,
            udp_timeout: r.u32_le()?,
        })
    }
}

// ── Sync daemon ────────────────────────────────────────────────────

/// Sync daemon descriptor.
///
/// Size: 24 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaemonUser {
    /// `IP_VS_STATE_MASTER` or `IP_VS_STATE_BACKUP`.
    pub state: i32,
    /// NUL-terminated multicast interface name.
    pub mcast_ifn: [u8; IP_VS_IFNAME_MAXLEN],
    pub syncid: i32,
}

impl DaemonUser {
    pub fn new(state: i32, mcast_ifn: &str, syncid: i32) -> Self {
        Self {
            state,
            mcast_ifn: to_c_array(mcast_ifn),
            syncid,
        }
    }

    pub fn mcast_ifn(&self) -> &str {
        c_str(&self.mcast_ifn)
    }
}

impl WireRecord for DaemonUser {
    const SIZE: usize = 24;

    fn write(&self, w: &mut Writer) {
        w.i32_le(self.state);
        w.bytes(&self.mcast_ifn);
        w.i32_le(self.syncid);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            state: r.i32_le()?,
            mcast_ifn: r.array()?,
            syncid: r.i32_le()?,
        })
    }
}

// ── Info ───────────────────────────────────────────────────────────

/// Reply to `GET_INFO`.
///
/// Size: 12 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetInfo {
    pub version: u32,
    pub size: u32,
    pub num_services: u32,
}

impl WireRecord for GetInfo {
    const SIZE: usize = 12;

    fn write(&self, w: &mut Writer) {
        w.u32_le(self.version);
        w.u32_le(self.size);
        w.u32_le(self.num_services);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            version: r.u32_le()?,
            size: r.u32_le()?,
            num_services: r.u32_le()?,
        })
    }
}
