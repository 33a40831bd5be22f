use serde::{Deserialize, Serialize};

use ipvs_common::control::{IPPROTO_TCP, IPPROTO_UDP};

/// Transport protocol of a virtual service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    Other(u16),
}

impl Protocol {
    /// IP protocol number.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Tcp => IPPROTO_TCP,
            Self::Udp => IPPROTO_UDP,
            Self::Other(n) => n,
        }
    }

    pub fn from_u16(n: u16) -> Self {
        match n {
            IPPROTO_TCP => Self::Tcp,
            IPPROTO_UDP => Self::Udp,
            other => Self::Other(other),
        }
    }

    /// Only TCP and UDP services can be administered.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }

    /// Upper-case name as printed by the textual service report.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Other(_) => "UNK",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(format!("unsupported protocol: {other}")),
        }
    }
}

/// Format a host-order IPv4 address and port as `a.b.c.d:port`.
pub fn fmt_addr_port(addr: u32, port: u16) -> String {
    format!("{}:{port}", std::net::Ipv4Addr::from(addr))
}
