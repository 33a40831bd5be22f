use serde::{Deserialize, Serialize};

use super::error::DefenseError;

/// Default low-memory threshold, in pages.
pub const DEFAULT_AMEMTHRESH: u64 = 1024;

/// Drop rate applied when `drop_packet` is forced on.
pub const DEFAULT_AM_DROPRATE: u32 = 10;

/// One of the three memory-pressure defenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefensePolicy {
    DropEntry,
    DropPacket,
    SecureTcp,
}

impl DefensePolicy {
    pub const ALL: [Self; 3] = [Self::DropEntry, Self::DropPacket, Self::SecureTcp];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DropEntry => "drop_entry",
            Self::DropPacket => "drop_packet",
            Self::SecureTcp => "secure_tcp",
        }
    }
}

impl std::fmt::Display for DefensePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DefensePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop_entry" => Ok(Self::DropEntry),
            "drop_packet" => Ok(Self::DropPacket),
            "secure_tcp" => Ok(Self::SecureTcp),
            other => Err(format!("unknown defense policy: {other}")),
        }
    }
}

/// Policy state. `AutoOff` and `AutoOn` follow memory pressure; the other
/// two ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DefenseMode {
    #[default]
    Off = 0,
    AutoOff = 1,
    AutoOn = 2,
    On = 3,
}

impl DefenseMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Off),
            1 => Some(Self::AutoOff),
            2 => Some(Self::AutoOn),
            3 => Some(Self::On),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the mode counts as engaged for the TCP timeout switch.
    pub fn is_engaged(self) -> bool {
        matches!(self, Self::AutoOn | Self::On)
    }

    /// Advance one tick. Returns the next mode and whether the feature is on.
    pub fn step(self, low_memory: bool) -> (Self, bool) {
        match (self, low_memory) {
            (Self::Off, _) => (Self::Off, false),
            (Self::AutoOff | Self::AutoOn, true) => (Self::AutoOn, true),
            (Self::AutoOff | Self::AutoOn, false) => (Self::AutoOff, false),
            (Self::On, _) => (Self::On, true),
        }
    }
}

impl TryFrom<u8> for DefenseMode {
    type Error = DefenseError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Self::from_u8(v).ok_or(DefenseError::InvalidMode {
            policy: "defense",
            value: i64::from(v),
        })
    }
}

impl From<DefenseMode> for u8 {
    fn from(m: DefenseMode) -> Self {
        m.as_u8()
    }
}

impl std::fmt::Display for DefenseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Initial defense settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefenseSettings {
    pub amemthresh: u64,
    pub am_droprate: u32,
    pub drop_entry: DefenseMode,
    pub drop_packet: DefenseMode,
    pub secure_tcp: DefenseMode,
}

impl Default for DefenseSettings {
    fn default() -> Self {
        Self {
            amemthresh: DEFAULT_AMEMTHRESH,
            am_droprate: DEFAULT_AM_DROPRATE,
            drop_entry: DefenseMode::Off,
            drop_packet: DefenseMode::Off,
            secure_tcp: DefenseMode::Off,
        }
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DefenseOutcome {
    pub available_pages: u64,
    pub low_memory: bool,
    /// Connection entries should be dropped at random.
    pub drop_entry: bool,
    /// Countdown period for packet drops; 0 disables dropping.
    pub drop_rate: u32,
    /// New on/off value for the TCP timeout table, when it changed.
    pub secure_tcp_change: Option<bool>,
}

/// Current state of every policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DefenseStatus {
    pub amemthresh: u64,
    pub am_droprate: u32,
    pub drop_entry: DefenseMode,
    pub drop_packet: DefenseMode,
    pub secure_tcp: DefenseMode,
    pub drop_rate: u32,
    pub low_memory: bool,
    pub available_pages: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_follows_transition_table() {
        use DefenseMode::{AutoOff, AutoOn, Off, On};
        assert_eq!(Off.step(false), (Off, false));
        assert_eq!(Off.step(true), (Off, false));
        assert_eq!(AutoOff.step(false), (AutoOff, false));
        assert_eq!(AutoOff.step(true), (AutoOn, true));
        assert_eq!(AutoOn.step(true), (AutoOn, true));
        assert_eq!(AutoOn.step(false), (AutoOff, false));
        assert_eq!(On.step(false), (On, true));
        assert_eq!(On.step(true), (On, true));
    }

    #[test]
    fn scripted_pressure_trace() {
        let pressure = [false, true, true, false, true, false, false];
        let mut mode = DefenseMode::AutoOff;
        let trace: Vec<bool> = pressure
            .iter()
            .map(|&low| {
                let (next, on) = mode.step(low);
                mode = next;
                on
            })
            .collect();
        assert_eq!(trace, vec![false, true, true, false, true, false, false]);
        assert_eq!(mode, DefenseMode::AutoOff);
    }

    #[test]
    fn mode_u8_conversions() {
        for v in 0..=3u8 {
            assert_eq!(DefenseMode::try_from(v).unwrap().as_u8(), v);
        }
        assert!(DefenseMode::try_from(4).is_err());
        assert!(DefenseMode::AutoOn.is_engaged());
        assert!(!DefenseMode::AutoOff.is_engaged());
    }

    #[test]
    fn policy_from_str() {
        for p in DefensePolicy::ALL {
            assert_eq!(p.as_str().parse::<DefensePolicy>().unwrap(), p);
        }
        assert!("drop_all".parse::<DefensePolicy>().is_err());
    }

    #[test]
    fn mode_serializes_as_number() {
        let json = serde_json::to_string(&DefenseMode::AutoOn).unwrap();
        assert_eq!(json, "2");
        let back: DefenseMode = serde_json::from_str("3").unwrap();
        assert_eq!(back, DefenseMode::On);
        assert!(serde_json::from_str::<DefenseMode>("7").is_err());
    }
}
