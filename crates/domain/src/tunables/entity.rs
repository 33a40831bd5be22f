use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::common::error::DomainError;

pub const DEFAULT_SYNC_THRESHOLD: [i32; 2] = [3, 50];

/// Connection-sync threshold: sync after `[0]` packets, then every `[1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[i32; 2]", into = "[i32; 2]")]
pub struct SyncThreshold {
    threshold: i32,
    period: i32,
}

impl SyncThreshold {
    pub fn new(threshold: i32, period: i32) -> Result<Self, DomainError> {
        if threshold < 0 || period < 0 || threshold >= period {
            return Err(DomainError::InvalidArgument(format!(
                "sync_threshold [{threshold}, {period}]: need 0 <= threshold < period"
            )));
        }
        Ok(Self { threshold, period })
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    pub fn period(&self) -> i32 {
        self.period
    }
}

impl Default for SyncThreshold {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SYNC_THRESHOLD[0],
            period: DEFAULT_SYNC_THRESHOLD[1],
        }
    }
}

impl TryFrom<[i32; 2]> for SyncThreshold {
    type Error = DomainError;

    fn try_from(v: [i32; 2]) -> Result<Self, Self::Error> {
        Self::new(v[0], v[1])
    }
}

impl From<SyncThreshold> for [i32; 2] {
    fn from(s: SyncThreshold) -> Self {
        [s.threshold, s.period]
    }
}

/// Plain view of the runtime switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TunableSettings {
    pub cache_bypass: bool,
    pub expire_nodest_conn: bool,
    pub nat_icmp_send: bool,
    pub sync_threshold: SyncThreshold,
}

/// Runtime switches read by the forwarding path.
#[derive(Debug, Default)]
pub struct Tunables {
    cache_bypass: AtomicBool,
    expire_nodest_conn: AtomicBool,
    nat_icmp_send: AtomicBool,
    sync_threshold: Mutex<SyncThreshold>,
}

impl Tunables {
    pub fn new(settings: &TunableSettings) -> Self {
        Self {
            cache_bypass: AtomicBool::new(settings.cache_bypass),
            expire_nodest_conn: AtomicBool::new(settings.expire_nodest_conn),
            nat_icmp_send: AtomicBool::new(settings.nat_icmp_send),
            sync_threshold: Mutex::new(settings.sync_threshold),
        }
    }

    pub fn cache_bypass(&self) -> bool {
        self.cache_bypass.load(Ordering::Acquire)
    }

    pub fn expire_nodest_conn(&self) -> bool {
        self.expire_nodest_conn.load(Ordering::Acquire)
    }

    pub fn nat_icmp_send(&self) -> bool {
        self.nat_icmp_send.load(Ordering::Acquire)
    }

    pub fn sync_threshold(&self) -> SyncThreshold {
        *self
            .sync_threshold
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a threshold pair; an invalid pair keeps the current one.
    pub fn set_sync_threshold(&self, threshold: i32, period: i32) -> Result<(), DomainError> {
        let value = SyncThreshold::new(threshold, period)?;
        *self
            .sync_threshold
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = value;
        Ok(())
    }

    /// Apply every switch in `settings`.
    pub fn apply(&self, settings: &TunableSettings) {
        self.cache_bypass
            .store(settings.cache_bypass, Ordering::Release);
        self.expire_nodest_conn
            .store(settings.expire_nodest_conn, Ordering::Release);
        self.nat_icmp_send
            .store(settings.nat_icmp_send, Ordering::Release);
        *self
            .sync_threshold
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = settings.sync_threshold;
    }

    pub fn snapshot(&self) -> TunableSettings {
        TunableSettings {
            cache_bypass: self.cache_bypass(),
            expire_nodest_conn: self.expire_nodest_conn(),
            nat_icmp_send: self.nat_icmp_send(),
            sync_threshold: self.sync_threshold(),
        }
    }
}
