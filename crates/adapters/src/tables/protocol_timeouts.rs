use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use domain::timeout::entity::ProtocolTimeouts;
use ports::secondary::protocol_timeout::ProtocolTimeoutTable;
use tracing::info;

/// Process-local protocol timeout table.
#[derive(Debug, Default)]
pub struct InMemoryTimeouts {
    table: RwLock<ProtocolTimeouts>,
    secure: AtomicBool,
}

impl InMemoryTimeouts {
    pub fn new(initial: ProtocolTimeouts) -> Self {
        Self {
            table: RwLock::new(initial),
            secure: AtomicBool::new(false),
        }
    }

    /// Whether the hardened TCP state table is selected.
    pub fn is_secure(&self) -> bool {
        self.secure.load(Ordering::Acquire)
    }
}

impl ProtocolTimeoutTable for InMemoryTimeouts {
    fn timeouts(&self) -> ProtocolTimeouts {
        *self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_timeouts(&self, timeouts: &ProtocolTimeouts) {
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = *timeouts;
    }

    fn timeout_change(&self, secure: bool) {
        if self.secure.swap(secure, Ordering::AcqRel) != secure {
            info!(secure, "tcp state table switched");
        }
    }
}
