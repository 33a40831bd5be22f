use std::sync::atomic::{AtomicU64, Ordering};

use ports::secondary::connection_table::ConnectionTable;
use tracing::debug;

/// Connection table stand-in for a control plane without a packet path.
///
/// Holds no entries, so eviction requests drop nothing. Requests are
/// counted so the defense loop stays observable.
#[derive(Debug, Default)]
pub struct NullConnectionTable {
    drop_requests: AtomicU64,
}

impl NullConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drop_requests(&self) -> u64 {
        self.drop_requests.load(Ordering::Relaxed)
    }
}

impl ConnectionTable for NullConnectionTable {
    fn random_drop_entry(&self) -> usize {
        let n = self.drop_requests.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(requests = n, "random drop requested on empty connection table");
        0
    }
}
