use std::sync::{Arc, Mutex, PoisonError};

use domain::common::error::DomainError;
use domain::virtualserver::dest::Destination;
use domain::virtualserver::entity::ServiceKey;
use domain::virtualserver::scheduler::{Scheduler, SchedulerState};

/// Round-robin scheduler.
///
/// Walks the destination list in order, skipping destinations that are
/// overloaded or carry weight zero.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl RoundRobin {
    pub const NAME: &'static str = "rr";

    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Scheduler for RoundRobin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn bind(
        &self,
        _key: &ServiceKey,
        _dests: &[Arc<Destination>],
    ) -> Result<Box<dyn SchedulerState>, DomainError> {
        Ok(Box::new(RoundRobinState {
            cursor: Mutex::new(0),
        }))
    }
}

struct RoundRobinState {
    /// Index of the next candidate.
    cursor: Mutex<usize>,
}

impl SchedulerState for RoundRobinState {
    fn update_service(&self, _dests: &[Arc<Destination>]) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = 0;
    }

    fn schedule(&self, dests: &[Arc<Destination>]) -> Option<Arc<Destination>> {
        if dests.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let start = *cursor % dests.len();
        for step in 0..dests.len() {
            let idx = (start + step) % dests.len();
            let dest = &dests[idx];
            if dest.weight() > 0 && !dest.is_overloaded() {
                *cursor = idx + 1;
                return Some(Arc::clone(dest));
            }
        }
        None
    }
}
