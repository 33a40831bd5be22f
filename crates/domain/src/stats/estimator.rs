use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::entity::Stats;

/// Sampling period of the rate estimator.
pub const ESTIMATOR_INTERVAL: Duration = Duration::from_secs(2);

/// Set of statistics blocks whose rates are refreshed every interval.
#[derive(Debug, Default)]
pub struct Estimator {
    blocks: Mutex<Vec<Arc<Stats>>>,
}

impl Estimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start estimating `stats`, seeding the averages from its current values.
    pub fn register(&self, stats: &Arc<Stats>) {
        stats.start_estimation();
        let mut blocks = self.lock();
        if !blocks.iter().any(|b| Arc::ptr_eq(b, stats)) {
            blocks.push(Arc::clone(stats));
        }
    }

    /// Stop estimating `stats`. Unknown blocks are ignored.
    pub fn unregister(&self, stats: &Arc<Stats>) {
        self.lock().retain(|b| !Arc::ptr_eq(b, stats));
    }

    pub fn is_registered(&self, stats: &Arc<Stats>) -> bool {
        self.lock().iter().any(|b| Arc::ptr_eq(b, stats))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Run one estimation pass over every registered block.
    pub fn tick(&self) {
        let blocks = self.lock().clone();
        for stats in &blocks {
            stats.estimate();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<Stats>>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let est = Estimator::new();
        let stats = Arc::new(Stats::new());
        est.register(&stats);
        est.register(&stats);
        assert_eq!(est.len(), 1);
        assert!(est.is_registered(&stats));
    }

    #[test]
    fn unregister_removes_only_that_block() {
        let est = Estimator::new();
        let a = Arc::new(Stats::new());
        let b = Arc::new(Stats::new());
        est.register(&a);
        est.register(&b);
        est.unregister(&a);
        assert!(!est.is_registered(&a));
        assert!(est.is_registered(&b));
        est.unregister(&a);
        assert_eq!(est.len(), 1);
    }

    #[test]
    fn tick_updates_registered_blocks_only() {
        let est = Estimator::new();
        let tracked = Arc::new(Stats::new());
        let untracked = Arc::new(Stats::new());
        est.register(&tracked);

        for _ in 0..100 {
            tracked.record_conn();
            untracked.record_conn();
        }
        est.tick();

        assert!(tracked.snapshot().cps > 0);
        assert_eq!(untracked.snapshot().cps, 0);
    }

    #[test]
    fn counters_before_registration_do_not_count_as_rate() {
        let est = Estimator::new();
        let stats = Arc::new(Stats::new());
        for _ in 0..1000 {
            stats.record_conn();
        }
        est.register(&stats);
        est.tick();
        assert_eq!(stats.snapshot().cps, 0);
    }
}
