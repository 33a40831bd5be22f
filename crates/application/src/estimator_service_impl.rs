use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use domain::stats::estimator::Estimator;
use domain::virtualserver::registry::Registry;
use ports::secondary::metrics_port::MetricsPort;

/// Periodic rate estimation over every registered statistics block.
pub struct EstimatorAppService {
    registry: Arc<Registry>,
    metrics: Arc<dyn MetricsPort>,
}

impl EstimatorAppService {
    pub fn new(registry: Arc<Registry>, metrics: Arc<dyn MetricsPort>) -> Self {
        Self { registry, metrics }
    }

    fn estimator(&self) -> &Arc<Estimator> {
        self.registry.estimator()
    }

    /// Refresh the rates of every block, then the registry gauges.
    pub fn tick(&self) {
        self.estimator().tick();
        self.metrics.set_services(self.registry.num_services() as u64);
        self.metrics
            .set_destinations(self.registry.num_destinations() as u64);
        self.metrics
            .set_trash_destinations(self.registry.trash_len() as u64);
        debug!(blocks = self.estimator().len(), "estimator pass");
    }

    pub async fn run(self: Arc<Self>, period: Duration, cancel_token: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately; skip it so the first
        // sample covers a full period.
        interval.tick().await;
        info!(period_ms = period.as_millis(), "estimator loop started");
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = interval.tick() => self.tick(),
            }
        }
        info!("estimator loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::common::entity::Protocol;
    use domain::virtualserver::entity::{ServiceConfig, ServiceKey};
    use domain::virtualserver::scheduler::SchedulerRegistry;
    use ports::test_utils::{FirstScheduler, RecordingMetrics};
    use std::sync::atomic::Ordering;

    fn make_registry() -> Arc<Registry> {
        let schedulers = Arc::new(SchedulerRegistry::new());
        schedulers.register(FirstScheduler::new("rr")).unwrap();
        Arc::new(Registry::new(schedulers, Arc::new(Estimator::new())))
    }

    #[test]
    fn tick_updates_rates_and_gauges() {
        let registry = make_registry();
        let key = ServiceKey::addr(Protocol::Tcp, 0x0A00_0001, 80);
        let svc = registry.add_service(&ServiceConfig::new(key, "rr")).unwrap();
        for _ in 0..200 {
            svc.stats().record_conn();
        }
        let metrics = Arc::new(RecordingMetrics::default());
        let service = EstimatorAppService::new(
            Arc::clone(&registry),
            Arc::clone(&metrics) as Arc<dyn MetricsPort>,
        );

        service.tick();
        assert!(svc.stats().snapshot().cps > 0);
        assert_eq!(metrics.services.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn global_block_is_registered() {
        let registry = make_registry();
        assert!(registry.estimator().is_registered(registry.stats()));
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let service = Arc::new(EstimatorAppService::new(
            make_registry(),
            Arc::new(RecordingMetrics::default()),
        ));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(service.run(Duration::from_millis(5), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
