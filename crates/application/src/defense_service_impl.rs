use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use domain::common::error::DomainError;
use domain::defense::engine::DefenseController;
use domain::defense::entity::{DefenseOutcome, DefensePolicy, DefenseStatus};
use ports::secondary::connection_table::ConnectionTable;
use ports::secondary::memory_info::MemoryInfoPort;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::protocol_timeout::ProtocolTimeoutTable;

/// Application-level memory-pressure defense.
///
/// Samples available memory once per tick, feeds it to the domain
/// controller and carries out the side effects of the outcome.
pub struct DefenseAppService {
    controller: Arc<DefenseController>,
    memory: Arc<dyn MemoryInfoPort>,
    timeouts: Arc<dyn ProtocolTimeoutTable>,
    connections: Arc<dyn ConnectionTable>,
    metrics: Arc<dyn MetricsPort>,
}

impl DefenseAppService {
    pub fn new(
        controller: Arc<DefenseController>,
        memory: Arc<dyn MemoryInfoPort>,
        timeouts: Arc<dyn ProtocolTimeoutTable>,
        connections: Arc<dyn ConnectionTable>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        Self {
            controller,
            memory,
            timeouts,
            connections,
            metrics,
        }
    }

    pub fn controller(&self) -> &Arc<DefenseController> {
        &self.controller
    }

    /// One evaluation. A failed memory read skips the tick.
    pub fn tick(&self) -> Result<DefenseOutcome, DomainError> {
        let pages = self.memory.available_pages()?;
        let outcome = self.controller.update(pages);
        if outcome.drop_entry {
            let dropped = self.connections.random_drop_entry();
            if dropped > 0 {
                info!(dropped, "dropped connection entries");
            }
        }
        self.apply(&outcome);
        Ok(outcome)
    }

    /// Write a policy mode. An out-of-range value keeps the old mode.
    ///
    /// Entry dropping itself only runs from the periodic tick.
    pub fn set_mode(&self, policy: DefensePolicy, value: i64) -> Result<(), DomainError> {
        let outcome = self.controller.set_mode(policy, value)?;
        self.apply(&outcome);
        Ok(())
    }

    pub fn status(&self) -> DefenseStatus {
        self.controller.status()
    }

    /// Packet-path probe.
    pub fn should_drop_packet(&self) -> bool {
        self.controller.should_drop_packet()
    }

    fn apply(&self, outcome: &DefenseOutcome) {
        if let Some(secure) = outcome.secure_tcp_change {
            self.timeouts.timeout_change(secure);
        }
        self.metrics.set_available_memory_pages(outcome.available_pages);
        self.metrics.set_low_memory(outcome.low_memory);
        self.update_metrics();
    }

    fn update_metrics(&self) {
        for policy in DefensePolicy::ALL {
            self.metrics
                .set_defense_state(policy.as_str(), self.controller.mode(policy).as_u8());
        }
        self.metrics.set_drop_rate(self.controller.drop_rate());
    }

    /// Run the periodic evaluation until `cancel_token` fires.
    pub async fn run(self: Arc<Self>, period: Duration, cancel_token: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        info!(period_ms = period.as_millis(), "defense loop started");
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        warn!(error = %e, "memory sample failed, skipping defense tick");
                    }
                }
            }
        }
        info!("defense loop stopped");
    }
}
