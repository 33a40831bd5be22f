use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use ipvs_common::control::IP_VS_SCHEDNAME_MAXLEN;

use crate::common::error::DomainError;

use super::dest::Destination;
use super::entity::ServiceKey;

/// A pluggable scheduling algorithm, resolved by name.
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &str;

    /// Allocate per-service state for `key`. Failure aborts the add or
    /// edit that requested the binding.
    fn bind(
        &self,
        key: &ServiceKey,
        dests: &[Arc<Destination>],
    ) -> Result<Box<dyn SchedulerState>, DomainError>;
}

/// Scheduler state bound to one service. Released on drop.
pub trait SchedulerState: Send + Sync {
    /// The destination list or a weight changed.
    fn update_service(&self, dests: &[Arc<Destination>]);

    /// Pick a destination for a new connection.
    fn schedule(&self, dests: &[Arc<Destination>]) -> Option<Arc<Destination>>;
}

/// A scheduler together with the state it allocated for one service.
pub struct BoundScheduler {
    scheduler: Arc<dyn Scheduler>,
    state: Box<dyn SchedulerState>,
}

impl BoundScheduler {
    pub fn bind(
        scheduler: Arc<dyn Scheduler>,
        key: &ServiceKey,
        dests: &[Arc<Destination>],
    ) -> Result<Self, DomainError> {
        let state = scheduler.bind(key, dests)?;
        Ok(Self { scheduler, state })
    }

    pub fn name(&self) -> &str {
        self.scheduler.name()
    }

    pub fn update_service(&self, dests: &[Arc<Destination>]) {
        self.state.update_service(dests);
    }

    pub fn schedule(&self, dests: &[Arc<Destination>]) -> Option<Arc<Destination>> {
        self.state.schedule(dests)
    }
}

impl std::fmt::Debug for BoundScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundScheduler")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// Name-to-scheduler table populated at startup.
#[derive(Default)]
pub struct SchedulerRegistry {
    by_name: RwLock<HashMap<String, Arc<dyn Scheduler>>>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, scheduler: Arc<dyn Scheduler>) -> Result<(), DomainError> {
        let name = scheduler.name().to_string();
        if name.is_empty() || name.len() >= IP_VS_SCHEDNAME_MAXLEN {
            return Err(DomainError::InvalidArgument(format!(
                "scheduler name must be 1..{} bytes",
                IP_VS_SCHEDNAME_MAXLEN - 1
            )));
        }
        let mut by_name = self
            .by_name
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if by_name.contains_key(&name) {
            return Err(DomainError::AlreadyExists(format!("scheduler {name}")));
        }
        tracing::info!(scheduler = %name, "scheduler registered");
        by_name.insert(name, scheduler);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<(), DomainError> {
        self.by_name
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DomainError::NotFound(format!("scheduler {name}")))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Scheduler>> {
        self.by_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for SchedulerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerRegistry")
            .field("names", &self.names())
            .finish()
    }
}
