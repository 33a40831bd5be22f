use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use domain::auth::entity::Principal;
use domain::auth::error::AuthError;
use domain::auth::rbac::Role;
use domain::common::error::DomainError;
use domain::timeout::entity::ProtocolTimeouts;
use domain::virtualserver::dest::Destination;
use domain::virtualserver::entity::{RouteType, ServiceKey};
use domain::virtualserver::scheduler::{Scheduler, SchedulerState};

use crate::secondary::auth_provider::AuthProvider;
use crate::secondary::connection_table::ConnectionTable;
use crate::secondary::memory_info::MemoryInfoPort;
use crate::secondary::metrics_port::{ControlMetrics, DefenseMetrics, RegistryMetrics};
use crate::secondary::protocol_timeout::ProtocolTimeoutTable;
use crate::secondary::route_classifier::RouteClassifier;

/// No-op implementation of all metrics sub-traits for use in tests.
pub struct NoopMetrics;

impl RegistryMetrics for NoopMetrics {}
impl ControlMetrics for NoopMetrics {}
impl DefenseMetrics for NoopMetrics {}

/// Counts control commands by `(command, result)`.
#[derive(Default)]
pub struct RecordingMetrics {
    pub commands: Mutex<Vec<(String, String)>>,
    pub services: AtomicU64,
}

impl RecordingMetrics {
    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RegistryMetrics for RecordingMetrics {
    fn set_services(&self, count: u64) {
        self.services.store(count, Ordering::Relaxed);
    }
}

impl ControlMetrics for RecordingMetrics {
    fn record_control_command(&self, command: &str, result: &str) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((command.to_string(), result.to_string()));
    }
}

impl DefenseMetrics for RecordingMetrics {}

/// Memory source returning a settable page count.
pub struct FixedMemory(pub AtomicU64);

impl FixedMemory {
    pub fn new(pages: u64) -> Self {
        Self(AtomicU64::new(pages))
    }

    pub fn set(&self, pages: u64) {
        self.0.store(pages, Ordering::Relaxed);
    }
}

impl MemoryInfoPort for FixedMemory {
    fn available_pages(&self) -> Result<u64, DomainError> {
        Ok(self.0.load(Ordering::Relaxed))
    }
}

/// Route classifier backed by a fixed map; unknown addresses are unicast.
#[derive(Default)]
pub struct StaticRoutes {
    pub routes: HashMap<u32, RouteType>,
}

impl StaticRoutes {
    pub fn with(mut self, addr: u32, route: RouteType) -> Self {
        self.routes.insert(addr, route);
        self
    }
}

impl RouteClassifier for StaticRoutes {
    fn classify(&self, addr: u32) -> RouteType {
        self.routes.get(&addr).copied().unwrap_or(RouteType::Unicast)
    }
}

/// Timeout table that records `timeout_change` calls.
#[derive(Default)]
pub struct MemoryTimeouts {
    pub table: Mutex<ProtocolTimeouts>,
    pub changes: Mutex<Vec<bool>>,
}

impl MemoryTimeouts {
    pub fn changes(&self) -> Vec<bool> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProtocolTimeoutTable for MemoryTimeouts {
    fn timeouts(&self) -> ProtocolTimeouts {
        *self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_timeouts(&self, timeouts: &ProtocolTimeouts) {
        *self.table.lock().unwrap_or_else(PoisonError::into_inner) = *timeouts;
    }

    fn timeout_change(&self, secure: bool) {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(secure);
    }
}

/// Connection table that counts drop requests.
#[derive(Default)]
pub struct CountingConnections {
    pub drops: AtomicUsize,
}

impl ConnectionTable for CountingConnections {
    fn random_drop_entry(&self) -> usize {
        self.drops.fetch_add(1, Ordering::Relaxed);
        0
    }
}

/// Accepts `admin-token` as admin and `viewer-token` as viewer.
pub struct StaticTokens;

impl AuthProvider for StaticTokens {
    fn validate_token(&self, token: &str) -> Result<Principal, AuthError> {
        match token {
            "" => Err(AuthError::TokenMissing),
            "admin-token" => Ok(Principal::new("admin", Role::Admin)),
            "viewer-token" => Ok(Principal::new("viewer", Role::Viewer)),
            _ => Err(AuthError::TokenInvalid("unknown token".to_string())),
        }
    }
}

/// Scheduler that picks the first destination and counts updates.
pub struct FirstScheduler {
    pub name: &'static str,
    pub updates: Arc<AtomicUsize>,
}

impl FirstScheduler {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            updates: Arc::new(AtomicUsize::new(0)),
        })
    }
}

struct FirstState {
    updates: Arc<AtomicUsize>,
}

impl Scheduler for FirstScheduler {
    fn name(&self) -> &str {
        self.name
    }

    fn bind(
        &self,
        _key: &ServiceKey,
        _dests: &[Arc<Destination>],
    ) -> Result<Box<dyn SchedulerState>, DomainError> {
        Ok(Box::new(FirstState {
            updates: Arc::clone(&self.updates),
        }))
    }
}

impl SchedulerState for FirstState {
    fn update_service(&self, _dests: &[Arc<Destination>]) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    fn schedule(&self, dests: &[Arc<Destination>]) -> Option<Arc<Destination>> {
        dests.first().cloned()
    }
}
