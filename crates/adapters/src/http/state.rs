use std::sync::Arc;
use std::time::Instant;

use application::control_service_impl::ControlAppService;
use application::defense_service_impl::DefenseAppService;
use domain::tunables::entity::Tunables;
use infrastructure::metrics::DaemonMetrics;
use ports::secondary::auth_provider::AuthProvider;

/// Shared application state for the REST API server.
///
/// Passed to Axum handlers via `State(Arc<AppState>)`.
pub struct AppState {
    pub metrics: Arc<DaemonMetrics>,
    pub control: Arc<ControlAppService>,
    pub defense: Arc<DefenseAppService>,
    pub tunables: Arc<Tunables>,
    pub start_time: Instant,
    pub version: &'static str,
    pub auth_provider: Option<Arc<dyn AuthProvider>>,
    pub metrics_auth_required: bool,
}

impl AppState {
    pub fn new(
        metrics: Arc<DaemonMetrics>,
        control: Arc<ControlAppService>,
        defense: Arc<DefenseAppService>,
        tunables: Arc<Tunables>,
    ) -> Self {
        Self {
            metrics,
            control,
            defense,
            tunables,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
            auth_provider: None,
            metrics_auth_required: false,
        }
    }

    /// Require bearer authentication on the API, and optionally on `/metrics`.
    #[must_use]
    pub fn with_auth_provider(
        mut self,
        provider: Arc<dyn AuthProvider>,
        metrics_auth_required: bool,
    ) -> Self {
        self.auth_provider = Some(provider);
        self.metrics_auth_required = metrics_auth_required;
        self
    }
}
