use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use adapters::auth::api_key_provider::ApiKeyAuthProvider;
use adapters::control::server::ControlServer;
use adapters::http::server::run_http_server;
use adapters::http::state::AppState;
use adapters::scheduler::rr::RoundRobin;
use adapters::tables::connections::NullConnectionTable;
use adapters::tables::protocol_timeouts::InMemoryTimeouts;
use anyhow::Context;
use application::control_service_impl::ControlAppService;
use application::defense_service_impl::DefenseAppService;
use application::estimator_service_impl::EstimatorAppService;
use domain::auth::rbac::Role;
use domain::common::entity::fmt_addr_port;
use domain::defense::engine::DefenseController;
use domain::stats::estimator::Estimator;
use domain::syncd::engine::SyncDaemon;
use domain::tunables::entity::Tunables;
use domain::virtualserver::registry::Registry;
use domain::virtualserver::scheduler::SchedulerRegistry;
use infrastructure::config::AgentConfig;
use infrastructure::constants::{
    ESTIMATOR_PERIOD, GRACEFUL_SHUTDOWN_TIMEOUT, MAX_CONTROL_FRAME, ROUTE_REFRESH_INTERVAL,
};
use infrastructure::fib_trie::FibTrieRoutes;
use infrastructure::logging::init_logging;
use infrastructure::meminfo::ProcMemInfo;
use infrastructure::metrics::DaemonMetrics;
use ports::secondary::auth_provider::AuthProvider;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::protocol_timeout::ProtocolTimeoutTable;
use ports::secondary::route_classifier::RouteClassifier;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Cli;

/// Run the daemon startup sequence and block until shutdown.
#[allow(clippy::too_many_lines)] // startup is inherently sequential and long
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    // ── 1. Load config ──────────────────────────────────────────────
    let config = AgentConfig::load(Path::new(&cli.config))
        .with_context(|| format!("failed to load config {}", cli.config))?;

    // ── 2. Initialize logging ───────────────────────────────────────
    // CLI flags take precedence over config file
    let log_level = cli.log_level.unwrap_or(config.agent.log_level);
    let log_format = cli.log_format.unwrap_or(config.agent.log_format);
    init_logging(log_level, log_format)?;

    // Service root span: fields appear in every subsequent log entry
    let _root_span = tracing::span!(
        tracing::Level::INFO,
        "service",
        service.name = "ipvsd",
        service.version = env!("CARGO_PKG_VERSION"),
    )
    .entered();

    info!(
        config_path = %cli.config,
        log_level = log_level.as_str(),
        log_format = log_format.as_str(),
        "ipvsd starting"
    );

    // ── 3. Initialize metrics ───────────────────────────────────────
    let metrics = Arc::new(DaemonMetrics::new());
    let metrics_port: Arc<dyn MetricsPort> = Arc::clone(&metrics) as Arc<dyn MetricsPort>;

    // ── 4. Build the registry and its collaborators ─────────────────
    let schedulers = Arc::new(SchedulerRegistry::new());
    schedulers.register(RoundRobin::new())?;
    let registry = Arc::new(Registry::new(schedulers, Arc::new(Estimator::new())));

    let timeouts: Arc<dyn ProtocolTimeoutTable> =
        Arc::new(InMemoryTimeouts::new(config.protocol_timeouts()));
    let routes = Arc::new(FibTrieRoutes::new());
    info!(local_addresses = routes.local_count(), "route classifier initialized");

    let control = Arc::new(ControlAppService::new(
        Arc::clone(&registry),
        Arc::new(SyncDaemon::new()),
        Arc::clone(&timeouts),
        Arc::clone(&routes) as Arc<dyn RouteClassifier>,
        Arc::clone(&metrics_port),
    ));

    // ── 5. Build defense and tunables ───────────────────────────────
    let defense_settings = config.defense_settings()?;
    let controller = Arc::new(DefenseController::new(&defense_settings)?);
    let defense = Arc::new(DefenseAppService::new(
        controller,
        Arc::new(ProcMemInfo::new()),
        Arc::clone(&timeouts),
        Arc::new(NullConnectionTable::new()),
        Arc::clone(&metrics_port),
    ));
    let tunables = Arc::new(Tunables::new(&config.tunable_settings()?));
    info!(
        amemthresh = defense_settings.amemthresh,
        drop_entry = %defense_settings.drop_entry,
        drop_packet = %defense_settings.drop_packet,
        secure_tcp = %defense_settings.secure_tcp,
        "defense initialized"
    );

    // ── 6. Bootstrap services from config ───────────────────────────
    let bootstrap = config.bootstrap_services()?;
    for (service, dests) in &bootstrap {
        control
            .add_service(service)
            .with_context(|| format!("bootstrap service {}", service.key))?;
        for dest in dests {
            control.add_dest(&service.key, dest).with_context(|| {
                format!(
                    "bootstrap destination {} of {}",
                    fmt_addr_port(dest.addr, dest.port),
                    service.key
                )
            })?;
        }
    }
    info!(services = bootstrap.len(), "bootstrap services created");

    // ── 7. Initialize auth provider ─────────────────────────────────
    let mut app_state = AppState::new(
        Arc::clone(&metrics),
        Arc::clone(&control),
        Arc::clone(&defense),
        Arc::clone(&tunables),
    );
    if config.auth.enabled() {
        let entries = config
            .auth
            .api_keys
            .iter()
            .map(|k| {
                let role: Role = k.role.parse().map_err(anyhow::Error::msg)?;
                Ok((k.name.clone(), k.key.clone(), role))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        info!(key_count = entries.len(), "API key authentication enabled");
        let provider: Arc<dyn AuthProvider> = Arc::new(ApiKeyAuthProvider::new(entries));
        app_state = app_state.with_auth_provider(provider, config.auth.metrics_auth_required);
    } else {
        warn!("no API keys configured, HTTP API is unauthenticated");
    }
    let app_state = Arc::new(app_state);

    // ── 8. Create cancellation token ────────────────────────────────
    let cancel_token = crate::shutdown::create_shutdown_token();

    // ── 9. Spawn periodic loops ─────────────────────────────────────
    let defense_handle = tokio::spawn(
        Arc::clone(&defense).run(config.defense.tick_interval(), cancel_token.clone()),
    );
    let estimator_svc = Arc::new(EstimatorAppService::new(
        Arc::clone(&registry),
        Arc::clone(&metrics_port),
    ));
    let estimator_handle =
        tokio::spawn(estimator_svc.run(ESTIMATOR_PERIOD, cancel_token.clone()));
    let routes_handle = spawn_route_refresh(
        Arc::clone(&routes),
        ROUTE_REFRESH_INTERVAL,
        cancel_token.clone(),
    );

    // ── 10. Spawn control socket server ─────────────────────────────
    let control_server = Arc::new(ControlServer::new(
        Arc::clone(&control),
        &config.agent.admin_uids,
        MAX_CONTROL_FRAME,
    ));
    let socket_path = config.agent.control_socket.clone();
    let control_shutdown = cancel_token.clone();
    let control_handle = tokio::spawn(async move {
        if let Err(e) = control_server
            .run(Path::new(&socket_path), control_shutdown.clone())
            .await
        {
            tracing::error!(error = %e, path = %socket_path, "control socket server failed");
            control_shutdown.cancel();
        }
    });

    // ── 11. Spawn HTTP API server ───────────────────────────────────
    let http_port = config.agent.http_port;
    let http_bind = config.agent.bind_address.clone();
    let state_for_server = Arc::clone(&app_state);
    let http_shutdown = cancel_token.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = run_http_server(
            state_for_server,
            &http_bind,
            http_port,
            http_shutdown.cancelled_owned(),
        )
        .await
        {
            tracing::error!(error = %e, "HTTP API server failed");
        }
    });

    // ── 12. Ready: wait for cancellation ────────────────────────────
    info!("ipvsd ready, waiting for shutdown signal");
    cancel_token.cancelled().await;

    // ── 13. Ordered shutdown sequence ───────────────────────────────
    info!("shutdown phase 1: draining control socket and HTTP connections");
    let _ = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, control_handle).await;
    let _ = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, http_handle).await;

    info!("shutdown phase 2: stopping periodic loops");
    let _ = tokio::time::timeout(Duration::from_secs(1), defense_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(1), estimator_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(1), routes_handle).await;

    info!("shutdown phase 3: releasing services");
    control.flush().context("final flush")?;
    let trashed = registry.trash_len();
    registry.trash_cleanup();
    info!(trashed, "ipvsd stopped");
    Ok(())
}

/// Periodically reload local addresses until `cancel_token` fires.
fn spawn_route_refresh(
    routes: Arc<FibTrieRoutes>,
    period: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = interval.tick() => {
                    routes.refresh();
                    tracing::debug!(local_addresses = routes.local_count(), "local addresses refreshed");
                }
            }
        }
    })
}
