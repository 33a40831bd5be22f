use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use domain::defense::entity::DefenseStatus;
use serde::Serialize;

use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub services: usize,
    pub destinations: usize,
    /// Removed destinations still referenced by connections.
    pub trash: usize,
    pub defense: DefenseStatus,
}

/// `GET /api/v1/status`
pub async fn daemon_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let registry = state.control.registry();
    Json(StatusResponse {
        version: state.version,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        services: registry.num_services(),
        destinations: registry.num_destinations(),
        trash: registry.trash_len(),
        defense: state.defense.status(),
    })
}
