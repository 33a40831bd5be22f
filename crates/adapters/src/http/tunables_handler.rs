use std::sync::Arc;

use axum::extract::State;
use axum::{Extension, Json};
use domain::auth::entity::Principal;
use domain::defense::entity::{DefenseMode, DefensePolicy};
use domain::tunables::entity::{SyncThreshold, TunableSettings};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ApiError;
use super::middleware::rbac::require_write_access;
use super::state::AppState;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunablesResponse {
    pub amemthresh: u64,
    pub am_droprate: u32,
    pub drop_entry: u8,
    pub drop_packet: u8,
    pub secure_tcp: u8,
    pub cache_bypass: bool,
    pub expire_nodest_conn: bool,
    pub nat_icmp_send: bool,
    pub sync_threshold: [i32; 2],
}

/// Partial update. Absent fields keep their current value.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunablesUpdate {
    pub amemthresh: Option<u64>,
    pub am_droprate: Option<u32>,
    pub drop_entry: Option<i64>,
    pub drop_packet: Option<i64>,
    pub secure_tcp: Option<i64>,
    pub cache_bypass: Option<bool>,
    pub expire_nodest_conn: Option<bool>,
    pub nat_icmp_send: Option<bool>,
    pub sync_threshold: Option<[i32; 2]>,
}

fn snapshot(state: &AppState) -> TunablesResponse {
    let defense = state.defense.status();
    let switches = state.tunables.snapshot();
    TunablesResponse {
        amemthresh: defense.amemthresh,
        am_droprate: defense.am_droprate,
        drop_entry: defense.drop_entry.as_u8(),
        drop_packet: defense.drop_packet.as_u8(),
        secure_tcp: defense.secure_tcp.as_u8(),
        cache_bypass: switches.cache_bypass,
        expire_nodest_conn: switches.expire_nodest_conn,
        nat_icmp_send: switches.nat_icmp_send,
        sync_threshold: switches.sync_threshold.into(),
    }
}

fn invalid(field: &str, message: String) -> ApiError {
    ApiError::BadRequest {
        code: "VALIDATION_ERROR",
        message: format!("{field}: {message}"),
    }
}

impl TunablesUpdate {
    /// Reject the whole update when any field is out of range.
    fn validate(&self) -> Result<Option<SyncThreshold>, ApiError> {
        if self.amemthresh == Some(0) {
            return Err(invalid("amemthresh", "must be greater than zero".to_string()));
        }
        for (name, value) in [
            ("drop_entry", self.drop_entry),
            ("drop_packet", self.drop_packet),
            ("secure_tcp", self.secure_tcp),
        ] {
            if let Some(v) = value
                && u8::try_from(v).ok().and_then(DefenseMode::from_u8).is_none()
            {
                return Err(invalid(name, format!("{v} is outside 0..=3")));
            }
        }
        self.sync_threshold
            .map(SyncThreshold::try_from)
            .transpose()
            .map_err(|e| invalid("sync_threshold", e.to_string()))
    }
}

/// `GET /api/v1/tunables`
pub async fn get_tunables(State(state): State<Arc<AppState>>) -> Json<TunablesResponse> {
    Json(snapshot(&state))
}

/// `PUT /api/v1/tunables`, applying a partial update.
///
/// Writing a defense mode re-runs the defense evaluation immediately.
pub async fn put_tunables(
    State(state): State<Arc<AppState>>,
    principal: Option<Extension<Principal>>,
    Json(req): Json<TunablesUpdate>,
) -> Result<Json<TunablesResponse>, ApiError> {
    if let Some(Extension(ref principal)) = principal {
        require_write_access(principal)?;
    }
    let sync_threshold = req.validate()?;

    let controller = state.defense.controller();
    if let Some(pages) = req.amemthresh {
        controller.set_amemthresh(pages)?;
    }
    if let Some(rate) = req.am_droprate {
        controller.set_am_droprate(rate);
    }
    for (policy, value) in [
        (DefensePolicy::DropEntry, req.drop_entry),
        (DefensePolicy::DropPacket, req.drop_packet),
        (DefensePolicy::SecureTcp, req.secure_tcp),
    ] {
        if let Some(v) = value {
            state.defense.set_mode(policy, v)?;
        }
    }

    let current = state.tunables.snapshot();
    state.tunables.apply(&TunableSettings {
        cache_bypass: req.cache_bypass.unwrap_or(current.cache_bypass),
        expire_nodest_conn: req.expire_nodest_conn.unwrap_or(current.expire_nodest_conn),
        nat_icmp_send: req.nat_icmp_send.unwrap_or(current.nat_icmp_send),
        sync_threshold: sync_threshold.unwrap_or(current.sync_threshold),
    });

    let response = snapshot(&state);
    info!(
        principal = principal.as_ref().map_or("anonymous", |p| p.0.name.as_str()),
        ?response,
        "tunables updated"
    );
    Ok(Json(response))
}
