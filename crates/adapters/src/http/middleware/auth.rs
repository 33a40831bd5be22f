use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::super::error::ApiError;
use super::super::state::AppState;

/// Axum middleware that authenticates the caller via the `AuthProvider`.
///
/// Accepts `Authorization: Bearer <key>` or `X-API-Key: <key>`. The
/// resulting `Principal` is stored in the request extensions. Requests
/// pass through untouched when no provider is configured.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(ref auth_provider) = state.auth_provider else {
        return Ok(next.run(request).await);
    };

    let token = extract_token(&request)?;
    let principal = auth_provider.validate_token(token)?;
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

fn extract_token(request: &Request) -> Result<&str, ApiError> {
    if let Some(auth_header) = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        && let Some(token) = auth_header.strip_prefix("Bearer ")
    {
        return Ok(token);
    }

    if let Some(api_key) = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
    {
        return Ok(api_key);
    }

    Err(ApiError::Unauthorized {
        message: "authentication required: no token provided".to_string(),
    })
}
