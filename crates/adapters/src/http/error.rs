use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::auth::error::AuthError;
use domain::common::error::DomainError;
use serde::Serialize;

#[derive(Serialize)]
pub(crate) struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
pub(crate) struct ErrorDetail {
    /// Machine-readable error code (e.g. `NO_SUCH_SERVICE`).
    code: &'static str,
    message: String,
}

/// Standard API error type.
///
/// All variants produce a JSON response matching:
/// `{"error":{"code":"SCREAMING_SNAKE","message":"human-readable"}}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound { code: &'static str, message: String },
    BadRequest { code: &'static str, message: String },
    Unauthorized { message: String },
    Forbidden { code: &'static str, message: String },
    Conflict { code: &'static str, message: String },
    Internal { message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, code, message),
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            Self::Unauthorized { message } => {
                (StatusCode::UNAUTHORIZED, "AUTHENTICATION_REQUIRED", message)
            }
            Self::Forbidden { code, message } => (StatusCode::FORBIDDEN, code, message),
            Self::Conflict { code, message } => (StatusCode::CONFLICT, code, message),
            Self::Internal { message } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
            }
        };

        (
            status,
            Json(ErrorBody {
                error: ErrorDetail { code, message },
            }),
        )
            .into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Forbidden(ref msg) => Self::Forbidden {
                code: "INSUFFICIENT_ROLE",
                message: msg.clone(),
            },
            _ => Self::Unauthorized {
                message: err.to_string(),
            },
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let message = err.to_string();
        match err {
            DomainError::NotFound(_) => Self::NotFound {
                code: "NOT_FOUND",
                message,
            },
            DomainError::NoSuchService(_) => Self::NotFound {
                code: "NO_SUCH_SERVICE",
                message,
            },
            DomainError::AlreadyExists(_) => Self::Conflict {
                code: "ALREADY_EXISTS",
                message,
            },
            DomainError::Busy(_) => Self::Conflict {
                code: "BUSY",
                message,
            },
            DomainError::InvalidArgument(_)
            | DomainError::OutOfRange(_)
            | DomainError::BadAddress(_) => Self::BadRequest {
                code: "VALIDATION_ERROR",
                message,
            },
            DomainError::PermissionDenied => Self::Forbidden {
                code: "PERMISSION_DENIED",
                message,
            },
            DomainError::OutOfMemory(_) | DomainError::EngineError(_) => {
                Self::Internal { message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn response_body(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn not_found_produces_correct_json() {
        let resp = ApiError::from(DomainError::NoSuchService("TCP 10.0.0.1:80".into()))
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body = response_body(resp).await;
        assert_eq!(body["error"]["code"], "NO_SUCH_SERVICE");
        assert_eq!(body["error"]["message"], "no such service: TCP 10.0.0.1:80");
    }

    #[tokio::test]
    async fn validation_errors_are_bad_request() {
        for err in [
            DomainError::InvalidArgument("x".into()),
            DomainError::OutOfRange("x".into()),
            DomainError::BadAddress("x".into()),
        ] {
            let resp = ApiError::from(err).into_response();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body = response_body(resp).await;
            assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        }
    }

    #[tokio::test]
    async fn conflict_and_internal() {
        let resp = ApiError::from(DomainError::AlreadyExists("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let resp = ApiError::from(DomainError::EngineError("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response_body(resp).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn auth_errors_map_to_401_and_403() {
        let resp = ApiError::from(AuthError::TokenMissing).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = response_body(resp).await;
        assert_eq!(body["error"]["code"], "AUTHENTICATION_REQUIRED");

        let resp = ApiError::from(AuthError::Forbidden("viewer".into())).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
