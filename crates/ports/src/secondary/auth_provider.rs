use domain::auth::entity::Principal;
use domain::auth::error::AuthError;

/// Port for bearer-token authentication of the HTTP API.
pub trait AuthProvider: Send + Sync {
    fn validate_token(&self, token: &str) -> Result<Principal, AuthError>;
}
