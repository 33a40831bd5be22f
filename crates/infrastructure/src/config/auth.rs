//! HTTP API authentication configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Static API keys. The HTTP API is open when the list is empty.
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,

    /// Whether `/metrics` requires authentication (default: false).
    #[serde(default)]
    pub metrics_auth_required: bool,
}

impl AuthConfig {
    pub fn enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiKeyConfig {
    /// Human-readable name for the key (e.g. "ops", "monitoring").
    pub name: String,

    /// The secret key value.
    pub key: String,

    /// RBAC role: "admin" or "viewer".
    #[serde(default = "default_api_key_role")]
    pub role: String,
}

fn default_api_key_role() -> String {
    "viewer".to_string()
}
