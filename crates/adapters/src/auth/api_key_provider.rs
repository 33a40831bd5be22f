use std::collections::HashMap;
use std::fmt::Write as _;

use domain::auth::entity::Principal;
use domain::auth::error::AuthError;
use domain::auth::rbac::Role;
use ports::secondary::auth_provider::AuthProvider;
use sha2::{Digest, Sha256};

/// Static API key authentication provider.
///
/// Keys are stored as SHA-256 hashes; the plaintext is dropped after
/// construction.
pub struct ApiKeyAuthProvider {
    /// Hex-encoded SHA-256 of the key, to the principal it authenticates.
    keys: HashMap<String, Principal>,
}

/// Compute the hex-encoded SHA-256 hash of a key.
fn hash_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

impl std::fmt::Debug for ApiKeyAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuthProvider")
            .field("key_count", &self.keys.len())
            .finish_non_exhaustive()
    }
}

impl ApiKeyAuthProvider {
    /// Create a provider from `(name, key, role)` tuples.
    pub fn new(entries: Vec<(String, String, Role)>) -> Self {
        let keys = entries
            .into_iter()
            .map(|(name, key, role)| (hash_key(&key), Principal::new(name, role)))
            .collect();
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl AuthProvider for ApiKeyAuthProvider {
    fn validate_token(&self, token: &str) -> Result<Principal, AuthError> {
        if token.is_empty() {
            return Err(AuthError::TokenMissing);
        }
        self.keys
            .get(&hash_key(token))
            .cloned()
            .ok_or_else(|| AuthError::TokenInvalid("invalid API key".to_string()))
    }
}
