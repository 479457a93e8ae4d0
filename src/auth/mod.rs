//! Caller authentication
//!
//! Two independent credential types resolve to the same [`AuthContext`]:
//! static API keys and bearer sessions minted by the browser login flow.
//! Secrets are only ever stored as SHA-256 digests.

pub mod api_key;
pub mod session;

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::AuthError;

pub use api_key::ApiKeyAuthenticator;
pub use session::SessionAuthenticator;

/// Prefix of every API key
pub const API_KEY_PREFIX: &str = "nbp_";

/// Matches an API key anywhere in a text
pub fn api_key_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"nbp_[0-9a-fA-F]{32}").expect("api key regex is valid"))
}

/// Is `candidate` exactly one well-formed API key?
pub fn is_api_key(candidate: &str) -> bool {
    api_key_regex()
        .find(candidate)
        .is_some_and(|m| m.start() == 0 && m.end() == candidate.len())
}

/// A validated caller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
}

/// Resolves a presented credential to a caller
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: &str) -> Result<AuthContext, AuthError>;
}

/// Hex SHA-256 digest of a secret
pub fn hash_secret(secret: &str) -> String {
    format!("{:x}", Sha256::digest(secret.as_bytes()))
}

/// Generate a fresh API key
pub fn generate_api_key() -> String {
    format!("{}{}", API_KEY_PREFIX, uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_secret_is_stable_hex() {
        let digest = hash_secret("nbp_secret");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hash_secret("nbp_secret"));
        assert_ne!(digest, hash_secret("nbp_other"));
    }

    #[test]
    fn test_generated_key_shape() {
        let key = generate_api_key();
        assert!(key.starts_with(API_KEY_PREFIX));
        assert_eq!(key.len(), API_KEY_PREFIX.len() + 32);
        assert!(is_api_key(&key));
    }

    #[test]
    fn test_api_key_shape() {
        assert!(is_api_key("nbp_0123456789abcdef0123456789ABCDEF"));
        assert!(!is_api_key("nbp_rates"));
        assert!(!is_api_key("nbp_0123456789abcdef0123456789abcdeg"));
        assert!(!is_api_key("nbp_0123456789abcdef0123456789abcdef0"));
        assert!(!is_api_key("xnbp_0123456789abcdef0123456789abcdef"));
    }
}
