//! Browser session authentication
//!
//! Session tokens are minted by the external OAuth login flow and stored
//! hashed with an expiry. This side only validates them.

use async_trait::async_trait;
use chrono::Utc;

use crate::auth::{hash_secret, AuthContext, Authenticator};
use crate::error::AuthError;
use crate::ledger::SqliteLedger;

/// Authenticates bearer session tokens against the ledger database
#[derive(Clone)]
pub struct SessionAuthenticator {
    ledger: SqliteLedger,
}

impl SessionAuthenticator {
    pub fn new(ledger: SqliteLedger) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Authenticator for SessionAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<AuthContext, AuthError> {
        let token = credential.trim();
        if token.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let (account, expires_at) = self
            .ledger
            .account_for_session(&hash_secret(token))
            .await?
            .ok_or(AuthError::InvalidSession)?;

        if expires_at <= Utc::now().timestamp() {
            tracing::debug!(user_id = %account.id, "rejecting expired session");
            return Err(AuthError::SessionExpired);
        }

        Ok(AuthContext {
            user_id: account.id,
            email: account.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NewAccount;

    #[tokio::test]
    async fn test_session_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SqliteLedger::open(dir.path().join("ledger.db")).await.unwrap();
        ledger
            .create_account(NewAccount {
                id: "user-1".to_string(),
                email: "user@example.com".to_string(),
                initial_tokens: 0,
            })
            .await
            .unwrap();
        let now = Utc::now().timestamp();
        ledger.insert_session("user-1", &hash_secret("live"), now + 3600).await.unwrap();
        ledger.insert_session("user-1", &hash_secret("stale"), now - 1).await.unwrap();

        let auth = SessionAuthenticator::new(ledger);
        assert_eq!(auth.authenticate("live").await.unwrap().user_id, "user-1");
        assert!(matches!(auth.authenticate("stale").await, Err(AuthError::SessionExpired)));
        assert!(matches!(auth.authenticate("nope").await, Err(AuthError::InvalidSession)));
    }
}
