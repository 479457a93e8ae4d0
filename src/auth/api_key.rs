//! Static API key authentication

use async_trait::async_trait;

use crate::auth::{hash_secret, is_api_key, AuthContext, Authenticator};
use crate::error::AuthError;
use crate::ledger::SqliteLedger;

/// Authenticates `nbp_...` API keys against the ledger database
#[derive(Clone)]
pub struct ApiKeyAuthenticator {
    ledger: SqliteLedger,
}

impl ApiKeyAuthenticator {
    pub fn new(ledger: SqliteLedger) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<AuthContext, AuthError> {
        let key = credential.trim();
        if key.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        if !is_api_key(key) {
            return Err(AuthError::InvalidApiKey);
        }

        let account = self
            .ledger
            .account_for_api_key(&hash_secret(key))
            .await?
            .ok_or(AuthError::InvalidApiKey)?;

        Ok(AuthContext {
            user_id: account.id,
            email: account.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::generate_api_key;
    use crate::ledger::NewAccount;

    #[tokio::test]
    async fn test_api_key_round_trip() {
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
        let key = generate_api_key();
        ledger.insert_api_key("user-1", &hash_secret(&key), "test").await.unwrap();

        let auth = ApiKeyAuthenticator::new(ledger);
        let ctx = auth.authenticate(&key).await.unwrap();
        assert_eq!(ctx.user_id, "user-1");
        assert_eq!(ctx.email, "user@example.com");

        assert!(matches!(
            auth.authenticate("nbp_unknown").await,
            Err(AuthError::InvalidApiKey)
        ));
        // well-formed but never issued
        assert!(matches!(
            auth.authenticate("nbp_ffffffffffffffffffffffffffffffff").await,
            Err(AuthError::InvalidApiKey)
        ));
        assert!(matches!(
            auth.authenticate("not-a-key").await,
            Err(AuthError::InvalidApiKey)
        ));
        assert!(matches!(auth.authenticate("").await, Err(AuthError::MissingCredential)));
    }
}
