//! Balance checks
//!
//! The checker holds nothing but a handle to the ledger. There is no cache
//! in its call path: every check is a fresh read, because purchases and
//! other tool calls may change the balance at any time.

use std::sync::Arc;

use serde::Serialize;

use crate::error::LedgerError;
use crate::ledger::store::Ledger;

/// Result of a balance check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceCheck {
    pub sufficient: bool,
    pub current_balance: i64,
    pub user_deleted: bool,
}

/// Read-only sufficiency check against the ledger
#[derive(Clone)]
pub struct BalanceChecker {
    ledger: Arc<dyn Ledger>,
}

impl BalanceChecker {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Does `user_id` hold at least `required` tokens on a live account?
    ///
    /// A missing account reads as an empty, live one.
    pub async fn check(&self, user_id: &str, required: i64) -> Result<BalanceCheck, LedgerError> {
        let check = match self.ledger.account(user_id).await? {
            Some(account) if account.is_deleted => BalanceCheck {
                sufficient: false,
                current_balance: account.balance,
                user_deleted: true,
            },
            Some(account) => BalanceCheck {
                sufficient: account.balance >= required,
                current_balance: account.balance,
                user_deleted: false,
            },
            None => BalanceCheck {
                sufficient: false,
                current_balance: 0,
                user_deleted: false,
            },
        };

        tracing::debug!(
            user_id,
            required,
            balance = check.current_balance,
            sufficient = check.sufficient,
            deleted = check.user_deleted,
            "balance checked"
        );

        Ok(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::sqlite::{NewAccount, SqliteLedger};

    async fn checker(balance: i64) -> (BalanceChecker, SqliteLedger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SqliteLedger::open(dir.path().join("ledger.db")).await.unwrap();
        ledger
            .create_account(NewAccount {
                id: "user-1".to_string(),
                email: "user@example.com".to_string(),
                initial_tokens: balance,
            })
            .await
            .unwrap();
        (BalanceChecker::new(Arc::new(ledger.clone())), ledger, dir)
    }

    #[tokio::test]
    async fn test_sufficient_and_insufficient() {
        let (checker, _ledger, _dir) = checker(1).await;

        let check = checker.check("user-1", 1).await.unwrap();
        assert!(check.sufficient);
        assert_eq!(check.current_balance, 1);

        let check = checker.check("user-1", 2).await.unwrap();
        assert!(!check.sufficient);
        assert!(!check.user_deleted);
    }

    #[tokio::test]
    async fn test_deleted_account_is_never_sufficient() {
        let (checker, ledger, _dir) = checker(100).await;
        ledger.soft_delete_account("user-1").await.unwrap();

        let check = checker.check("user-1", 1).await.unwrap();
        assert!(!check.sufficient);
        assert!(check.user_deleted);
    }

    #[tokio::test]
    async fn test_missing_account_reads_as_empty() {
        let (checker, _ledger, _dir) = checker(1).await;

        let check = checker.check("ghost", 1).await.unwrap();
        assert_eq!(
            check,
            BalanceCheck {
                sufficient: false,
                current_balance: 0,
                user_deleted: false,
            }
        );
    }

    #[tokio::test]
    async fn test_repeated_check_is_stable() {
        let (checker, _ledger, _dir) = checker(3).await;

        let first = checker.check("user-1", 2).await.unwrap();
        let second = checker.check("user-1", 2).await.unwrap();
        assert_eq!(first, second);
    }
}
