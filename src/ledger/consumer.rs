//! Token consumption
//!
//! Charges a user for one executed tool call. The charge is a single atomic
//! unit in the ledger and is keyed by an action id the caller generates
//! before running the tool, so a retry can never charge twice.
//!
//! The consumer does not check the balance. Callers must have checked it
//! with [`BalanceChecker`](crate::ledger::balance::BalanceChecker) first;
//! used without that check the consumer will drive a balance negative.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::LedgerError;
use crate::ledger::store::{ConsumptionEntry, ConsumptionReceipt, Ledger};

/// Parameters of one consumption
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub user_id: String,
    pub amount: i64,
    pub service_id: String,
    pub tool_id: String,
    pub input_params: Value,
    pub result_payload: Value,
    pub success: bool,
    pub action_id: String,
}

/// Retry policy for the atomic consumption unit
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff * n`
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Atomic, idempotent token consumption with bounded retry
#[derive(Clone)]
pub struct TokenConsumer {
    ledger: Arc<dyn Ledger>,
    retry: RetryPolicy,
}

impl TokenConsumer {
    pub fn new(ledger: Arc<dyn Ledger>, retry: RetryPolicy) -> Self {
        Self { ledger, retry }
    }

    /// Charge `request.amount` tokens under `request.action_id`
    pub async fn consume(&self, request: ConsumeRequest) -> Result<ConsumptionReceipt, LedgerError> {
        validate(&request)?;

        let entry = ConsumptionEntry {
            action_id: request.action_id,
            user_id: request.user_id,
            amount: request.amount,
            service_id: request.service_id,
            tool_id: request.tool_id,
            input_params: request.input_params,
            result_payload: request.result_payload,
            success: request.success,
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.ledger.apply_consumption(&entry).await {
                Ok(receipt) => {
                    tracing::info!(
                        user_id = %entry.user_id,
                        action_id = %receipt.action_id,
                        tool = %entry.tool_id,
                        amount = entry.amount,
                        new_balance = receipt.new_balance,
                        replayed = receipt.replayed,
                        attempt,
                        "tokens consumed"
                    );
                    return Ok(receipt);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    tracing::warn!(
                        action_id = %entry.action_id,
                        attempt,
                        error = %err,
                        "transient ledger failure, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    tracing::error!(
                        action_id = %entry.action_id,
                        attempts = attempt,
                        error = %err,
                        "ledger retries exhausted"
                    );
                    return Err(LedgerError::RetriesExhausted {
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    tracing::error!(action_id = %entry.action_id, error = %err, "consumption failed");
                    return Err(err);
                }
            }
        }
    }
}

fn validate(request: &ConsumeRequest) -> Result<(), LedgerError> {
    let problem = if request.amount <= 0 {
        Some(format!("amount must be positive, got {}", request.amount))
    } else if request.user_id.trim().is_empty() {
        Some("user id is empty".to_string())
    } else if request.service_id.trim().is_empty() {
        Some("service id is empty".to_string())
    } else if request.tool_id.trim().is_empty() {
        Some("tool id is empty".to_string())
    } else if request.action_id.trim().is_empty() {
        Some("action id is empty".to_string())
    } else {
        None
    };

    match problem {
        Some(message) => Err(LedgerError::InvalidConsumption { message }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::ledger::sqlite::{NewAccount, SqliteLedger};
    use crate::ledger::store::{Account, ActionRecord};

    /// Fails the first `failures` calls with a transient error
    struct FlakyLedger {
        inner: SqliteLedger,
        failures: AtomicU32,
    }

    #[async_trait]
    impl Ledger for FlakyLedger {
        async fn account(&self, user_id: &str) -> Result<Option<Account>, LedgerError> {
            self.inner.account(user_id).await
        }

        async fn apply_consumption(
            &self,
            entry: &ConsumptionEntry,
        ) -> Result<ConsumptionReceipt, LedgerError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(LedgerError::Transient {
                    message: "database is locked".to_string(),
                });
            }
            self.inner.apply_consumption(entry).await
        }

        async fn action(&self, action_id: &str) -> Result<Option<ActionRecord>, LedgerError> {
            self.inner.action(action_id).await
        }
    }

    async fn setup(balance: i64, failures: u32) -> (TokenConsumer, SqliteLedger, tempfile::TempDir) {
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
        let flaky = FlakyLedger {
            inner: ledger.clone(),
            failures: AtomicU32::new(failures),
        };
        let retry = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };
        (TokenConsumer::new(Arc::new(flaky), retry), ledger, dir)
    }

    fn request(action_id: &str) -> ConsumeRequest {
        ConsumeRequest {
            user_id: "user-1".to_string(),
            amount: 1,
            service_id: "nbp".to_string(),
            tool_id: "get_currency_rate".to_string(),
            input_params: json!({"currencyCode": "USD"}),
            result_payload: json!({"mid": 3.94}),
            success: true,
            action_id: action_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let (consumer, ledger, _dir) = setup(5, 2).await;

        let receipt = consumer.consume(request("a-1")).await.unwrap();
        assert_eq!(receipt.new_balance, 4);
        assert_eq!(ledger.account("user-1").await.unwrap().unwrap().balance, 4);
    }

    #[tokio::test]
    async fn test_retries_exhausted_leaves_no_charge() {
        let (consumer, ledger, _dir) = setup(5, 3).await;

        let err = consumer.consume(request("a-1")).await.unwrap_err();
        assert!(matches!(err, LedgerError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(ledger.account("user-1").await.unwrap().unwrap().balance, 5);
        assert!(ledger.action("a-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repeat_consumption_charges_once() {
        let (consumer, ledger, _dir) = setup(5, 0).await;

        let first = consumer.consume(request("a-1")).await.unwrap();
        let second = consumer.consume(request("a-1")).await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(ledger.account("user-1").await.unwrap().unwrap().balance, 4);
        assert_eq!(ledger.action_count("user-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected() {
        let (consumer, ledger, _dir) = setup(5, 0).await;

        let mut zero = request("a-1");
        zero.amount = 0;
        let mut no_tool = request("a-2");
        no_tool.tool_id = String::new();
        let mut no_user = request("a-3");
        no_user.user_id = " ".to_string();

        for bad in [zero, no_tool, no_user] {
            let err = consumer.consume(bad).await.unwrap_err();
            assert!(matches!(err, LedgerError::InvalidConsumption { .. }));
        }
        assert_eq!(ledger.account("user-1").await.unwrap().unwrap().balance, 5);
    }

    #[tokio::test]
    async fn test_no_implicit_balance_check() {
        let (consumer, ledger, _dir) = setup(0, 0).await;

        let receipt = consumer.consume(request("a-1")).await.unwrap();
        assert_eq!(receipt.new_balance, -1);

        let transactions = ledger.transactions("user-1").await.unwrap();
        assert_eq!(transactions.last().unwrap().balance_after, -1);
    }
}
