//! Ledger contract and record types
//!
//! The ledger is the only shared mutable resource of the server. Every
//! operation here is a fresh round trip to storage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// A user account as stored in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub balance: i64,
    pub total_purchased: i64,
    pub total_used: i64,
    pub is_deleted: bool,
}

/// One ledger movement. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub user_id: String,
    /// Positive for credits, negative for debits
    pub amount: i64,
    pub balance_after: i64,
    pub description: String,
    pub created_at: String,
}

/// One charged tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_id: String,
    pub user_id: String,
    pub service_id: String,
    pub tool_id: String,
    pub input_params: String,
    pub result_payload: String,
    pub tokens_consumed: i64,
    pub success: bool,
    pub transaction_id: i64,
    pub created_at: String,
}

/// Everything written by a single consumption
#[derive(Debug, Clone)]
pub struct ConsumptionEntry {
    pub action_id: String,
    pub user_id: String,
    pub amount: i64,
    pub service_id: String,
    pub tool_id: String,
    pub input_params: serde_json::Value,
    pub result_payload: serde_json::Value,
    pub success: bool,
}

impl ConsumptionEntry {
    /// Description stored on the transaction row
    pub fn description(&self) -> String {
        format!("{}/{} ({})", self.service_id, self.tool_id, self.action_id)
    }
}

/// Outcome of a consumption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionReceipt {
    pub new_balance: i64,
    pub transaction_id: i64,
    pub action_id: String,
    /// The action id had already been applied; nothing was charged this time
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

/// Persistence contract for the token ledger
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Read one account by primary key
    async fn account(&self, user_id: &str) -> Result<Option<Account>, LedgerError>;

    /// Apply a consumption as one atomic unit: balance decrement,
    /// transaction row and action row. Applying an action id that is
    /// already recorded returns the original receipt with `replayed` set.
    async fn apply_consumption(
        &self,
        entry: &ConsumptionEntry,
    ) -> Result<ConsumptionReceipt, LedgerError>;

    /// Look up an action by its idempotency key
    async fn action(&self, action_id: &str) -> Result<Option<ActionRecord>, LedgerError>;
}
