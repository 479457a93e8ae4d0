//! SQLite-backed token ledger
//!
//! Each operation opens its own connection on the blocking pool, so any
//! number of server instances can share one database file. All coordination
//! happens inside SQLite transactions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::LedgerError;
use crate::ledger::store::{
    Account, ActionRecord, ConsumptionEntry, ConsumptionReceipt, Ledger, TransactionRecord,
};

/// Token ledger stored in a SQLite database file
#[derive(Clone, Debug)]
pub struct SqliteLedger {
    path: PathBuf,
}

/// Account provisioning request, issued by the billing side
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub id: String,
    pub email: String,
    pub initial_tokens: i64,
}

impl SqliteLedger {
    /// Open (and create if needed) the ledger at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let ledger = Self { path: path.into() };
        ledger.init().await?;
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the schema if it does not exist yet
    pub async fn init(&self) -> Result<(), LedgerError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), LedgerError> {
            let conn = open_connection(&path)?;
            init_schema(&conn)?;
            Ok(())
        })
        .await?
    }

    /// Insert a new account, recording the initial purchase as a credit
    pub async fn create_account(&self, account: NewAccount) -> Result<Account, LedgerError> {
        if account.initial_tokens < 0 {
            return Err(LedgerError::InvalidConsumption {
                message: "initial tokens must not be negative".to_string(),
            });
        }

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Account, LedgerError> {
            let mut conn = open_connection(&path)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = now_rfc3339();

            let inserted = tx.execute(
                "INSERT INTO users (id, email, balance, total_purchased, total_used, is_deleted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3, 0, 0, ?4, ?4)",
                params![account.id, account.email, account.initial_tokens, now],
            );
            if let Err(err) = inserted {
                if is_constraint_violation(&err) {
                    return Err(LedgerError::AccountExists {
                        email: account.email,
                    });
                }
                return Err(err.into());
            }

            if account.initial_tokens > 0 {
                tx.execute(
                    "INSERT INTO transactions (user_id, amount, balance_after, description, created_at)
                     VALUES (?1, ?2, ?2, 'Initial token purchase', ?3)",
                    params![account.id, account.initial_tokens, now],
                )?;
            }

            let created = select_account(&tx, &account.id)?.ok_or_else(|| {
                LedgerError::AccountNotFound {
                    user_id: account.id.clone(),
                }
            })?;
            tx.commit()?;
            Ok(created)
        })
        .await?
    }

    /// Flag an account as deleted. Rows are never removed.
    pub async fn soft_delete_account(&self, user_id: &str) -> Result<(), LedgerError> {
        let path = self.path.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), LedgerError> {
            let conn = open_connection(&path)?;
            let changed = conn.execute(
                "UPDATE users SET is_deleted = 1, updated_at = ?2 WHERE id = ?1",
                params![user_id, now_rfc3339()],
            )?;
            if changed == 0 {
                return Err(LedgerError::AccountNotFound { user_id });
            }
            Ok(())
        })
        .await?
    }

    /// All transactions of a user, oldest first
    pub async fn transactions(&self, user_id: &str) -> Result<Vec<TransactionRecord>, LedgerError> {
        let path = self.path.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<TransactionRecord>, LedgerError> {
            let conn = open_connection(&path)?;
            let mut stmt = conn.prepare(
                "SELECT id, user_id, amount, balance_after, description, created_at
                 FROM transactions WHERE user_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(TransactionRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    amount: row.get(2)?,
                    balance_after: row.get(3)?,
                    description: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await?
    }

    /// Number of action log rows for a user
    pub async fn action_count(&self, user_id: &str) -> Result<i64, LedgerError> {
        let path = self.path.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<i64, LedgerError> {
            let conn = open_connection(&path)?;
            let count = conn.query_row(
                "SELECT COUNT(*) FROM mcp_actions WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await?
    }

    // ==================== Credentials ====================

    /// Store a hashed API key for a user
    pub async fn insert_api_key(
        &self,
        user_id: &str,
        key_hash: &str,
        label: &str,
    ) -> Result<(), LedgerError> {
        let path = self.path.clone();
        let (user_id, key_hash, label) = (user_id.to_string(), key_hash.to_string(), label.to_string());
        tokio::task::spawn_blocking(move || -> Result<(), LedgerError> {
            let conn = open_connection(&path)?;
            if select_account(&conn, &user_id)?.is_none() {
                return Err(LedgerError::AccountNotFound { user_id });
            }
            conn.execute(
                "INSERT INTO api_keys (key_hash, user_id, label, created_at, revoked)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                params![key_hash, user_id, label, now_rfc3339()],
            )?;
            Ok(())
        })
        .await?
    }

    /// Revoke an API key by hash; returns whether a key was revoked
    pub async fn revoke_api_key(&self, key_hash: &str) -> Result<bool, LedgerError> {
        let path = self.path.clone();
        let key_hash = key_hash.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, LedgerError> {
            let conn = open_connection(&path)?;
            let changed = conn.execute(
                "UPDATE api_keys SET revoked = 1 WHERE key_hash = ?1 AND revoked = 0",
                params![key_hash],
            )?;
            Ok(changed > 0)
        })
        .await?
    }

    /// Account owning a live API key
    pub async fn account_for_api_key(&self, key_hash: &str) -> Result<Option<Account>, LedgerError> {
        let path = self.path.clone();
        let key_hash = key_hash.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Account>, LedgerError> {
            let conn = open_connection(&path)?;
            let user_id: Option<String> = conn
                .query_row(
                    "SELECT user_id FROM api_keys WHERE key_hash = ?1 AND revoked = 0",
                    params![key_hash],
                    |row| row.get(0),
                )
                .optional()?;
            match user_id {
                Some(user_id) => select_account(&conn, &user_id),
                None => Ok(None),
            }
        })
        .await?
    }

    /// Store a hashed session token minted by the login flow
    pub async fn insert_session(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: i64,
    ) -> Result<(), LedgerError> {
        let path = self.path.clone();
        let (user_id, token_hash) = (user_id.to_string(), token_hash.to_string());
        tokio::task::spawn_blocking(move || -> Result<(), LedgerError> {
            let conn = open_connection(&path)?;
            conn.execute(
                "INSERT OR REPLACE INTO oauth_sessions (token_hash, user_id, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![token_hash, user_id, expires_at, now_rfc3339()],
            )?;
            Ok(())
        })
        .await?
    }

    /// Account behind a session token, with the session's expiry (unix seconds)
    pub async fn account_for_session(
        &self,
        token_hash: &str,
    ) -> Result<Option<(Account, i64)>, LedgerError> {
        let path = self.path.clone();
        let token_hash = token_hash.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<(Account, i64)>, LedgerError> {
            let conn = open_connection(&path)?;
            let session: Option<(String, i64)> = conn
                .query_row(
                    "SELECT user_id, expires_at FROM oauth_sessions WHERE token_hash = ?1",
                    params![token_hash],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((user_id, expires_at)) = session else {
                return Ok(None);
            };
            Ok(select_account(&conn, &user_id)?.map(|account| (account, expires_at)))
        })
        .await?
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn account(&self, user_id: &str) -> Result<Option<Account>, LedgerError> {
        let path = self.path.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Account>, LedgerError> {
            let conn = open_connection(&path)?;
            select_account(&conn, &user_id)
        })
        .await?
    }

    async fn apply_consumption(
        &self,
        entry: &ConsumptionEntry,
    ) -> Result<ConsumptionReceipt, LedgerError> {
        let path = self.path.clone();
        let entry = entry.clone();
        let input_params = serde_json::to_string(&entry.input_params)?;
        let result_payload = serde_json::to_string(&entry.result_payload)?;

        tokio::task::spawn_blocking(move || -> Result<ConsumptionReceipt, LedgerError> {
            let mut conn = open_connection(&path)?;
            consume_in_transaction(&mut conn, &entry, &input_params, &result_payload)
        })
        .await?
    }

    async fn action(&self, action_id: &str) -> Result<Option<ActionRecord>, LedgerError> {
        let path = self.path.clone();
        let action_id = action_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<ActionRecord>, LedgerError> {
            let conn = open_connection(&path)?;
            let record = conn
                .query_row(
                    "SELECT action_id, user_id, service_id, tool_id, input_params, result_payload,
                            tokens_consumed, success, transaction_id, created_at
                     FROM mcp_actions WHERE action_id = ?1",
                    params![action_id],
                    |row| {
                        Ok(ActionRecord {
                            action_id: row.get(0)?,
                            user_id: row.get(1)?,
                            service_id: row.get(2)?,
                            tool_id: row.get(3)?,
                            input_params: row.get(4)?,
                            result_payload: row.get(5)?,
                            tokens_consumed: row.get(6)?,
                            success: row.get(7)?,
                            transaction_id: row.get(8)?,
                            created_at: row.get(9)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
        .await?
    }
}

/// The atomic unit: decrement, transaction row, action row.
///
/// The balance recorded on the transaction is the value returned by the
/// decrement itself, never recomputed from the amount. The action id lookup
/// runs under the IMMEDIATE write lock, so no other writer can record the
/// same action id between the lookup and the inserts.
fn consume_in_transaction(
    conn: &mut Connection,
    entry: &ConsumptionEntry,
    input_params: &str,
    result_payload: &str,
) -> Result<ConsumptionReceipt, LedgerError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(receipt) = replay_receipt(&tx, &entry.action_id)? {
        return Ok(receipt);
    }

    let now = now_rfc3339();
    let new_balance: Option<i64> = tx
        .query_row(
            "UPDATE users
             SET balance = balance - ?1, total_used = total_used + ?1, updated_at = ?3
             WHERE id = ?2
             RETURNING balance",
            params![entry.amount, entry.user_id, now],
            |row| row.get(0),
        )
        .optional()?;
    let Some(new_balance) = new_balance else {
        return Err(LedgerError::AccountNotFound {
            user_id: entry.user_id.clone(),
        });
    };

    tx.execute(
        "INSERT INTO transactions (user_id, amount, balance_after, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![entry.user_id, -entry.amount, new_balance, entry.description(), now],
    )?;
    let transaction_id = tx.last_insert_rowid();

    tx.execute(
        "INSERT INTO mcp_actions (action_id, user_id, service_id, tool_id, input_params,
                                  result_payload, tokens_consumed, success, transaction_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.action_id,
            entry.user_id,
            entry.service_id,
            entry.tool_id,
            input_params,
            result_payload,
            entry.amount,
            entry.success,
            transaction_id,
            now
        ],
    )?;

    tx.commit()?;

    Ok(ConsumptionReceipt {
        new_balance,
        transaction_id,
        action_id: entry.action_id.clone(),
        replayed: false,
    })
}

/// Receipt of an already-applied action, if any
fn replay_receipt(
    conn: &Connection,
    action_id: &str,
) -> Result<Option<ConsumptionReceipt>, LedgerError> {
    let found: Option<(i64, i64)> = conn
        .query_row(
            "SELECT a.transaction_id, t.balance_after
             FROM mcp_actions a JOIN transactions t ON t.id = a.transaction_id
             WHERE a.action_id = ?1",
            params![action_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(found.map(|(transaction_id, balance_after)| ConsumptionReceipt {
        new_balance: balance_after,
        transaction_id,
        action_id: action_id.to_string(),
        replayed: true,
    }))
}

fn select_account(conn: &Connection, user_id: &str) -> Result<Option<Account>, LedgerError> {
    let account = conn
        .query_row(
            "SELECT id, email, balance, total_purchased, total_used, is_deleted
             FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok(Account {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    balance: row.get(2)?,
                    total_purchased: row.get(3)?,
                    total_used: row.get(4)?,
                    is_deleted: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(account)
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY NOT NULL,
            email TEXT NOT NULL UNIQUE,
            balance INTEGER NOT NULL DEFAULT 0,
            total_purchased INTEGER NOT NULL DEFAULT 0,
            total_used INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            balance_after INTEGER NOT NULL,
            description TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_user_id
            ON transactions(user_id);

        CREATE TABLE IF NOT EXISTS mcp_actions (
            action_id TEXT PRIMARY KEY NOT NULL,
            user_id TEXT NOT NULL,
            service_id TEXT NOT NULL,
            tool_id TEXT NOT NULL,
            input_params TEXT NOT NULL,
            result_payload TEXT NOT NULL,
            tokens_consumed INTEGER NOT NULL,
            success INTEGER NOT NULL,
            transaction_id INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_mcp_actions_user_id
            ON mcp_actions(user_id);

        CREATE TABLE IF NOT EXISTS api_keys (
            key_hash TEXT PRIMARY KEY NOT NULL,
            user_id TEXT NOT NULL,
            label TEXT NOT NULL,
            created_at TEXT NOT NULL,
            revoked INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS oauth_sessions (
            token_hash TEXT PRIMARY KEY NOT NULL,
            user_id TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );",
    )
}

fn open_connection(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn ledger_with_user(balance: i64) -> (SqliteLedger, tempfile::TempDir) {
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
        (ledger, dir)
    }

    fn entry(action_id: &str, amount: i64) -> ConsumptionEntry {
        ConsumptionEntry {
            action_id: action_id.to_string(),
            user_id: "user-1".to_string(),
            amount,
            service_id: "nbp".to_string(),
            tool_id: "get_gold_price".to_string(),
            input_params: json!({"date": "2024-01-02"}),
            result_payload: json!({"price": 254.3}),
            success: true,
        }
    }

    #[tokio::test]
    async fn test_create_account_records_initial_credit() {
        let (ledger, _dir) = ledger_with_user(5).await;

        let account = ledger.account("user-1").await.unwrap().unwrap();
        assert_eq!(account.balance, 5);
        assert_eq!(account.total_purchased, 5);
        assert!(!account.is_deleted);

        let transactions = ledger.transactions("user-1").await.unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].amount, 5);
        assert_eq!(transactions[0].balance_after, 5);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let (ledger, _dir) = ledger_with_user(1).await;
        let err = ledger
            .create_account(NewAccount {
                id: "user-2".to_string(),
                email: "user@example.com".to_string(),
                initial_tokens: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountExists { .. }));
    }

    #[tokio::test]
    async fn test_consumption_records_post_update_balance() {
        let (ledger, _dir) = ledger_with_user(3).await;

        let receipt = ledger.apply_consumption(&entry("a-1", 1)).await.unwrap();
        assert_eq!(receipt.new_balance, 2);
        assert!(!receipt.replayed);

        let receipt = ledger.apply_consumption(&entry("a-2", 1)).await.unwrap();
        assert_eq!(receipt.new_balance, 1);

        let account = ledger.account("user-1").await.unwrap().unwrap();
        let transactions = ledger.transactions("user-1").await.unwrap();
        assert_eq!(account.balance, 1);
        assert_eq!(account.total_used, 2);
        assert_eq!(transactions.last().unwrap().balance_after, account.balance);
        assert_eq!(transactions.last().unwrap().amount, -1);
    }

    #[tokio::test]
    async fn test_same_action_id_applies_once() {
        let (ledger, _dir) = ledger_with_user(5).await;

        let first = ledger.apply_consumption(&entry("a-1", 1)).await.unwrap();
        let second = ledger.apply_consumption(&entry("a-1", 1)).await.unwrap();

        assert!(second.replayed);
        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(second.new_balance, 4);
        assert_eq!(ledger.account("user-1").await.unwrap().unwrap().balance, 4);
        assert_eq!(ledger.transactions("user-1").await.unwrap().len(), 2);
        assert_eq!(ledger.action_count("user-1").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_racing_handles_apply_action_once() {
        let (ledger, _dir) = ledger_with_user(5).await;
        let other = SqliteLedger::open(ledger.path()).await.unwrap();

        let e = entry("a-race", 1);
        let (first, second) = tokio::join!(ledger.apply_consumption(&e), other.apply_consumption(&e));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_ne!(first.replayed, second.replayed);
        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(ledger.account("user-1").await.unwrap().unwrap().balance, 4);
        assert_eq!(ledger.action_count("user-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_leaves_no_rows() {
        let (ledger, _dir) = ledger_with_user(5).await;
        let mut missing = entry("a-1", 1);
        missing.user_id = "ghost".to_string();

        let err = ledger.apply_consumption(&missing).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound { .. }));
        assert!(ledger.action("a-1").await.unwrap().is_none());
        assert!(ledger.transactions("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_action_row_contents() {
        let (ledger, _dir) = ledger_with_user(2).await;
        let receipt = ledger.apply_consumption(&entry("a-9", 2)).await.unwrap();

        let action = ledger.action("a-9").await.unwrap().unwrap();
        assert_eq!(action.tokens_consumed, 2);
        assert!(action.success);
        assert_eq!(action.transaction_id, receipt.transaction_id);
        assert_eq!(action.tool_id, "get_gold_price");
        assert!(action.input_params.contains("2024-01-02"));
    }

    #[tokio::test]
    async fn test_soft_delete_keeps_row() {
        let (ledger, _dir) = ledger_with_user(2).await;
        ledger.soft_delete_account("user-1").await.unwrap();

        let account = ledger.account("user-1").await.unwrap().unwrap();
        assert!(account.is_deleted);
        assert_eq!(account.balance, 2);

        assert!(ledger.soft_delete_account("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_api_key_lookup_and_revocation() {
        let (ledger, _dir) = ledger_with_user(1).await;
        ledger.insert_api_key("user-1", "hash-1", "laptop").await.unwrap();

        let account = ledger.account_for_api_key("hash-1").await.unwrap();
        assert_eq!(account.unwrap().email, "user@example.com");

        assert!(ledger.revoke_api_key("hash-1").await.unwrap());
        assert!(ledger.account_for_api_key("hash-1").await.unwrap().is_none());
        assert!(!ledger.revoke_api_key("hash-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_session_lookup() {
        let (ledger, _dir) = ledger_with_user(1).await;
        ledger.insert_session("user-1", "session-hash", 4_102_444_800).await.unwrap();

        let (account, expires_at) = ledger.account_for_session("session-hash").await.unwrap().unwrap();
        assert_eq!(account.id, "user-1");
        assert_eq!(expires_at, 4_102_444_800);
        assert!(ledger.account_for_session("other").await.unwrap().is_none());
    }
}
