//! Token ledger module
//!
//! Balances, the transaction log and the action log, plus the balance
//! checker and the token consumer built on top of them.

pub mod balance;
pub mod consumer;
pub mod sqlite;
pub mod store;

pub use balance::{BalanceCheck, BalanceChecker};
pub use consumer::{ConsumeRequest, RetryPolicy, TokenConsumer};
pub use sqlite::{NewAccount, SqliteLedger};
pub use store::{Account, ActionRecord, ConsumptionEntry, ConsumptionReceipt, Ledger, TransactionRecord};
