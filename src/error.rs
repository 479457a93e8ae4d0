//! Error types for the NBP MCP Server
//!
//! This module defines the error hierarchy for all operations in the server.

use thiserror::Error;

/// Main error type for the NBP MCP Server
#[derive(Error, Debug)]
pub enum NbpMcpError {
    /// Caller authentication errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Token ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// NBP API errors
    #[error("NBP API error: {0}")]
    Nbp(#[from] NbpApiError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// MCP protocol errors
    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Caller authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing credential")]
    MissingCredential,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Invalid or unknown session")]
    InvalidSession,

    #[error("Session expired")]
    SessionExpired,

    #[error("Credential lookup failed: {0}")]
    Lookup(#[from] LedgerError),
}

/// Token ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Lock contention or another condition worth retrying
    #[error("Transient storage failure: {message}")]
    Transient { message: String },

    /// The consumption request violates the consumer contract
    #[error("Invalid consumption request: {message}")]
    InvalidConsumption { message: String },

    #[error("Account not found: {user_id}")]
    AccountNotFound { user_id: String },

    #[error("Account already exists: {email}")]
    AccountExists { email: String },

    #[error("Ledger retries exhausted after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("Storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    /// Whether retrying the same atomic unit may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient { .. })
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                LedgerError::Transient {
                    message: err.to_string(),
                }
            }
            _ => LedgerError::Sqlite(err),
        }
    }
}

/// NBP API errors
#[derive(Error, Debug)]
pub enum NbpApiError {
    /// The API has no quotation for the requested day(s)
    #[error("No data published for {period}")]
    NoData { period: String },

    #[error("Request timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    #[error("API request failed ({status}): {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Malformed API response: {message}")]
    MalformedResponse { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found: {path}")]
    DirNotFound { path: String },

    #[error("Failed to create config directory: {path}")]
    DirCreationFailed { path: String },

    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

/// Input validation errors. Never charged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid date '{value}': expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("Date {date} is in the future")]
    FutureDate { date: String },

    #[error("Date {date} is before {earliest}, the first day with published data")]
    BeforeHistoryStart { date: String, earliest: String },

    #[error("Start date {start} is after end date {end}")]
    InvertedRange { start: String, end: String },

    #[error("Date range spans {days} days; the maximum is {max} days")]
    RangeTooLong { days: i64, max: i64 },

    #[error("Unknown currency code '{code}'")]
    UnknownCurrency { code: String },

    #[error("Invalid parameter: {name} - {message}")]
    InvalidParameter { name: String, message: String },
}

/// MCP protocol errors
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid tool arguments: {message}")]
    InvalidArguments { message: String },

    #[error("Internal failure: {message}")]
    Internal { message: String },
}

/// Result type alias for NBP MCP operations
pub type Result<T> = std::result::Result<T, NbpMcpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ValidationError::RangeTooLong { days: 200, max: 93 };
        assert!(err.to_string().contains("200"));
        assert!(err.to_string().contains("93"));
    }

    #[test]
    fn test_error_conversion() {
        let ledger_err = LedgerError::AccountNotFound {
            user_id: "u1".to_string(),
        };
        let err: NbpMcpError = ledger_err.into();
        assert!(matches!(err, NbpMcpError::Ledger(_)));
    }

    #[test]
    fn test_busy_is_transient() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert!(LedgerError::from(busy).is_transient());

        let other = rusqlite::Error::QueryReturnedNoRows;
        assert!(!LedgerError::from(other).is_transient());
    }
}
