//! Configuration management for the NBP MCP Server
//!
//! Handles paths, environment variables, and configuration loading.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, NbpMcpError, Result};

/// Configuration for the NBP MCP Server
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for storing configuration files
    pub config_dir: PathBuf,

    /// Path to the SQLite ledger database
    pub database_path: PathBuf,

    /// Address the HTTP transport binds to
    pub bind_addr: SocketAddr,

    /// Base URL of the NBP API
    pub nbp_base_url: String,

    /// Upper bound for a single NBP API call
    pub nbp_timeout: Duration,

    /// Attempts for one atomic ledger unit before giving up
    pub ledger_attempts: u32,

    /// Base delay between ledger attempts (multiplied by attempt number)
    pub ledger_backoff: Duration,

    /// Maximum number of per-user servers kept in memory
    pub server_cache_capacity: usize,

    /// Maximum size of the text returned by a tool
    pub max_output_bytes: usize,

    /// Static API key used by the stdio transport
    pub api_key: Option<String>,
}

impl Config {
    /// Create a new configuration from the environment with default paths
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;

        let database_path = std::env::var("NBP_MCP_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir.join("ledger.db"));

        Ok(Self {
            config_dir,
            database_path,
            bind_addr: env_or("NBP_MCP_BIND", SocketAddr::from(([127, 0, 0, 1], 8080)))?,
            nbp_base_url: std::env::var("NBP_API_BASE_URL")
                .unwrap_or_else(|_| nbp::API_BASE_URL.to_string()),
            nbp_timeout: Duration::from_secs(env_or("NBP_API_TIMEOUT_SECS", 10)?),
            ledger_attempts: env_or("NBP_MCP_LEDGER_ATTEMPTS", 3u32)?.max(1),
            ledger_backoff: Duration::from_millis(env_or("NBP_MCP_RETRY_BACKOFF_MS", 50)?),
            server_cache_capacity: env_or("NBP_MCP_CACHE_CAPACITY", 256usize)?.max(1),
            max_output_bytes: env_or("NBP_MCP_MAX_OUTPUT_BYTES", 16 * 1024)?,
            api_key: std::env::var("NBP_MCP_API_KEY").ok().filter(|k| !k.is_empty()),
        })
    }

    /// Configuration rooted at an explicit database file, with defaults for everything else
    pub fn with_database(database_path: impl Into<PathBuf>) -> Self {
        let database_path = database_path.into();
        let config_dir = database_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();

        Self {
            config_dir,
            database_path,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            nbp_base_url: nbp::API_BASE_URL.to_string(),
            nbp_timeout: Duration::from_secs(10),
            ledger_attempts: 3,
            ledger_backoff: Duration::from_millis(50),
            server_cache_capacity: 256,
            max_output_bytes: 16 * 1024,
            api_key: None,
        }
    }

    /// Get the configuration directory, creating it if necessary
    fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::home_dir()
            .ok_or_else(|| {
                NbpMcpError::Config(ConfigError::DirNotFound {
                    path: "~".to_string(),
                })
            })?
            .join(".nbp-mcp");

        // Create directory if it doesn't exist
        if !config_dir.exists() {
            std::fs::create_dir_all(&config_dir).map_err(|_| {
                NbpMcpError::Config(ConfigError::DirCreationFailed {
                    path: config_dir.display().to_string(),
                })
            })?;
        }

        Ok(config_dir)
    }

    /// The API key for the stdio transport, or an error naming the variable
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            NbpMcpError::Config(ConfigError::MissingEnvVar {
                var: "NBP_MCP_API_KEY".to_string(),
            })
        })
    }
}

/// Read and parse an environment variable, falling back to a default when unset
fn env_or<T: FromStr>(var: &str, default: T) -> Result<T> {
    match std::env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| {
            NbpMcpError::Config(ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            })
        }),
        Err(_) => Ok(default),
    }
}

/// NBP API constants
pub mod nbp {
    /// Base URL for the NBP API
    pub const API_BASE_URL: &str = "https://api.nbp.pl/api";

    /// Service identifier recorded in the action log
    pub const SERVICE_ID: &str = "nbp";

    /// Longest range (inclusive days) a single query may cover
    pub const MAX_RANGE_DAYS: i64 = 93;

    /// First day with exchange rate tables
    pub const RATES_HISTORY_START: &str = "2002-01-02";

    /// First day with gold prices
    pub const GOLD_HISTORY_START: &str = "2013-01-02";

    /// Average exchange rate table
    pub const RATES_TABLE: &str = "A";

    /// Currencies quoted in table A
    pub const TABLE_A_CURRENCIES: &[&str] = &[
        "THB", "USD", "AUD", "HKD", "CAD", "NZD", "SGD", "EUR", "HUF", "CHF", "GBP", "UAH", "JPY",
        "CZK", "DKK", "ISK", "NOK", "SEK", "RON", "BGN", "TRY", "ILS", "CLP", "PHP", "MXN", "ZAR",
        "BRL", "MYR", "IDR", "INR", "KRW", "CNY", "XDR",
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_database_defaults() {
        let config = Config::with_database("/tmp/nbp/ledger.db");
        assert_eq!(config.config_dir, PathBuf::from("/tmp/nbp"));
        assert_eq!(config.nbp_timeout, Duration::from_secs(10));
        assert_eq!(config.ledger_attempts, 3);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_require_api_key() {
        let mut config = Config::with_database("ledger.db");
        assert!(config.require_api_key().is_err());

        config.api_key = Some("nbp_abc".to_string());
        assert_eq!(config.require_api_key().unwrap(), "nbp_abc");
    }

    #[test]
    fn test_table_a_codes_are_upper_case() {
        assert!(nbp::TABLE_A_CURRENCIES
            .iter()
            .all(|c| c.len() == 3 && c.chars().all(|ch| ch.is_ascii_uppercase())));
    }
}
