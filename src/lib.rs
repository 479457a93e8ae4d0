//! NBP MCP Server Library
//!
//! A Model Context Protocol (MCP) server exposing National Bank of Poland
//! exchange rates and gold prices as tools. Every successful call is charged
//! against a per-user token ledger, exactly once.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod ledger;
pub mod mcp;
pub mod nbp;

pub use config::Config;
pub use error::{NbpMcpError, Result};
