//! MCP (Model Context Protocol) module
//!
//! Implements the MCP server protocol for tool invocation, shared by the
//! API key and browser session adapters.

pub mod adapter;
pub mod cache;
pub mod dispatcher;
pub mod server;
pub mod shaping;
pub mod tools;
pub mod types;

pub use adapter::{ApiKeyAdapter, AuthPath, OAuthAdapter, ProtocolAdapter, ServerFactory};
pub use server::McpServer;
