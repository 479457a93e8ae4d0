//! NBP API module
//!
//! Contains types, validation rules, and the client for the National Bank of Poland API.

pub mod client;
pub mod types;
pub mod validation;
