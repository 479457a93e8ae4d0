//! Protocol adapters
//!
//! An adapter authenticates one kind of credential and hands the message to
//! the caller's [`McpServer`]. Both adapters share one [`ServerFactory`], so
//! a caller gets the same tools, costs and behavior whichever path they use.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};

use crate::auth::{ApiKeyAuthenticator, AuthContext, Authenticator, SessionAuthenticator};
use crate::config::Config;
use crate::error::AuthError;
use crate::ledger::{BalanceChecker, Ledger, RetryPolicy, TokenConsumer};
use crate::mcp::cache::LruCache;
use crate::mcp::dispatcher::ToolDispatcher;
use crate::mcp::server::McpServer;
use crate::mcp::shaping::OutputShaper;
use crate::mcp::tools::ToolCatalog;
use crate::mcp::types::JsonRpcResponse;
use crate::nbp::client::RateSource;

/// Header carrying an API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Builds per-caller servers over shared collaborators
pub struct ServerFactory {
    ledger: Arc<dyn Ledger>,
    source: Arc<dyn RateSource>,
    catalog: Arc<ToolCatalog>,
    retry: RetryPolicy,
    shaper: OutputShaper,
    servers: LruCache<AuthContext, Arc<McpServer>>,
}

impl ServerFactory {
    pub fn new(ledger: Arc<dyn Ledger>, source: Arc<dyn RateSource>, config: &Config) -> Self {
        Self {
            ledger,
            source,
            catalog: Arc::new(ToolCatalog::standard()),
            retry: RetryPolicy {
                max_attempts: config.ledger_attempts,
                backoff: config.ledger_backoff,
            },
            shaper: OutputShaper::new(config.max_output_bytes),
            servers: LruCache::new(config.server_cache_capacity),
        }
    }

    /// The server bound to `caller`, reused while it stays in the cache
    pub fn server_for(&self, caller: &AuthContext) -> Arc<McpServer> {
        self.servers
            .get_or_insert_with(caller.clone(), || Arc::new(self.build(caller.clone())))
    }

    fn build(&self, caller: AuthContext) -> McpServer {
        tracing::debug!(user_id = %caller.user_id, "building server instance");
        McpServer::new(ToolDispatcher::new(
            caller,
            Arc::clone(&self.catalog),
            BalanceChecker::new(Arc::clone(&self.ledger)),
            TokenConsumer::new(Arc::clone(&self.ledger), self.retry),
            Arc::clone(&self.source),
            self.shaper,
        ))
    }
}

/// Which credential an adapter accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPath {
    ApiKey,
    OAuthSession,
}

/// Authenticates a credential and routes messages to the caller's server
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn auth_path(&self) -> AuthPath;

    /// Extract the credential from request headers
    fn credential<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str>;

    fn authenticator(&self) -> &dyn Authenticator;

    fn factory(&self) -> &ServerFactory;

    async fn connect(&self, credential: &str) -> Result<Arc<McpServer>, AuthError> {
        let caller = self.authenticator().authenticate(credential).await.map_err(|err| {
            tracing::info!(path = ?self.auth_path(), error = %err, "authentication failed");
            err
        })?;
        Ok(self.factory().server_for(&caller))
    }

    /// Authenticate, then handle one JSON-RPC message
    async fn handle(
        &self,
        credential: &str,
        message: &str,
    ) -> Result<Option<JsonRpcResponse>, AuthError> {
        let server = self.connect(credential).await?;
        Ok(server.handle_message(message).await)
    }
}

/// API key path, for programmatic clients
pub struct ApiKeyAdapter {
    authenticator: ApiKeyAuthenticator,
    factory: Arc<ServerFactory>,
}

impl ApiKeyAdapter {
    pub fn new(authenticator: ApiKeyAuthenticator, factory: Arc<ServerFactory>) -> Self {
        Self {
            authenticator,
            factory,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for ApiKeyAdapter {
    fn auth_path(&self) -> AuthPath {
        AuthPath::ApiKey
    }

    fn credential<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .or_else(|| bearer_token(headers))
    }

    fn authenticator(&self) -> &dyn Authenticator {
        &self.authenticator
    }

    fn factory(&self) -> &ServerFactory {
        &self.factory
    }
}

/// Browser session path
pub struct OAuthAdapter {
    authenticator: SessionAuthenticator,
    factory: Arc<ServerFactory>,
}

impl OAuthAdapter {
    pub fn new(authenticator: SessionAuthenticator, factory: Arc<ServerFactory>) -> Self {
        Self {
            authenticator,
            factory,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for OAuthAdapter {
    fn auth_path(&self) -> AuthPath {
        AuthPath::OAuthSession
    }

    fn credential<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        bearer_token(headers)
    }

    fn authenticator(&self) -> &dyn Authenticator {
        &self.authenticator
    }

    fn factory(&self) -> &ServerFactory {
        &self.factory
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer  xyz "));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);
    }
}
