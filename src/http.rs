//! HTTP transport
//!
//! `POST /mcp` takes API keys, `POST /oauth/mcp` takes browser sessions.
//! Both carry one JSON-RPC message per request body.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::error::AuthError;
use crate::mcp::{ApiKeyAdapter, OAuthAdapter, ProtocolAdapter};

#[derive(Clone)]
pub struct AppState {
    pub api_key: Arc<ApiKeyAdapter>,
    pub oauth: Arc<OAuthAdapter>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mcp", post(api_key_handler))
        .route("/oauth/mcp", post(oauth_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP transport listening");
    axum::serve(listener, router(state)).await
}

async fn api_key_handler(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    handle_mcp(state.api_key.as_ref(), &headers, &body).await
}

async fn oauth_handler(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    handle_mcp(state.oauth.as_ref(), &headers, &body).await
}

async fn health_handler() -> Response {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

async fn handle_mcp<A: ProtocolAdapter + ?Sized>(adapter: &A, headers: &HeaderMap, body: &str) -> Response {
    let Some(credential) = adapter.credential(headers) else {
        return auth_failure(AuthError::MissingCredential);
    };

    match adapter.handle(credential, body).await {
        Ok(Some(response)) => Json(response).into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(err) => auth_failure(err),
    }
}

fn auth_failure(err: AuthError) -> Response {
    let status = match err {
        AuthError::Lookup(ref cause) => {
            tracing::error!(error = %cause, "credential lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::UNAUTHORIZED,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
