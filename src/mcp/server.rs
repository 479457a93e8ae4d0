//! MCP Server implementation
//!
//! Reads JSON-RPC envelopes for one authenticated caller, routes them to the
//! tool dispatcher and builds the matching response envelope.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::auth::AuthContext;
use crate::error::{McpError, Result};
use crate::mcp::dispatcher::ToolDispatcher;
use crate::mcp::types::*;

/// MCP Server info
const SERVER_NAME: &str = "nbp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP Server for NBP exchange rates
pub struct McpServer {
    /// Tool dispatcher bound to the caller
    dispatcher: ToolDispatcher,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(dispatcher: ToolDispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn caller(&self) -> &AuthContext {
        self.dispatcher.caller()
    }

    /// Run the server on stdio, one JSON-RPC message per line
    pub async fn run_stdio(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            if let Some(response) = self.handle_message(&line).await {
                let mut response_str = serde_json::to_string(&response)?;
                response_str.push('\n');
                stdout.write_all(response_str.as_bytes()).await?;
                stdout.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle an incoming JSON-RPC message; notifications produce no response
    pub async fn handle_message(&self, message: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(message) {
            Ok(value) => value,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    None,
                    JsonRpcError::parse_error(format!("Parse error: {}", e)),
                ));
            }
        };

        let request = match parse_envelope(value) {
            Ok(request) => request,
            Err((id, error)) => return Some(JsonRpcResponse::error(id, error)),
        };

        if request.is_notification() {
            tracing::debug!(method = %request.method, "notification received");
            return None;
        }

        Some(self.handle_request(request).await)
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        let outcome = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(),
            methods::PING => Ok(serde_json::json!({})),
            methods::LIST_TOOLS => self.handle_list_tools(),
            methods::CALL_TOOL => self.handle_call_tool(request.params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        }
    }

    /// Handle initialize request
    fn handle_initialize(&self) -> std::result::Result<Value, JsonRpcError> {
        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
        };

        to_result(&result)
    }

    /// Handle list tools request
    fn handle_list_tools(&self) -> std::result::Result<Value, JsonRpcError> {
        to_result(&ListToolsResult {
            tools: self.dispatcher.list_tools(),
        })
    }

    /// Handle call tool request
    async fn handle_call_tool(&self, params: Option<Value>) -> std::result::Result<Value, JsonRpcError> {
        let params: CallToolParams = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(format!("Invalid tool parameters: {}", e)))?,
            None => return Err(JsonRpcError::invalid_params("Missing tool parameters")),
        };
        if !(params.arguments.is_object() || params.arguments.is_null()) {
            return Err(JsonRpcError::invalid_params("Tool arguments must be an object"));
        }

        match self.dispatcher.call_tool(&params.name, params.arguments).await {
            Ok(result) => to_result(&result),
            Err(McpError::UnknownTool { name }) => Err(JsonRpcError::tool_not_found(name)),
            Err(McpError::InvalidArguments { message }) => Err(JsonRpcError::invalid_params(
                format!("Invalid arguments for {}: {}", params.name, message),
            )),
            Err(McpError::Internal { message }) => Err(JsonRpcError::internal_error(message)),
        }
    }
}

/// Check the framing of a request object
fn parse_envelope(value: Value) -> std::result::Result<JsonRpcRequest, (Option<RequestId>, JsonRpcError)> {
    let Value::Object(ref object) = value else {
        return Err((None, JsonRpcError::invalid_request("Request must be a JSON object")));
    };

    let id = match object.get("id") {
        None | Some(Value::Null) => None,
        Some(raw) => match serde_json::from_value::<RequestId>(raw.clone()) {
            Ok(id) => Some(id),
            Err(_) => {
                return Err((None, JsonRpcError::invalid_request("Request id must be a string or number")));
            }
        },
    };

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err((id, JsonRpcError::invalid_request("jsonrpc must be \"2.0\"")));
    }

    serde_json::from_value(value)
        .map_err(|e| (id, JsonRpcError::invalid_request(format!("Invalid request: {}", e))))
}

fn to_result<T: serde::Serialize>(value: &T) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}
