//! Tool dispatcher
//!
//! Runs the per-call workflow shared by every tool and every adapter:
//! validate input, check the balance, call NBP, shape the output, charge.
//! A call is charged only after NBP answered, and only through the token
//! consumer, keyed by an action id generated before anything else happens.

use std::sync::Arc;

use serde_json::Value;
use tracing::Instrument;

use crate::auth::AuthContext;
use crate::config::nbp::SERVICE_ID;
use crate::error::{McpError, NbpApiError};
use crate::ledger::{BalanceChecker, ConsumeRequest, TokenConsumer};
use crate::mcp::shaping::OutputShaper;
use crate::mcp::tools::{BillingInfo, ToolCatalog, ToolInputError, ToolResponse};
use crate::mcp::types::{CallToolResult, Tool};
use crate::nbp::client::RateSource;
use crate::nbp::validation;

/// Machine-readable kinds of tool-level failures
pub mod failure_kinds {
    pub const VALIDATION: &str = "validation_error";
    pub const INSUFFICIENT_BALANCE: &str = "insufficient_balance";
    pub const ACCOUNT_CLOSED: &str = "account_closed";
    pub const NO_DATA: &str = "no_data";
    pub const UPSTREAM: &str = "upstream_error";
}

/// Dispatches tool calls for one authenticated caller
pub struct ToolDispatcher {
    caller: AuthContext,
    catalog: Arc<ToolCatalog>,
    balance: BalanceChecker,
    consumer: TokenConsumer,
    source: Arc<dyn RateSource>,
    shaper: OutputShaper,
}

impl ToolDispatcher {
    pub fn new(
        caller: AuthContext,
        catalog: Arc<ToolCatalog>,
        balance: BalanceChecker,
        consumer: TokenConsumer,
        source: Arc<dyn RateSource>,
        shaper: OutputShaper,
    ) -> Self {
        Self {
            caller,
            catalog,
            balance,
            consumer,
            source,
            shaper,
        }
    }

    pub fn caller(&self) -> &AuthContext {
        &self.caller
    }

    /// All available tools
    pub fn list_tools(&self) -> Vec<Tool> {
        self.catalog.list()
    }

    /// Call a tool by name
    ///
    /// User-facing failures come back as error results. `Err` is reserved
    /// for unknown tools, arguments of the wrong shape, and server faults.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let action_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "tool_call",
            tool = name,
            user_id = %self.caller.user_id,
            action_id = %action_id
        );
        self.run(name, arguments, action_id).instrument(span).await
    }

    async fn run(
        &self,
        name: &str,
        arguments: Value,
        action_id: String,
    ) -> Result<CallToolResult, McpError> {
        let tool = self.catalog.get(name).ok_or_else(|| McpError::UnknownTool {
            name: name.to_string(),
        })?;

        // Invalid requests stop here, before any ledger access
        let query = match tool.parse(arguments.clone(), validation::today()) {
            Ok(query) => query,
            Err(ToolInputError::Malformed(message)) => {
                return Err(McpError::InvalidArguments { message });
            }
            Err(ToolInputError::Invalid(err)) => {
                tracing::info!(error = %err, "rejected invalid tool input");
                return Ok(CallToolResult::error(failure_kinds::VALIDATION, err.to_string()));
            }
        };

        let check = self
            .balance
            .check(&self.caller.user_id, tool.cost)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "balance check failed");
                McpError::Internal {
                    message: "balance check failed".to_string(),
                }
            })?;
        if check.user_deleted {
            return Ok(CallToolResult::error(
                failure_kinds::ACCOUNT_CLOSED,
                "This account has been closed. Please contact support.",
            ));
        }
        if !check.sufficient {
            return Ok(CallToolResult::error(
                failure_kinds::INSUFFICIENT_BALANCE,
                format!(
                    "Insufficient balance, need {}, have {}",
                    tool.cost, check.current_balance
                ),
            ));
        }

        let report = match self.source.fetch(&query).await {
            Ok(report) => report,
            Err(NbpApiError::NoData { period }) => {
                return Ok(CallToolResult::error(
                    failure_kinds::NO_DATA,
                    format!(
                        "NBP published no data for {}. Quotations exist only for business days, \
                         so weekends and Polish public holidays have none; try an earlier business day. \
                         No tokens were charged.",
                        period
                    ),
                ));
            }
            Err(err) => {
                tracing::warn!(error = %err, "NBP request failed");
                return Ok(CallToolResult::error(
                    failure_kinds::UPSTREAM,
                    format!(
                        "The NBP API request failed ({}). No tokens were charged; please try again.",
                        err
                    ),
                ));
            }
        };

        let payload = serde_json::to_value(&report).map_err(|e| McpError::Internal {
            message: e.to_string(),
        })?;

        let receipt = self
            .consumer
            .consume(ConsumeRequest {
                user_id: self.caller.user_id.clone(),
                amount: tool.cost,
                service_id: SERVICE_ID.to_string(),
                tool_id: tool.name.to_string(),
                input_params: arguments,
                result_payload: payload,
                success: true,
                action_id,
            })
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "token consumption failed");
                McpError::Internal {
                    message: "failed to record token usage; no tokens were charged".to_string(),
                }
            })?;

        let billing = BillingInfo {
            tokens_charged: tool.cost,
            balance: receipt.new_balance,
            action_id: receipt.action_id,
        };
        let text = self.shaper.shape(
            &report.to_text(),
            &format!(
                "Tokens charged: {}. Remaining balance: {}.",
                billing.tokens_charged, billing.balance
            ),
        );
        let structured = serde_json::to_value(ToolResponse {
            data: &report,
            billing,
        })
        .map_err(|e| McpError::Internal {
            message: e.to_string(),
        })?;

        Ok(CallToolResult::structured(text, structured))
    }
}
