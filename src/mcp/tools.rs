//! MCP Tool definitions
//!
//! The catalog is static per deployment: name, description, token cost,
//! declared input/output shapes, and the argument parser that turns raw
//! arguments into a validated [`RateQuery`].

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use crate::error::ValidationError;
use crate::mcp::types::Tool;
use crate::nbp::types::{CurrencyRateReport, GoldPriceReport, RateQuery};
use crate::nbp::validation::{self, Series};

/// Why a set of arguments was refused
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInputError {
    /// The arguments do not match the declared input shape
    Malformed(String),
    /// The arguments have the right shape but break a data rule
    Invalid(ValidationError),
}

impl From<ValidationError> for ToolInputError {
    fn from(err: ValidationError) -> Self {
        ToolInputError::Invalid(err)
    }
}

type ParseFn = fn(Value, NaiveDate) -> Result<RateQuery, ToolInputError>;

/// One invocable tool
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Tokens charged per successful call
    pub cost: i64,
    input_schema: fn() -> Value,
    output_schema: fn() -> Value,
    parse: ParseFn,
}

impl ToolSpec {
    /// Validate raw arguments against the tool's rules, as of `today`
    pub fn parse(&self, arguments: Value, today: NaiveDate) -> Result<RateQuery, ToolInputError> {
        (self.parse)(arguments, today)
    }

    /// Protocol-level definition for `tools/list`
    pub fn definition(&self) -> Tool {
        Tool {
            name: self.name.to_string(),
            description: Some(format!(
                "{} Cost: {} token{}.",
                self.description,
                self.cost,
                if self.cost == 1 { "" } else { "s" }
            )),
            input_schema: (self.input_schema)(),
            output_schema: Some((self.output_schema)()),
        }
    }
}

/// The set of tools exposed by every adapter
pub struct ToolCatalog {
    tools: Vec<ToolSpec>,
}

impl ToolCatalog {
    /// The NBP tool set
    pub fn standard() -> Self {
        Self {
            tools: vec![
                ToolSpec {
                    name: "get_currency_rate",
                    description: "Get the NBP average exchange rate (table A) of a currency in PLN, for a given date or the latest publication.",
                    cost: 1,
                    input_schema: schema::<CurrencyRateArgs>,
                    output_schema: schema::<ToolResponse<CurrencyRateReport>>,
                    parse: parse_currency_rate,
                },
                ToolSpec {
                    name: "get_currency_history",
                    description: "Get NBP average exchange rates of a currency in PLN over a date range of at most 93 days.",
                    cost: 1,
                    input_schema: schema::<CurrencyHistoryArgs>,
                    output_schema: schema::<ToolResponse<CurrencyRateReport>>,
                    parse: parse_currency_history,
                },
                ToolSpec {
                    name: "get_gold_price",
                    description: "Get the NBP gold price in PLN per gram, for a given date or the latest publication.",
                    cost: 1,
                    input_schema: schema::<GoldPriceArgs>,
                    output_schema: schema::<ToolResponse<GoldPriceReport>>,
                    parse: parse_gold_price,
                },
                ToolSpec {
                    name: "get_gold_price_history",
                    description: "Get NBP gold prices in PLN per gram over a date range of at most 93 days.",
                    cost: 1,
                    input_schema: schema::<DateRangeArgs>,
                    output_schema: schema::<ToolResponse<GoldPriceReport>>,
                    parse: parse_gold_history,
                },
            ],
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// All tool definitions, in catalog order
    pub fn list(&self) -> Vec<Tool> {
        self.tools.iter().map(ToolSpec::definition).collect()
    }
}

// ==================== Argument and result shapes ====================

#[derive(Debug, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyRateArgs {
    /// Three-letter ISO 4217 code from NBP table A, e.g. "USD"
    #[validate(length(equal = 3, message = "must be a three-letter code"))]
    pub currency_code: String,

    /// Quotation day (YYYY-MM-DD); the latest publication when omitted
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyHistoryArgs {
    /// Three-letter ISO 4217 code from NBP table A, e.g. "EUR"
    #[validate(length(equal = 3, message = "must be a three-letter code"))]
    pub currency_code: String,

    /// First day of the range (YYYY-MM-DD)
    pub start_date: String,

    /// Last day of the range (YYYY-MM-DD), at most 93 days after the start
    pub end_date: String,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GoldPriceArgs {
    /// Quotation day (YYYY-MM-DD); the latest publication when omitted
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeArgs {
    /// First day of the range (YYYY-MM-DD)
    pub start_date: String,

    /// Last day of the range (YYYY-MM-DD), at most 93 days after the start
    pub end_date: String,
}

/// Structured content of a successful tool call
#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse<T> {
    pub data: T,
    pub billing: BillingInfo,
}

/// What the call cost
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillingInfo {
    pub tokens_charged: i64,
    /// Balance after the charge
    pub balance: i64,
    /// Idempotency key of the charge
    pub action_id: String,
}

fn schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

// ==================== Parsers ====================

fn parse_args<T: DeserializeOwned + Validate>(arguments: Value) -> Result<T, ToolInputError> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    let args: T = serde_json::from_value(arguments)
        .map_err(|e| ToolInputError::Malformed(e.to_string()))?;

    args.validate().map_err(|errors| {
        let name = errors
            .field_errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_default();
        ToolInputError::Invalid(ValidationError::InvalidParameter {
            name,
            message: errors.to_string(),
        })
    })?;

    Ok(args)
}

fn parse_currency_rate(arguments: Value, today: NaiveDate) -> Result<RateQuery, ToolInputError> {
    let args: CurrencyRateArgs = parse_args(arguments)?;
    let code = validation::currency_code(&args.currency_code)?;
    let date = validation::single_date(args.date.as_deref(), Series::Rates, today)?;
    Ok(RateQuery::CurrencyRate { code, date })
}

fn parse_currency_history(arguments: Value, today: NaiveDate) -> Result<RateQuery, ToolInputError> {
    let args: CurrencyHistoryArgs = parse_args(arguments)?;
    let code = validation::currency_code(&args.currency_code)?;
    let (start, end) = validation::date_range(&args.start_date, &args.end_date, Series::Rates, today)?;
    Ok(RateQuery::CurrencyHistory { code, start, end })
}

fn parse_gold_price(arguments: Value, today: NaiveDate) -> Result<RateQuery, ToolInputError> {
    let args: GoldPriceArgs = parse_args(arguments)?;
    let date = validation::single_date(args.date.as_deref(), Series::Gold, today)?;
    Ok(RateQuery::GoldPrice { date })
}

fn parse_gold_history(arguments: Value, today: NaiveDate) -> Result<RateQuery, ToolInputError> {
    let args: DateRangeArgs = parse_args(arguments)?;
    let (start, end) = validation::date_range(&args.start_date, &args.end_date, Series::Gold, today)?;
    Ok(RateQuery::GoldHistory { start, end })
}
