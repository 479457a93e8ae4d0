//! NBP API type definitions
//!
//! Wire types mirror the NBP API responses. Report types are the normalized
//! shapes returned to tool callers.

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::nbp::RATES_TABLE;

/// A validated upstream query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateQuery {
    /// Latest rate, or the rate on one day
    CurrencyRate {
        code: String,
        date: Option<NaiveDate>,
    },
    /// Rates over an inclusive range
    CurrencyHistory {
        code: String,
        start: NaiveDate,
        end: NaiveDate,
    },
    /// Latest gold price, or the price on one day
    GoldPrice { date: Option<NaiveDate> },
    /// Gold prices over an inclusive range
    GoldHistory { start: NaiveDate, end: NaiveDate },
}

impl RateQuery {
    /// Path below the API base URL, with the trailing slash the API expects
    pub fn path(&self) -> String {
        match self {
            RateQuery::CurrencyRate { code, date } => match date {
                Some(date) => format!(
                    "exchangerates/rates/{}/{}/{}/",
                    RATES_TABLE,
                    urlencoding::encode(code),
                    date
                ),
                None => format!("exchangerates/rates/{}/{}/", RATES_TABLE, urlencoding::encode(code)),
            },
            RateQuery::CurrencyHistory { code, start, end } => format!(
                "exchangerates/rates/{}/{}/{}/{}/",
                RATES_TABLE,
                urlencoding::encode(code),
                start,
                end
            ),
            RateQuery::GoldPrice { date: Some(date) } => format!("cenyzlota/{}/", date),
            RateQuery::GoldPrice { date: None } => "cenyzlota/".to_string(),
            RateQuery::GoldHistory { start, end } => format!("cenyzlota/{}/{}/", start, end),
        }
    }

    /// Human description of the requested period
    pub fn period(&self) -> String {
        match self {
            RateQuery::CurrencyRate { date: Some(date), .. }
            | RateQuery::GoldPrice { date: Some(date) } => date.to_string(),
            RateQuery::CurrencyRate { date: None, .. } | RateQuery::GoldPrice { date: None } => {
                "the latest publication".to_string()
            }
            RateQuery::CurrencyHistory { start, end, .. } | RateQuery::GoldHistory { start, end } => {
                format!("{} to {}", start, end)
            }
        }
    }

    pub fn is_gold(&self) -> bool {
        matches!(self, RateQuery::GoldPrice { .. } | RateQuery::GoldHistory { .. })
    }
}

// ==================== Wire types ====================

/// Exchange rate series for one currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRateSeries {
    pub table: String,
    pub currency: String,
    pub code: String,
    pub rates: Vec<ExchangeRate>,
}

/// A single quotation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRate {
    /// Table number, e.g. "001/A/NBP/2024"
    pub no: String,
    pub effective_date: String,
    pub mid: f64,
}

/// A single gold price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldQuote {
    #[serde(rename = "data")]
    pub date: String,

    /// PLN per gram of 1000 fineness gold
    #[serde(rename = "cena")]
    pub price: f64,
}

// ==================== Reports ====================

/// Normalized exchange rate result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyRateReport {
    /// ISO 4217 code
    pub currency_code: String,
    /// Currency name as published by NBP
    pub currency_name: String,
    /// NBP table the rates come from
    pub table: String,
    /// Quotations, oldest first
    pub rates: Vec<RatePoint>,
}

/// One average rate in PLN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RatePoint {
    pub date: String,
    pub mid: f64,
    pub table_no: String,
}

/// Normalized gold price result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GoldPriceReport {
    /// Prices in PLN per gram, oldest first
    pub prices: Vec<GoldPricePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GoldPricePoint {
    pub date: String,
    pub price: f64,
}

/// Any upstream result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RateReport {
    Currency(CurrencyRateReport),
    Gold(GoldPriceReport),
}

impl From<ExchangeRateSeries> for CurrencyRateReport {
    fn from(series: ExchangeRateSeries) -> Self {
        Self {
            currency_code: series.code,
            currency_name: series.currency,
            table: series.table,
            rates: series
                .rates
                .into_iter()
                .map(|r| RatePoint {
                    date: r.effective_date,
                    mid: r.mid,
                    table_no: r.no,
                })
                .collect(),
        }
    }
}

impl From<Vec<GoldQuote>> for GoldPriceReport {
    fn from(quotes: Vec<GoldQuote>) -> Self {
        Self {
            prices: quotes
                .into_iter()
                .map(|q| GoldPricePoint {
                    date: q.date,
                    price: q.price,
                })
                .collect(),
        }
    }
}

impl RateReport {
    /// Plain-text rendering for the tool result content
    pub fn to_text(&self) -> String {
        match self {
            RateReport::Currency(report) => {
                let mut text = format!(
                    "{} ({}), NBP table {}:\n",
                    report.currency_code, report.currency_name, report.table
                );
                for rate in &report.rates {
                    text.push_str(&format!("- {}: {:.4} PLN ({})\n", rate.date, rate.mid, rate.table_no));
                }
                text
            }
            RateReport::Gold(report) => {
                let mut text = "NBP gold price (PLN per gram):\n".to_string();
                for price in &report.prices {
                    text.push_str(&format!("- {}: {:.2} PLN\n", price.date, price.price));
                }
                text
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_query_paths() {
        let q = RateQuery::CurrencyRate {
            code: "USD".to_string(),
            date: Some(day("2024-01-02")),
        };
        assert_eq!(q.path(), "exchangerates/rates/A/USD/2024-01-02/");

        let q = RateQuery::GoldHistory {
            start: day("2024-01-02"),
            end: day("2024-01-31"),
        };
        assert_eq!(q.path(), "cenyzlota/2024-01-02/2024-01-31/");
        assert_eq!(q.period(), "2024-01-02 to 2024-01-31");

        assert_eq!(RateQuery::GoldPrice { date: None }.path(), "cenyzlota/");
    }

    #[test]
    fn test_series_deserialize() {
        let json = r#"{"table":"A","currency":"dolar amerykański","code":"USD",
            "rates":[{"no":"001/A/NBP/2024","effectiveDate":"2024-01-02","mid":3.9432}]}"#;
        let series: ExchangeRateSeries = serde_json::from_str(json).unwrap();
        let report = CurrencyRateReport::from(series);
        assert_eq!(report.currency_code, "USD");
        assert_eq!(report.rates[0].date, "2024-01-02");
        assert_eq!(report.rates[0].table_no, "001/A/NBP/2024");
    }

    #[test]
    fn test_gold_deserialize() {
        let json = r#"[{"data":"2024-01-02","cena":254.3}]"#;
        let quotes: Vec<GoldQuote> = serde_json::from_str(json).unwrap();
        let report = RateReport::Gold(quotes.into());
        assert!(report.to_text().contains("254.30 PLN"));
    }
}
