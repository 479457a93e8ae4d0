//! NBP API client
//!
//! Plain HTTP GET against the public NBP API with a bounded timeout.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::NbpApiError;
use crate::nbp::types::{
    CurrencyRateReport, ExchangeRateSeries, GoldPriceReport, GoldQuote, RateQuery, RateReport,
};

/// Source of exchange rate and gold price data
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch(&self, query: &RateQuery) -> Result<RateReport, NbpApiError>;
}

/// NBP API client
pub struct NbpClient {
    /// HTTP client
    http_client: reqwest::Client,

    /// API base URL, without trailing slash
    base_url: String,

    /// Per-request timeout
    timeout: Duration,
}

impl NbpClient {
    /// Create a new NBP client
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, NbpApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nbp-mcp-server/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, query: &RateQuery) -> String {
        format!("{}/{}?format=json", self.base_url, query.path())
    }

    async fn get_json<T: DeserializeOwned>(&self, query: &RateQuery) -> Result<T, NbpApiError> {
        let url = self.url(query);
        tracing::debug!(%url, "requesting NBP API");

        let response = self
            .http_client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(NbpApiError::NoData {
                period: query.period(),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(NbpApiError::RequestFailed {
                status: status.as_u16(),
                message: text.trim().to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        serde_json::from_str(&body).map_err(|e| NbpApiError::MalformedResponse {
            message: e.to_string(),
        })
    }

    fn map_transport_error(&self, err: reqwest::Error) -> NbpApiError {
        if err.is_timeout() {
            NbpApiError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            NbpApiError::Http(err)
        }
    }
}

#[async_trait]
impl RateSource for NbpClient {
    async fn fetch(&self, query: &RateQuery) -> Result<RateReport, NbpApiError> {
        let report = if query.is_gold() {
            let quotes: Vec<GoldQuote> = self.get_json(query).await?;
            if quotes.is_empty() {
                return Err(NbpApiError::NoData {
                    period: query.period(),
                });
            }
            RateReport::Gold(GoldPriceReport::from(quotes))
        } else {
            let series: ExchangeRateSeries = self.get_json(query).await?;
            if series.rates.is_empty() {
                return Err(NbpApiError::NoData {
                    period: query.period(),
                });
            }
            RateReport::Currency(CurrencyRateReport::from(series))
        };

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let client = NbpClient::new("https://api.nbp.pl/api/", Duration::from_secs(10)).unwrap();
        let url = client.url(&RateQuery::CurrencyRate {
            code: "EUR".to_string(),
            date: None,
        });
        assert_eq!(url, "https://api.nbp.pl/api/exchangerates/rates/A/EUR/?format=json");
    }
}
