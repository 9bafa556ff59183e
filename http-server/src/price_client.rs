use async_trait::async_trait;
use ledger::price::CoinPriceProvider;
use ledger::types::CoinSnapshot;
use ledger::PriceError;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// One entry of the ticker endpoint; numbers arrive as strings
#[derive(Debug, Deserialize)]
struct TickerEntry {
    id: String,
    price_usd: Option<String>,
    market_cap_usd: Option<String>,
    available_supply: Option<String>,
    percent_change_7d: Option<String>,
}

fn parse_decimal(field: &str, value: Option<&str>) -> Result<Decimal, PriceError> {
    match value {
        None => Ok(Decimal::ZERO),
        Some(raw) => Decimal::from_str(raw)
            .or_else(|_| Decimal::from_scientific(raw))
            .map_err(|e| PriceError::Unavailable(format!("Invalid {} '{}': {}", field, raw, e))),
    }
}

/// Turns a ticker response body into a snapshot for `coin_id`
fn parse_ticker(coin_id: &str, body: &str) -> Result<CoinSnapshot, PriceError> {
    let entries: Vec<TickerEntry> = serde_json::from_str(body)
        .map_err(|e| PriceError::Unavailable(format!("Malformed ticker response: {}", e)))?;

    let entry = entries
        .into_iter()
        .find(|entry| entry.id == coin_id)
        .ok_or_else(|| PriceError::UnknownCoin(coin_id.to_string()))?;

    let price = entry
        .price_usd
        .as_deref()
        .ok_or_else(|| PriceError::Unavailable(format!("No price for {}", coin_id)))?;

    Ok(CoinSnapshot {
        coin_id: entry.id.clone(),
        price: parse_decimal("price_usd", Some(price))?,
        market_cap: parse_decimal("market_cap_usd", entry.market_cap_usd.as_deref())?,
        supply: parse_decimal("available_supply", entry.available_supply.as_deref())?,
        seven_day_change: parse_decimal("percent_change_7d", entry.percent_change_7d.as_deref())?,
    })
}

// Ticker ids are lowercase slugs like `bitcoin` or `usd-coin`; anything else
// would end up as extra path segments of the upstream URL
fn is_valid_coin_id(coin_id: &str) -> bool {
    !coin_id.is_empty()
        && coin_id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Market data from a CoinMarketCap-style `/v1/ticker/{id}/` API
pub struct HttpPriceProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPriceProvider {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl CoinPriceProvider for HttpPriceProvider {
    async fn get_coin(&self, coin_id: &str) -> Result<CoinSnapshot, PriceError> {
        if !is_valid_coin_id(coin_id) {
            return Err(PriceError::UnknownCoin(coin_id.to_string()));
        }
        let url = format!("{}/v1/ticker/{}/", self.base_url, coin_id);

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-CMC_PRO_API_KEY", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PriceError::Timeout(coin_id.to_string())
            } else {
                PriceError::Unavailable(format!("Request for {} failed: {}", coin_id, e))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PriceError::Unavailable(format!("Reading {} failed: {}", coin_id, e)))?;

        if status == StatusCode::NOT_FOUND {
            return Err(PriceError::UnknownCoin(coin_id.to_string()));
        }
        if !status.is_success() {
            tracing::error!("Price API error: {} - Body: {}", status, text);
            return Err(PriceError::Unavailable(format!(
                "Price API returned {} for {}",
                status, coin_id
            )));
        }

        parse_ticker(coin_id, &text)
    }
}
