use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use super::error::PriceError;
use super::types::{CoinSnapshot, Holding, HoldingView};

/// Resolves a coin identifier to its current market data
#[async_trait]
pub trait CoinPriceProvider: Send + Sync {
    async fn get_coin(&self, coin_id: &str) -> Result<CoinSnapshot, PriceError>;
}

/// Price provider backed by an in-process table of snapshots.
///
/// Used when no remote market-data API is configured, and in tests.
#[derive(Default)]
pub struct StaticPriceProvider {
    coins: RwLock<HashMap<String, CoinSnapshot>>,
}

impl StaticPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coins(coins: impl IntoIterator<Item = CoinSnapshot>) -> Self {
        let provider = Self::new();
        for coin in coins {
            provider.set_coin(coin);
        }
        provider
    }

    /// Inserts or replaces the snapshot for `coin.coin_id`
    pub fn set_coin(&self, coin: CoinSnapshot) {
        let mut coins = self.coins.write().unwrap_or_else(PoisonError::into_inner);
        coins.insert(coin.coin_id.clone(), coin);
    }
}

#[async_trait]
impl CoinPriceProvider for StaticPriceProvider {
    async fn get_coin(&self, coin_id: &str) -> Result<CoinSnapshot, PriceError> {
        let coins = self.coins.read().unwrap_or_else(PoisonError::into_inner);
        coins
            .get(coin_id)
            .cloned()
            .ok_or_else(|| PriceError::UnknownCoin(coin_id.to_string()))
    }
}

/// Looks up one coin, giving up after `timeout`
pub async fn fetch_with_timeout(
    provider: &dyn CoinPriceProvider,
    coin_id: &str,
    timeout: Duration,
) -> Result<CoinSnapshot, PriceError> {
    match tokio::time::timeout(timeout, provider.get_coin(coin_id)).await {
        Ok(result) => result,
        Err(_) => Err(PriceError::Timeout(coin_id.to_string())),
    }
}

/// Attaches market data to each holding.
///
/// Each distinct coin is looked up once and all lookups run concurrently.
/// A failed lookup only blanks the market data of the holdings of that coin.
pub async fn enrich_holdings(
    holdings: Vec<Holding>,
    provider: &dyn CoinPriceProvider,
    timeout: Duration,
) -> Vec<HoldingView> {
    let mut coin_ids: Vec<&str> = Vec::new();
    for holding in &holdings {
        if !coin_ids.contains(&holding.coin_id.as_str()) {
            coin_ids.push(holding.coin_id.as_str());
        }
    }

    let lookups = coin_ids
        .iter()
        .map(|coin_id| fetch_with_timeout(provider, coin_id, timeout));
    let results = join_all(lookups).await;

    let market: HashMap<String, Result<CoinSnapshot, PriceError>> = coin_ids
        .iter()
        .map(|coin_id| coin_id.to_string())
        .zip(results)
        .collect();

    for (coin_id, result) in &market {
        if let Err(e) = result {
            tracing::warn!(coin_id = %coin_id, error = %e, "Market data lookup failed");
        }
    }

    holdings
        .into_iter()
        .map(|holding| {
            let (market, unavailable) = match market.get(&holding.coin_id) {
                Some(Ok(snapshot)) => (Some(snapshot.clone()), None),
                Some(Err(e)) => (None, Some(e.to_string())),
                None => (None, Some("not looked up".to_string())),
            };
            HoldingView {
                holding,
                market,
                unavailable,
            }
        })
        .collect()
}
