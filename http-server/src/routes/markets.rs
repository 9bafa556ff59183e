use axum::{
    Json,
    extract::{Path, State},
};
use futures_util::future::join_all;
use ledger::LedgerError;
use ledger::price::fetch_with_timeout;
use ledger::types::CoinSnapshot;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::{AppState, error::AppError};

#[derive(Debug, Clone, Serialize)]
pub struct MarketAsset {
    pub coin_id: String,
    pub market: Option<CoinSnapshot>,
    pub unavailable: Option<String>,
}

#[derive(Serialize)]
pub struct MarketsResponse {
    pub success: bool,
    pub markets: Vec<MarketAsset>,
}

#[derive(Serialize)]
pub struct CoinResponse {
    pub success: bool,
    pub coin: CoinSnapshot,
}

fn coin(
    coin_id: &str,
    price: Decimal,
    market_cap: Decimal,
    supply: Decimal,
    seven_day_change: Decimal,
) -> CoinSnapshot {
    CoinSnapshot {
        coin_id: coin_id.to_string(),
        price,
        market_cap,
        supply,
        seven_day_change,
    }
}

/// Coins served when no remote price API is configured
pub fn default_coins() -> Vec<CoinSnapshot> {
    vec![
        coin("bitcoin", dec!(115771.03), dec!(2303000000000), dec!(19920000), dec!(2.5)),
        coin("ethereum", dec!(4480.12), dec!(540800000000), dec!(120700000), dec!(3.1)),
        coin("solana", dec!(246.64), dec!(133900000000), dec!(542900000), dec!(-1.2)),
    ]
}

// Market data for each configured coin; one failing coin does not hide the rest
pub async fn get_markets(State(state): State<AppState>) -> Json<MarketsResponse> {
    let lookups = state.config.market_coins.iter().map(|coin_id| {
        fetch_with_timeout(state.prices.as_ref(), coin_id, state.config.price_timeout)
    });
    let results = join_all(lookups).await;

    let markets = state
        .config
        .market_coins
        .iter()
        .zip(results)
        .map(|(coin_id, result)| match result {
            Ok(market) => MarketAsset {
                coin_id: coin_id.clone(),
                market: Some(market),
                unavailable: None,
            },
            Err(e) => MarketAsset {
                coin_id: coin_id.clone(),
                market: None,
                unavailable: Some(e.to_string()),
            },
        })
        .collect();

    Json(MarketsResponse {
        success: true,
        markets,
    })
}

// Market data for a single coin
pub async fn get_coin(
    State(state): State<AppState>,
    Path(coin_id): Path<String>,
) -> Result<Json<CoinResponse>, AppError> {
    let coin = fetch_with_timeout(state.prices.as_ref(), &coin_id, state.config.price_timeout)
        .await
        .map_err(LedgerError::PriceProviderUnavailable)?;

    Ok(Json(CoinResponse {
        success: true,
        coin,
    }))
}
