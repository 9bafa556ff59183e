use axum::{
    Json,
    extract::{Path, State},
};
use ledger::types::{GameId, HoldingId, HoldingView, LedgerSummary, UserId, Valuation};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    error::AppError,
    middleware::AuthUser,
    websocket::{LedgerAction, send_ledger_update},
};

// Buy request
#[derive(Deserialize)]
pub struct BuyRequest {
    pub coin_id: String,
    pub purchase_price: Decimal,
    pub quantity: Decimal,
}

// Sell request
#[derive(Deserialize)]
pub struct SellRequest {
    pub holding_id: HoldingId,
    pub current_price: Decimal,
    pub quantity: Decimal,
}

// Buy/sell response
#[derive(Serialize)]
pub struct TradeResponse {
    pub success: bool,
    pub message: String,
    pub game_id: GameId,
    pub summary: LedgerSummary,
}

// Holdings response
#[derive(Serialize)]
pub struct HoldingsResponse {
    pub success: bool,
    pub coins: Vec<HoldingView>,
    pub valuation: Valuation,
}

// User buys a coin
pub async fn buy_coin(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((user_id, game_id)): Path<(UserId, GameId)>,
    Json(payload): Json<BuyRequest>,
) -> Result<Json<TradeResponse>, AppError> {
    auth.ensure_owner(user_id)?;

    let summary = state.games.buy(
        user_id,
        game_id,
        &payload.coin_id,
        payload.purchase_price,
        payload.quantity,
    )?;

    send_ledger_update(
        &state.notification_manager,
        user_id,
        game_id,
        LedgerAction::Buy,
        summary,
    );

    Ok(Json(TradeResponse {
        success: true,
        message: format!("Bought {} {}", payload.quantity, payload.coin_id),
        game_id,
        summary,
    }))
}

// User sells (part of) a holding
pub async fn sell_coin(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((user_id, game_id)): Path<(UserId, GameId)>,
    Json(payload): Json<SellRequest>,
) -> Result<Json<TradeResponse>, AppError> {
    auth.ensure_owner(user_id)?;

    let summary = state.games.sell(
        user_id,
        game_id,
        payload.holding_id,
        payload.current_price,
        payload.quantity,
    )?;

    send_ledger_update(
        &state.notification_manager,
        user_id,
        game_id,
        LedgerAction::Sell,
        summary,
    );

    Ok(Json(TradeResponse {
        success: true,
        message: format!("Sold {} of holding {}", payload.quantity, payload.holding_id),
        game_id,
        summary,
    }))
}

// Get all coins held in a game, with live market data
pub async fn list_coins(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((user_id, game_id)): Path<(UserId, GameId)>,
) -> Result<Json<HoldingsResponse>, AppError> {
    auth.ensure_owner(user_id)?;

    let (coins, valuation) = state
        .games
        .list_holdings(
            user_id,
            game_id,
            state.prices.as_ref(),
            state.config.price_timeout,
        )
        .await?;

    Ok(Json(HoldingsResponse {
        success: true,
        coins,
        valuation,
    }))
}
