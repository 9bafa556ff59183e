use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{GameId, HoldingId, UserId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Game {game_id} not found for user {user_id}")]
    GameNotFound { user_id: UserId, game_id: GameId },

    #[error("User {user_id} already has a ledger for game {game_id}")]
    DuplicateGame { user_id: UserId, game_id: GameId },

    #[error("Holding not found: {0}")]
    HoldingNotFound(HoldingId),

    #[error("Not enough quantity in holding. Requested: {requested}, Available: {available}")]
    InsufficientQuantity {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Invalid {field}: {reason}")]
    InvalidAmount {
        field: &'static str,
        reason: String,
    },

    #[error("Not enough budget to buy. Required: {required}, Available: {available}")]
    BudgetExceeded {
        required: Decimal,
        available: Decimal,
    },

    #[error("Price provider unavailable: {0}")]
    PriceProviderUnavailable(#[from] PriceError),

    #[error("Failed to persist ledger: {0}")]
    Persistence(#[from] RepositoryError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    #[error("Unknown coin: {0}")]
    UnknownCoin(String),

    #[error("Lookup for {0} timed out")]
    Timeout(String),

    #[error("{0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
