use chrono::{DateTime, Utc};
use ledger::types::{GameId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Catalog entry for a game; budgets and holdings live in the ledger store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub name: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub created_by: UserId,
    pub players: Vec<UserId>,
    pub starting_budget: Decimal,
}
