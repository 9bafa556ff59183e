use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = u64;
pub type GameId = Uuid;
pub type HoldingId = Uuid;

/// A single open lot of a coin inside one game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub id: HoldingId,
    pub coin_id: String,
    /// Always strictly positive while the holding is in a ledger
    pub quantity: Decimal,
    pub purchase_price: Decimal,
    pub purchase_time: DateTime<Utc>,
}

impl Holding {
    /// Amount paid for the quantity still held, `None` if it does not fit a `Decimal`
    pub fn cost_basis(&self) -> Option<Decimal> {
        self.purchase_price.checked_mul(self.quantity)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub budget: Decimal,
    pub num_transactions: u64,
    pub num_coins: usize,
}

/// Market data for a coin as reported by a price provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinSnapshot {
    pub coin_id: String,
    pub price: Decimal,
    pub market_cap: Decimal,
    pub supply: Decimal,
    pub seven_day_change: Decimal,
}

/// A holding together with whatever market data could be fetched for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingView {
    #[serde(flatten)]
    pub holding: Holding,
    pub market: Option<CoinSnapshot>,
    /// Why `market` is missing, if it is
    pub unavailable: Option<String>,
}

impl HoldingView {
    /// Current value of the lot, when a price is known and the value is representable
    pub fn market_value(&self) -> Option<Decimal> {
        self.market
            .as_ref()
            .and_then(|market| market.price.checked_mul(self.holding.quantity))
    }
}

/// Mark-to-market view of a game
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    pub budget: Decimal,
    pub cost_basis: Decimal,
    /// Sum over holdings that have a usable price
    pub market_value: Decimal,
    /// Market value minus the cost basis of the priced holdings
    pub unrealized_pnl: Decimal,
    pub equity: Decimal,
    pub unpriced_holdings: usize,
}

impl Valuation {
    /// Totals saturate at the `Decimal` bounds. A holding whose value would
    /// overflow the market total is counted as unpriced.
    pub fn from_views(budget: Decimal, views: &[HoldingView]) -> Self {
        let mut cost_basis = Decimal::ZERO;
        let mut market_value = Decimal::ZERO;
        let mut priced_cost = Decimal::ZERO;
        let mut unpriced_holdings = 0;

        for view in views {
            let cost = view.holding.cost_basis().unwrap_or(Decimal::MAX);
            cost_basis = cost_basis.saturating_add(cost);

            let priced = view.market_value().and_then(|value| {
                Some((
                    market_value.checked_add(value)?,
                    priced_cost.checked_add(cost)?,
                ))
            });
            match priced {
                Some((value_total, cost_total)) => {
                    market_value = value_total;
                    priced_cost = cost_total;
                }
                None => unpriced_holdings += 1,
            }
        }

        Valuation {
            budget,
            cost_basis,
            market_value,
            unrealized_pnl: market_value.saturating_sub(priced_cost),
            equity: budget.saturating_add(market_value),
            unpriced_holdings,
        }
    }
}

/// Accounting rules applied to every ledger in a store
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPolicy {
    /// Let buys push the budget below zero
    pub margin_allowed: bool,
}
