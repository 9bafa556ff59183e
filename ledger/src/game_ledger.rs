use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{LedgerError, LedgerResult};
use super::types::{GameId, Holding, HoldingId, LedgerPolicy, LedgerSummary};

/// Budget, transaction counter and open lots of one user in one game.
///
/// Every mutation validates all of its preconditions before touching any
/// field, so a failed call leaves the ledger exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLedger {
    game_id: GameId,
    starting_budget: Decimal,
    budget: Decimal,
    num_transactions: u64,
    /// Insertion order is purchase order
    holdings: Vec<Holding>,
}

fn overflow(field: &'static str, what: &str) -> LedgerError {
    LedgerError::InvalidAmount {
        field,
        reason: format!("{} overflows", what),
    }
}

fn ensure_positive(field: &'static str, value: Decimal) -> LedgerResult<()> {
    if value <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount {
            field,
            reason: format!("must be greater than 0, got {}", value),
        });
    }
    Ok(())
}

impl GameLedger {
    /// Creates an empty ledger holding only its starting budget
    pub fn new(game_id: GameId, starting_budget: Decimal) -> LedgerResult<Self> {
        if starting_budget.is_sign_negative() && !starting_budget.is_zero() {
            return Err(LedgerError::InvalidAmount {
                field: "starting_budget",
                reason: format!("must not be negative, got {}", starting_budget),
            });
        }

        Ok(GameLedger {
            game_id,
            starting_budget,
            budget: starting_budget,
            num_transactions: 0,
            holdings: Vec::new(),
        })
    }

    /// Opens a new lot of `coin_id` and debits its cost from the budget.
    /// Repeated buys of the same coin always create separate lots.
    pub fn buy(
        &mut self,
        coin_id: &str,
        purchase_price: Decimal,
        quantity: Decimal,
        policy: &LedgerPolicy,
    ) -> LedgerResult<&Holding> {
        if coin_id.trim().is_empty() {
            return Err(LedgerError::InvalidAmount {
                field: "coin_id",
                reason: "must not be empty".to_string(),
            });
        }
        ensure_positive("purchase_price", purchase_price)?;
        ensure_positive("quantity", quantity)?;

        let cost = purchase_price
            .checked_mul(quantity)
            .ok_or_else(|| overflow("quantity", "purchase cost"))?;

        let remaining = self
            .budget
            .checked_sub(cost)
            .ok_or_else(|| overflow("quantity", "remaining budget"))?;
        if remaining.is_sign_negative() && !remaining.is_zero() && !policy.margin_allowed {
            return Err(LedgerError::BudgetExceeded {
                required: cost,
                available: self.budget,
            });
        }

        self.holdings.push(Holding {
            id: Uuid::new_v4(),
            coin_id: coin_id.to_string(),
            quantity,
            purchase_price,
            purchase_time: Utc::now(),
        });
        self.budget = remaining;
        self.num_transactions += 1;

        tracing::debug!(
            game_id = %self.game_id,
            coin_id,
            %purchase_price,
            %quantity,
            budget = %self.budget,
            "Opened holding"
        );

        // Just pushed, so the collection is non-empty
        Ok(&self.holdings[self.holdings.len() - 1])
    }

    /// Closes `quantity` of one specific lot at `current_price`.
    ///
    /// The budget is credited with the realized P&L against that lot's
    /// purchase price. A lot sold down to zero is removed. Counts as exactly
    /// one transaction whether the sale is partial or full.
    pub fn sell(
        &mut self,
        holding_id: HoldingId,
        current_price: Decimal,
        quantity: Decimal,
    ) -> LedgerResult<Decimal> {
        ensure_positive("quantity", quantity)?;
        if current_price.is_sign_negative() && !current_price.is_zero() {
            return Err(LedgerError::InvalidAmount {
                field: "current_price",
                reason: format!("must not be negative, got {}", current_price),
            });
        }

        let index = self
            .holdings
            .iter()
            .position(|h| h.id == holding_id)
            .ok_or(LedgerError::HoldingNotFound(holding_id))?;

        let holding = &mut self.holdings[index];
        if quantity > holding.quantity {
            return Err(LedgerError::InsufficientQuantity {
                requested: quantity,
                available: holding.quantity,
            });
        }

        let realized = current_price
            .checked_sub(holding.purchase_price)
            .and_then(|per_unit| per_unit.checked_mul(quantity))
            .ok_or_else(|| overflow("quantity", "realized P&L"))?;
        let budget = self
            .budget
            .checked_add(realized)
            .ok_or_else(|| overflow("current_price", "budget after sale"))?;

        holding.quantity -= quantity;
        if holding.quantity <= Decimal::ZERO {
            self.holdings.remove(index);
        }
        self.budget = budget;
        self.num_transactions += 1;

        tracing::debug!(
            game_id = %self.game_id,
            %holding_id,
            %current_price,
            %quantity,
            %realized,
            budget = %self.budget,
            "Closed holding quantity"
        );

        Ok(realized)
    }

    /// Checks the invariants of a ledger that did not come out of `new`,
    /// e.g. one read back from storage
    pub fn validate(&self) -> LedgerResult<()> {
        if self.starting_budget.is_sign_negative() && !self.starting_budget.is_zero() {
            return Err(LedgerError::InvalidAmount {
                field: "starting_budget",
                reason: format!("must not be negative, got {}", self.starting_budget),
            });
        }
        for holding in &self.holdings {
            ensure_positive("quantity", holding.quantity)?;
            ensure_positive("purchase_price", holding.purchase_price)?;
            if holding.coin_id.trim().is_empty() {
                return Err(LedgerError::InvalidAmount {
                    field: "coin_id",
                    reason: format!("holding {} has no coin", holding.id),
                });
            }
            if holding.cost_basis().is_none() {
                return Err(overflow("quantity", "cost basis"));
            }
        }
        Ok(())
    }

    /// Open lots in purchase order
    pub fn list_holdings(&self) -> &[Holding] {
        &self.holdings
    }

    pub fn get_holding(&self, holding_id: HoldingId) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.id == holding_id)
    }

    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            budget: self.budget,
            num_transactions: self.num_transactions,
            num_coins: self.holdings.len(),
        }
    }

    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    pub fn starting_budget(&self) -> Decimal {
        self.starting_budget
    }

    pub fn budget(&self) -> Decimal {
        self.budget
    }

    pub fn num_transactions(&self) -> u64 {
        self.num_transactions
    }
}
