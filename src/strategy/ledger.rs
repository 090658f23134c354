//! Net position ledger
//!
//! One net position per symbol, merged with a weighted average entry price.
//! Opposite-side fills reduce, close, or flip the position; lots are not
//! tracked individually.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::domain::{OrderSide, Position};

/// Result of applying one fill to the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct FillOutcome {
    /// PnL realized by the part of the fill that reduced an existing position
    pub realized_pnl: Decimal,
    /// Quantity of the existing position that was closed
    pub closed_quantity: Decimal,
    /// Position after the fill (None when flat)
    pub position: Option<Position>,
}

impl FillOutcome {
    fn untouched(position: Option<Position>) -> Self {
        Self {
            realized_pnl: Decimal::ZERO,
            closed_quantity: Decimal::ZERO,
            position,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    positions: HashMap<String, Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Owned copy of every open position
    pub fn snapshot(&self) -> HashMap<String, Position> {
        self.positions.clone()
    }

    /// Apply a fill of `quantity` at `price`. Non-positive quantities are ignored.
    pub fn apply_fill(
        &mut self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> FillOutcome {
        if quantity <= Decimal::ZERO {
            return FillOutcome::untouched(self.positions.get(symbol).cloned());
        }

        let incoming_side = side.position_side();
        let now = Utc::now();

        let Some(existing) = self.positions.get_mut(symbol) else {
            let position = Position::new(symbol, incoming_side, quantity, price);
            self.positions.insert(symbol.to_string(), position.clone());
            return FillOutcome::untouched(Some(position));
        };

        if existing.side == incoming_side {
            let total_quantity = existing.quantity + quantity;
            let total_value = existing.quantity * existing.avg_price + quantity * price;
            existing.avg_price = total_value / total_quantity;
            existing.quantity = total_quantity;
            existing.updated_at = now;
            return FillOutcome::untouched(Some(existing.clone()));
        }

        if existing.quantity >= quantity {
            let realized_pnl = existing.pnl_at(price, quantity);
            existing.quantity -= quantity;
            existing.updated_at = now;

            let position = if existing.quantity.is_zero() {
                self.positions.remove(symbol);
                None
            } else {
                Some(existing.clone())
            };

            return FillOutcome {
                realized_pnl,
                closed_quantity: quantity,
                position,
            };
        }

        // Close the whole position and open the residual on the other side
        let closed_quantity = existing.quantity;
        let realized_pnl = existing.pnl_at(price, closed_quantity);
        let residual = Position::new(symbol, incoming_side, quantity - closed_quantity, price);
        self.positions.insert(symbol.to_string(), residual.clone());

        FillOutcome {
            realized_pnl,
            closed_quantity,
            position: Some(residual),
        }
    }
}

/// Cumulative loss since the last reset, rolled lazily every 24h
#[derive(Debug, Clone)]
pub struct DailyLossCounter {
    loss: Decimal,
    reset_at: DateTime<Utc>,
}

impl Default for DailyLossCounter {
    fn default() -> Self {
        Self {
            loss: Decimal::ZERO,
            reset_at: Utc::now(),
        }
    }
}

impl DailyLossCounter {
    pub fn loss(&self) -> Decimal {
        self.loss
    }

    /// Loss that counts against the limit at `now`: zero once the window
    /// has expired, even if nothing has rolled it yet. Never mutates.
    pub fn effective_loss(&self, now: DateTime<Utc>) -> Decimal {
        if self.is_expired(now) {
            Decimal::ZERO
        } else {
            self.loss
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.reset_at > Duration::hours(24)
    }

    /// Add the absolute value of `loss`
    pub fn add(&mut self, loss: Decimal) {
        self.loss += loss.abs();
    }

    /// Reset to zero when more than 24h passed since the last reset
    pub fn roll_if_elapsed(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_expired(now) {
            self.loss = Decimal::ZERO;
            self.reset_at = now;
            return true;
        }
        false
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        self.reset_at -= by;
    }
}
