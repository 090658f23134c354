use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a net position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Net holding of one symbol. A position with zero quantity is never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn new(symbol: impl Into<String>, side: PositionSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            avg_price: price,
            updated_at: Utc::now(),
        }
    }

    /// Notional at average entry
    pub fn notional(&self) -> Decimal {
        self.quantity * self.avg_price
    }

    /// PnL of closing `quantity` of this position at `price`
    pub fn pnl_at(&self, price: Decimal, quantity: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => (price - self.avg_price) * quantity,
            PositionSide::Short => (self.avg_price - price) * quantity,
        }
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.pnl_at(price, self.quantity)
    }

    /// Unrealized profit in percent of entry notional
    pub fn profit_pct(&self, price: Decimal) -> Decimal {
        if self.avg_price.is_zero() {
            return Decimal::ZERO;
        }
        let per_unit = match self.side {
            PositionSide::Long => price - self.avg_price,
            PositionSide::Short => self.avg_price - price,
        };
        per_unit / self.avg_price * Decimal::ONE_HUNDRED
    }
}
