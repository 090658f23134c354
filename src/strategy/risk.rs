use crate::config::RiskConfig;
use crate::domain::{OrderSide, Position, PositionSide};
use crate::strategy::ledger::{DailyLossCounter, FillOutcome, PositionLedger};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Outcome of a pre-trade risk check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskCheckResult {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl RiskCheckResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Ledger and loss counter share one lock so a fill and its realized loss
/// land atomically.
#[derive(Debug, Default)]
struct RiskBook {
    ledger: PositionLedger,
    daily_loss: DailyLossCounter,
}

/// Risk manager for enforcing trading limits. Shared by every strategy:
/// all of them draw on one position ledger and one daily loss budget.
pub struct RiskManager {
    config: RiskConfig,
    book: RwLock<RiskBook>,
}

impl RiskManager {
    /// Create a new risk manager
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            book: RwLock::new(RiskBook::default()),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    // ==================== Pre-Trade Checks ====================

    /// Check an order against the daily loss and notional limits. Never mutates.
    pub async fn check_order_risk(
        &self,
        symbol: &str,
        _side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> RiskCheckResult {
        let book = self.book.read().await;

        let daily_loss = book.daily_loss.effective_loss(Utc::now());
        if daily_loss >= self.config.max_daily_loss {
            return RiskCheckResult::deny(format!(
                "daily loss limit reached: {} >= {}",
                daily_loss, self.config.max_daily_loss
            ));
        }

        let order_value = quantity * price;
        if order_value > self.config.max_position_size {
            return RiskCheckResult::deny(format!(
                "order notional {} exceeds max position size {}",
                order_value, self.config.max_position_size
            ));
        }

        if let Some(existing) = book.ledger.get(symbol) {
            let total_value = existing.notional() + order_value;
            if total_value > self.config.max_position_size {
                return RiskCheckResult::deny(format!(
                    "per-symbol position limit exceeded for {}: {} + {} > {}",
                    symbol,
                    existing.notional(),
                    order_value,
                    self.config.max_position_size
                ));
            }
        }

        RiskCheckResult::allow()
    }

    /// Stop-loss trigger for the open position on `symbol`
    pub async fn check_stop_loss(&self, symbol: &str, current_price: Decimal) -> bool {
        let book = self.book.read().await;
        let Some(position) = book.ledger.get(symbol) else {
            return false;
        };

        let triggered = match position.side {
            PositionSide::Long => {
                current_price < position.avg_price * (Decimal::ONE - self.config.stop_loss_pct)
            }
            PositionSide::Short => {
                current_price > position.avg_price * (Decimal::ONE + self.config.stop_loss_pct)
            }
        };

        if triggered {
            warn!(
                "Stop loss triggered for {} {} @ {} (entry {})",
                position.side, symbol, current_price, position.avg_price
            );
        }
        triggered
    }

    // ==================== Post-Trade Updates ====================

    /// Apply a fill to the ledger. Realized losses count against the daily limit.
    pub async fn update_position(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> FillOutcome {
        let mut book = self.book.write().await;

        if book.daily_loss.roll_if_elapsed(Utc::now()) {
            info!("Daily loss counter reset");
        }

        let outcome = book.ledger.apply_fill(symbol, side, quantity, price);
        if outcome.realized_pnl < Decimal::ZERO {
            book.daily_loss.add(outcome.realized_pnl);
            warn!(
                "Realized loss {} on {}. Daily loss: {}/{}",
                outcome.realized_pnl.abs(),
                symbol,
                book.daily_loss.loss(),
                self.config.max_daily_loss
            );
        }

        info!("Position update: {} {} {} @ {}", side, quantity, symbol, price);
        outcome
    }

    /// Record an externally computed loss (for daily limit tracking)
    pub async fn record_loss(&self, loss: Decimal) {
        let mut book = self.book.write().await;
        book.daily_loss.add(loss);
        warn!(
            "Daily loss updated: {} (total {}/{})",
            loss.abs(),
            book.daily_loss.loss(),
            self.config.max_daily_loss
        );
    }

    // ==================== Queries ====================

    /// Detached copy of every open position
    pub async fn get_positions(&self) -> HashMap<String, Position> {
        self.book.read().await.ledger.snapshot()
    }

    pub async fn position(&self, symbol: &str) -> Option<Position> {
        self.book.read().await.ledger.get(symbol).cloned()
    }

    /// Loss counted against the limit in the current window
    pub async fn daily_loss(&self) -> Decimal {
        self.book.read().await.daily_loss.effective_loss(Utc::now())
    }

    #[cfg(test)]
    pub(crate) async fn backdate_daily_loss(&self, by: chrono::Duration) {
        self.book.write().await.daily_loss.backdate(by);
    }
}
