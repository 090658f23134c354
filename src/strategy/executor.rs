use crate::config::TradingConfig;
use crate::domain::{OrderRecord, OrderRequest, OrderResponse, OrderSide, OrderStatus, OrderType, PositionSide};
use crate::error::{Result, TraderError};
use crate::exchange::TradingApiClient;
use crate::strategy::risk::RiskManager;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Order executor: risk gate, submission with retry, fill bookkeeping
pub struct OrderExecutor {
    client: Arc<dyn TradingApiClient>,
    risk: Arc<RiskManager>,
    config: TradingConfig,
    orders: RwLock<HashMap<String, OrderRecord>>,
}

impl OrderExecutor {
    pub fn new(client: Arc<dyn TradingApiClient>, risk: Arc<RiskManager>, config: TradingConfig) -> Self {
        Self {
            client,
            risk,
            config,
            orders: RwLock::new(HashMap::new()),
        }
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    /// Risk-check and submit an order.
    ///
    /// Rejections are returned as `RiskRejected` without touching the broker.
    /// Transient submission faults are retried up to `retry_attempts` total
    /// attempts with linear backoff. A filled response is applied to the
    /// position ledger before the record is returned.
    pub async fn execute_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        order_type: OrderType,
    ) -> Result<OrderRecord> {
        if quantity <= Decimal::ZERO {
            return Err(TraderError::Validation(format!(
                "order quantity must be positive, got {}",
                quantity
            )));
        }

        let check = self.risk.check_order_risk(symbol, side, quantity, price).await;
        if !check.allowed {
            let reason = check.reason.unwrap_or_else(|| "rejected".to_string());
            warn!("Order rejected by risk: {} {} {} @ {}: {}", side, quantity, symbol, price, reason);
            return Err(TraderError::RiskRejected(reason));
        }

        let request = OrderRequest::new(symbol, side, quantity, price, order_type);
        let response = self.submit_with_retry(&request).await?;

        let mut record = OrderRecord::from_response(&response, price);
        info!(
            "Order {} {}: {} {} {} @ {}",
            record.order_id, record.status, side, quantity, symbol, price
        );

        if record.is_filled() {
            let fill_price = record.filled_price.unwrap_or(price);
            let outcome = self
                .risk
                .update_position(symbol, side, record.filled_quantity, fill_price)
                .await;
            record.realized_pnl = Some(outcome.realized_pnl);
        }

        self.orders
            .write()
            .await
            .insert(record.order_id.clone(), record.clone());
        Ok(record)
    }

    async fn submit_with_retry(&self, request: &OrderRequest) -> Result<OrderResponse> {
        let attempts = self.config.retry_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let result = match timeout(self.config.order_timeout(), self.client.place_order(request)).await {
                Ok(result) => result,
                Err(_) => Err(TraderError::OrderTimeout(format!(
                    "{} {} {} not acknowledged within {}ms",
                    request.side, request.quantity, request.symbol, self.config.order_timeout_ms
                ))),
            };

            match result {
                Ok(response) => {
                    if attempt > 1 {
                        info!("Order for {} accepted on attempt {}", request.symbol, attempt);
                    }
                    return Ok(response);
                }
                Err(e) if !e.is_retryable() => {
                    error!("Order for {} failed permanently: {}", request.symbol, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Order attempt {}/{} for {} failed: {}", attempt, attempts, request.symbol, e);
                    last_error = e.to_string();
                    if attempt < attempts {
                        sleep(self.config.backoff_for(attempt)).await;
                    }
                }
            }
        }

        error!(
            "Order execution failed after {} attempts: {}",
            attempts, last_error
        );
        Err(TraderError::MaxRetriesExceeded {
            attempts,
            last_error,
        })
    }

    /// Cancel at the broker and mark the local record cancelled
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.client.cancel_order(order_id).await?;

        if let Some(record) = self.orders.write().await.get_mut(order_id) {
            if !record.status.is_terminal() {
                record.status = OrderStatus::Cancelled;
                record.updated_at = chrono::Utc::now();
            }
        }
        info!("Order {} cancelled", order_id);
        Ok(())
    }

    /// Poll the broker for an order. A pending order that has since filled is
    /// applied to the ledger exactly once.
    pub async fn get_order_status(&self, order_id: &str) -> Result<OrderRecord> {
        let response = self.client.get_order_status(order_id).await?;

        let newly_filled = {
            let mut orders = self.orders.write().await;
            let Some(record) = orders.get_mut(order_id) else {
                debug!("Order {} is not tracked locally", order_id);
                return Ok(OrderRecord::from_response(&response, response.price.unwrap_or_default()));
            };

            let was_filled = record.is_filled();
            record.apply_response(&response);
            if was_filled || !record.is_filled() {
                return Ok(record.clone());
            }
            record.clone()
        };

        let fill_price = newly_filled.filled_price.unwrap_or(newly_filled.requested_price);
        let outcome = self
            .risk
            .update_position(
                &newly_filled.symbol,
                newly_filled.side,
                newly_filled.filled_quantity,
                fill_price,
            )
            .await;
        info!(
            "Order {} filled: {} {} @ {}",
            order_id, newly_filled.filled_quantity, newly_filled.symbol, fill_price
        );

        let mut orders = self.orders.write().await;
        let record = orders
            .get_mut(order_id)
            .ok_or_else(|| TraderError::OrderNotFound(order_id.to_string()))?;
        record.realized_pnl = Some(outcome.realized_pnl);
        Ok(record.clone())
    }

    /// Every order submitted through this executor, oldest first
    pub async fn get_orders(&self) -> Vec<OrderRecord> {
        let mut orders: Vec<_> = self.orders.read().await.values().cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    pub async fn order(&self, order_id: &str) -> Option<OrderRecord> {
        self.orders.read().await.get(order_id).cloned()
    }

    // ==================== Protective Exits ====================

    /// Close the whole position on `symbol` when its stop-loss triggers
    pub async fn execute_stop_loss(&self, symbol: &str, price: Decimal) -> Result<Option<OrderRecord>> {
        let Some(position) = self.risk.position(symbol).await else {
            return Ok(None);
        };
        if !self.risk.check_stop_loss(symbol, price).await {
            return Ok(None);
        }

        let side = OrderSide::closing(position.side);
        warn!("Executing stop loss: {} {} {} @ {}", side, position.quantity, symbol, price);
        self.execute_order(symbol, side, position.quantity, price, OrderType::Market)
            .await
            .map(Some)
    }

    /// Close the whole position on `symbol` once profit reaches `take_profit_pct`
    pub async fn execute_take_profit(
        &self,
        symbol: &str,
        price: Decimal,
        take_profit_pct: Decimal,
    ) -> Result<Option<OrderRecord>> {
        let Some(position) = self.risk.position(symbol).await else {
            return Ok(None);
        };

        let triggered = match position.side {
            PositionSide::Long => price >= position.avg_price * (Decimal::ONE + take_profit_pct),
            PositionSide::Short => price <= position.avg_price * (Decimal::ONE - take_profit_pct),
        };
        if !triggered {
            return Ok(None);
        }

        let side = OrderSide::closing(position.side);
        info!(
            "Executing take profit: {} {} {} @ {} (entry {})",
            side, position.quantity, symbol, price, position.avg_price
        );
        self.execute_order(symbol, side, position.quantity, price, OrderType::Market)
            .await
            .map(Some)
    }
}
