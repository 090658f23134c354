//! Per-strategy runtime
//!
//! Couples a [`StrategyConfig`] to the shared executor. The scheduler owns
//! the polling loop; a runtime only flips its own state and executes one pass
//! over its symbols when asked.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::condition::{resolve_order, triggered_actions, EvaluationContext};
use super::definition::StrategyConfig;
use super::executor::OrderExecutor;
use crate::domain::{OrderRecord, OrderStatus};
use crate::error::{Result, TraderError};
use crate::exchange::MarketDataSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    Stopped,
    Running,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeState::Stopped => write!(f, "stopped"),
            RuntimeState::Running => write!(f, "running"),
        }
    }
}

/// Strategy status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct StrategyStatus {
    pub id: String,
    pub name: String,
    pub state: RuntimeState,
    /// Whether the scheduler dispatches this strategy on each tick
    pub active: bool,
    pub enabled: bool,
    pub symbols: Vec<String>,
    pub execution_count: u64,
    pub error_count: u64,
    pub last_execution: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl StrategyStatus {
    pub fn uptime(&self) -> Option<chrono::Duration> {
        match (self.state, self.started_at) {
            (RuntimeState::Running, Some(started)) => Some(Utc::now() - started),
            _ => None,
        }
    }
}

/// Trading results attributed to one strategy
#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyPerformance {
    pub strategy_id: String,
    pub total_trades: u64,
    pub filled_orders: u64,
    pub failed_orders: u64,
    pub rejected_orders: u64,
    pub notional_volume: Decimal,
    pub realized_pnl: Decimal,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub last_trade_at: Option<DateTime<Utc>>,
}

impl StrategyPerformance {
    /// Share of closing trades with positive realized PnL
    pub fn win_rate(&self) -> Decimal {
        let closed = self.winning_trades + self.losing_trades;
        if closed == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.winning_trades) / Decimal::from(closed)
    }

    fn record_order(&mut self, record: &OrderRecord) {
        self.total_trades += 1;
        self.last_trade_at = Some(record.updated_at);

        match record.status {
            OrderStatus::Filled => {
                self.filled_orders += 1;
                self.notional_volume += record.fill_value();
            }
            OrderStatus::Failed => self.failed_orders += 1,
            OrderStatus::Pending | OrderStatus::Cancelled => {}
        }

        if let Some(pnl) = record.realized_pnl.filter(|pnl| !pnl.is_zero()) {
            self.realized_pnl += pnl;
            if pnl > Decimal::ZERO {
                self.winning_trades += 1;
            } else {
                self.losing_trades += 1;
            }
        }
    }
}

/// Outcome of one pass over the strategy's symbols
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Correlates the log lines of one pass
    pub run_id: Uuid,
    pub symbols_evaluated: usize,
    pub orders: Vec<OrderRecord>,
    pub rejected: usize,
    pub errors: Vec<String>,
    /// Pass ended early because the strategy was stopped
    pub halted: bool,
}

#[derive(Debug, Default)]
struct RuntimeStats {
    execution_count: u64,
    error_count: u64,
    last_execution: Option<DateTime<Utc>>,
    last_error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    performance: StrategyPerformance,
}

/// Clears the in-flight flag on drop, including during unwinding
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct StrategyRuntime {
    config: StrategyConfig,
    market_data: Arc<dyn MarketDataSource>,
    executor: Arc<OrderExecutor>,
    state: watch::Sender<RuntimeState>,
    in_flight: AtomicBool,
    stats: RwLock<RuntimeStats>,
}

impl StrategyRuntime {
    pub fn new(
        config: StrategyConfig,
        market_data: Arc<dyn MarketDataSource>,
        executor: Arc<OrderExecutor>,
    ) -> Self {
        let (state, _) = watch::channel(RuntimeState::Stopped);
        let stats = RuntimeStats {
            performance: StrategyPerformance {
                strategy_id: config.id.clone(),
                ..Default::default()
            },
            ..Default::default()
        };

        Self {
            config,
            market_data,
            executor,
            state,
            in_flight: AtomicBool::new(false),
            stats: RwLock::new(stats),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == RuntimeState::Running
    }

    /// Mark runnable. Returns immediately; the scheduler drives execution.
    pub async fn start(&self) {
        let changed = self.state.send_if_modified(|state| {
            let was_stopped = *state == RuntimeState::Stopped;
            *state = RuntimeState::Running;
            was_stopped
        });
        if changed {
            self.stats.write().await.started_at = Some(Utc::now());
            info!("Strategy {} started", self.config.id);
        }
    }

    /// Idempotent. An in-progress pass stops before its next symbol.
    pub fn stop(&self) {
        let changed = self.state.send_if_modified(|state| {
            let was_running = *state == RuntimeState::Running;
            *state = RuntimeState::Stopped;
            was_running
        });
        if changed {
            info!("Strategy {} stopped", self.config.id);
        }
    }

    /// Execute unless a previous pass is still in flight. Returns None when
    /// the tick was skipped.
    pub async fn try_execute(&self) -> Option<ExecutionReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Strategy {} still executing, skipping tick", self.config.id);
            return None;
        }
        let _guard = InFlight(&self.in_flight);
        Some(self.execute().await)
    }

    /// One pass over every symbol, in registration order.
    ///
    /// A failure on one symbol is logged and recorded; the remaining symbols
    /// are still evaluated.
    pub async fn execute(&self) -> ExecutionReport {
        let mut report = ExecutionReport {
            run_id: Uuid::new_v4(),
            ..Default::default()
        };
        if !self.config.enabled {
            debug!("Strategy {} is disabled", self.config.id);
            return report;
        }
        debug!("Strategy {} pass {} started", self.config.id, report.run_id);

        let started_running = self.is_running();

        for symbol in &self.config.symbols {
            if started_running && !self.is_running() {
                info!("Strategy {} stopped mid-pass", self.config.id);
                report.halted = true;
                break;
            }

            report.symbols_evaluated += 1;
            if let Err(e) = self.execute_symbol(symbol, &mut report).await {
                error!("Strategy {} failed on {}: {}", self.config.id, symbol, e);
                report.errors.push(format!("{}: {}", symbol, e));
            }
        }

        let mut stats = self.stats.write().await;
        stats.execution_count += 1;
        stats.last_execution = Some(Utc::now());
        stats.error_count += report.errors.len() as u64;
        if let Some(last) = report.errors.last() {
            stats.last_error = Some(last.clone());
        }
        for order in &report.orders {
            stats.performance.record_order(order);
        }
        stats.performance.rejected_orders += report.rejected as u64;

        debug!(
            "Strategy {} pass {} done: {} orders, {} rejected, {} errors",
            self.config.id,
            report.run_id,
            report.orders.len(),
            report.rejected,
            report.errors.len()
        );
        report
    }

    async fn execute_symbol(&self, symbol: &str, report: &mut ExecutionReport) -> Result<()> {
        let price = self.market_data.get_current_price(symbol).await?.price;
        let risk = self.executor.risk();

        let mut ctx = EvaluationContext::new(symbol, price);
        ctx.position = risk.position(symbol).await;

        if self.config.needs_daily_profit() {
            ctx.daily_profit = match self.market_data.get_daily_profit(symbol).await {
                Ok(profit) => Some(profit),
                Err(e) => {
                    warn!("Daily profit unavailable for {}: {}", symbol, e);
                    None
                }
            };
        }

        if self.config.needs_indicators() {
            ctx.indicators = match self.market_data.get_indicators(symbol).await {
                Ok(indicators) => Some(indicators),
                Err(e) => {
                    warn!("Indicators unavailable for {}: {}", symbol, e);
                    None
                }
            };
        }

        let reference_notional = self.executor.config().reference_notional;
        for action in triggered_actions(&self.config.conditions, &ctx) {
            let Some(order) = resolve_order(action, &ctx, reference_notional) else {
                continue;
            };

            let result = self
                .executor
                .execute_order(symbol, order.side, order.quantity, order.price, order.order_type)
                .await;
            self.record_result(symbol, result, report);

            // Later actions size against the updated holdings
            ctx.position = risk.position(symbol).await;
        }

        if self.config.exits.stop_loss {
            let result = self.executor.execute_stop_loss(symbol, price).await.transpose();
            if let Some(result) = result {
                self.record_result(symbol, result, report);
                return Ok(());
            }
        }

        if let Some(pct) = self.config.exits.take_profit_pct {
            if let Some(result) = self.executor.execute_take_profit(symbol, price, pct).await.transpose() {
                self.record_result(symbol, result, report);
            }
        }

        Ok(())
    }

    fn record_result(&self, symbol: &str, result: Result<OrderRecord>, report: &mut ExecutionReport) {
        match result {
            Ok(record) => report.orders.push(record),
            Err(TraderError::RiskRejected(reason)) => {
                debug!("Strategy {} order on {} rejected: {}", self.config.id, symbol, reason);
                report.rejected += 1;
            }
            Err(e) => {
                error!("Strategy {} order on {} failed: {}", self.config.id, symbol, e);
                report.errors.push(format!("{}: {}", symbol, e));
            }
        }
    }

    pub async fn status(&self, active: bool) -> StrategyStatus {
        let stats = self.stats.read().await;
        StrategyStatus {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            state: self.state(),
            active,
            enabled: self.config.enabled,
            symbols: self.config.symbols.clone(),
            execution_count: stats.execution_count,
            error_count: stats.error_count,
            last_execution: stats.last_execution,
            last_error: stats.last_error.clone(),
            started_at: stats.started_at,
        }
    }

    pub async fn performance(&self) -> StrategyPerformance {
        self.stats.read().await.performance.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RiskConfig, TradingConfig};
    use crate::domain::{IndicatorSnapshot, OrderRequest, OrderResponse, OrderSide, OrderType, PriceData};
    use crate::exchange::{MockTradingApiClient, TradingApiClient};
    use crate::strategy::risk::RiskManager;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Static prices; symbols without a price fail the lookup
    #[derive(Default)]
    struct FixedPrices {
        prices: Mutex<HashMap<String, Decimal>>,
    }

    impl FixedPrices {
        fn with(prices: &[(&str, Decimal)]) -> Arc<Self> {
            let source = Self::default();
            {
                let mut map = source.prices.lock().unwrap();
                for (symbol, price) in prices {
                    map.insert(symbol.to_string(), *price);
                }
            }
            Arc::new(source)
        }

        fn set(&self, symbol: &str, price: Decimal) {
            self.prices.lock().unwrap().insert(symbol.to_string(), price);
        }
    }

    #[async_trait]
    impl MarketDataSource for FixedPrices {
        async fn get_current_price(&self, symbol: &str) -> Result<PriceData> {
            let price = self.prices.lock().unwrap().get(symbol).copied();
            price
                .map(|p| PriceData::new(symbol, p))
                .ok_or_else(|| TraderError::MarketDataUnavailable(symbol.to_string()))
        }

        async fn get_daily_profit(&self, _symbol: &str) -> Result<Decimal> {
            Ok(dec!(2.5))
        }

        async fn get_indicators(&self, _symbol: &str) -> Result<IndicatorSnapshot> {
            Ok(IndicatorSnapshot {
                rsi: Some(dec!(25)),
                ..Default::default()
            })
        }
    }

    fn filling_client() -> MockTradingApiClient {
        let mut client = MockTradingApiClient::new();
        client.expect_place_order().returning(|req: &OrderRequest| {
            Ok(OrderResponse {
                id: uuid::Uuid::new_v4().to_string(),
                symbol: req.symbol.clone(),
                side: req.side,
                quantity: req.quantity,
                filled_quantity: None,
                price: req.price,
                status: crate::domain::OrderStatus::Filled,
                order_type: req.order_type,
            })
        });
        client
    }

    fn executor_with(client: impl TradingApiClient + 'static) -> Arc<OrderExecutor> {
        let trading = TradingConfig {
            retry_attempts: 1,
            retry_backoff_ms: 1,
            ..TradingConfig::default()
        };
        Arc::new(OrderExecutor::new(
            Arc::new(client),
            Arc::new(RiskManager::new(RiskConfig::default())),
            trading,
        ))
    }

    fn strategy(toml: &str) -> StrategyConfig {
        StrategyConfig::from_toml(toml).unwrap()
    }

    const DIP_BUYER: &str = r#"
id = "dip"
symbols = ["AAPL", "BROKEN", "MSFT"]

[[conditions]]
type = "price_level"
operator = "<"
value = 200
action_type = "BUY"
action_quantity = 1000
action_price = "MARKET"

[[conditions]]
type = "no_such_type"
operator = ">"
value = 1
action_type = "BUY"
action_quantity = 1000
"#;

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let runtime = StrategyRuntime::new(
            strategy(DIP_BUYER),
            FixedPrices::with(&[]),
            executor_with(MockTradingApiClient::new()),
        );
        assert_eq!(runtime.state(), RuntimeState::Stopped);

        runtime.start().await;
        runtime.start().await;
        assert!(runtime.is_running());

        runtime.stop();
        runtime.stop();
        assert_eq!(runtime.state(), RuntimeState::Stopped);
        assert!(runtime.status(false).await.started_at.is_some());
    }

    #[tokio::test]
    async fn test_symbol_failure_does_not_abort_pass() {
        let prices = FixedPrices::with(&[("AAPL", dec!(100)), ("MSFT", dec!(50))]);
        let executor = executor_with(filling_client());
        let runtime = StrategyRuntime::new(strategy(DIP_BUYER), prices, executor.clone());

        let report = runtime.execute().await;
        assert_eq!(report.symbols_evaluated, 3);
        assert_eq!(report.orders.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("BROKEN"));

        let positions = executor.risk().get_positions().await;
        assert_eq!(positions["AAPL"].quantity, dec!(10));
        assert_eq!(positions["MSFT"].quantity, dec!(20));

        let status = runtime.status(true).await;
        assert_eq!(status.execution_count, 1);
        assert_eq!(status.error_count, 1);
        assert!(status.last_error.unwrap().contains("BROKEN"));

        let performance = runtime.performance().await;
        assert_eq!(performance.total_trades, 2);
        assert_eq!(performance.filled_orders, 2);
        assert_eq!(performance.notional_volume, dec!(2000));
    }

    #[tokio::test]
    async fn test_take_profit_skipped_when_stop_loss_fires() {
        let mut config = strategy(
            r#"
id = "guarded"
symbols = ["AAPL"]

[exits]
stop_loss = true
take_profit_pct = 0.1

[[conditions]]
type = "price_level"
operator = ">"
value = 0
action_type = "HOLD"
"#,
        );
        // Negative target so take-profit would also trigger at the stop price
        config.exits.take_profit_pct = Some(dec!(-0.1));

        let executor = executor_with(filling_client());
        // 60 @ 150 = 9,000; any closing order breaches the 10,000 limit
        executor
            .execute_order("AAPL", OrderSide::Buy, dec!(60), dec!(150), OrderType::Market)
            .await
            .unwrap();

        let runtime = StrategyRuntime::new(config, FixedPrices::with(&[("AAPL", dec!(140))]), executor.clone());
        let report = runtime.execute().await;

        assert!(report.orders.is_empty());
        assert_eq!(report.rejected, 1);
        assert_eq!(executor.risk().position("AAPL").await.unwrap().quantity, dec!(60));
    }

    #[tokio::test]
    async fn test_both_exits_close_once_on_stop() {
        let config = strategy(
            r#"
id = "bracket"
symbols = ["AAPL"]

[exits]
stop_loss = true
take_profit_pct = 0.1

[[conditions]]
type = "price_level"
operator = ">"
value = 0
action_type = "HOLD"
"#,
        );
        let executor = executor_with(filling_client());
        executor
            .execute_order("AAPL", OrderSide::Buy, dec!(10), dec!(100), OrderType::Market)
            .await
            .unwrap();

        let prices = FixedPrices::with(&[("AAPL", dec!(90))]);
        let runtime = StrategyRuntime::new(config, prices.clone(), executor.clone());
        let report = runtime.execute().await;

        assert_eq!(report.orders.len(), 1);
        assert_eq!(report.orders[0].side, OrderSide::Sell);
        assert!(executor.risk().position("AAPL").await.is_none());

        // Flat now: neither exit has anything to close
        prices.set("AAPL", dec!(120));
        assert!(runtime.execute().await.orders.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_strategy_does_nothing() {
        let mut config = strategy(DIP_BUYER);
        config.enabled = false;
        let mut client = MockTradingApiClient::new();
        client.expect_place_order().never();

        let runtime = StrategyRuntime::new(config, FixedPrices::with(&[("AAPL", dec!(1))]), executor_with(client));
        let report = runtime.execute().await;
        assert_eq!(report.symbols_evaluated, 0);
    }

    #[tokio::test]
    async fn test_risk_rejections_are_counted() {
        let config = strategy(
            r#"
id = "big"
symbols = ["AAPL"]

[[conditions]]
type = "price_level"
operator = ">"
value = 0
action_type = "BUY"
action_quantity = 50000
"#,
        );
        let mut client = MockTradingApiClient::new();
        client.expect_place_order().never();

        let runtime = StrategyRuntime::new(config, FixedPrices::with(&[("AAPL", dec!(10))]), executor_with(client));
        let report = runtime.execute().await;
        assert_eq!(report.rejected, 1);
        assert!(report.errors.is_empty());
        assert_eq!(runtime.performance().await.rejected_orders, 1);
    }

    #[tokio::test]
    async fn test_daily_profit_and_indicator_conditions() {
        let config = strategy(
            r#"
id = "mixed"
symbols = ["AAPL"]

[[conditions]]
type = "daily_profit"
operator = ">="
value = 2
action_type = "BUY"
action_quantity = 100

[[conditions]]
type = "rsi"
operator = "<="
value = 30
action_type = "BUY"
action_quantity = 300
"#,
        );
        let executor = executor_with(filling_client());
        let runtime = StrategyRuntime::new(config, FixedPrices::with(&[("AAPL", dec!(10))]), executor.clone());

        let report = runtime.execute().await;
        assert_eq!(report.orders.len(), 2);
        assert_eq!(executor.risk().position("AAPL").await.unwrap().quantity, dec!(40));
    }

    #[tokio::test]
    async fn test_sell_all_uses_refreshed_holdings() {
        let config = strategy(
            r#"
id = "flip"
symbols = ["AAPL"]

[[conditions]]
type = "price_level"
operator = ">"
value = 0
action_type = "BUY"
action_quantity = 500

[[conditions]]
type = "price_level"
operator = ">"
value = 0
action_type = "SELL"
action_quantity = "ALL"
"#,
        );
        let executor = executor_with(filling_client());
        let runtime = StrategyRuntime::new(config, FixedPrices::with(&[("AAPL", dec!(10))]), executor.clone());

        let report = runtime.execute().await;
        assert_eq!(report.orders.len(), 2);
        assert_eq!(report.orders[1].requested_quantity, dec!(50));
        assert!(executor.risk().position("AAPL").await.is_none());
    }

    #[tokio::test]
    async fn test_stop_loss_exit_runs_after_conditions() {
        let config = strategy(
            r#"
id = "guarded"
symbols = ["AAPL"]

[exits]
stop_loss = true
"#,
        );
        let prices = FixedPrices::with(&[("AAPL", dec!(100))]);
        let executor = executor_with(filling_client());
        executor
            .execute_order("AAPL", crate::domain::OrderSide::Buy, dec!(10), dec!(100), crate::domain::OrderType::Market)
            .await
            .unwrap();

        let runtime = StrategyRuntime::new(config, prices.clone(), executor.clone());
        assert!(runtime.execute().await.orders.is_empty());

        prices.set("AAPL", dec!(90));
        let report = runtime.execute().await;
        assert_eq!(report.orders.len(), 1);
        assert!(executor.risk().position("AAPL").await.is_none());

        let performance = runtime.performance().await;
        assert_eq!(performance.losing_trades, 1);
        assert_eq!(performance.realized_pnl, dec!(-100));
    }

    #[tokio::test]
    async fn test_try_execute_skips_while_in_flight() {
        let runtime = StrategyRuntime::new(
            strategy(DIP_BUYER),
            FixedPrices::with(&[]),
            executor_with(MockTradingApiClient::new()),
        );

        runtime.in_flight.store(true, Ordering::SeqCst);
        assert!(runtime.try_execute().await.is_none());

        runtime.in_flight.store(false, Ordering::SeqCst);
        assert!(runtime.try_execute().await.is_some());
        assert!(!runtime.in_flight.load(Ordering::SeqCst));
    }
}
