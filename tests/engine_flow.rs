use autotrader::config::{AppConfig, RiskConfig, SchedulerConfig, TradingConfig};
use autotrader::domain::{OrderSide, OrderType};
use autotrader::strategy::{load_dir, OrderExecutor, RiskManager, StrategyConfig, StrategyScheduler};
use autotrader::{PaperBroker, TraderError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;

fn trading() -> TradingConfig {
    TradingConfig {
        retry_attempts: 3,
        retry_backoff_ms: 1,
        ..TradingConfig::default()
    }
}

async fn engine(risk: RiskConfig, prices: &[(&str, Decimal)]) -> (Arc<PaperBroker>, StrategyScheduler) {
    let paper = Arc::new(PaperBroker::with_prices(prices.iter().copied()).await);
    let executor = Arc::new(OrderExecutor::new(
        paper.clone(),
        Arc::new(RiskManager::new(risk)),
        trading(),
    ));
    let scheduler = StrategyScheduler::new(SchedulerConfig::default(), paper.clone(), executor);
    (paper, scheduler)
}

fn strategy(toml: &str) -> StrategyConfig {
    StrategyConfig::from_toml(toml).expect("strategy should parse")
}

/// Entry on a condition, exit on take-profit, PnL attributed to the strategy.
#[tokio::test]
async fn entry_then_take_profit_round_trip() {
    let (paper, scheduler) = engine(RiskConfig::default(), &[("AAPL", dec!(100))]).await;
    scheduler
        .register_strategy(strategy(
            r#"
id = "swing"
symbols = ["AAPL"]

[exits]
take_profit_pct = 0.1

[[conditions]]
type = "price_level"
operator = "<="
value = 100
action_type = "BUY"
action_quantity = 1000
action_price = "MARKET"
"#,
        ))
        .await
        .unwrap();
    scheduler.start_strategy("swing").await.unwrap();

    assert_eq!(scheduler.tick_once().await, 1);
    let position = scheduler.get_positions().await.remove("AAPL").unwrap();
    assert_eq!(position.quantity, dec!(10));
    assert_eq!(position.avg_price, dec!(100));

    // Below the take-profit threshold nothing happens
    paper.set_price("AAPL", dec!(105)).await;
    scheduler.tick_once().await;
    assert_eq!(paper.orders().await.len(), 1);

    paper.set_price("AAPL", dec!(120)).await;
    scheduler.tick_once().await;
    assert!(scheduler.get_positions().await.is_empty());

    let performance = scheduler.get_strategy_performance("swing").await.unwrap();
    assert_eq!(performance.total_trades, 2);
    assert_eq!(performance.filled_orders, 2);
    assert_eq!(performance.winning_trades, 1);
    assert_eq!(performance.realized_pnl, dec!(200));
    assert_eq!(performance.notional_volume, dec!(2200));
    assert_eq!(performance.win_rate(), Decimal::ONE);

    let status = scheduler.get_strategy_status("swing").await.unwrap();
    assert_eq!(status.execution_count, 3);
    assert_eq!(status.error_count, 0);
}

/// A stop-loss that breaches the daily loss limit blocks every other strategy.
#[tokio::test]
async fn daily_loss_limit_blocks_all_strategies() {
    let risk = RiskConfig {
        max_daily_loss: dec!(50),
        ..RiskConfig::default()
    };
    let (paper, scheduler) = engine(risk, &[("AAPL", dec!(100)), ("MSFT", dec!(200))]).await;

    scheduler
        .register_strategy(strategy(
            r#"
id = "breakout"
symbols = ["AAPL"]

[exits]
stop_loss = true

[[conditions]]
type = "price_level"
operator = ">="
value = 100
action_type = "BUY"
action_quantity = 1000
"#,
        ))
        .await
        .unwrap();
    scheduler
        .register_strategy(strategy(
            r#"
id = "accumulate"
symbols = ["MSFT"]

[[conditions]]
type = "price_level"
operator = ">"
value = 0
action_type = "BUY"
action_quantity = 500
"#,
        ))
        .await
        .unwrap();

    scheduler.start_strategy("breakout").await.unwrap();
    scheduler.tick_once().await;
    paper.set_price("AAPL", dec!(90)).await;
    scheduler.tick_once().await;

    assert!(scheduler.get_positions().await.is_empty());
    assert_eq!(scheduler.executor().risk().daily_loss().await, dec!(100));

    scheduler.start_strategy("accumulate").await.unwrap();
    scheduler.tick_once().await;

    let performance = scheduler.get_strategy_performance("accumulate").await.unwrap();
    assert_eq!(performance.total_trades, 0);
    assert_eq!(performance.rejected_orders, 1);
    // Two AAPL fills, nothing for MSFT
    assert_eq!(paper.orders().await.len(), 2);
}

#[tokio::test]
async fn transient_broker_failures_are_retried() {
    let paper = Arc::new(PaperBroker::with_prices([("AAPL", dec!(50))]).await);
    let executor = OrderExecutor::new(
        paper.clone(),
        Arc::new(RiskManager::new(RiskConfig::default())),
        trading(),
    );

    paper.fail_next_orders(2);
    let record = executor
        .execute_order("AAPL", OrderSide::Buy, dec!(4), dec!(50), OrderType::Market)
        .await
        .unwrap();
    assert!(record.is_filled());
    assert_eq!(paper.orders().await.len(), 1);

    paper.fail_next_orders(3);
    let err = executor
        .execute_order("AAPL", OrderSide::Buy, dec!(4), dec!(50), OrderType::Market)
        .await
        .unwrap_err();
    assert!(matches!(err, TraderError::MaxRetriesExceeded { attempts: 3, .. }));
    assert_eq!(executor.get_orders().await.len(), 1);
    assert_eq!(
        executor.risk().position("AAPL").await.unwrap().quantity,
        dec!(4)
    );
}

#[tokio::test]
async fn missing_price_is_isolated_to_its_symbol() {
    let (_paper, scheduler) = engine(RiskConfig::default(), &[("MSFT", dec!(100))]).await;
    scheduler
        .register_strategy(strategy(
            r#"
id = "pair"
symbols = ["UNLISTED", "MSFT"]

[[conditions]]
type = "price_level"
operator = ">"
value = 0
action_type = "BUY"
action_quantity = 100
"#,
        ))
        .await
        .unwrap();
    scheduler.start_strategy("pair").await.unwrap();
    scheduler.tick_once().await;

    let status = scheduler.get_strategy_status("pair").await.unwrap();
    assert_eq!(status.error_count, 1);
    assert!(status.last_error.unwrap().contains("UNLISTED"));
    assert_eq!(
        scheduler.get_positions().await["MSFT"].quantity,
        dec!(1)
    );
}

#[test]
fn bundled_strategies_parse_cleanly() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("strategies");
    let strategies = load_dir(&dir).unwrap();
    assert_eq!(strategies.len(), 2);
    for strategy in &strategies {
        assert!(strategy.issues().is_empty(), "{:?}", strategy.issues());
    }
}

#[test]
fn bundled_config_is_valid() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
    let config = AppConfig::load_from(dir).unwrap();
    assert!(config.validate().is_ok());
    assert!(config.api.dry_run);
    assert_eq!(config.risk.max_daily_loss, dec!(1000));
}
