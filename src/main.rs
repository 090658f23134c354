use anyhow::{bail, Context};
use autotrader::cli::{Cli, Commands, SeedPrice};
use autotrader::config::{AppConfig, LoggingConfig};
use autotrader::exchange::build_broker;
use autotrader::strategy::{load_dir, OrderExecutor, RiskManager, StrategyConfig, StrategyScheduler};
use clap::Parser;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config_dir,
            strategies_dir,
            dry_run,
            paper_prices,
            drift_pct,
        } => run(config_dir, strategies_dir, dry_run, paper_prices, drift_pct).await,
        Commands::Validate { file } => {
            init_logging_simple();
            validate(&file)
        }
    }
}

async fn run(
    config_dir: PathBuf,
    strategies_dir: Option<PathBuf>,
    dry_run: bool,
    paper_prices: Vec<SeedPrice>,
    drift_pct: Option<Decimal>,
) -> anyhow::Result<()> {
    let config = AppConfig::load_from(&config_dir)
        .with_context(|| format!("failed to load config from {}", config_dir.display()))?;
    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Config: {}", e);
        }
        bail!("invalid configuration ({} errors)", errors.len());
    }

    let broker = build_broker(&config, dry_run)?;
    if let Some(paper) = &broker.paper {
        for seed in &paper_prices {
            paper.set_price(&seed.symbol, seed.price).await;
        }
    } else if !paper_prices.is_empty() {
        warn!("--paper-price ignored: not running against the paper broker");
    }

    info!(
        "Risk limits: max position {}, max daily loss {}, stop loss {}, max drawdown {}",
        config.risk.max_position_size,
        config.risk.max_daily_loss,
        config.risk.stop_loss_pct,
        config.risk.max_drawdown
    );
    let risk = Arc::new(RiskManager::new(config.risk.clone()));
    let executor = Arc::new(OrderExecutor::new(
        broker.trading.clone(),
        risk,
        config.trading.clone(),
    ));
    let scheduler = StrategyScheduler::new(
        config.scheduler.clone(),
        broker.market_data.clone(),
        executor,
    );

    let strategies_dir = strategies_dir.unwrap_or_else(|| config.strategies_dir.clone());
    let strategies = load_dir(&strategies_dir)
        .with_context(|| format!("failed to read strategies from {}", strategies_dir.display()))?;
    if strategies.is_empty() {
        warn!("No strategies found in {}", strategies_dir.display());
    }

    for strategy in strategies {
        let id = strategy.id.clone();
        let enabled = strategy.enabled;
        if let Err(e) = scheduler.register_strategy(strategy).await {
            error!("Failed to register {}: {}", id, e);
            continue;
        }
        if enabled {
            scheduler.start_strategy(&id).await?;
        }
    }

    scheduler.start().await?;

    // Demo price movement for dry runs
    let drift_task = match (&broker.paper, drift_pct) {
        (Some(paper), Some(pct)) => {
            let paper = paper.clone();
            let period = config.scheduler.tick_interval();
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    paper.drift_prices(pct).await;
                }
            }))
        }
        _ => None,
    };

    info!(
        "Running {} broker, tick every {}ms. Press Ctrl+C to stop.",
        broker.kind, config.scheduler.tick_interval_ms
    );
    shutdown_signal().await;

    info!("Shutting down...");
    if let Some(task) = drift_task {
        task.abort();
    }
    scheduler.stop().await;

    for status in scheduler.list_strategies().await {
        let performance = scheduler.get_strategy_performance(&status.id).await?;
        info!(
            "{}: {} executions, {} errors, {} trades, realized PnL {}, win rate {}",
            status.id,
            status.execution_count,
            status.error_count,
            performance.total_trades,
            performance.realized_pnl,
            performance.win_rate()
        );
    }
    for (symbol, position) in scheduler.get_positions().await {
        info!(
            "Open position: {} {} {} @ {}",
            symbol, position.side, position.quantity, position.avg_price
        );
    }

    Ok(())
}

fn validate(file: &Path) -> anyhow::Result<()> {
    let strategy = StrategyConfig::from_file(file)
        .with_context(|| format!("failed to parse {}", file.display()))?;

    println!(
        "{} ({}) enabled={} symbols=[{}]",
        strategy.id,
        strategy.name,
        strategy.enabled,
        strategy.symbols.join(", ")
    );
    for (index, condition) in strategy.conditions.iter().enumerate() {
        println!(
            "  #{} [priority {}] {} => {}",
            index, condition.priority, condition.kind, condition.action
        );
    }
    if strategy.exits.stop_loss {
        println!("  exit: stop-loss");
    }
    if let Some(pct) = strategy.exits.take_profit_pct {
        println!("  exit: take-profit at {}", pct);
    }

    let issues = strategy.issues();
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("invalid: {}", issue);
        }
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},autotrader={}", config.level, config.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn init_logging_simple() {
    // Minimal logging for CLI commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
