//! Strategy Scheduler
//!
//! Owns the strategy registry and the polling loop:
//! - Register/unregister strategies
//! - Activate/deactivate them for dispatch
//! - Fan out one concurrent execution per active strategy on every tick
//! - Provide status, performance and position queries

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::definition::StrategyConfig;
use super::executor::OrderExecutor;
use super::runtime::{StrategyPerformance, StrategyRuntime, StrategyStatus};
use crate::config::SchedulerConfig;
use crate::domain::Position;
use crate::error::{Result, TraderError};
use crate::exchange::MarketDataSource;

/// Registered runtimes and the ids dispatched on each tick
#[derive(Default)]
struct Registry {
    strategies: HashMap<String, Arc<StrategyRuntime>>,
    active: HashSet<String>,
}

impl Registry {
    fn runtime(&self, strategy_id: &str) -> Result<Arc<StrategyRuntime>> {
        self.strategies
            .get(strategy_id)
            .cloned()
            .ok_or_else(|| TraderError::StrategyNotFound(strategy_id.to_string()))
    }

    fn active_runtimes(&self) -> Vec<Arc<StrategyRuntime>> {
        self.active
            .iter()
            .filter_map(|id| self.strategies.get(id).cloned())
            .collect()
    }

    fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .strategies
            .values()
            .flat_map(|runtime| runtime.config().symbols.iter().cloned())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

pub struct StrategyScheduler {
    config: SchedulerConfig,
    market_data: Arc<dyn MarketDataSource>,
    executor: Arc<OrderExecutor>,
    registry: Arc<RwLock<Registry>>,
    /// Shutdown signal for the tick loop
    shutdown_tx: broadcast::Sender<()>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StrategyScheduler {
    pub fn new(
        config: SchedulerConfig,
        market_data: Arc<dyn MarketDataSource>,
        executor: Arc<OrderExecutor>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            market_data,
            executor,
            registry: Arc::new(RwLock::new(Registry::default())),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    pub fn executor(&self) -> &Arc<OrderExecutor> {
        &self.executor
    }

    // ==================== Registry ====================

    /// Register a strategy in the stopped state
    pub async fn register_strategy(&self, config: StrategyConfig) -> Result<()> {
        for issue in config.issues() {
            warn!("{}", issue);
        }

        let mut registry = self.registry.write().await;
        if registry.strategies.contains_key(&config.id) {
            return Err(TraderError::Validation(format!(
                "strategy {} is already registered",
                config.id
            )));
        }

        let id = config.id.clone();
        let runtime = StrategyRuntime::new(config, self.market_data.clone(), self.executor.clone());
        registry.strategies.insert(id.clone(), Arc::new(runtime));
        info!("Registered strategy {}", id);
        Ok(())
    }

    /// Stop and remove a strategy
    pub async fn unregister_strategy(&self, strategy_id: &str) -> Result<()> {
        let runtime = {
            let mut registry = self.registry.write().await;
            registry.active.remove(strategy_id);
            registry
                .strategies
                .remove(strategy_id)
                .ok_or_else(|| TraderError::StrategyNotFound(strategy_id.to_string()))?
        };
        runtime.stop();
        info!("Unregistered strategy {}", strategy_id);
        Ok(())
    }

    pub async fn start_strategy(&self, strategy_id: &str) -> Result<()> {
        let runtime = {
            let mut registry = self.registry.write().await;
            let runtime = registry.runtime(strategy_id)?;
            registry.active.insert(strategy_id.to_string());
            runtime
        };
        runtime.start().await;
        Ok(())
    }

    pub async fn stop_strategy(&self, strategy_id: &str) -> Result<()> {
        let runtime = {
            let mut registry = self.registry.write().await;
            let runtime = registry.runtime(strategy_id)?;
            registry.active.remove(strategy_id);
            runtime
        };
        runtime.stop();
        Ok(())
    }

    pub async fn restart_strategy(&self, strategy_id: &str) -> Result<()> {
        self.stop_strategy(strategy_id).await?;
        self.start_strategy(strategy_id).await
    }

    // ==================== Queries ====================

    pub async fn get_strategy_status(&self, strategy_id: &str) -> Result<StrategyStatus> {
        let (runtime, active) = {
            let registry = self.registry.read().await;
            (registry.runtime(strategy_id)?, registry.active.contains(strategy_id))
        };
        Ok(runtime.status(active).await)
    }

    pub async fn get_strategy_performance(&self, strategy_id: &str) -> Result<StrategyPerformance> {
        let runtime = self.registry.read().await.runtime(strategy_id)?;
        Ok(runtime.performance().await)
    }

    /// Status of every registered strategy, sorted by id
    pub async fn list_strategies(&self) -> Vec<StrategyStatus> {
        let entries: Vec<(Arc<StrategyRuntime>, bool)> = {
            let registry = self.registry.read().await;
            registry
                .strategies
                .iter()
                .map(|(id, runtime)| (runtime.clone(), registry.active.contains(id)))
                .collect()
        };

        let mut statuses = Vec::with_capacity(entries.len());
        for (runtime, active) in entries {
            statuses.push(runtime.status(active).await);
        }
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Open positions across all strategies
    pub async fn get_positions(&self) -> HashMap<String, Position> {
        self.executor.risk().get_positions().await
    }

    pub async fn is_running(&self) -> bool {
        self.loop_handle
            .lock()
            .await
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    // ==================== Lifecycle ====================

    /// Start the price stream and the tick loop. Strategies already marked
    /// active are started again.
    pub async fn start(&self) -> Result<()> {
        let mut loop_handle = self.loop_handle.lock().await;
        if loop_handle.as_ref().map_or(false, |h| !h.is_finished()) {
            warn!("Scheduler already running");
            return Ok(());
        }

        let (symbols, active) = {
            let registry = self.registry.read().await;
            (registry.symbols(), registry.active_runtimes())
        };
        self.market_data.start_price_stream(&symbols).await?;
        for runtime in active {
            runtime.start().await;
        }

        let registry = self.registry.clone();
        let skip_overlapping = self.config.skip_overlapping;
        let period = self.config.tick_interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *loop_handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Detached: the loop never waits on executions
                        dispatch(&registry, skip_overlapping).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Scheduler received shutdown signal");
                        break;
                    }
                }
            }
        }));

        info!(
            "Scheduler started: {} symbols, tick every {}ms",
            symbols.len(),
            self.config.tick_interval_ms
        );
        Ok(())
    }

    /// Halt the tick loop and stop every runtime. Executions already spawned
    /// finish their current symbol and return.
    pub async fn stop(&self) {
        let handle = self.loop_handle.lock().await.take();
        let Some(handle) = handle else {
            debug!("Scheduler not running");
            return;
        };

        let _ = self.shutdown_tx.send(());
        if let Err(e) = handle.await {
            error!("Scheduler loop ended abnormally: {}", e);
        }

        let runtimes: Vec<_> = self.registry.read().await.strategies.values().cloned().collect();
        for runtime in runtimes {
            runtime.stop();
        }
        self.market_data.stop().await;
        info!("Scheduler stopped");
    }

    /// Run one fan-out and wait for every spawned execution
    pub async fn tick_once(&self) -> usize {
        let handles = dispatch(&self.registry, self.config.skip_overlapping).await;
        let count = handles.len();
        futures::future::join_all(handles).await;
        count
    }
}

/// Spawn one isolated execution per active, running strategy
async fn dispatch(registry: &RwLock<Registry>, skip_overlapping: bool) -> Vec<JoinHandle<()>> {
    let runtimes = registry.read().await.active_runtimes();
    debug!("Dispatching {} strategies", runtimes.len());

    runtimes
        .into_iter()
        .filter(|runtime| runtime.is_running())
        .map(|runtime| {
            tokio::spawn(async move {
                let execution = async {
                    if skip_overlapping {
                        runtime.try_execute().await
                    } else {
                        Some(runtime.execute().await)
                    }
                };

                match AssertUnwindSafe(execution).catch_unwind().await {
                    Ok(Some(report)) if !report.errors.is_empty() => {
                        warn!(
                            "Strategy {} finished with {} errors",
                            runtime.id(),
                            report.errors.len()
                        );
                    }
                    Ok(_) => {}
                    Err(panic) => {
                        error!("Strategy {} panicked: {}", runtime.id(), panic_message(&panic));
                    }
                }
            })
        })
        .collect()
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
