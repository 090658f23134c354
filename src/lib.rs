pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod strategy;

pub use adapters::{PaperBroker, RestBrokerClient};
pub use config::AppConfig;
pub use error::{Result, TraderError};
pub use exchange::{MarketDataSource, TradingApiClient};
pub use strategy::{
    OrderExecutor, RiskManager, StrategyConfig, StrategyPerformance, StrategyScheduler,
    StrategyStatus,
};
