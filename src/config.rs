use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub risk: RiskConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Directory holding declarative strategy files (*.toml / *.json)
    #[serde(default = "default_strategies_dir")]
    pub strategies_dir: PathBuf,
}

fn default_strategies_dir() -> PathBuf {
    PathBuf::from("strategies")
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Maximum notional per symbol (single order and order + existing position)
    pub max_position_size: Decimal,
    /// Cumulative loss that blocks all new orders until the 24h window rolls
    pub max_daily_loss: Decimal,
    /// Stop-loss distance from average entry (e.g., 0.05 = 5%)
    pub stop_loss_pct: Decimal,
    /// Maximum drawdown (informational, reported alongside risk status)
    #[serde(default)]
    pub max_drawdown: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::from(10_000),
            max_daily_loss: Decimal::from(1_000),
            stop_loss_pct: Decimal::new(5, 2),
            max_drawdown: Decimal::new(1, 1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Total submission attempts per order
    pub retry_attempts: u32,
    /// Linear backoff unit: the delay after attempt N is N * unit
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Timeout for a single submission attempt in milliseconds
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,
    /// Notional used for "ALL"/percentage quantities when nothing is held
    #[serde(default = "default_reference_notional")]
    pub reference_notional: Decimal,
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_order_timeout_ms() -> u64 {
    30_000
}

fn default_reference_notional() -> Decimal {
    Decimal::from(1_000)
}

impl TradingConfig {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(attempt as u64))
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_backoff_ms: default_retry_backoff_ms(),
            order_timeout_ms: default_order_timeout_ms(),
            reference_notional: default_reference_notional(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Polling interval in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Skip a strategy's tick while its previous execution is still in flight
    #[serde(default = "default_skip_overlapping")]
    pub skip_overlapping: bool,
}

fn default_tick_interval_ms() -> u64 {
    5000
}

fn default_skip_overlapping() -> bool {
    true
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            skip_overlapping: default_skip_overlapping(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Broker REST endpoint
    pub base_url: String,
    /// Bearer token for the broker API
    #[serde(default)]
    pub api_key: String,
    /// Route orders to the in-process paper broker
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Built-in defaults, overridden by files and environment
            .set_default("risk.max_position_size", "10000")?
            .set_default("risk.max_daily_loss", "1000")?
            .set_default("risk.stop_loss_pct", "0.05")?
            .set_default("risk.max_drawdown", "0.1")?
            .set_default("trading.retry_attempts", 3)?
            .set_default("trading.retry_backoff_ms", 1000)?
            .set_default("trading.order_timeout_ms", 30_000)?
            .set_default("trading.reference_notional", "1000")?
            .set_default("scheduler.tick_interval_ms", 5000)?
            .set_default("scheduler.skip_overlapping", true)?
            .set_default("api.base_url", "http://localhost:8087/api/v1")?
            .set_default("api.dry_run", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("strategies_dir", "strategies")?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("AUTOTRADER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // AUTOTRADER_RISK__MAX_DAILY_LOSS, AUTOTRADER_API__DRY_RUN, ...
            .add_source(
                Environment::with_prefix("AUTOTRADER")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.risk.max_position_size <= Decimal::ZERO {
            errors.push("risk.max_position_size must be positive".to_string());
        }

        if self.risk.max_daily_loss <= Decimal::ZERO {
            errors.push("risk.max_daily_loss must be positive".to_string());
        }

        if self.risk.stop_loss_pct <= Decimal::ZERO || self.risk.stop_loss_pct >= Decimal::ONE {
            errors.push("risk.stop_loss_pct must be between 0 and 1".to_string());
        }

        if self.trading.retry_attempts == 0 {
            errors.push("trading.retry_attempts must be at least 1".to_string());
        }

        if self.trading.reference_notional <= Decimal::ZERO {
            errors.push("trading.reference_notional must be positive".to_string());
        }

        if self.scheduler.tick_interval_ms == 0 {
            errors.push("scheduler.tick_interval_ms must be positive".to_string());
        }

        if !self.api.dry_run && self.api.base_url.trim().is_empty() {
            errors.push("api.base_url is required when dry_run is disabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> AppConfig {
        AppConfig {
            risk: RiskConfig::default(),
            trading: TradingConfig::default(),
            scheduler: SchedulerConfig::default(),
            api: ApiConfig {
                base_url: "http://localhost:8087/api/v1".into(),
                api_key: String::new(),
                dry_run: true,
            },
            logging: LoggingConfig::default(),
            strategies_dir: default_strategies_dir(),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_collects_every_violation() {
        let mut config = sample();
        config.risk.max_daily_loss = dec!(0);
        config.risk.stop_loss_pct = dec!(1.5);
        config.trading.retry_attempts = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_linear_backoff() {
        let trading = TradingConfig::default();
        assert_eq!(trading.backoff_for(1), Duration::from_secs(1));
        assert_eq!(trading.backoff_for(2), Duration::from_secs(2));
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let config = AppConfig::load_from("/nonexistent-autotrader-config").unwrap();
        assert_eq!(config.risk.max_position_size, dec!(10000));
        assert_eq!(config.risk.stop_loss_pct, dec!(0.05));
        assert_eq!(config.trading.retry_attempts, 3);
        assert_eq!(config.scheduler.tick_interval_ms, 5000);
    }
}
