use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{IndicatorSnapshot, OrderRequest, OrderResponse, PriceData};
use crate::error::{Result, TraderError};

/// Broker selected by `api.dry_run` or the `--dry-run` flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    /// In-process simulated fills
    Paper,
    /// Broker REST API
    Rest,
}

impl BrokerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Rest => "rest",
        }
    }
}

impl std::fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn unsupported(feature: &str) -> TraderError {
    TraderError::MarketDataUnavailable(format!("{} is not provided by this data source", feature))
}

/// Order routing to the brokerage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradingApiClient: Send + Sync {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse>;

    async fn get_order_status(&self, order_id: &str) -> Result<OrderResponse>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;
}

/// Price and profit lookups used during strategy evaluation
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_current_price(&self, symbol: &str) -> Result<PriceData>;

    /// Profit of the symbol since the start of the trading day
    async fn get_daily_profit(&self, symbol: &str) -> Result<Decimal>;

    async fn get_indicators(&self, _symbol: &str) -> Result<IndicatorSnapshot> {
        Err(unsupported("indicators"))
    }

    /// Begin a push-based feed for `symbols`
    async fn start_price_stream(&self, _symbols: &[String]) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) {}
}
