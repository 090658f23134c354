use std::sync::Arc;

use tracing::info;

use crate::adapters::{PaperBroker, RestBrokerClient};
use crate::config::AppConfig;
use crate::error::{Result, TraderError};

use super::{BrokerKind, MarketDataSource, TradingApiClient};

/// Order routing and market data handles for one broker connection
#[derive(Clone)]
pub struct Broker {
    pub kind: BrokerKind,
    pub trading: Arc<dyn TradingApiClient>,
    pub market_data: Arc<dyn MarketDataSource>,
    /// Set when running against the in-process paper broker
    pub paper: Option<Arc<PaperBroker>>,
}

/// Create the runtime broker from `AppConfig`.
///
/// `dry_run` from the command line forces the paper broker regardless of config.
pub fn build_broker(app_config: &AppConfig, dry_run: bool) -> Result<Broker> {
    let kind = if dry_run || app_config.api.dry_run {
        BrokerKind::Paper
    } else {
        BrokerKind::Rest
    };
    build_broker_for(kind, app_config)
}

/// Create the broker for an explicit kind.
pub fn build_broker_for(kind: BrokerKind, app_config: &AppConfig) -> Result<Broker> {
    match kind {
        BrokerKind::Paper => {
            let paper = Arc::new(PaperBroker::new());
            info!("Using paper broker (dry run)");
            Ok(Broker {
                kind,
                trading: paper.clone(),
                market_data: paper.clone(),
                paper: Some(paper),
            })
        }
        BrokerKind::Rest => {
            if app_config.api.base_url.trim().is_empty() {
                return Err(TraderError::Validation(
                    "api.base_url is required for the REST broker".to_string(),
                ));
            }
            let client = Arc::new(RestBrokerClient::from_config(
                &app_config.api,
                &app_config.trading,
            )?);
            info!("Using REST broker at {}", client.base_url());
            Ok(Broker {
                kind,
                trading: client.clone(),
                market_data: client,
                paper: None,
            })
        }
    }
}
