use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest price sample for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceData {
    pub symbol: String,
    pub price: Decimal,
    #[serde(default)]
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceData {
    pub fn new(symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }
}

/// Externally computed indicator values. Missing values make the
/// corresponding conditions evaluate false.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    #[serde(default)]
    pub rsi: Option<Decimal>,
    #[serde(default)]
    pub short_ma: Option<Decimal>,
    #[serde(default)]
    pub long_ma: Option<Decimal>,
    #[serde(default)]
    pub upper_band: Option<Decimal>,
    #[serde(default)]
    pub lower_band: Option<Decimal>,
}
