//! Declarative strategy definitions
//!
//! Strategy files are TOML or JSON. Loose fields (operators, values, action
//! strings) are parsed once into the typed [`Condition`] model; anything that
//! cannot be interpreted becomes an `Invalid` variant rather than an error so
//! the remaining conditions keep working.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

use super::condition::{
    Action, BandTouch, Comparison, Condition, ConditionKind, Cross, PriceSpec, QuantitySpec,
};
use crate::error::{Result, TraderError};

fn default_true() -> bool {
    true
}

/// Strategy as written in a definition file
#[derive(Debug, Clone, Deserialize)]
pub struct RawStrategyConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<RawCondition>,
    #[serde(default)]
    pub exits: ExitRules,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCondition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub action_type: String,
    #[serde(default)]
    pub action_quantity: Value,
    #[serde(default)]
    pub action_price: Value,
}

/// Protective exits checked after the conditions on every pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitRules {
    /// Close the position when the risk manager's stop-loss triggers
    #[serde(default)]
    pub stop_loss: bool,
    /// Close the position once its profit reaches this fraction (0.1 = 10%)
    #[serde(default)]
    pub take_profit_pct: Option<Decimal>,
}

/// Validated, typed strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyConfig {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub symbols: Vec<String>,
    pub conditions: Vec<Condition>,
    pub exits: ExitRules,
}

impl StrategyConfig {
    pub fn from_raw(raw: RawStrategyConfig) -> Result<Self> {
        let id = raw.id.trim().to_string();
        if id.is_empty() {
            return Err(TraderError::InvalidStrategy("strategy id is empty".into()));
        }

        let mut symbols: Vec<String> = Vec::with_capacity(raw.symbols.len());
        for symbol in raw.symbols {
            let symbol = symbol.trim().to_string();
            if symbol.is_empty() || symbols.contains(&symbol) {
                continue;
            }
            symbols.push(symbol);
        }

        if let Some(pct) = raw.exits.take_profit_pct {
            if pct <= Decimal::ZERO {
                return Err(TraderError::InvalidStrategy(format!(
                    "{}: exits.take_profit_pct must be positive",
                    id
                )));
            }
        }

        let conditions = raw.conditions.iter().map(parse_condition).collect();

        Ok(Self {
            name: raw.name.unwrap_or_else(|| id.clone()),
            id,
            enabled: raw.enabled,
            symbols,
            conditions,
            exits: raw.exits,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: RawStrategyConfig = toml::from_str(content)?;
        Self::from_raw(raw)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let raw: RawStrategyConfig = serde_json::from_str(content)?;
        Self::from_raw(raw)
    }

    /// Parse a file by extension (.toml or .json)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            Some("json") => Self::from_json(&content),
            _ => Err(TraderError::InvalidStrategy(format!(
                "unsupported strategy file: {}",
                path.display()
            ))),
        }
    }

    /// Problems that make parts of the strategy inert. Empty when fully usable.
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.symbols.is_empty() {
            issues.push(format!("{}: no symbols", self.id));
        }
        for (index, condition) in self.conditions.iter().enumerate() {
            if let ConditionKind::Invalid { kind, reason } = &condition.kind {
                issues.push(format!("{}: condition #{} ({}): {}", self.id, index, kind, reason));
            }
            if let Action::Invalid { reason } = &condition.action {
                issues.push(format!("{}: action #{}: {}", self.id, index, reason));
            }
        }
        issues
    }

    pub fn needs_daily_profit(&self) -> bool {
        self.conditions.iter().any(|c| c.kind.needs_daily_profit())
    }

    pub fn needs_indicators(&self) -> bool {
        self.conditions.iter().any(|c| c.kind.needs_indicators())
    }
}

/// Load every *.toml / *.json definition in `dir`, sorted by file name.
/// Unparseable files are logged and skipped.
pub fn load_dir(dir: &Path) -> Result<Vec<StrategyConfig>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("toml") | Some("json")
            )
        })
        .collect();
    paths.sort();

    let mut strategies = Vec::with_capacity(paths.len());
    for path in paths {
        match StrategyConfig::from_file(&path) {
            Ok(strategy) => {
                debug!("Loaded strategy {} from {}", strategy.id, path.display());
                strategies.push(strategy);
            }
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    Ok(strategies)
}

// ============================================================================
// Field parsing
// ============================================================================

fn value_to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_ascii_uppercase()),
        _ => None,
    }
}

fn invalid(kind: &str, reason: impl Into<String>) -> ConditionKind {
    ConditionKind::Invalid {
        kind: kind.to_string(),
        reason: reason.into(),
    }
}

fn parse_kind(raw: &RawCondition) -> ConditionKind {
    let kind = raw.kind.trim().to_ascii_lowercase();

    let comparison = || -> std::result::Result<(Comparison, Decimal), String> {
        let op = Comparison::parse(&raw.operator)
            .ok_or_else(|| format!("unsupported operator '{}'", raw.operator))?;
        let threshold = value_to_decimal(&raw.value)
            .ok_or_else(|| format!("non-numeric value {}", raw.value))?;
        Ok((op, threshold))
    };

    match kind.as_str() {
        "profit_percentage" => match comparison() {
            Ok((op, threshold)) => ConditionKind::ProfitPercentage { op, threshold },
            Err(reason) => invalid(&kind, reason),
        },
        "daily_profit" => match comparison() {
            Ok((op, threshold)) => ConditionKind::DailyProfit { op, threshold },
            Err(reason) => invalid(&kind, reason),
        },
        "price_level" => match comparison() {
            Ok((op, threshold)) => ConditionKind::PriceLevel { op, threshold },
            Err(reason) => invalid(&kind, reason),
        },
        "rsi" => match comparison() {
            Ok((op @ (Comparison::Ge | Comparison::Le), threshold)) => {
                ConditionKind::Rsi { op, threshold }
            }
            Ok((op, _)) => invalid(&kind, format!("rsi supports >= and <= only, got {}", op.as_str())),
            Err(reason) => invalid(&kind, reason),
        },
        "moving_average" => match value_to_text(&raw.value).as_deref() {
            Some("CROSS_ABOVE") => ConditionKind::MovingAverage(Cross::Above),
            Some("CROSS_BELOW") => ConditionKind::MovingAverage(Cross::Below),
            _ => invalid(&kind, format!("expected CROSS_ABOVE or CROSS_BELOW, got {}", raw.value)),
        },
        "bollinger_bands" => match value_to_text(&raw.value).as_deref() {
            Some("TOUCH_UPPER") => ConditionKind::BollingerBands(BandTouch::Upper),
            Some("TOUCH_LOWER") => ConditionKind::BollingerBands(BandTouch::Lower),
            _ => invalid(&kind, format!("expected TOUCH_UPPER or TOUCH_LOWER, got {}", raw.value)),
        },
        other => invalid(other, "unknown condition type"),
    }
}

fn parse_quantity(value: &Value) -> Option<QuantitySpec> {
    if let Some(text) = value_to_text(value) {
        if text == "ALL" {
            return Some(QuantitySpec::All);
        }
        if let Some(pct) = text.strip_suffix('%') {
            let pct = Decimal::from_str(pct.trim()).ok()?;
            return (pct > Decimal::ZERO && pct <= Decimal::ONE_HUNDRED)
                .then_some(QuantitySpec::Percent(pct));
        }
    }
    let amount = value_to_decimal(value)?;
    (amount > Decimal::ZERO).then_some(QuantitySpec::Notional(amount))
}

fn parse_price(value: &Value) -> Option<PriceSpec> {
    match value {
        Value::Null => Some(PriceSpec::Market),
        _ if value_to_text(value).as_deref() == Some("MARKET") => Some(PriceSpec::Market),
        _ => value_to_decimal(value)
            .filter(|price| *price > Decimal::ZERO)
            .map(PriceSpec::Limit),
    }
}

fn parse_action(raw: &RawCondition) -> Action {
    let action_type = raw.action_type.trim().to_ascii_uppercase();
    if action_type == "HOLD" {
        return Action::Hold;
    }

    let Some(quantity) = parse_quantity(&raw.action_quantity) else {
        return Action::Invalid {
            reason: format!("invalid quantity {}", raw.action_quantity),
        };
    };
    let Some(price) = parse_price(&raw.action_price) else {
        return Action::Invalid {
            reason: format!("invalid price {}", raw.action_price),
        };
    };

    match action_type.as_str() {
        "BUY" => Action::Buy { quantity, price },
        "SELL" => Action::Sell { quantity, price },
        other => Action::Invalid {
            reason: format!("unknown action type '{}'", other),
        },
    }
}

pub fn parse_condition(raw: &RawCondition) -> Condition {
    Condition {
        kind: parse_kind(raw),
        priority: raw.priority,
        action: parse_action(raw),
    }
}
