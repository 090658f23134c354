//! Condition evaluation
//!
//! Strategies are data: every condition is parsed once into a typed
//! [`ConditionKind`] and interpreted here against a [`EvaluationContext`].
//! Malformed conditions parse into [`ConditionKind::Invalid`] and always
//! evaluate false, so a bad entry degrades to inaction instead of failing the
//! whole pass.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{IndicatorSnapshot, OrderSide, OrderType, Position};

// ============================================================================
// Condition types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    Ge,
    Le,
    Gt,
    Lt,
}

impl Comparison {
    pub fn parse(op: &str) -> Option<Self> {
        match op.trim() {
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            _ => None,
        }
    }

    pub fn holds(&self, lhs: Decimal, rhs: Decimal) -> bool {
        match self {
            Self::Ge => lhs >= rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Lt => lhs < rhs,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Cross {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BandTouch {
    Upper,
    Lower,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConditionKind {
    /// Unrealized profit % of the symbol's open position
    ProfitPercentage { op: Comparison, threshold: Decimal },
    /// Daily profit reported by the market data source
    DailyProfit { op: Comparison, threshold: Decimal },
    /// Current price against a literal level
    PriceLevel { op: Comparison, threshold: Decimal },
    /// RSI, `>=` / `<=` only
    Rsi { op: Comparison, threshold: Decimal },
    /// Short moving average relative to the long one
    MovingAverage(Cross),
    /// Current price touching a Bollinger band
    BollingerBands(BandTouch),
    /// Unknown type, unsupported operator or unparseable value
    Invalid { kind: String, reason: String },
}

impl ConditionKind {
    pub fn is_invalid(&self) -> bool {
        matches!(self, ConditionKind::Invalid { .. })
    }

    pub fn needs_daily_profit(&self) -> bool {
        matches!(self, ConditionKind::DailyProfit { .. })
    }

    pub fn needs_indicators(&self) -> bool {
        matches!(
            self,
            ConditionKind::Rsi { .. }
                | ConditionKind::MovingAverage(_)
                | ConditionKind::BollingerBands(_)
        )
    }
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProfitPercentage { op, threshold } => {
                write!(f, "profit_percentage {} {}", op.as_str(), threshold)
            }
            Self::DailyProfit { op, threshold } => {
                write!(f, "daily_profit {} {}", op.as_str(), threshold)
            }
            Self::PriceLevel { op, threshold } => {
                write!(f, "price_level {} {}", op.as_str(), threshold)
            }
            Self::Rsi { op, threshold } => write!(f, "rsi {} {}", op.as_str(), threshold),
            Self::MovingAverage(Cross::Above) => write!(f, "moving_average CROSS_ABOVE"),
            Self::MovingAverage(Cross::Below) => write!(f, "moving_average CROSS_BELOW"),
            Self::BollingerBands(BandTouch::Upper) => write!(f, "bollinger_bands TOUCH_UPPER"),
            Self::BollingerBands(BandTouch::Lower) => write!(f, "bollinger_bands TOUCH_LOWER"),
            Self::Invalid { kind, reason } => write!(f, "invalid {} ({})", kind, reason),
        }
    }
}

// ============================================================================
// Action types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum QuantitySpec {
    /// Currency amount converted to quantity at the current price
    Notional(Decimal),
    /// Entire held quantity
    All,
    /// Percentage (0-100) of the held quantity
    Percent(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum PriceSpec {
    Market,
    Limit(Decimal),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Action {
    Buy { quantity: QuantitySpec, price: PriceSpec },
    Sell { quantity: QuantitySpec, price: PriceSpec },
    Hold,
    Invalid { reason: String },
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy { quantity, price } => write!(f, "BUY {:?} @ {:?}", quantity, price),
            Action::Sell { quantity, price } => write!(f, "SELL {:?} @ {:?}", quantity, price),
            Action::Hold => write!(f, "HOLD"),
            Action::Invalid { reason } => write!(f, "invalid action ({})", reason),
        }
    }
}

/// One declarative rule: when `kind` holds, run `action`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub kind: ConditionKind,
    /// Carried from the definition; evaluation follows list order
    pub priority: i32,
    pub action: Action,
}

// ============================================================================
// Evaluation
// ============================================================================

/// Everything a condition may look at for one symbol
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub symbol: String,
    pub price: Decimal,
    pub position: Option<Position>,
    pub daily_profit: Option<Decimal>,
    pub indicators: Option<IndicatorSnapshot>,
}

impl EvaluationContext {
    pub fn new(symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            position: None,
            daily_profit: None,
            indicators: None,
        }
    }

    fn indicator(&self, pick: fn(&IndicatorSnapshot) -> Option<Decimal>) -> Option<Decimal> {
        self.indicators.as_ref().and_then(pick)
    }
}

/// Evaluate a single condition. Never panics; missing inputs yield false.
pub fn evaluate(kind: &ConditionKind, ctx: &EvaluationContext) -> bool {
    match kind {
        ConditionKind::ProfitPercentage { op, threshold } => {
            let profit = ctx
                .position
                .as_ref()
                .map(|p| p.profit_pct(ctx.price))
                .unwrap_or(Decimal::ZERO);
            op.holds(profit, *threshold)
        }
        ConditionKind::DailyProfit { op, threshold } => match ctx.daily_profit {
            Some(profit) => op.holds(profit, *threshold),
            None => false,
        },
        ConditionKind::PriceLevel { op, threshold } => op.holds(ctx.price, *threshold),
        ConditionKind::Rsi { op, threshold } => match ctx.indicator(|i| i.rsi) {
            Some(rsi) => op.holds(rsi, *threshold),
            None => false,
        },
        ConditionKind::MovingAverage(cross) => {
            match (ctx.indicator(|i| i.short_ma), ctx.indicator(|i| i.long_ma)) {
                (Some(short), Some(long)) => match cross {
                    Cross::Above => short > long,
                    Cross::Below => short < long,
                },
                _ => false,
            }
        }
        ConditionKind::BollingerBands(touch) => match touch {
            BandTouch::Upper => ctx
                .indicator(|i| i.upper_band)
                .map_or(false, |upper| ctx.price >= upper),
            BandTouch::Lower => ctx
                .indicator(|i| i.lower_band)
                .map_or(false, |lower| ctx.price <= lower),
        },
        ConditionKind::Invalid { kind, reason } => {
            warn!(
                "Skipping unsupported condition '{}' for {}: {}",
                kind, ctx.symbol, reason
            );
            false
        }
    }
}

/// Actions of every condition that holds, in list order. All matches fire.
pub fn triggered_actions<'a>(conditions: &'a [Condition], ctx: &EvaluationContext) -> Vec<&'a Action> {
    conditions
        .iter()
        .filter(|condition| evaluate(&condition.kind, ctx))
        .map(|condition| &condition.action)
        .collect()
}

/// Concrete order derived from an action
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOrder {
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub order_type: OrderType,
}

/// Turn an action into an order. Returns None for HOLD, invalid actions and
/// quantities that resolve to zero.
///
/// `ALL` and percentages size against the held quantity of the symbol; with
/// nothing held they fall back to `reference_notional` at the current price.
pub fn resolve_order(
    action: &Action,
    ctx: &EvaluationContext,
    reference_notional: Decimal,
) -> Option<ResolvedOrder> {
    let (side, quantity_spec, price_spec) = match action {
        Action::Buy { quantity, price } => (OrderSide::Buy, quantity, price),
        Action::Sell { quantity, price } => (OrderSide::Sell, quantity, price),
        Action::Hold => {
            info!("Hold: {}", ctx.symbol);
            return None;
        }
        Action::Invalid { reason } => {
            warn!("Skipping invalid action for {}: {}", ctx.symbol, reason);
            return None;
        }
    };

    if ctx.price <= Decimal::ZERO {
        warn!("Cannot size order for {}: price {}", ctx.symbol, ctx.price);
        return None;
    }

    let held = ctx.position.as_ref().map(|p| p.quantity);
    let quantity = match (quantity_spec, held) {
        (QuantitySpec::Notional(amount), _) => *amount / ctx.price,
        (QuantitySpec::All, Some(held)) => held,
        (QuantitySpec::All, None) => reference_notional / ctx.price,
        (QuantitySpec::Percent(pct), Some(held)) => held * *pct / Decimal::ONE_HUNDRED,
        (QuantitySpec::Percent(pct), None) => {
            reference_notional * *pct / Decimal::ONE_HUNDRED / ctx.price
        }
    };

    if quantity <= Decimal::ZERO {
        warn!("Resolved quantity for {} is {}, skipping", ctx.symbol, quantity);
        return None;
    }

    let (price, order_type) = match price_spec {
        PriceSpec::Market => (ctx.price, OrderType::Market),
        PriceSpec::Limit(limit) => (*limit, OrderType::Limit),
    };

    Some(ResolvedOrder {
        side,
        quantity,
        price,
        order_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PositionSide;
    use rust_decimal_macros::dec;

    fn ctx(price: Decimal) -> EvaluationContext {
        EvaluationContext::new("AAPL", price)
    }

    fn buy(amount: Decimal) -> Action {
        Action::Buy {
            quantity: QuantitySpec::Notional(amount),
            price: PriceSpec::Market,
        }
    }

    #[test]
    fn test_price_level_operators() {
        let c = ctx(dec!(100));
        let level = |op, threshold| ConditionKind::PriceLevel { op, threshold };

        assert!(evaluate(&level(Comparison::Ge, dec!(100)), &c));
        assert!(!evaluate(&level(Comparison::Gt, dec!(100)), &c));
        assert!(evaluate(&level(Comparison::Le, dec!(100)), &c));
        assert!(evaluate(&level(Comparison::Lt, dec!(101)), &c));
    }

    #[test]
    fn test_profit_percentage_uses_position() {
        let mut c = ctx(dec!(110));
        let kind = ConditionKind::ProfitPercentage {
            op: Comparison::Ge,
            threshold: dec!(5),
        };
        // Flat: profit is zero
        assert!(!evaluate(&kind, &c));

        c.position = Some(Position::new("AAPL", PositionSide::Long, dec!(10), dec!(100)));
        assert!(evaluate(&kind, &c));
    }

    #[test]
    fn test_missing_inputs_evaluate_false() {
        let c = ctx(dec!(100));
        let kinds = [
            ConditionKind::DailyProfit {
                op: Comparison::Le,
                threshold: dec!(100),
            },
            ConditionKind::Rsi {
                op: Comparison::Le,
                threshold: dec!(100),
            },
            ConditionKind::MovingAverage(Cross::Above),
            ConditionKind::BollingerBands(BandTouch::Lower),
        ];
        for kind in &kinds {
            assert!(!evaluate(kind, &c), "{kind} should be false without inputs");
        }
    }

    #[test]
    fn test_indicator_conditions() {
        let mut c = ctx(dec!(89));
        c.indicators = Some(IndicatorSnapshot {
            rsi: Some(dec!(25)),
            short_ma: Some(dec!(101)),
            long_ma: Some(dec!(100)),
            upper_band: Some(dec!(110)),
            lower_band: Some(dec!(90)),
        });

        assert!(evaluate(
            &ConditionKind::Rsi {
                op: Comparison::Le,
                threshold: dec!(30)
            },
            &c
        ));
        assert!(evaluate(&ConditionKind::MovingAverage(Cross::Above), &c));
        assert!(!evaluate(&ConditionKind::MovingAverage(Cross::Below), &c));
        assert!(evaluate(&ConditionKind::BollingerBands(BandTouch::Lower), &c));
        assert!(!evaluate(&ConditionKind::BollingerBands(BandTouch::Upper), &c));
    }

    #[test]
    fn test_invalid_condition_is_false() {
        let kind = ConditionKind::Invalid {
            kind: "macd".into(),
            reason: "unknown condition type".into(),
        };
        assert!(!evaluate(&kind, &ctx(dec!(100))));
    }

    #[test]
    fn test_all_matching_conditions_fire_in_order() {
        let conditions = vec![
            Condition {
                kind: ConditionKind::PriceLevel {
                    op: Comparison::Lt,
                    threshold: dec!(200),
                },
                priority: 1,
                action: buy(dec!(1000)),
            },
            Condition {
                kind: ConditionKind::Invalid {
                    kind: "unknown".into(),
                    reason: "unknown condition type".into(),
                },
                priority: 9,
                action: Action::Hold,
            },
            Condition {
                kind: ConditionKind::PriceLevel {
                    op: Comparison::Gt,
                    threshold: dec!(50),
                },
                priority: 5,
                action: Action::Hold,
            },
        ];

        let actions = triggered_actions(&conditions, &ctx(dec!(100)));
        assert_eq!(actions, vec![&buy(dec!(1000)), &Action::Hold]);
    }

    #[test]
    fn test_resolve_notional_quantity() {
        let order = resolve_order(&buy(dec!(1000)), &ctx(dec!(50)), dec!(1000)).unwrap();
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.quantity, dec!(20));
        assert_eq!(order.price, dec!(50));
        assert_eq!(order.order_type, OrderType::Market);
    }

    #[test]
    fn test_resolve_all_and_percent_against_holdings() {
        let mut c = ctx(dec!(50));
        c.position = Some(Position::new("AAPL", PositionSide::Long, dec!(40), dec!(45)));

        let sell_all = Action::Sell {
            quantity: QuantitySpec::All,
            price: PriceSpec::Limit(dec!(51)),
        };
        let order = resolve_order(&sell_all, &c, dec!(1000)).unwrap();
        assert_eq!(order.quantity, dec!(40));
        assert_eq!(order.price, dec!(51));
        assert_eq!(order.order_type, OrderType::Limit);

        let sell_half = Action::Sell {
            quantity: QuantitySpec::Percent(dec!(50)),
            price: PriceSpec::Market,
        };
        assert_eq!(resolve_order(&sell_half, &c, dec!(1000)).unwrap().quantity, dec!(20));
    }

    #[test]
    fn test_resolve_all_without_holdings_uses_reference_notional() {
        let c = ctx(dec!(50));
        let all = Action::Buy {
            quantity: QuantitySpec::All,
            price: PriceSpec::Market,
        };
        assert_eq!(resolve_order(&all, &c, dec!(1000)).unwrap().quantity, dec!(20));

        let quarter = Action::Buy {
            quantity: QuantitySpec::Percent(dec!(25)),
            price: PriceSpec::Market,
        };
        assert_eq!(resolve_order(&quarter, &c, dec!(1000)).unwrap().quantity, dec!(5));
    }

    #[test]
    fn test_hold_and_invalid_produce_no_order() {
        let c = ctx(dec!(50));
        assert!(resolve_order(&Action::Hold, &c, dec!(1000)).is_none());
        let invalid = Action::Invalid {
            reason: "unknown action type".into(),
        };
        assert!(resolve_order(&invalid, &c, dec!(1000)).is_none());
        assert!(resolve_order(&buy(dec!(1000)), &ctx(Decimal::ZERO), dec!(1000)).is_none());
    }
}
