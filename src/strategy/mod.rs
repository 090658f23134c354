//! Strategy module
//!
//! Declarative strategies and the engine that runs them.
//!
//! ## Architecture
//!
//! - `definition` - strategy files parsed into typed conditions and actions
//! - `condition` - pure condition evaluation and order sizing
//! - `ledger` / `risk` - net positions, daily loss and pre-trade checks
//! - `executor` - risk-gated order submission with retry
//! - `runtime` - one strategy's state and execution pass
//! - `scheduler` - registry and fixed-interval fan-out
//!
//! ## Usage
//!
//! ```bash
//! autotrader run --strategies-dir strategies --dry-run
//! autotrader validate strategies/dip_buyer.toml
//! ```

pub mod condition;
pub mod definition;
pub mod executor;
pub mod ledger;
pub mod risk;
pub mod runtime;
pub mod scheduler;

pub use condition::{
    evaluate, resolve_order, triggered_actions, Action, BandTouch, Comparison, Condition,
    ConditionKind, Cross, EvaluationContext, PriceSpec, QuantitySpec, ResolvedOrder,
};
pub use definition::{load_dir, ExitRules, RawCondition, RawStrategyConfig, StrategyConfig};
pub use executor::OrderExecutor;
pub use ledger::{DailyLossCounter, FillOutcome, PositionLedger};
pub use risk::{RiskCheckResult, RiskManager};
pub use runtime::{
    ExecutionReport, RuntimeState, StrategyPerformance, StrategyRuntime, StrategyStatus,
};
pub use scheduler::StrategyScheduler;
