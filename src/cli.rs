use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser)]
#[command(name = "autotrader")]
#[command(version)]
#[command(about = "Declarative strategy scheduler with risk-gated order execution", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler until Ctrl-C / SIGTERM
    Run {
        /// Directory holding default.toml and environment overrides
        #[arg(short, long, default_value = "config", env = "AUTOTRADER_CONFIG_DIR")]
        config_dir: PathBuf,
        /// Strategy definitions directory (overrides `strategies_dir`)
        #[arg(short, long)]
        strategies_dir: Option<PathBuf>,
        /// Route orders to the in-process paper broker
        #[arg(long)]
        dry_run: bool,
        /// Seed price for the paper broker, e.g. AAPL=150.25 (repeatable)
        #[arg(long = "paper-price", value_name = "SYMBOL=PRICE")]
        paper_prices: Vec<SeedPrice>,
        /// Random-walk paper prices by up to this percent per tick
        #[arg(long)]
        drift_pct: Option<Decimal>,
    },
    /// Parse a strategy file and print its typed interpretation
    Validate {
        /// Strategy file (.toml or .json)
        file: PathBuf,
    },
}

/// `SYMBOL=PRICE` pair
#[derive(Debug, Clone, PartialEq)]
pub struct SeedPrice {
    pub symbol: String,
    pub price: Decimal,
}

impl FromStr for SeedPrice {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (symbol, price) = raw
            .split_once('=')
            .ok_or_else(|| format!("expected SYMBOL=PRICE, got '{}'", raw))?;
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(format!("missing symbol in '{}'", raw));
        }
        let price = Decimal::from_str(price.trim()).map_err(|e| format!("invalid price in '{}': {}", raw, e))?;
        if price <= Decimal::ZERO {
            return Err(format!("price must be positive in '{}'", raw));
        }
        Ok(Self {
            symbol: symbol.to_string(),
            price,
        })
    }
}
