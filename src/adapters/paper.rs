//! In-process paper broker for dry runs.
//!
//! Fills every order immediately: limit orders at their limit, market orders
//! at the last price. Prices are set manually or moved with a random walk.

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::{OrderRequest, OrderResponse, OrderStatus, OrderType, PriceData};
use crate::error::{Result, TraderError};
use crate::exchange::{MarketDataSource, TradingApiClient};

#[derive(Debug, Clone)]
struct Quote {
    price: Decimal,
    day_open: Decimal,
}

#[derive(Default)]
pub struct PaperBroker {
    quotes: RwLock<HashMap<String, Quote>>,
    orders: RwLock<HashMap<String, OrderResponse>>,
    next_id: AtomicU64,
    /// Number of upcoming `place_order` calls that fail with a transient error
    pending_failures: AtomicU32,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed prices; each becomes the day-open for its symbol
    pub async fn with_prices<'a>(prices: impl IntoIterator<Item = (&'a str, Decimal)>) -> Self {
        let broker = Self::new();
        for (symbol, price) in prices {
            broker.set_price(symbol, price).await;
        }
        broker
    }

    /// Set the last price. The first price seen for a symbol is its day-open.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let mut quotes = self.quotes.write().await;
        quotes
            .entry(symbol.to_string())
            .and_modify(|q| q.price = price)
            .or_insert(Quote {
                price,
                day_open: price,
            });
    }

    /// Start a new trading day at the current prices
    pub async fn roll_day(&self) {
        for quote in self.quotes.write().await.values_mut() {
            quote.day_open = quote.price;
        }
    }

    /// Move every price by a uniform random step within `max_step_pct` percent
    pub async fn drift_prices(&self, max_step_pct: Decimal) {
        let mut quotes = self.quotes.write().await;
        let mut rng = rand::thread_rng();
        let bound = (max_step_pct * Decimal::from(100)).trunc();
        let Ok(bound) = i64::try_from(bound) else {
            warn!("Drift bound {} out of range", max_step_pct);
            return;
        };
        if bound <= 0 {
            return;
        }

        for (symbol, quote) in quotes.iter_mut() {
            // step in basis points
            let step = Decimal::new(rng.gen_range(-bound..=bound), 4);
            let next = (quote.price * (Decimal::ONE + step)).round_dp(4);
            if next > Decimal::ZERO {
                quote.price = next;
            }
            debug!("{} drifted to {}", symbol, quote.price);
        }
    }

    /// Fail the next `count` order submissions with a transient error
    pub fn fail_next_orders(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub async fn orders(&self) -> Vec<OrderResponse> {
        let mut orders: Vec<_> = self.orders.read().await.values().cloned().collect();
        orders.sort_by(|a, b| a.id.cmp(&b.id));
        orders
    }

    async fn last_price(&self, symbol: &str) -> Result<Decimal> {
        self.quotes
            .read()
            .await
            .get(symbol)
            .map(|q| q.price)
            .ok_or_else(|| TraderError::MarketDataUnavailable(format!("no price for {}", symbol)))
    }

    fn take_injected_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TradingApiClient for PaperBroker {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse> {
        if self.take_injected_failure() {
            return Err(TraderError::OrderSubmission("paper broker: injected failure".into()));
        }

        let price = match (request.order_type, request.price) {
            (OrderType::Limit, Some(limit)) => limit,
            _ => self.last_price(&request.symbol).await?,
        };

        let id = format!("paper-{:08}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let response = OrderResponse {
            id: id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            filled_quantity: Some(request.quantity),
            price: Some(price),
            status: OrderStatus::Filled,
            order_type: request.order_type,
        };

        info!(
            "[PAPER] {} {} {} @ {} ({})",
            request.side, request.quantity, request.symbol, price, id
        );
        self.orders.write().await.insert(id, response.clone());
        Ok(response)
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderResponse> {
        self.orders
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| TraderError::OrderNotFound(order_id.to_string()))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| TraderError::OrderNotFound(order_id.to_string()))?;
        if !order.status.is_terminal() {
            order.status = OrderStatus::Cancelled;
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataSource for PaperBroker {
    async fn get_current_price(&self, symbol: &str) -> Result<PriceData> {
        Ok(PriceData::new(symbol, self.last_price(symbol).await?))
    }

    /// Change since the day-open, in percent
    async fn get_daily_profit(&self, symbol: &str) -> Result<Decimal> {
        let quotes = self.quotes.read().await;
        let quote = quotes
            .get(symbol)
            .ok_or_else(|| TraderError::MarketDataUnavailable(format!("no price for {}", symbol)))?;
        if quote.day_open.is_zero() {
            return Ok(Decimal::ZERO);
        }
        Ok((quote.price - quote.day_open) / quote.day_open * Decimal::ONE_HUNDRED)
    }

    async fn start_price_stream(&self, symbols: &[String]) -> Result<()> {
        let quotes = self.quotes.read().await;
        for symbol in symbols.iter().filter(|s| !quotes.contains_key(*s)) {
            warn!("[PAPER] no seed price for {}", symbol);
        }
        Ok(())
    }
}
