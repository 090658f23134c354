use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::PositionSide;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Position side a fill of this order opens or extends
    pub fn position_side(&self) -> PositionSide {
        match self {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }

    /// Order side that closes a position on `side`
    pub fn closing(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Order status as reported by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted by the broker, not yet executed
    Pending,
    /// Fully executed
    Filled,
    /// Cancelled before execution
    Cancelled,
    /// Rejected or errored at the broker
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Order request (what we want to do)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Limit price; omitted for market orders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(rename = "type")]
    pub order_type: OrderType,
}

impl OrderRequest {
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        order_type: OrderType,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price: match order_type {
                OrderType::Limit => Some(price),
                OrderType::Market => None,
            },
            order_type,
        }
    }

    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self::new(symbol, side, quantity, Decimal::ZERO, OrderType::Market)
    }

    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self::new(symbol, side, quantity, price, OrderType::Limit)
    }
}

/// Broker response for a submitted or polled order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    /// Broker-assigned order id
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    /// Requested quantity
    pub quantity: Decimal,
    /// Executed quantity, when the broker reports it
    #[serde(default)]
    pub filled_quantity: Option<Decimal>,
    /// Average execution price (or limit price while pending)
    #[serde(default)]
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    #[serde(rename = "type")]
    pub order_type: OrderType,
}

/// Order (tracked in our system)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub requested_quantity: Decimal,
    pub requested_price: Decimal,
    pub filled_quantity: Decimal,
    pub filled_price: Option<Decimal>,
    pub status: OrderStatus,
    /// PnL realized against the ledger when this order filled
    pub realized_pnl: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn from_response(response: &OrderResponse, requested_price: Decimal) -> Self {
        let now = Utc::now();
        let mut record = Self {
            order_id: response.id.clone(),
            symbol: response.symbol.clone(),
            side: response.side,
            order_type: response.order_type,
            requested_quantity: response.quantity,
            requested_price,
            filled_quantity: Decimal::ZERO,
            filled_price: None,
            status: response.status,
            realized_pnl: None,
            created_at: now,
            updated_at: now,
        };
        record.apply_response(response);
        record
    }

    /// Overwrite broker-owned fields from a fresh response
    pub fn apply_response(&mut self, response: &OrderResponse) {
        self.status = response.status;
        if response.status == OrderStatus::Filled {
            let (quantity, price) = fill_of(response, self.requested_price);
            self.filled_quantity = quantity;
            self.filled_price = Some(price);
        } else if let Some(filled) = response.filled_quantity {
            self.filled_quantity = filled;
            self.filled_price = response.price;
        }
        self.updated_at = Utc::now();
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Executed notional (filled quantity x fill price)
    pub fn fill_value(&self) -> Decimal {
        match self.filled_price {
            Some(price) => price * self.filled_quantity,
            None => Decimal::ZERO,
        }
    }
}

/// Executed quantity and price of a filled response. Brokers that omit the
/// fill details executed the full requested quantity at the requested price.
pub fn fill_of(response: &OrderResponse, requested_price: Decimal) -> (Decimal, Decimal) {
    let quantity = response.filled_quantity.unwrap_or(response.quantity);
    let price = response.price.unwrap_or(requested_price);
    (quantity, price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn filled_response() -> OrderResponse {
        OrderResponse {
            id: "ord-1".into(),
            symbol: "AAPL".into(),
            side: OrderSide::Buy,
            quantity: dec!(10),
            filled_quantity: Some(dec!(8)),
            price: Some(dec!(149.5)),
            status: OrderStatus::Filled,
            order_type: OrderType::Limit,
        }
    }

    #[test]
    fn test_market_request_omits_price() {
        let request = OrderRequest::new("AAPL", OrderSide::Buy, dec!(5), dec!(150), OrderType::Market);
        assert_eq!(request.price, None);

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("price").is_none());
        assert_eq!(json["type"], "market");
        assert_eq!(json["side"], "buy");
    }

    #[test]
    fn test_record_uses_actual_fill() {
        let record = OrderRecord::from_response(&filled_response(), dec!(150));
        assert_eq!(record.filled_quantity, dec!(8));
        assert_eq!(record.filled_price, Some(dec!(149.5)));
        assert_eq!(record.fill_value(), dec!(1196.0));
    }

    #[test]
    fn test_fill_defaults_to_request() {
        let mut response = filled_response();
        response.filled_quantity = None;
        response.price = None;

        assert_eq!(fill_of(&response, dec!(150)), (dec!(10), dec!(150)));
    }

    #[test]
    fn test_closing_side() {
        assert_eq!(OrderSide::closing(PositionSide::Long), OrderSide::Sell);
        assert_eq!(OrderSide::closing(PositionSide::Short), OrderSide::Buy);
        assert_eq!(OrderSide::Sell.position_side(), PositionSide::Short);
    }
}
