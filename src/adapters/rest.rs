//! Broker REST adapter.
//!
//! Bearer-authenticated JSON client for the brokerage gateway. Implements both
//! collaborator traits so a single client serves prices and order routing.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{ApiConfig, TradingConfig};
use crate::domain::{OrderRequest, OrderResponse, PriceData};
use crate::error::{Result, TraderError};
use crate::exchange::{MarketDataSource, TradingApiClient};

#[derive(Debug, Deserialize)]
struct DailyProfitResponse {
    daily_profit: Decimal,
}

/// Which side of the broker a failed call belongs to; decides the error kind
#[derive(Debug, Clone, Copy)]
enum Endpoint {
    MarketData,
    Orders,
}

#[derive(Clone)]
pub struct RestBrokerClient {
    http: Client,
    base_url: String,
}

impl RestBrokerClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !api_key.is_empty() {
            let mut bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| TraderError::Validation(format!("invalid api key: {}", e)))?;
            bearer.set_sensitive(true);
            headers.insert(AUTHORIZATION, bearer);
        }

        let http = Client::builder()
            .user_agent(concat!("autotrader/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| TraderError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(api: &ApiConfig, trading: &TradingConfig) -> Result<Self> {
        Self::new(&api.base_url, &api.api_key, trading.order_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        endpoint: Endpoint,
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!("{} {} -> {}", method, path, status);

        if !status.is_success() {
            return Err(classify_failure(&method, path, status, &text, endpoint));
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn request_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        endpoint: Endpoint,
    ) -> Result<T> {
        self.request(method.clone(), path, body, endpoint)
            .await?
            .ok_or_else(|| TraderError::Internal(format!("{} {} returned an empty body", method, path)))
    }
}

/// Server-side and throttling failures are transient; other statuses are not
fn classify_failure(
    method: &Method,
    path: &str,
    status: StatusCode,
    body: &str,
    endpoint: Endpoint,
) -> TraderError {
    let message = format!("{} {} failed: status={} body={}", method, path, status, body.trim());
    let transient = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;

    match endpoint {
        Endpoint::MarketData => TraderError::MarketDataUnavailable(message),
        Endpoint::Orders if status == StatusCode::NOT_FOUND && method == Method::GET => {
            TraderError::OrderNotFound(message)
        }
        Endpoint::Orders if transient => TraderError::OrderSubmission(message),
        Endpoint::Orders => TraderError::Validation(message),
    }
}

#[async_trait]
impl TradingApiClient for RestBrokerClient {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse> {
        let response: OrderResponse = self
            .request_json(Method::POST, "/orders", Some(request), Endpoint::Orders)
            .await?;
        info!(
            "Order placed: {} {} {} @ {:?} ({})",
            response.side, response.quantity, response.symbol, response.price, response.id
        );
        Ok(response)
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderResponse> {
        self.request_json::<(), _>(Method::GET, &format!("/orders/{}", order_id), None, Endpoint::Orders)
            .await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.request::<(), serde_json::Value>(
            Method::DELETE,
            &format!("/orders/{}", order_id),
            None,
            Endpoint::Orders,
        )
        .await?;
        info!("Order cancelled: {}", order_id);
        Ok(())
    }
}

#[async_trait]
impl MarketDataSource for RestBrokerClient {
    async fn get_current_price(&self, symbol: &str) -> Result<PriceData> {
        let price: PriceData = self
            .request_json::<(), _>(Method::GET, &format!("/price/{}", symbol), None, Endpoint::MarketData)
            .await?;
        debug!("Price {} = {}", symbol, price.price);
        Ok(price)
    }

    async fn get_daily_profit(&self, symbol: &str) -> Result<Decimal> {
        let response: DailyProfitResponse = self
            .request_json::<(), _>(
                Method::GET,
                &format!("/daily-profit/{}", symbol),
                None,
                Endpoint::MarketData,
            )
            .await?;
        Ok(response.daily_profit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = RestBrokerClient::new("http://localhost:8087/api/v1/", "key", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8087/api/v1");
    }

    #[test]
    fn test_failure_classification() {
        let order_err = |method: Method, status: StatusCode| {
            classify_failure(&method, "/orders", status, "", Endpoint::Orders)
        };

        assert!(order_err(Method::POST, StatusCode::SERVICE_UNAVAILABLE).is_retryable());
        assert!(order_err(Method::POST, StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(!order_err(Method::POST, StatusCode::BAD_REQUEST).is_retryable());
        assert!(matches!(
            order_err(Method::GET, StatusCode::NOT_FOUND),
            TraderError::OrderNotFound(_)
        ));
        assert!(matches!(
            classify_failure(&Method::GET, "/price/X", StatusCode::BAD_GATEWAY, "", Endpoint::MarketData),
            TraderError::MarketDataUnavailable(_)
        ));
    }

    #[test]
    fn test_order_wire_format() {
        let request = OrderRequest::limit("AAPL", crate::domain::OrderSide::Buy, rust_decimal_macros::dec!(2), rust_decimal_macros::dec!(150.25));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["side"], "buy");
        assert_eq!(json["type"], "limit");
        assert_eq!(json["price"], "150.25");

        let response: OrderResponse = serde_json::from_str(
            r#"{"id":"o-1","symbol":"AAPL","side":"sell","quantity":"3","price":"10.5","status":"filled","type":"market"}"#,
        )
        .unwrap();
        assert_eq!(response.status, crate::domain::OrderStatus::Filled);
        assert_eq!(response.filled_quantity, None);
    }
}
