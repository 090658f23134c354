use thiserror::Error;

/// Main error type for the trading engine
#[derive(Error, Debug)]
pub enum TraderError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid strategy definition: {0}")]
    InvalidStrategy(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    // Order execution errors
    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    #[error("Order timeout: {0}")]
    OrderTimeout(String),

    #[error("Order failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    // Risk management errors
    #[error("Risk check rejected order: {0}")]
    RiskRejected(String),

    // Strategy registry errors
    #[error("Strategy not found: {0}")]
    StrategyNotFound(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for TraderError
pub type Result<T> = std::result::Result<T, TraderError>;

impl TraderError {
    /// Transient faults worth another submission attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TraderError::Http(_)
                | TraderError::OrderSubmission(_)
                | TraderError::OrderTimeout(_)
                | TraderError::MarketDataUnavailable(_)
        )
    }

    pub fn is_risk_rejection(&self) -> bool {
        matches!(self, TraderError::RiskRejected(_))
    }
}
