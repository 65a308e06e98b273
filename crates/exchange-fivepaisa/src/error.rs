//! Error types for the 5paisa gateway.
//!
//! Distinguishes failures that are safe to retry (network, timeouts, rate
//! limits, server errors) from those that are not (authentication, order
//! rejections, malformed market data).

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Login failed or the session is no longer valid.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// API request failed.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code, or the broker's body status when HTTP succeeded.
        status_code: u16,
        /// Error message from API.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimit {
        /// Seconds to wait before retry.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Order refused by the broker or exchange.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// Order not found in the order book.
    #[error("order not found: {order_id}")]
    OrderNotFound {
        /// The order ID that was not found.
        order_id: String,
    },

    /// A scrip name did not follow the broker's symbol grammar.
    #[error("invalid symbol '{symbol}': {reason}")]
    InvalidSymbol {
        /// The offending symbol.
        symbol: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Quote or chain data was missing or inconsistent.
    #[error("market data error: {0}")]
    MarketData(String),

    /// Configuration or credential error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BrokerError {
    /// Creates an API error from status code and message.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a rate limit error.
    pub fn rate_limit(retry_after_secs: u64) -> Self {
        Self::RateLimit { retry_after_secs }
    }

    /// Creates an order not found error.
    pub fn order_not_found(order_id: impl Into<String>) -> Self {
        Self::OrderNotFound {
            order_id: order_id.into(),
        }
    }

    /// Creates an invalid symbol error.
    pub fn invalid_symbol(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSymbol {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the request may succeed when repeated later.
    ///
    /// Order rejections are never transient: repeating a placement that
    /// actually reached the exchange risks a duplicate fill.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimit { .. } => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    /// The wait the broker asked for before the next request, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
