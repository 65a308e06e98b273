//! Error types for strike selection and order management.

use daily_short_core::{ConfigError, Tag};
use daily_short_fivepaisa::BrokerError;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::Leg;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// The broker session is invalid; nothing further can be done this run.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Quotes could not be fetched (after retries) or were inconsistent.
    #[error("market data unavailable: {0}")]
    MarketData(String),

    /// No quoted strike on one side of the chain.
    #[error("no strike found for {index} near premium {threshold}")]
    StrikeNotFound { index: String, threshold: Decimal },

    /// An order was refused. `placed` holds the legs that did go through
    /// under this tag before the refusal.
    #[error("order rejected for tag {tag}: {reason}")]
    OrderRejected {
        tag: Tag,
        reason: String,
        placed: Vec<Leg>,
    },

    #[error("transient broker failure: {0}")]
    TransientNetwork(String),

    /// The requested operation is not valid for the tag's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Any other broker failure.
    #[error(transparent)]
    Broker(BrokerError),
}

impl ManagerError {
    /// Wraps a failed placement with the tag and the legs already placed.
    ///
    /// Any failure after the first leg went through is an
    /// [`ManagerError::OrderRejected`] so the caller learns which legs are
    /// live. With nothing placed, non-rejections keep their usual class.
    pub fn rejected(tag: &Tag, err: BrokerError, placed: Vec<Leg>) -> Self {
        match err {
            BrokerError::OrderRejected(reason) => Self::OrderRejected {
                tag: tag.clone(),
                reason,
                placed,
            },
            other if !placed.is_empty() => Self::OrderRejected {
                tag: tag.clone(),
                reason: other.to_string(),
                placed,
            },
            other => other.into(),
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }
}

impl From<BrokerError> for ManagerError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Authentication(msg) => Self::Authentication(msg),
            e if e.is_transient() => Self::TransientNetwork(e.to_string()),
            BrokerError::MarketData(msg) => Self::MarketData(msg),
            e @ BrokerError::InvalidSymbol { .. } => Self::MarketData(e.to_string()),
            other => Self::Broker(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;
