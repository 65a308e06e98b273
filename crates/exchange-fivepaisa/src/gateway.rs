//! Broker seam shared by the strike picker, order manager and CLI.

use async_trait::async_trait;
use daily_short_core::Tag;
use rust_decimal::Decimal;

use crate::client::FivePaisaClient;
use crate::error::Result;
use crate::options_chain::INDIA_VIX_SYMBOL;
use crate::types::{OptionChain, OrderAck, OrderBookEntry, OrderRequest, PositionRow};

/// Everything the strategy needs from a broker.
///
/// Implemented by [`FivePaisaClient`] for live trading and by
/// [`crate::PaperBroker`] for paper runs and tests.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Nearest-expiry option chain with spot.
    async fn option_chain(&self, index: &str) -> Result<OptionChain>;

    /// Current India VIX level.
    async fn india_vix(&self) -> Result<Decimal>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    /// Net positions; with a tag, only scrips traded under it.
    async fn positions(&self, tag: Option<&Tag>) -> Result<Vec<PositionRow>>;

    async fn order_book(&self, tag: Option<&Tag>) -> Result<Vec<OrderBookEntry>>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;
}

#[async_trait]
impl BrokerGateway for FivePaisaClient {
    async fn option_chain(&self, index: &str) -> Result<OptionChain> {
        self.fetch_option_chain(index).await
    }

    async fn india_vix(&self) -> Result<Decimal> {
        self.index_quote(INDIA_VIX_SYMBOL).await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        self.submit_order(order).await
    }

    async fn positions(&self, tag: Option<&Tag>) -> Result<Vec<PositionRow>> {
        self.fetch_positions(tag).await
    }

    async fn order_book(&self, tag: Option<&Tag>) -> Result<Vec<OrderBookEntry>> {
        self.fetch_order_book(tag).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.cancel_open_order(order_id).await
    }
}
