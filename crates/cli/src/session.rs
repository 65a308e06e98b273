//! Broker wiring: a live 5paisa session, or a paper book fed by live quotes.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use daily_short_core::Tag;
use daily_short_fivepaisa::{
    BrokerGateway, CredentialSource, FivePaisaClient, FivePaisaConfig, OptionChain, OrderAck,
    OrderBookEntry, OrderRequest, PaperBroker, PositionRow, Result,
};
use rust_decimal::Decimal;
use tracing::{debug, info};

/// Logs in and returns the gateway the managers should use.
pub async fn connect(
    creds: &str,
    paper: bool,
    index: &str,
) -> anyhow::Result<Arc<dyn BrokerGateway>> {
    let source = CredentialSource::from_arg(creds).context("Cannot read credentials")?;
    let client = FivePaisaClient::login(FivePaisaConfig::default(), source)
        .await
        .context("5paisa login failed")?;
    info!(client_code = %client.client_code(), paper, "Logged in");

    if paper {
        Ok(Arc::new(PaperSession::new(Arc::new(client), index)))
    } else {
        Ok(Arc::new(client))
    }
}

/// Orders go to an in-memory book; chains and VIX come from the live
/// session. Every positions poll re-prices the paper book from a fresh
/// chain so stop-losses and PnL follow the market.
pub struct PaperSession {
    market: Arc<dyn BrokerGateway>,
    book: PaperBroker,
    index: String,
}

impl PaperSession {
    pub fn new(market: Arc<dyn BrokerGateway>, index: &str) -> Self {
        Self {
            market,
            book: PaperBroker::new(),
            index: index.to_string(),
        }
    }

    async fn reprice(&self) -> Result<()> {
        let held: HashSet<i64> = self
            .book
            .positions(None)
            .await?
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.scrip_code)
            .collect();
        if held.is_empty() {
            return Ok(());
        }

        let chain = self.market.option_chain(&self.index).await?;
        for quote in chain.quotes.iter().filter(|q| held.contains(&q.scrip_code)) {
            self.book.set_ltp(quote.scrip_code, quote.premium);
        }
        debug!(index = %self.index, scrips = held.len(), "Paper book repriced");
        Ok(())
    }
}

#[async_trait]
impl BrokerGateway for PaperSession {
    async fn option_chain(&self, index: &str) -> Result<OptionChain> {
        let chain = self.market.option_chain(index).await?;
        self.book.set_chain(chain.clone());
        Ok(chain)
    }

    async fn india_vix(&self) -> Result<Decimal> {
        self.market.india_vix().await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        self.book.place_order(order).await
    }

    async fn positions(&self, tag: Option<&Tag>) -> Result<Vec<PositionRow>> {
        self.reprice().await?;
        self.book.positions(tag).await
    }

    async fn order_book(&self, tag: Option<&Tag>) -> Result<Vec<OrderBookEntry>> {
        self.book.order_book(tag).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.book.cancel_order(order_id).await
    }
}
