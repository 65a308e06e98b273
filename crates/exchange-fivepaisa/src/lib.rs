//! 5paisa broker integration for NSE index options.
//!
//! This crate provides:
//! - Login with the encrypted email/password/DOB payload
//! - Nearest-expiry option chains and index quotes (spot, India VIX)
//! - Intraday market and stop-loss orders tagged with a run id
//! - Order book and net positions, filterable by tag
//! - [`BrokerGateway`], the seam the strategy crates depend on, with a live
//!   ([`FivePaisaClient`]) and an in-memory ([`PaperBroker`]) implementation
//!
//! # Example
//!
//! ```ignore
//! use daily_short_fivepaisa::{BrokerGateway, CredentialSource, FivePaisaClient, FivePaisaConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = CredentialSource::from_arg("creds.json")?;
//!     let client = FivePaisaClient::login(FivePaisaConfig::default(), source).await?;
//!
//!     let chain = client.option_chain("NIFTY").await?;
//!     println!("NIFTY spot {} expiry {}", chain.spot, chain.expiry);
//!     Ok(())
//! }
//! ```
//!
//! # Credentials
//!
//! Credentials are read from a JSON blob with the keys `email`, `passwd`,
//! `dob`, `APP_NAME`, `APP_SOURCE`, `USER_ID`, `PASSWORD`, `USER_KEY` and
//! `ENCRYPTION_KEY`, either from a file path or passed inline.

pub mod account;
pub mod auth;
pub mod client;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod options_chain;
pub mod paper;
pub mod symbol;
pub mod types;

pub use account::filter_positions_by_tag;
pub use auth::{CredentialSource, Credentials};
pub use client::{FivePaisaClient, FivePaisaConfig, FIVEPAISA_API_URL};
pub use error::{BrokerError, Result};
pub use gateway::BrokerGateway;
pub use options_chain::INDIA_VIX_SYMBOL;
pub use paper::{PaperBroker, PaperFault};
pub use symbol::ScripSymbol;
pub use types::{
    OptionChain, OptionType, OrderAck, OrderBookEntry, OrderKind, OrderRequest, OrderSide,
    OrderStatus, PositionRow, Strike,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paper_broker_without_chain_reports_market_data_error() {
        let gateway: std::sync::Arc<dyn BrokerGateway> = std::sync::Arc::new(PaperBroker::new());
        let err = gateway.option_chain("NIFTY").await.unwrap_err();
        assert!(matches!(err, BrokerError::MarketData(_)));
        assert!(!err.is_transient());
    }
}
