//! Option chain and index quotes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{format_net_date, parse_net_date, FivePaisaClient};
use crate::error::{BrokerError, Result};
use crate::symbol::ScripSymbol;
use crate::types::{OptionChain, Strike};

/// Scrip name of the India VIX index on the cash segment.
pub const INDIA_VIX_SYMBOL: &str = "INDIA VIX";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExpiryRequest<'a> {
    client_code: &'a str,
    exch: &'static str,
    symbol: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExpiryResponse {
    #[serde(rename = "Expiry", default)]
    expiry: Vec<RawExpiry>,
    #[serde(rename = "lastrate", default)]
    last_rate: Vec<RawLastRate>,
}

#[derive(Debug, Deserialize)]
struct RawExpiry {
    #[serde(rename = "ExpiryDate")]
    expiry_date: String,
}

#[derive(Debug, Deserialize)]
struct RawLastRate {
    #[serde(rename = "LTP")]
    ltp: Option<Decimal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct OptionsRequest<'a> {
    client_code: &'a str,
    exch: &'static str,
    symbol: &'a str,
    expiry_date: String,
}

#[derive(Debug, Deserialize)]
struct OptionsResponse {
    #[serde(rename = "Options", default)]
    options: Vec<RawOption>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawOption {
    name: String,
    scrip_code: i64,
    last_rate: Option<Decimal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct MarketFeedRequest<'a> {
    count: usize,
    client_login_type: u8,
    last_request_time: String,
    refresh_rate: &'static str,
    market_feed_data: Vec<FeedItem<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct FeedItem<'a> {
    exch: &'static str,
    exch_type: &'static str,
    symbol: &'a str,
}

#[derive(Debug, Deserialize)]
struct MarketFeedResponse {
    #[serde(rename = "Data", default)]
    data: Vec<RawFeed>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawFeed {
    last_rate: Option<Decimal>,
}

impl RawOption {
    fn into_strike(self) -> Result<Strike> {
        let parsed = ScripSymbol::parse(&self.name)?;
        Ok(Strike {
            symbol: self.name,
            scrip_code: self.scrip_code,
            option_type: parsed.option_type,
            strike_price: parsed.strike,
            premium: self.last_rate.unwrap_or(Decimal::ZERO),
            expiry_day: parsed.expiry_day,
            expiry: parsed.expiry,
        })
    }
}

impl FivePaisaClient {
    /// Fetches the nearest-expiry option chain for an index.
    ///
    /// # Errors
    /// Returns [`BrokerError::MarketData`] when no expiry is listed or a scrip
    /// name in the chain does not parse.
    pub async fn fetch_option_chain(&self, index: &str) -> Result<OptionChain> {
        debug!(index, "Fetching option chain");

        let expiries: ExpiryResponse = self
            .post(
                "GetExpiryForSymbolOptions",
                "5PGetExpiry",
                &ExpiryRequest {
                    client_code: self.client_code(),
                    exch: "N",
                    symbol: index,
                },
            )
            .await?;

        let nearest: DateTime<Utc> = expiries
            .expiry
            .iter()
            .filter_map(|e| parse_net_date(&e.expiry_date))
            .min()
            .ok_or_else(|| BrokerError::MarketData(format!("no expiries listed for {index}")))?;

        let spot = match expiries.last_rate.first().and_then(|r| r.ltp) {
            Some(ltp) => ltp,
            None => self.index_quote(index).await?,
        };

        let options: OptionsResponse = self
            .post(
                "GetOptionsForSymbol",
                "5PGetOptions",
                &OptionsRequest {
                    client_code: self.client_code(),
                    exch: "N",
                    symbol: index,
                    expiry_date: format_net_date(nearest),
                },
            )
            .await?;

        let quotes = options
            .options
            .into_iter()
            .map(RawOption::into_strike)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| BrokerError::MarketData(e.to_string()))?;

        let expiry = quotes
            .first()
            .map(|q| q.expiry)
            .ok_or_else(|| BrokerError::MarketData(format!("empty option chain for {index}")))?;

        Ok(OptionChain {
            index: index.to_ascii_uppercase(),
            spot,
            expiry,
            quotes,
        })
    }

    /// Last traded level of a cash-segment index (e.g. `NIFTY`, `INDIA VIX`).
    ///
    /// # Errors
    /// Returns [`BrokerError::MarketData`] if the feed has no rate for it.
    pub async fn index_quote(&self, symbol: &str) -> Result<Decimal> {
        debug!(symbol, "Fetching index quote");

        let feed: MarketFeedResponse = self
            .post(
                "V1/MarketFeed",
                "5PMF",
                &MarketFeedRequest {
                    count: 1,
                    client_login_type: 0,
                    last_request_time: "/Date(0)/".to_string(),
                    refresh_rate: "H",
                    market_feed_data: vec![FeedItem {
                        exch: "N",
                        exch_type: "C",
                        symbol,
                    }],
                },
            )
            .await?;

        feed.data
            .first()
            .and_then(|d| d.last_rate)
            .ok_or_else(|| BrokerError::MarketData(format!("no quote for {symbol}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{envelope, logged_in};
    use crate::types::OptionType;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_chain(server: &MockServer, options: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/GetExpiryForSymbolOptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
                "Expiry": [
                    {"ExpiryDate": "/Date(1672684200000+0530)/"},
                    {"ExpiryDate": "/Date(1672252200000+0530)/"}
                ],
                "lastrate": [{"LTP": 18120.5}]
            }))))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/GetOptionsForSymbol"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(envelope(json!({ "Options": options }))),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_chain_is_parsed_from_scrip_names() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        mount_chain(
            &server,
            json!([
                {"Name": "NIFTY 29 Dec 2022 CE 18100.00", "ScripCode": 43001, "LastRate": 41.2, "CPType": "CE"},
                {"Name": "NIFTY 29 Dec 2022 PE 18100.00", "ScripCode": 43002, "LastRate": 22.35, "CPType": "PE"}
            ]),
        )
        .await;

        let chain = client.fetch_option_chain("NIFTY").await.unwrap();
        assert_eq!(chain.spot, dec!(18120.5));
        assert_eq!(chain.quotes.len(), 2);
        assert_eq!(chain.expiry.to_string(), "2022-12-29");

        let call = chain.quote(dec!(18100), OptionType::Call).unwrap();
        assert_eq!(call.scrip_code, 43001);
        assert_eq!(call.premium, dec!(41.2));
        assert_eq!(call.expiry_day, 29);
    }

    #[tokio::test]
    async fn test_unparsable_scrip_is_market_data_error() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        mount_chain(
            &server,
            json!([{"Name": "NIFTY FUT", "ScripCode": 1, "LastRate": 1.0}]),
        )
        .await;

        let err = client.fetch_option_chain("NIFTY").await.unwrap_err();
        assert!(matches!(err, BrokerError::MarketData(_)));
    }

    #[tokio::test]
    async fn test_index_quote_reads_market_feed() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/V1/MarketFeed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
                "Data": [{"LastRate": 14.72, "Symbol": "INDIA VIX"}]
            }))))
            .mount(&server)
            .await;

        let vix = client.index_quote(INDIA_VIX_SYMBOL).await.unwrap();
        assert_eq!(vix, dec!(14.72));
    }
}
