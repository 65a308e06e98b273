//! Order book, trade book and net positions.
//!
//! 5paisa's net-position endpoint reports per-scrip totals with no notion
//! of which run opened them. Filtering by tag therefore goes through the
//! order book: a scrip belongs to a tag when any order on it carries that
//! tag as its remote order id.

use std::collections::HashSet;

use daily_short_core::Tag;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{de_order_id, FivePaisaClient};
use crate::error::Result;
use crate::types::{OrderBookEntry, OrderSide, OrderStatus, PositionRow};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ClientCodeBody<'a> {
    client_code: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderBookResponse {
    #[serde(rename = "OrderBookDetail", default)]
    orders: Vec<RawOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawOrder {
    #[serde(rename = "BrokerOrderId", default, deserialize_with = "de_order_id")]
    broker_order_id: Option<String>,
    #[serde(rename = "ExchOrderID", default, deserialize_with = "de_order_id")]
    exch_order_id: Option<String>,
    scrip_code: i64,
    #[serde(default)]
    scrip_name: String,
    buy_sell: String,
    qty: u32,
    #[serde(default)]
    pending_qty: u32,
    order_status: String,
    #[serde(rename = "RemoteOrderID", default)]
    remote_order_id: Option<String>,
    #[serde(default)]
    rate: Decimal,
    #[serde(rename = "SLTriggerRate", default)]
    sl_trigger_rate: Decimal,
    #[serde(rename = "WithSL", default)]
    with_sl: String,
}

impl RawOrder {
    fn into_entry(self) -> Option<OrderBookEntry> {
        let order_id = self.broker_order_id?;
        let side = OrderSide::from_code(&self.buy_sell)?;
        let is_stop_loss = self.with_sl.eq_ignore_ascii_case("Y");
        let tag = self
            .remote_order_id
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(Tag::new);

        Some(OrderBookEntry {
            order_id,
            exchange_order_id: self.exch_order_id,
            scrip_code: self.scrip_code,
            symbol: self.scrip_name,
            side,
            quantity: self.qty,
            pending_quantity: self.pending_qty,
            status: OrderStatus::from_broker(&self.order_status),
            tag,
            price: self.rate,
            trigger_price: is_stop_loss.then_some(self.sl_trigger_rate),
            is_stop_loss,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TradeBookResponse {
    #[serde(rename = "TradeBookDetail", default)]
    trades: Vec<RawTrade>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct RawTrade {
    #[serde(rename = "ExchOrderID", default, deserialize_with = "de_order_id")]
    pub(crate) exch_order_id: Option<String>,
    pub(crate) qty: u32,
    pub(crate) rate: Decimal,
}

#[derive(Debug, Deserialize)]
struct NetPositionResponse {
    #[serde(rename = "NetPositionDetail", default)]
    positions: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPosition {
    scrip_code: i64,
    #[serde(default)]
    scrip_name: String,
    net_qty: i64,
    #[serde(default)]
    buy_avg_rate: Decimal,
    #[serde(default)]
    sell_avg_rate: Decimal,
    #[serde(rename = "LTP", default)]
    ltp: Decimal,
    #[serde(rename = "BookedPL", default)]
    booked_pl: Decimal,
    #[serde(rename = "MTOM", default)]
    mtom: Decimal,
}

impl From<RawPosition> for PositionRow {
    fn from(raw: RawPosition) -> Self {
        Self {
            scrip_code: raw.scrip_code,
            symbol: raw.scrip_name,
            net_quantity: raw.net_qty,
            buy_avg: raw.buy_avg_rate,
            sell_avg: raw.sell_avg_rate,
            ltp: raw.ltp,
            realized_pnl: raw.booked_pl,
            unrealized_pnl: raw.mtom,
        }
    }
}

/// Keeps positions whose scrip was traded by an order carrying `tag`.
#[must_use]
pub fn filter_positions_by_tag(
    rows: Vec<PositionRow>,
    orders: &[OrderBookEntry],
    tag: &Tag,
) -> Vec<PositionRow> {
    let scrips: HashSet<i64> = orders
        .iter()
        .filter(|o| o.tag.as_ref() == Some(tag))
        .map(|o| o.scrip_code)
        .collect();
    rows.into_iter()
        .filter(|row| scrips.contains(&row.scrip_code))
        .collect()
}

impl FivePaisaClient {
    /// Today's order book, optionally restricted to one tag.
    pub async fn fetch_order_book(&self, tag: Option<&Tag>) -> Result<Vec<OrderBookEntry>> {
        let response: OrderBookResponse = self
            .post(
                "V2/OrderBook",
                "5POrdBkV2",
                &ClientCodeBody {
                    client_code: self.client_code(),
                },
            )
            .await?;

        let entries: Vec<OrderBookEntry> = response
            .orders
            .into_iter()
            .filter_map(RawOrder::into_entry)
            .filter(|entry| tag.map_or(true, |t| entry.tag.as_ref() == Some(t)))
            .collect();

        debug!(count = entries.len(), tag = ?tag.map(Tag::as_str), "Fetched order book");
        Ok(entries)
    }

    pub(crate) async fn fetch_trade_book(&self) -> Result<Vec<RawTrade>> {
        let response: TradeBookResponse = self
            .post(
                "V1/TradeBook",
                "5PTrdBkV1",
                &ClientCodeBody {
                    client_code: self.client_code(),
                },
            )
            .await?;
        Ok(response.trades)
    }

    /// Net positions for the day, optionally restricted to scrips traded
    /// under one tag.
    pub async fn fetch_positions(&self, tag: Option<&Tag>) -> Result<Vec<PositionRow>> {
        let response: NetPositionResponse = self
            .post(
                "V1/NetPositionNetWise",
                "5PNPNWV1",
                &ClientCodeBody {
                    client_code: self.client_code(),
                },
            )
            .await?;

        let rows: Vec<PositionRow> = response.positions.into_iter().map(Into::into).collect();

        match tag {
            None => Ok(rows),
            Some(tag) => {
                let orders = self.fetch_order_book(Some(tag)).await?;
                Ok(filter_positions_by_tag(rows, &orders, tag))
            }
        }
    }
}
