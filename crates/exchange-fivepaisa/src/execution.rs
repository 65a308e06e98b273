//! Order placement and cancellation.

use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::{de_order_id, format_net_date, FivePaisaClient};
use crate::error::{BrokerError, Result};
use crate::types::{OrderAck, OrderBookEntry, OrderKind, OrderRequest, OrderSide, OrderStatus};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct OrderBody<'a> {
    client_code: &'a str,
    order_for: &'static str,
    exchange: &'static str,
    exchange_type: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    price: Decimal,
    #[serde(rename = "OrderID")]
    order_id: i64,
    order_type: &'static str,
    qty: u32,
    order_date_time: String,
    scrip_code: i64,
    at_market: bool,
    #[serde(rename = "RemoteOrderID")]
    remote_order_id: &'a str,
    #[serde(rename = "ExchOrderID")]
    exch_order_id: &'a str,
    dis_qty: u32,
    is_stop_loss_order: bool,
    #[serde(with = "rust_decimal::serde::float")]
    stop_loss_price: Decimal,
    #[serde(rename = "IsVTD")]
    is_vtd: bool,
    #[serde(rename = "IOCOrder")]
    ioc_order: bool,
    is_intraday: bool,
    #[serde(rename = "PublicIP")]
    public_ip: &'static str,
    #[serde(rename = "AHPlaced")]
    ah_placed: &'static str,
    valid_till_date: String,
    #[serde(rename = "iOrderValidity")]
    order_validity: u8,
    order_requester_code: &'a str,
    traded_qty: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrderResponse {
    #[serde(rename = "BrokerOrderID", default, deserialize_with = "de_order_id")]
    broker_order_id: Option<String>,
    #[serde(rename = "ExchOrderID", default, deserialize_with = "de_order_id")]
    exch_order_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: i64,
}

fn order_type(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
}

impl FivePaisaClient {
    /// Places an intraday order on the NSE derivatives segment.
    ///
    /// Market orders are followed by a short trade-book lookup so the ack
    /// can carry the execution price. Stop-loss orders rest (trigger
    /// pending) and are acknowledged without one.
    ///
    /// # Errors
    /// Returns [`BrokerError::OrderRejected`] if 5paisa refuses the order,
    /// or if the exchange rejects it during the fill lookup.
    pub async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let (is_stop_loss, stop_loss_price) = match &order.kind {
            OrderKind::Market => (false, Decimal::ZERO),
            OrderKind::StopLoss { trigger_price } => (true, *trigger_price),
        };

        info!(
            symbol = %order.symbol,
            scrip_code = order.scrip_code,
            side = ?order.side,
            quantity = order.quantity,
            stop_loss = is_stop_loss,
            tag = %order.tag,
            "Placing order"
        );

        let now = format_net_date(Utc::now());
        let body = OrderBody {
            client_code: self.client_code(),
            order_for: "P",
            exchange: "N",
            exchange_type: "D",
            price: Decimal::ZERO,
            order_id: 0,
            order_type: order_type(order.side),
            qty: order.quantity,
            order_date_time: now.clone(),
            scrip_code: order.scrip_code,
            at_market: true,
            remote_order_id: order.tag.as_str(),
            exch_order_id: "0",
            dis_qty: order.quantity,
            is_stop_loss_order: is_stop_loss,
            stop_loss_price,
            is_vtd: false,
            ioc_order: false,
            is_intraday: true,
            public_ip: "192.168.1.1",
            ah_placed: "N",
            valid_till_date: now,
            order_validity: 0,
            order_requester_code: self.client_code(),
            traded_qty: 0,
        };

        let response: OrderResponse = self.post("V1/OrderRequest", "5POrdReq", &body).await?;
        let order_id = match (response.status, response.broker_order_id) {
            (0, Some(id)) => id,
            (_, _) => {
                let reason = response
                    .message
                    .unwrap_or_else(|| "order refused".to_string());
                warn!(symbol = %order.symbol, %reason, "Order rejected");
                return Err(BrokerError::OrderRejected(reason));
            }
        };

        let mut ack = OrderAck {
            order_id,
            exchange_order_id: response.exch_order_id,
            fill_price: None,
        };

        // The order is live from here on; only an exchange rejection undoes it.
        if !is_stop_loss {
            match self.await_fill(&mut ack).await {
                Ok(()) => {}
                Err(e @ BrokerError::OrderRejected(_)) => return Err(e),
                Err(e) => {
                    warn!(
                        order_id = %ack.order_id,
                        error = %e,
                        "Fill lookup failed, returning ack without a fill price"
                    );
                }
            }
        }

        info!(order_id = %ack.order_id, fill_price = ?ack.fill_price, "Order accepted");
        Ok(ack)
    }

    /// Polls the order and trade books for the execution of a market order.
    async fn await_fill(&self, ack: &mut OrderAck) -> Result<()> {
        let delay = Duration::from_millis(self.config.fill_lookup_delay_ms);

        for attempt in 0..self.config.fill_lookup_attempts {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            let book = self.fetch_order_book(None).await?;
            let Some(entry) = book.into_iter().find(|o| o.order_id == ack.order_id) else {
                continue;
            };
            if entry.status == OrderStatus::Rejected {
                return Err(BrokerError::OrderRejected(format!(
                    "order {} rejected by exchange",
                    ack.order_id
                )));
            }
            if ack.exchange_order_id.is_none() {
                ack.exchange_order_id.clone_from(&entry.exchange_order_id);
            }
            if entry.status != OrderStatus::Executed {
                continue;
            }

            let Some(exch_id) = ack.exchange_order_id.as_deref() else {
                continue;
            };
            let trades = self.fetch_trade_book().await?;
            let (qty, notional) = trades
                .iter()
                .filter(|t| t.exch_order_id.as_deref() == Some(exch_id))
                .fold((0u32, Decimal::ZERO), |(q, n), t| {
                    (q + t.qty, n + Decimal::from(t.qty) * t.rate)
                });
            if qty > 0 {
                ack.fill_price = Some(notional / Decimal::from(qty));
                return Ok(());
            }
        }

        debug!(order_id = %ack.order_id, "No fill price found in trade book");
        Ok(())
    }

    /// Cancels an open order by broker order id.
    ///
    /// # Errors
    /// Returns [`BrokerError::OrderNotFound`] if the order is not on today's
    /// book, and [`BrokerError::OrderRejected`] if it is no longer open or
    /// the broker refuses the cancel.
    pub async fn cancel_open_order(&self, order_id: &str) -> Result<()> {
        let book = self.fetch_order_book(None).await?;
        let entry: OrderBookEntry = book
            .into_iter()
            .find(|o| o.order_id == order_id)
            .ok_or_else(|| BrokerError::order_not_found(order_id))?;

        if !entry.status.is_open() {
            return Err(BrokerError::OrderRejected(format!(
                "order {order_id} is {} and cannot be cancelled",
                entry.status
            )));
        }

        info!(order_id, symbol = %entry.symbol, "Cancelling order");

        let now = format_net_date(Utc::now());
        let remote = entry.tag.as_ref().map_or("", |t| t.as_str());
        let exch_order_id = entry.exchange_order_id.as_deref().unwrap_or("0");
        let body = OrderBody {
            client_code: self.client_code(),
            order_for: "C",
            exchange: "N",
            exchange_type: "D",
            price: Decimal::ZERO,
            order_id: 0,
            order_type: order_type(entry.side),
            qty: entry.quantity,
            order_date_time: now.clone(),
            scrip_code: entry.scrip_code,
            at_market: true,
            remote_order_id: remote,
            exch_order_id,
            dis_qty: entry.quantity,
            is_stop_loss_order: entry.is_stop_loss,
            stop_loss_price: entry.trigger_price.unwrap_or(Decimal::ZERO),
            is_vtd: false,
            ioc_order: false,
            is_intraday: true,
            public_ip: "192.168.1.1",
            ah_placed: "N",
            valid_till_date: now,
            order_validity: 0,
            order_requester_code: self.client_code(),
            traded_qty: entry.quantity.saturating_sub(entry.pending_quantity),
        };

        let response: OrderResponse = self.post("V1/OrderRequest", "5POrdReq", &body).await?;
        if response.status != 0 {
            return Err(BrokerError::OrderRejected(
                response
                    .message
                    .unwrap_or_else(|| format!("cancel of {order_id} refused")),
            ));
        }
        Ok(())
    }
}
