//! Paper broker.
//!
//! Simulates the 5paisa surface in memory: market orders fill at the quoted
//! premium, stop-loss orders rest until [`PaperBroker::set_ltp`] moves the
//! price through their trigger, and positions are netted per scrip the way
//! the net-position endpoint reports them. Faults can be queued to exercise
//! retry and partial-fill handling.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use daily_short_core::Tag;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::info;

use crate::account::filter_positions_by_tag;
use crate::error::{BrokerError, Result};
use crate::gateway::BrokerGateway;
use crate::types::{
    OptionChain, OrderAck, OrderBookEntry, OrderKind, OrderRequest, OrderSide, OrderStatus,
    PositionRow,
};

/// Error injected into the next matching call.
#[derive(Debug, Clone)]
pub enum PaperFault {
    /// Network failure; transient.
    Network,
    /// Session rejected; not transient.
    Authentication,
    /// Order refused with the given reason.
    Rejected(String),
}

impl PaperFault {
    fn into_error(self) -> BrokerError {
        match self {
            Self::Network => BrokerError::Network("paper: injected network failure".to_string()),
            Self::Authentication => {
                BrokerError::Authentication("paper: injected session expiry".to_string())
            }
            Self::Rejected(reason) => BrokerError::OrderRejected(reason),
        }
    }
}

#[derive(Debug, Default)]
struct Book {
    symbol: String,
    buy_qty: i64,
    buy_value: Decimal,
    sell_qty: i64,
    sell_value: Decimal,
    ltp: Decimal,
}

impl Book {
    fn apply(&mut self, side: OrderSide, quantity: u32, price: Decimal) {
        let qty = i64::from(quantity);
        match side {
            OrderSide::Buy => {
                self.buy_qty += qty;
                self.buy_value += Decimal::from(quantity) * price;
            }
            OrderSide::Sell => {
                self.sell_qty += qty;
                self.sell_value += Decimal::from(quantity) * price;
            }
        }
    }

    fn avg(value: Decimal, qty: i64) -> Decimal {
        if qty == 0 {
            Decimal::ZERO
        } else {
            value / Decimal::from(qty)
        }
    }

    fn row(&self, scrip_code: i64) -> PositionRow {
        let buy_avg = Self::avg(self.buy_value, self.buy_qty);
        let sell_avg = Self::avg(self.sell_value, self.sell_qty);
        let net = self.buy_qty - self.sell_qty;
        let matched = Decimal::from(self.buy_qty.min(self.sell_qty));

        let unrealized = match net {
            n if n > 0 => (self.ltp - buy_avg) * Decimal::from(n),
            n if n < 0 => (sell_avg - self.ltp) * Decimal::from(-n),
            _ => Decimal::ZERO,
        };

        PositionRow {
            scrip_code,
            symbol: self.symbol.clone(),
            net_quantity: net,
            buy_avg,
            sell_avg,
            ltp: self.ltp,
            realized_pnl: (sell_avg - buy_avg) * matched,
            unrealized_pnl: unrealized,
        }
    }
}

#[derive(Debug, Default)]
struct PaperState {
    chains: HashMap<String, OptionChain>,
    vix: Decimal,
    orders: Vec<OrderBookEntry>,
    books: BTreeMap<i64, Book>,
    next_order_id: u64,
    order_attempts: u64,
    order_faults: BTreeMap<u64, PaperFault>,
    position_faults: Vec<PaperFault>,
    chain_faults: Vec<PaperFault>,
}

impl PaperState {
    fn ltp(&self, scrip_code: i64) -> Option<Decimal> {
        if let Some(book) = self.books.get(&scrip_code) {
            return Some(book.ltp);
        }
        self.chains
            .values()
            .flat_map(|c| c.quotes.iter())
            .find(|q| q.scrip_code == scrip_code)
            .map(|q| q.premium)
    }

    fn fill(&mut self, order_idx: usize, price: Decimal) {
        let order = &mut self.orders[order_idx];
        order.status = OrderStatus::Executed;
        order.pending_quantity = 0;
        order.price = price;

        let (scrip, side, qty, symbol) = (
            order.scrip_code,
            order.side,
            order.quantity,
            order.symbol.clone(),
        );
        let book = self.books.entry(scrip).or_insert_with(|| Book {
            symbol,
            ltp: price,
            ..Book::default()
        });
        book.apply(side, qty, price);
    }

    fn take_fault(faults: &mut Vec<PaperFault>) -> Option<BrokerError> {
        if faults.is_empty() {
            None
        } else {
            Some(faults.remove(0).into_error())
        }
    }
}

/// In-memory [`BrokerGateway`].
#[derive(Debug, Default)]
pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl PaperBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: seeds a chain and the VIX level.
    #[must_use]
    pub fn with_chain(self, chain: OptionChain) -> Self {
        self.set_chain(chain);
        self
    }

    #[must_use]
    pub fn with_vix(self, vix: Decimal) -> Self {
        self.set_vix(vix);
        self
    }

    pub fn set_chain(&self, chain: OptionChain) {
        self.state
            .lock()
            .chains
            .insert(chain.index.to_ascii_uppercase(), chain);
    }

    pub fn set_vix(&self, vix: Decimal) {
        self.state.lock().vix = vix;
    }

    /// Moves the last traded price of a scrip and triggers any resting
    /// stop-loss order it crosses.
    pub fn set_ltp(&self, scrip_code: i64, ltp: Decimal) {
        let mut state = self.state.lock();

        for chain in state.chains.values_mut() {
            for quote in chain.quotes.iter_mut().filter(|q| q.scrip_code == scrip_code) {
                quote.premium = ltp;
            }
        }
        if let Some(book) = state.books.get_mut(&scrip_code) {
            book.ltp = ltp;
        }

        let triggered: Vec<usize> = state
            .orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.scrip_code == scrip_code && o.status == OrderStatus::TriggerPending)
            .filter(|(_, o)| match (o.side, o.trigger_price) {
                (OrderSide::Buy, Some(trigger)) => ltp >= trigger,
                (OrderSide::Sell, Some(trigger)) => ltp <= trigger,
                (_, None) => false,
            })
            .map(|(i, _)| i)
            .collect();

        for idx in triggered {
            info!(
                order_id = %state.orders[idx].order_id,
                scrip_code,
                %ltp,
                "Paper stop-loss triggered"
            );
            state.fill(idx, ltp);
        }
    }

    /// Fails the next `place_order` call.
    pub fn fail_next_order(&self, fault: PaperFault) {
        self.fail_order_after(0, fault);
    }

    /// Lets `skip` orders through, then fails the one after.
    pub fn fail_order_after(&self, skip: u64, fault: PaperFault) {
        let mut state = self.state.lock();
        let at = state.order_attempts + skip;
        state.order_faults.insert(at, fault);
    }

    /// Queues a fault for the next `positions` call.
    pub fn fail_next_positions(&self, fault: PaperFault) {
        self.state.lock().position_faults.push(fault);
    }

    /// Queues a fault for the next `option_chain` call.
    pub fn fail_next_chain(&self, fault: PaperFault) {
        self.state.lock().chain_faults.push(fault);
    }

    /// Every order placed so far, in placement order.
    #[must_use]
    pub fn orders(&self) -> Vec<OrderBookEntry> {
        self.state.lock().orders.clone()
    }
}

#[async_trait]
impl BrokerGateway for PaperBroker {
    async fn option_chain(&self, index: &str) -> Result<OptionChain> {
        let mut state = self.state.lock();
        if let Some(err) = PaperState::take_fault(&mut state.chain_faults) {
            return Err(err);
        }
        state
            .chains
            .get(&index.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| BrokerError::MarketData(format!("paper: no chain loaded for {index}")))
    }

    async fn india_vix(&self) -> Result<Decimal> {
        Ok(self.state.lock().vix)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let mut state = self.state.lock();
        let attempt = state.order_attempts;
        state.order_attempts += 1;
        if let Some(fault) = state.order_faults.remove(&attempt) {
            return Err(fault.into_error());
        }

        let ltp = state.ltp(order.scrip_code).ok_or_else(|| {
            BrokerError::OrderRejected(format!("paper: unknown scrip {}", order.scrip_code))
        })?;

        state.next_order_id += 1;
        let order_id = format!("PAPER-{}", state.next_order_id);

        let (is_stop_loss, trigger_price) = match &order.kind {
            OrderKind::Market => (false, None),
            OrderKind::StopLoss { trigger_price } => (true, Some(*trigger_price)),
        };

        state.orders.push(OrderBookEntry {
            order_id: order_id.clone(),
            exchange_order_id: None,
            scrip_code: order.scrip_code,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            pending_quantity: order.quantity,
            status: if is_stop_loss {
                OrderStatus::TriggerPending
            } else {
                OrderStatus::Pending
            },
            tag: Some(order.tag.clone()),
            price: Decimal::ZERO,
            trigger_price,
            is_stop_loss,
        });

        let fill_price = if is_stop_loss {
            None
        } else {
            let idx = state.orders.len() - 1;
            state.fill(idx, ltp);
            Some(ltp)
        };

        info!(
            %order_id,
            symbol = %order.symbol,
            side = ?order.side,
            quantity = order.quantity,
            price = ?fill_price,
            "Paper order accepted"
        );

        Ok(OrderAck {
            order_id,
            exchange_order_id: None,
            fill_price,
        })
    }

    async fn positions(&self, tag: Option<&Tag>) -> Result<Vec<PositionRow>> {
        let mut state = self.state.lock();
        if let Some(err) = PaperState::take_fault(&mut state.position_faults) {
            return Err(err);
        }

        let rows: Vec<PositionRow> = state
            .books
            .iter()
            .map(|(scrip, book)| book.row(*scrip))
            .collect();

        Ok(match tag {
            None => rows,
            Some(tag) => filter_positions_by_tag(rows, &state.orders, tag),
        })
    }

    async fn order_book(&self, tag: Option<&Tag>) -> Result<Vec<OrderBookEntry>> {
        let state = self.state.lock();
        Ok(state
            .orders
            .iter()
            .filter(|o| tag.map_or(true, |t| o.tag.as_ref() == Some(t)))
            .cloned()
            .collect())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.order_id == order_id)
            .ok_or_else(|| BrokerError::order_not_found(order_id))?;

        if !order.status.is_open() {
            return Err(BrokerError::OrderRejected(format!(
                "paper: order {order_id} is {}",
                order.status
            )));
        }
        order.status = OrderStatus::Cancelled;
        order.pending_quantity = 0;
        info!(order_id, "Paper order cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OptionType, Strike};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn strike(code: i64, option_type: OptionType, strike: Decimal, premium: Decimal) -> Strike {
        Strike {
            symbol: format!("NIFTY 29 Dec 2022 {option_type} {strike:.2}"),
            scrip_code: code,
            option_type,
            strike_price: strike,
            premium,
            expiry_day: 29,
            expiry: NaiveDate::from_ymd_opt(2022, 12, 29).unwrap(),
        }
    }

    fn broker() -> PaperBroker {
        PaperBroker::new()
            .with_chain(OptionChain {
                index: "NIFTY".to_string(),
                spot: dec!(18000),
                expiry: NaiveDate::from_ymd_opt(2022, 12, 29).unwrap(),
                quotes: vec![
                    strike(1, OptionType::Call, dec!(18500), dec!(7.3)),
                    strike(2, OptionType::Put, dec!(17500), dec!(6.9)),
                ],
            })
            .with_vix(dec!(14.5))
    }

    fn tag() -> Tag {
        Tag::new("p0wss1")
    }

    #[tokio::test]
    async fn test_market_sell_fills_at_quote() {
        let broker = broker();
        let chain = broker.option_chain("nifty").await.unwrap();
        let call = &chain.quotes[0];

        let ack = broker
            .place_order(&OrderRequest::market(call, OrderSide::Sell, 100, &tag()))
            .await
            .unwrap();
        assert_eq!(ack.fill_price, Some(dec!(7.3)));

        let rows = broker.positions(Some(&tag())).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].net_quantity, -100);
        assert_eq!(rows[0].pnl(), dec!(0));

        broker.set_ltp(1, dec!(5.3));
        let rows = broker.positions(None).await.unwrap();
        assert_eq!(rows[0].unrealized_pnl, dec!(200));
    }

    #[tokio::test]
    async fn test_stop_loss_rests_then_triggers() {
        let broker = broker();
        let chain = broker.option_chain("NIFTY").await.unwrap();
        let call = &chain.quotes[0];

        broker
            .place_order(&OrderRequest::market(call, OrderSide::Sell, 100, &tag()))
            .await
            .unwrap();
        let sl = broker
            .place_order(&OrderRequest::stop_loss(call, OrderSide::Buy, 100, dec!(11.3), &tag()))
            .await
            .unwrap();
        assert_eq!(sl.fill_price, None);

        broker.set_ltp(1, dec!(11.0));
        let book = broker.order_book(Some(&tag())).await.unwrap();
        assert_eq!(book[1].status, OrderStatus::TriggerPending);

        broker.set_ltp(1, dec!(11.5));
        let book = broker.order_book(Some(&tag())).await.unwrap();
        assert_eq!(book[1].status, OrderStatus::Executed);

        let rows = broker.positions(Some(&tag())).await.unwrap();
        assert_eq!(rows[0].net_quantity, 0);
        assert_eq!(rows[0].realized_pnl, dec!(-420));
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed_once() {
        let broker = broker();
        broker.fail_next_positions(PaperFault::Network);
        assert!(broker.positions(None).await.unwrap_err().is_transient());
        assert!(broker.positions(None).await.is_ok());

        broker.fail_order_after(1, PaperFault::Rejected("margin".to_string()));
        let chain = broker.option_chain("NIFTY").await.unwrap();
        let order = OrderRequest::market(&chain.quotes[1], OrderSide::Sell, 100, &tag());
        assert!(broker.place_order(&order).await.is_ok());
        let err = broker.place_order(&order).await.unwrap_err();
        assert!(matches!(err, BrokerError::OrderRejected(_)));
        assert!(broker.place_order(&order).await.is_ok());
        assert_eq!(broker.orders().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_only_open_orders() {
        let broker = broker();
        let chain = broker.option_chain("NIFTY").await.unwrap();
        let put = &chain.quotes[1];

        let fill = broker
            .place_order(&OrderRequest::market(put, OrderSide::Sell, 100, &tag()))
            .await
            .unwrap();
        let sl = broker
            .place_order(&OrderRequest::stop_loss(put, OrderSide::Buy, 100, dec!(10.7), &tag()))
            .await
            .unwrap();

        broker.cancel_order(&sl.order_id).await.unwrap();
        assert!(matches!(
            broker.cancel_order(&fill.order_id).await,
            Err(BrokerError::OrderRejected(_))
        ));
        assert!(matches!(
            broker.cancel_order("PAPER-999").await,
            Err(BrokerError::OrderNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_index_is_market_data_error() {
        let broker = broker();
        assert!(matches!(
            broker.option_chain("BANKNIFTY").await,
            Err(BrokerError::MarketData(_))
        ));
        assert_eq!(broker.india_vix().await.unwrap(), dec!(14.5));
    }
}
