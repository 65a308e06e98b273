//! Order manager: short entries, recovery, status and account PnL.
//!
//! One [`OrderManager`] owns the legs it placed (or rebuilt) in this process,
//! grouped by tag. The broker stays the source of truth for positions and
//! PnL; nothing here is persisted.

use std::collections::HashMap;

use daily_short_core::{PartialFillPolicy, Tag};
use daily_short_fivepaisa::{
    BrokerError, OrderBookEntry, OrderRequest, OrderSide, OrderStatus, PositionRow, ScripSymbol,
    Strike,
};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::context::TradingContext;
use crate::error::{ManagerError, Result};
use crate::types::{ExitSummary, Leg, StatusReport, StrikePair, TagState};

/// Legs and lifecycle of one tag.
#[derive(Debug, Default)]
pub(crate) struct TagBook {
    pub(crate) state: TagState,
    pub(crate) legs: Vec<Leg>,
    pub(crate) exit: Option<ExitSummary>,
}

impl TagBook {
    /// Moves the state forward; earlier states are ignored.
    pub(crate) fn advance(&mut self, to: TagState) {
        if to > self.state {
            self.state = to;
        }
    }
}

#[derive(Debug)]
pub struct OrderManager {
    pub(crate) ctx: TradingContext,
    pub(crate) books: HashMap<Tag, TagBook>,
}

impl OrderManager {
    #[must_use]
    pub fn new(ctx: TradingContext) -> Self {
        Self {
            ctx,
            books: HashMap::new(),
        }
    }

    #[must_use]
    pub fn state(&self, tag: &Tag) -> TagState {
        self.books.get(tag).map_or(TagState::New, |b| b.state)
    }

    #[must_use]
    pub fn legs(&self, tag: &Tag) -> &[Leg] {
        self.books.get(tag).map_or(&[], |b| b.legs.as_slice())
    }

    /// Sells both strikes of `pair` at market under `tag`, call first.
    ///
    /// Strikes that already hold a leg under the tag are skipped, so a
    /// straddle and a strangle sharing a strike never double up. Returns
    /// the legs placed by this call.
    ///
    /// # Errors
    /// [`ManagerError::OrderRejected`] when a leg is refused, or when any
    /// placement fails after a sibling filled; what happens to that sibling
    /// depends on [`PartialFillPolicy`].
    pub async fn place_short(&mut self, pair: &StrikePair, tag: &Tag) -> Result<Vec<Leg>> {
        if self.state(tag) >= TagState::Monitoring {
            return Err(ManagerError::InvalidState(format!(
                "tag {tag} is {}; no new entries",
                self.state(tag)
            )));
        }

        let quantity = self.ctx.config.quantity;
        let lots = self.ctx.config.lots()?;
        let gateway = self.ctx.gateway.clone();

        info!(
            tag = %tag,
            kind = %pair.kind,
            call = %pair.call.display_name(),
            put = %pair.put.display_name(),
            quantity,
            lots,
            "Placing short legs"
        );

        let mut placed = Vec::new();
        for strike in pair.legs() {
            if self
                .legs(tag)
                .iter()
                .any(|l| l.strike.scrip_code == strike.scrip_code)
            {
                info!(tag = %tag, symbol = %strike.symbol, "Leg already open under tag, skipping");
                continue;
            }

            let request = OrderRequest::market(strike, OrderSide::Sell, quantity, tag);
            let ack = match gateway.place_order(&request).await {
                Ok(ack) => ack,
                Err(e) => {
                    error!(
                        tag = %tag,
                        symbol = %strike.symbol,
                        error = %e,
                        placed = placed.len(),
                        "Entry failed"
                    );
                    return Err(self.after_rejection(tag, e, placed).await);
                }
            };

            let entry_price = match ack.fill_price {
                Some(price) => price,
                None => {
                    warn!(
                        tag = %tag,
                        order_id = %ack.order_id,
                        quote = %strike.premium,
                        "No fill price reported, using quoted premium"
                    );
                    strike.premium
                }
            };

            let leg = Leg {
                order_id: ack.order_id,
                strike: strike.clone(),
                side: OrderSide::Sell,
                quantity,
                entry_price,
                stop_loss_order_id: None,
                tag: tag.clone(),
                kind: Some(pair.kind),
                squared_off: false,
            };
            info!(
                tag = %tag,
                order_id = %leg.order_id,
                symbol = %leg.strike.symbol,
                entry = %leg.entry_price,
                "Short leg placed"
            );

            let book = self.books.entry(tag.clone()).or_default();
            book.legs.push(leg.clone());
            book.advance(TagState::LegsPlaced);
            placed.push(leg);
        }

        Ok(placed)
    }

    /// Applies the partial-fill policy after a failed entry.
    async fn after_rejection(
        &mut self,
        tag: &Tag,
        err: BrokerError,
        mut placed: Vec<Leg>,
    ) -> ManagerError {
        if placed.is_empty() || self.ctx.config.partial_fill_policy == PartialFillPolicy::Surface {
            if !placed.is_empty() {
                warn!(tag = %tag, open_legs = placed.len(), "Leaving filled legs open after rejection");
            }
            return ManagerError::rejected(tag, err, placed);
        }

        let reason = match err {
            BrokerError::OrderRejected(reason) => reason,
            other => other.to_string(),
        };
        let gateway = self.ctx.gateway.clone();
        let mut notes = Vec::new();

        for leg in &mut placed {
            let request = OrderRequest::market(&leg.strike, OrderSide::Buy, leg.quantity, tag);
            match gateway.place_order(&request).await {
                Ok(ack) => {
                    info!(tag = %tag, symbol = %leg.strike.symbol, order_id = %ack.order_id, "Unwound leg");
                    leg.squared_off = true;
                    notes.push(format!("unwound {}", leg.strike.symbol));
                }
                Err(e) => {
                    error!(tag = %tag, symbol = %leg.strike.symbol, error = %e, "Unwind failed");
                    notes.push(format!("unwind of {} failed: {e}", leg.strike.symbol));
                }
            }
        }

        if let Some(book) = self.books.get_mut(tag) {
            for leg in &placed {
                if let Some(recorded) = book.legs.iter_mut().find(|l| l.order_id == leg.order_id) {
                    recorded.squared_off = leg.squared_off;
                }
            }
        }

        ManagerError::OrderRejected {
            tag: tag.clone(),
            reason: format!("{reason} ({})", notes.join("; ")),
            placed,
        }
    }

    /// Rebuilds the legs of an existing tag from the broker's order book.
    ///
    /// Executed SELL market orders become legs; a BUY stop-loss on the same
    /// scrip is attached to its leg, and an executed BUY market order marks
    /// the leg squared off.
    pub async fn recover(&mut self, tag: &Tag) -> Result<Vec<Leg>> {
        let orders = self.ctx.gateway.order_book(Some(tag)).await?;

        let mut legs = Vec::new();
        for entry in orders.iter().filter(|o| is_filled_entry(o)) {
            let strike = strike_from_entry(entry)?;
            let stop_loss_order_id = orders
                .iter()
                .filter(|o| {
                    o.is_stop_loss && o.side == OrderSide::Buy && o.scrip_code == entry.scrip_code
                })
                .find(|o| o.status != OrderStatus::Cancelled && o.status != OrderStatus::Rejected)
                .map(|o| o.order_id.clone());
            let squared_off = orders.iter().any(|o| {
                !o.is_stop_loss
                    && o.side == OrderSide::Buy
                    && o.scrip_code == entry.scrip_code
                    && o.status == OrderStatus::Executed
            });

            legs.push(Leg {
                order_id: entry.order_id.clone(),
                strike,
                side: OrderSide::Sell,
                quantity: entry.quantity,
                entry_price: entry.price,
                stop_loss_order_id,
                tag: tag.clone(),
                kind: None,
                squared_off,
            });
        }

        let state = if legs.is_empty() {
            TagState::New
        } else if legs.iter().all(|l| l.squared_off) {
            TagState::Exited
        } else if legs.iter().all(|l| l.has_stop_loss() || l.squared_off) {
            TagState::StopLossPlaced
        } else {
            TagState::LegsPlaced
        };

        info!(tag = %tag, legs = legs.len(), %state, "Recovered tag from order book");

        let book = self.books.entry(tag.clone()).or_default();
        book.legs.clone_from(&legs);
        book.advance(state);
        Ok(legs)
    }

    /// Read-only snapshot of a tag's orders and positions.
    pub async fn debug_status(&self, tag: &Tag) -> Result<StatusReport> {
        let orders = self.ctx.gateway.order_book(Some(tag)).await?;
        let positions = self.ctx.gateway.positions(Some(tag)).await?;
        let pnl = total_pnl(&positions);

        Ok(StatusReport {
            tag: tag.clone(),
            state: self.state(tag),
            legs: self.legs(tag).to_vec(),
            orders,
            positions,
            pnl,
        })
    }

    /// Realized plus unrealized PnL across every position in the account.
    pub async fn pnl(&self) -> Result<Decimal> {
        let positions = self.ctx.gateway.positions(None).await?;
        let pnl = total_pnl(&positions);
        info!(%pnl, positions = positions.len(), "Account PnL");
        Ok(pnl)
    }
}

pub(crate) fn total_pnl(positions: &[PositionRow]) -> Decimal {
    positions.iter().map(PositionRow::pnl).sum()
}

fn is_filled_entry(order: &OrderBookEntry) -> bool {
    order.side == OrderSide::Sell
        && !order.is_stop_loss
        && matches!(
            order.status,
            OrderStatus::Executed | OrderStatus::PartiallyExecuted
        )
}

fn strike_from_entry(entry: &OrderBookEntry) -> Result<Strike> {
    let symbol = ScripSymbol::parse(&entry.symbol)?;
    Ok(Strike {
        symbol: entry.symbol.clone(),
        scrip_code: entry.scrip_code,
        option_type: symbol.option_type,
        strike_price: symbol.strike,
        premium: entry.price,
        expiry_day: symbol.expiry_day,
        expiry: symbol.expiry,
    })
}
