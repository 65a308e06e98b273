//! Position monitoring loop and the exit sequence.

use std::collections::HashSet;
use std::time::Duration;

use daily_short_core::Tag;
use daily_short_fivepaisa::{BrokerError, OrderKind, OrderRequest, OrderSide, PositionRow};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::error::{ManagerError, Result};
use crate::executor::{total_pnl, OrderManager};
use crate::retry::Backoff;
use crate::targets::check_exit;
use crate::types::{ExitReason, ExitSummary, MonitorState, TagState};

impl OrderManager {
    /// Polls the tag's positions until the profit target is reached or the
    /// expiry-day cutoff passes, then squares everything off.
    ///
    /// Transient broker failures back off and retry indefinitely; any other
    /// failure ends the loop with positions left as they are. A tag that has
    /// already exited returns at once without sending orders.
    pub async fn monitor(
        &mut self,
        target: Decimal,
        tag: &Tag,
        expiry_day: u32,
    ) -> Result<ExitSummary> {
        if self.state(tag) == TagState::Exited {
            info!(tag = %tag, "Tag already exited, nothing to monitor");
            return Ok(self.books.get(tag).and_then(|b| b.exit.clone()).unwrap_or(ExitSummary {
                tag: tag.clone(),
                reason: ExitReason::AlreadyExited,
                pnl: Decimal::ZERO,
                square_off_orders: Vec::new(),
                cancelled_stop_losses: Vec::new(),
            }));
        }

        let poll = Duration::from_secs(self.ctx.config.poll_interval_secs);
        let cutoff = self.ctx.config.expiry_cutoff_time;
        let mut backoff = self.exit_backoff();
        let gateway = self.ctx.gateway.clone();
        let clock = self.ctx.clock.clone();

        self.books.entry(tag.clone()).or_default().advance(TagState::Monitoring);
        if self.legs(tag).is_empty() {
            warn!(tag = %tag, "Monitoring a tag with no known legs");
        }

        let mut state = MonitorState {
            tag: tag.clone(),
            target,
            expiry_day,
            current_pnl: Decimal::ZERO,
        };
        info!(
            tag = %tag,
            %target,
            expiry_day,
            poll_secs = poll.as_secs(),
            %cutoff,
            "Monitoring started"
        );

        loop {
            let positions = match gateway.positions(Some(tag)).await {
                Ok(rows) => {
                    backoff.reset();
                    rows
                }
                Err(e) if e.is_transient() => {
                    back_off(tag, &e, &mut backoff, "Position poll failed").await;
                    continue;
                }
                Err(e) => {
                    error!(tag = %tag, error = %e, "Position poll failed, stopping monitor");
                    return Err(e.into());
                }
            };

            state.current_pnl = total_pnl(&positions);
            info!(
                tag = %state.tag,
                pnl = %state.current_pnl,
                target = %state.target,
                open = positions.iter().filter(|p| p.is_open()).count(),
                "Poll"
            );

            if let Some(reason) = check_exit(
                state.current_pnl,
                state.target,
                clock.now_ist(),
                state.expiry_day,
                cutoff,
            ) {
                return self.exit(tag, reason, state.current_pnl).await;
            }

            tokio::time::sleep(poll).await;
        }
    }

    /// Flattens every open position under the tag, then cancels the
    /// stop-losses still resting.
    ///
    /// Transient failures are retried until the tag is flat. Positions are
    /// re-read before each retry and a scrip is bought back at most once. A
    /// non-transient failure returns with the stop-losses of unflattened
    /// legs left in place.
    async fn exit(&mut self, tag: &Tag, reason: ExitReason, pnl: Decimal) -> Result<ExitSummary> {
        let gateway = self.ctx.gateway.clone();
        let mut backoff = self.exit_backoff();
        info!(tag = %tag, %reason, %pnl, "Exit sequence started");

        let mut square_offs = Vec::new();
        let mut flattened: HashSet<i64> = HashSet::new();
        'flatten: loop {
            let positions = match gateway.positions(Some(tag)).await {
                Ok(rows) => rows,
                Err(e) if e.is_transient() => {
                    back_off(tag, &e, &mut backoff, "Position read failed during exit").await;
                    continue;
                }
                Err(e) => {
                    error!(tag = %tag, error = %e, "Position read failed during exit");
                    return Err(e.into());
                }
            };

            let pending: Vec<&PositionRow> = positions
                .iter()
                .filter(|p| p.is_open() && !flattened.contains(&p.scrip_code))
                .collect();
            if pending.is_empty() {
                break;
            }

            for row in pending {
                let request = square_off_request(row, tag)?;
                match gateway.place_order(&request).await {
                    Ok(ack) => {
                        info!(
                            tag = %tag,
                            symbol = %row.symbol,
                            quantity = request.quantity,
                            side = ?request.side,
                            order_id = %ack.order_id,
                            "Squared off"
                        );
                        square_offs.push(ack.order_id);
                        flattened.insert(row.scrip_code);
                        self.mark_squared_off(tag, row.scrip_code);
                    }
                    Err(e) if e.is_transient() => {
                        back_off(tag, &e, &mut backoff, "Square-off failed").await;
                        continue 'flatten;
                    }
                    Err(e) => {
                        error!(tag = %tag, symbol = %row.symbol, error = %e, "Square-off failed");
                        self.cancel_stop_losses(tag, Some(&flattened), None).await;
                        return Err(e.into());
                    }
                }
            }
        }

        let cancelled = self.cancel_stop_losses(tag, None, Some(&mut backoff)).await;

        let summary = ExitSummary {
            tag: tag.clone(),
            reason,
            pnl,
            square_off_orders: square_offs,
            cancelled_stop_losses: cancelled,
        };
        let book = self.books.entry(tag.clone()).or_default();
        book.advance(TagState::Exited);
        book.exit = Some(summary.clone());

        info!(
            tag = %tag,
            reason = %summary.reason,
            square_offs = summary.square_off_orders.len(),
            cancelled = summary.cancelled_stop_losses.len(),
            "Tag exited"
        );
        Ok(summary)
    }

    /// Cancels open stop-losses under the tag, restricted to `scrips` when
    /// given. With a backoff, transient failures are retried; without one
    /// they are logged and skipped. Returns the cancelled order ids.
    async fn cancel_stop_losses(
        &self,
        tag: &Tag,
        scrips: Option<&HashSet<i64>>,
        mut backoff: Option<&mut Backoff>,
    ) -> Vec<String> {
        let gateway = self.ctx.gateway.clone();
        let mut cancelled = Vec::new();

        let orders = loop {
            match gateway.order_book(Some(tag)).await {
                Ok(orders) => break orders,
                Err(e) if e.is_transient() => match backoff.as_deref_mut() {
                    Some(b) => back_off(tag, &e, b, "Order book read failed during exit").await,
                    None => {
                        warn!(tag = %tag, error = %e, "Order book unavailable, stop-losses left resting");
                        return cancelled;
                    }
                },
                Err(e) => {
                    error!(tag = %tag, error = %e, "Order book unavailable, stop-losses left resting");
                    return cancelled;
                }
            }
        };

        let resting = orders.iter().filter(|o| {
            o.is_stop_loss
                && o.status.is_open()
                && scrips.map_or(true, |s| s.contains(&o.scrip_code))
        });
        for order in resting {
            loop {
                match gateway.cancel_order(&order.order_id).await {
                    Ok(()) => {
                        info!(tag = %tag, order_id = %order.order_id, "Stop-loss cancelled");
                        cancelled.push(order.order_id.clone());
                        break;
                    }
                    Err(e) if e.is_transient() => match backoff.as_deref_mut() {
                        Some(b) => back_off(tag, &e, b, "Stop-loss cancel failed").await,
                        None => {
                            warn!(tag = %tag, order_id = %order.order_id, error = %e, "Stop-loss cancel failed");
                            break;
                        }
                    },
                    Err(e) => {
                        warn!(tag = %tag, order_id = %order.order_id, error = %e, "Stop-loss cancel failed");
                        break;
                    }
                }
            }
        }
        cancelled
    }

    fn mark_squared_off(&mut self, tag: &Tag, scrip_code: i64) {
        if let Some(book) = self.books.get_mut(tag) {
            for leg in book.legs.iter_mut().filter(|l| l.strike.scrip_code == scrip_code) {
                leg.squared_off = true;
            }
        }
    }

    fn exit_backoff(&self) -> Backoff {
        Backoff::unbounded(
            Duration::from_secs(self.ctx.config.poll_interval_secs),
            Duration::from_secs(self.ctx.config.max_poll_backoff_secs),
        )
    }
}

async fn back_off(tag: &Tag, err: &BrokerError, backoff: &mut Backoff, what: &'static str) {
    let delay = backoff.delay_after(err).unwrap_or_default();
    warn!(
        tag = %tag,
        error = %err,
        failures = backoff.failures(),
        delay_secs = delay.as_secs(),
        "{what}, backing off"
    );
    tokio::time::sleep(delay).await;
}

/// Market order that flattens `row`'s net quantity.
fn square_off_request(row: &PositionRow, tag: &Tag) -> Result<OrderRequest> {
    let side = if row.net_quantity < 0 {
        OrderSide::Buy
    } else {
        OrderSide::Sell
    };
    let quantity = u32::try_from(row.net_quantity.unsigned_abs()).map_err(|_| {
        ManagerError::InvalidState(format!(
            "net quantity {} on {} is out of range",
            row.net_quantity, row.symbol
        ))
    })?;

    Ok(OrderRequest {
        scrip_code: row.scrip_code,
        symbol: row.symbol.clone(),
        side,
        quantity,
        kind: OrderKind::Market,
        tag: tag.clone(),
    })
}
