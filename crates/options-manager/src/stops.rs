//! Protective stop-loss orders on short legs.

use daily_short_core::Tag;
use daily_short_fivepaisa::{BrokerError, OrderRequest, OrderSide};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{info, warn};

use crate::error::{ManagerError, Result};
use crate::executor::OrderManager;
use crate::types::{Leg, TagState};

/// NSE options tick size.
pub const TICK_SIZE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

/// Rounds a price to the nearest tick.
#[must_use]
pub fn round_to_tick(price: Decimal) -> Decimal {
    let ticks = (price / TICK_SIZE).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    ticks * TICK_SIZE
}

/// Trigger for a BUY stop on a short leg: `entry × factor`, on the tick grid.
#[must_use]
pub fn stop_loss_trigger(entry_price: Decimal, factor: Decimal) -> Decimal {
    round_to_tick(entry_price * factor)
}

impl OrderManager {
    /// Places a BUY stop-loss for every open leg under `tag` that does not
    /// have one yet. Safe to call repeatedly.
    ///
    /// Returns all legs under the tag. A refusal stops the pass; the error
    /// carries the legs that are covered so far.
    pub async fn place_short_stop_loss(&mut self, tag: &Tag) -> Result<Vec<Leg>> {
        let config = self.ctx.config.clone();
        let gateway = self.ctx.gateway.clone();

        let book = self.books.get_mut(tag).filter(|b| !b.legs.is_empty()).ok_or_else(|| {
            ManagerError::InvalidState(format!("no legs recorded under tag {tag}"))
        })?;
        if book.state >= TagState::Exited {
            return Err(ManagerError::InvalidState(format!(
                "tag {tag} has already exited"
            )));
        }

        for idx in 0..book.legs.len() {
            let leg = &book.legs[idx];
            if leg.has_stop_loss() || leg.squared_off {
                continue;
            }

            let factor = leg
                .kind
                .map_or(config.stop_loss_factor, |kind| config.stop_loss_factor_for(kind));
            let trigger = stop_loss_trigger(leg.entry_price, factor);
            let request =
                OrderRequest::stop_loss(&leg.strike, OrderSide::Buy, leg.quantity, trigger, tag);

            match gateway.place_order(&request).await {
                Ok(ack) => {
                    info!(
                        tag = %tag,
                        symbol = %leg.strike.symbol,
                        entry = %leg.entry_price,
                        %factor,
                        %trigger,
                        order_id = %ack.order_id,
                        "Stop-loss placed"
                    );
                    book.legs[idx].stop_loss_order_id = Some(ack.order_id);
                }
                Err(e @ BrokerError::OrderRejected(_)) => {
                    warn!(tag = %tag, symbol = %leg.strike.symbol, error = %e, "Stop-loss rejected");
                    let covered = book.legs.iter().filter(|l| l.has_stop_loss()).cloned().collect();
                    return Err(ManagerError::rejected(tag, e, covered));
                }
                Err(e) => return Err(e.into()),
            }
        }

        if book.legs.iter().all(|l| l.has_stop_loss() || l.squared_off) {
            book.advance(TagState::StopLossPlaced);
        }
        Ok(book.legs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TradingContext;
    use crate::types::tests::strike;
    use crate::types::StrikePair;
    use chrono::NaiveDate;
    use daily_short_core::{PairKind, RunConfig};
    use daily_short_fivepaisa::{OptionChain, OptionType, PaperBroker, PaperFault};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn chain() -> OptionChain {
        OptionChain {
            index: "NIFTY".to_string(),
            spot: dec!(18000),
            expiry: NaiveDate::from_ymd_opt(2022, 12, 29).unwrap(),
            quotes: vec![
                strike(1, OptionType::Call, dec!(18500), dec!(7.3)),
                strike(2, OptionType::Put, dec!(17500), dec!(6.9)),
                strike(3, OptionType::Call, dec!(18000), dec!(95)),
                strike(4, OptionType::Put, dec!(18000), dec!(80)),
            ],
        }
    }

    fn pair(kind: PairKind) -> StrikePair {
        let q = chain().quotes;
        match kind {
            PairKind::Strangle => StrikePair::new(kind, q[0].clone(), q[1].clone()).unwrap(),
            PairKind::Straddle => StrikePair::new(kind, q[2].clone(), q[3].clone()).unwrap(),
        }
    }

    fn manager(broker: &Arc<PaperBroker>, config: RunConfig) -> OrderManager {
        OrderManager::new(TradingContext::new(broker.clone(), config))
    }

    fn triggers(broker: &PaperBroker) -> Vec<(i64, Decimal)> {
        broker
            .orders()
            .iter()
            .filter(|o| o.is_stop_loss)
            .filter_map(|o| o.trigger_price.map(|t| (o.scrip_code, t)))
            .collect()
    }

    #[tokio::test]
    async fn repeated_placement_adds_no_stop_losses() {
        let broker = Arc::new(PaperBroker::new().with_chain(chain()));
        let mut om = manager(&broker, RunConfig::default());
        let tag = Tag::new("p0wss200");

        om.place_short(&pair(PairKind::Strangle), &tag).await.unwrap();
        let first = om.place_short_stop_loss(&tag).await.unwrap();
        let second = om.place_short_stop_loss(&tag).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(triggers(&broker), vec![(1, dec!(11.30)), (2, dec!(10.70))]);
        assert_eq!(om.state(&tag), TagState::StopLossPlaced);
    }

    #[tokio::test]
    async fn factor_follows_leg_kind() {
        let broker = Arc::new(PaperBroker::new().with_chain(chain()));
        let config = RunConfig {
            straddle_stop_loss_factor: Some(dec!(1.3)),
            strangle_stop_loss_factor: Some(dec!(2.0)),
            ..RunConfig::default()
        };
        let mut om = manager(&broker, config);
        let tag = Tag::new("p0wss201");

        om.place_short(&pair(PairKind::Strangle), &tag).await.unwrap();
        om.place_short(&pair(PairKind::Straddle), &tag).await.unwrap();
        om.place_short_stop_loss(&tag).await.unwrap();

        assert_eq!(
            triggers(&broker),
            vec![
                (1, dec!(14.60)),
                (2, dec!(13.80)),
                (3, dec!(123.50)),
                (4, dec!(104.00)),
            ]
        );
    }

    #[tokio::test]
    async fn recovered_legs_use_the_uniform_factor() {
        let broker = Arc::new(PaperBroker::new().with_chain(chain()));
        let tag = Tag::new("p0wss202");
        manager(&broker, RunConfig::default())
            .place_short(&pair(PairKind::Strangle), &tag)
            .await
            .unwrap();

        let config = RunConfig {
            strangle_stop_loss_factor: Some(dec!(2.0)),
            ..RunConfig::default()
        };
        let mut om = manager(&broker, config);
        let legs = om.recover(&tag).await.unwrap();
        assert!(legs.iter().all(|l| l.kind.is_none()));

        om.place_short_stop_loss(&tag).await.unwrap();
        assert_eq!(triggers(&broker), vec![(1, dec!(11.30)), (2, dec!(10.70))]);
    }

    #[tokio::test]
    async fn rejection_mid_pass_reports_covered_legs_only() {
        let broker = Arc::new(PaperBroker::new().with_chain(chain()));
        let mut om = manager(&broker, RunConfig::default());
        let tag = Tag::new("p0wss203");
        om.place_short(&pair(PairKind::Strangle), &tag).await.unwrap();

        broker.fail_order_after(1, PaperFault::Rejected("RMS: trigger out of range".into()));
        let err = om.place_short_stop_loss(&tag).await.unwrap_err();
        match err {
            ManagerError::OrderRejected { placed, reason, .. } => {
                assert_eq!(reason, "RMS: trigger out of range");
                assert_eq!(placed.len(), 1);
                assert_eq!(placed[0].strike.scrip_code, 1);
                assert!(placed[0].has_stop_loss());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(om.state(&tag), TagState::LegsPlaced);

        // A second pass covers only the put.
        om.place_short_stop_loss(&tag).await.unwrap();
        assert_eq!(triggers(&broker), vec![(1, dec!(11.30)), (2, dec!(10.70))]);
        assert_eq!(om.state(&tag), TagState::StopLossPlaced);
    }

    #[test]
    fn trigger_is_entry_times_factor() {
        assert_eq!(stop_loss_trigger(dec!(10.0), dec!(1.55)), dec!(15.5));
    }

    #[test]
    fn trigger_is_rounded_to_tick() {
        // 7.3 × 1.55 = 11.315
        assert_eq!(stop_loss_trigger(dec!(7.3), dec!(1.55)), dec!(11.30));
        // 6.9 × 1.55 = 10.695
        assert_eq!(stop_loss_trigger(dec!(6.9), dec!(1.55)), dec!(10.70));
    }

    #[test]
    fn tick_rounding() {
        assert_eq!(TICK_SIZE, dec!(0.05));
        assert_eq!(round_to_tick(dec!(12.024)), dec!(12.00));
        assert_eq!(round_to_tick(dec!(12.025)), dec!(12.05));
        assert_eq!(round_to_tick(dec!(12.07)), dec!(12.05));
    }

    #[test]
    fn trigger_is_above_entry_for_valid_factors() {
        for entry in [dec!(1.0), dec!(7.3), dec!(95.45)] {
            assert!(stop_loss_trigger(entry, dec!(1.2)) > entry);
        }
    }
}
