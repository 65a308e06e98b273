//! End-to-end runs of the managers against the paper broker, on tokio's
//! paused clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone};
use daily_short_core::{ist, ManualClock, PairKind, RunConfig, Tag};
use daily_short_fivepaisa::{
    BrokerGateway, OptionChain, OptionType, OrderSide, OrderStatus, PaperBroker, PaperFault, Strike,
};
use daily_short_options_manager::{
    ExitReason, ManagerError, OrderManager, StrikesManager, TagState, TradingContext,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn strike(code: i64, option_type: OptionType, strike_price: Decimal, premium: Decimal) -> Strike {
    Strike {
        symbol: format!("NIFTY 29 Dec 2022 {option_type} {strike_price:.2}"),
        scrip_code: code,
        option_type,
        strike_price,
        premium,
        expiry_day: 29,
        expiry: NaiveDate::from_ymd_opt(2022, 12, 29).unwrap(),
    }
}

fn nifty_chain() -> OptionChain {
    OptionChain {
        index: "NIFTY".to_string(),
        spot: dec!(18010),
        expiry: NaiveDate::from_ymd_opt(2022, 12, 29).unwrap(),
        quotes: vec![
            strike(10, OptionType::Call, dec!(18000), dec!(95)),
            strike(11, OptionType::Call, dec!(18300), dec!(9.0)),
            strike(12, OptionType::Call, dec!(18400), dec!(7.3)),
            strike(13, OptionType::Call, dec!(18500), dec!(6.8)),
            strike(14, OptionType::Call, dec!(18600), dec!(5.0)),
            strike(20, OptionType::Put, dec!(18000), dec!(80)),
            strike(21, OptionType::Put, dec!(17700), dec!(9.5)),
            strike(22, OptionType::Put, dec!(17600), dec!(7.4)),
            strike(23, OptionType::Put, dec!(17500), dec!(6.9)),
            strike(24, OptionType::Put, dec!(17400), dec!(4.0)),
        ],
    }
}

struct Harness {
    broker: Arc<PaperBroker>,
    clock: Arc<ManualClock>,
    ctx: TradingContext,
}

/// Paper broker and manual clock starting at `day` `h:m` IST in Dec 2022.
fn harness(day: u32, h: u32, m: u32) -> Harness {
    let broker = Arc::new(PaperBroker::new().with_chain(nifty_chain()).with_vix(dec!(14)));
    let clock = Arc::new(ManualClock::at_ist(
        ist().with_ymd_and_hms(2022, 12, day, h, m, 0).unwrap(),
    ));
    let config = RunConfig::default().validate().unwrap();
    let ctx = TradingContext::new(broker.clone(), config).with_clock(clock.clone());
    Harness { broker, clock, ctx }
}

fn buy_backs(broker: &PaperBroker, tag: &Tag) -> Vec<i64> {
    broker
        .orders()
        .iter()
        .filter(|o| o.tag.as_ref() == Some(tag))
        .filter(|o| o.side == OrderSide::Buy && !o.is_stop_loss)
        .map(|o| o.scrip_code)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn strangle_run_exits_once_at_target() {
    let h = harness(27, 10, 0);
    let strikes = StrikesManager::new(h.ctx.clone());
    let mut om = OrderManager::new(h.ctx.clone());
    let tag = Tag::new("p0wss1672131000");

    let pair = strikes.strangle_strikes(dec!(7.0), "NIFTY").await.unwrap();
    assert_eq!(pair.call.scrip_code, 13);
    assert_eq!(pair.put.scrip_code, 23);
    assert_eq!(strikes.expiry_day("NIFTY").await.unwrap(), 29);

    om.place_short(&pair, &tag).await.unwrap();
    let legs = om.place_short_stop_loss(&tag).await.unwrap();
    assert!(legs.iter().all(|l| l.has_stop_loss()));
    assert_eq!(om.state(&tag), TagState::StopLossPlaced);

    let triggers: Vec<Decimal> = h
        .broker
        .orders()
        .iter()
        .filter_map(|o| o.trigger_price)
        .collect();
    assert_eq!(triggers, vec![dec!(10.55), dec!(10.70)]);

    // Premiums decay 40s into the run: (6.8 - 1.5) * 100 + (6.9 - 1.5) * 100 = 1070.
    let broker = h.broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(40)).await;
        broker.set_ltp(13, dec!(1.5));
        broker.set_ltp(23, dec!(1.5));
    });

    let started = tokio::time::Instant::now();
    let summary = om.monitor(dec!(1000), &tag, 29).await.unwrap();

    assert_eq!(summary.reason, ExitReason::TargetReached);
    assert_eq!(summary.pnl, dec!(1070));
    assert_eq!(summary.square_off_orders.len(), 2);
    assert_eq!(summary.cancelled_stop_losses.len(), 2);
    assert!(started.elapsed() >= Duration::from_secs(40));
    assert_eq!(om.state(&tag), TagState::Exited);

    let mut bought = buy_backs(&h.broker, &tag);
    bought.sort_unstable();
    assert_eq!(bought, vec![13, 23]);

    let positions = h.broker.positions(Some(&tag)).await.unwrap();
    assert!(positions.iter().all(|p| p.net_quantity == 0));
    assert!(h
        .broker
        .orders()
        .iter()
        .filter(|o| o.is_stop_loss)
        .all(|o| o.status == OrderStatus::Cancelled));

    // Monitoring an exited tag sends nothing.
    let orders_before = h.broker.orders().len();
    let again = om.monitor(dec!(1000), &tag, 29).await.unwrap();
    assert_eq!(again, summary);
    assert_eq!(h.broker.orders().len(), orders_before);
}

#[tokio::test(start_paused = true)]
async fn straddle_is_closed_at_expiry_cutoff() {
    let h = harness(29, 15, 14);
    let strikes = StrikesManager::new(h.ctx.clone());
    let mut om = OrderManager::new(h.ctx.clone());
    let tag = Tag::new("p0wss1672306440");

    let pair = strikes.straddle_strikes("NIFTY").await.unwrap();
    assert_eq!(pair.kind, PairKind::Straddle);
    assert_eq!(pair.call.strike_price, dec!(18000));
    assert_eq!(pair.put.strike_price, dec!(18000));

    om.place_short(&pair, &tag).await.unwrap();
    om.place_short_stop_loss(&tag).await.unwrap();

    let clock = h.clock.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(50)).await;
        clock.advance(chrono::Duration::seconds(60));
    });

    let summary = om.monitor(dec!(100000), &tag, 29).await.unwrap();
    assert_eq!(summary.reason, ExitReason::ExpiryCutoff);
    assert_eq!(summary.square_off_orders.len(), 2);

    let mut bought = buy_backs(&h.broker, &tag);
    bought.sort_unstable();
    assert_eq!(bought, vec![10, 20]);
}

#[tokio::test(start_paused = true)]
async fn monitor_backs_off_on_transient_failures() {
    let h = harness(27, 11, 0);
    let strikes = StrikesManager::new(h.ctx.clone());
    let mut om = OrderManager::new(h.ctx.clone());
    let tag = Tag::new("p0wss1672119000");

    let pair = strikes.strangle_strikes(dec!(7.0), "NIFTY").await.unwrap();
    om.place_short(&pair, &tag).await.unwrap();
    h.broker.set_ltp(13, dec!(0.5));
    h.broker.set_ltp(23, dec!(0.5));

    h.broker.fail_next_positions(PaperFault::Network);
    h.broker.fail_next_positions(PaperFault::Network);

    let started = tokio::time::Instant::now();
    let summary = om.monitor(dec!(1000), &tag, 29).await.unwrap();

    // 30s then 60s of backoff on a 15s poll interval.
    assert!(started.elapsed() >= Duration::from_secs(90));
    assert_eq!(summary.reason, ExitReason::TargetReached);
    assert_eq!(buy_backs(&h.broker, &tag).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn authentication_failure_stops_monitoring() {
    let h = harness(27, 11, 0);
    let strikes = StrikesManager::new(h.ctx.clone());
    let mut om = OrderManager::new(h.ctx.clone());
    let tag = Tag::new("p0wss1672119001");

    let pair = strikes.strangle_strikes(dec!(7.0), "NIFTY").await.unwrap();
    om.place_short(&pair, &tag).await.unwrap();
    om.place_short_stop_loss(&tag).await.unwrap();

    h.broker.fail_next_positions(PaperFault::Authentication);
    let err = om.monitor(dec!(1000), &tag, 29).await.unwrap_err();

    assert!(matches!(err, ManagerError::Authentication(_)));
    assert_eq!(om.state(&tag), TagState::Monitoring);
    assert!(buy_backs(&h.broker, &tag).is_empty());
    assert!(h
        .broker
        .orders()
        .iter()
        .filter(|o| o.is_stop_loss)
        .all(|o| o.status == OrderStatus::TriggerPending));
}

#[tokio::test(start_paused = true)]
async fn recovered_tag_can_be_monitored_to_exit() {
    let h = harness(28, 10, 0);
    let tag = Tag::new("p0wss1672201800");

    {
        let strikes = StrikesManager::new(h.ctx.clone());
        let mut om = OrderManager::new(h.ctx.clone());
        let pair = strikes.strangle_strikes(dec!(7.0), "NIFTY").await.unwrap();
        om.place_short(&pair, &tag).await.unwrap();
        om.place_short_stop_loss(&tag).await.unwrap();
    }

    let mut om = OrderManager::new(h.ctx.clone());
    let legs = om.recover(&tag).await.unwrap();
    assert_eq!(legs.len(), 2);
    assert!(legs.iter().all(|l| l.has_stop_loss() && !l.squared_off));
    assert_eq!(om.state(&tag), TagState::StopLossPlaced);

    h.broker.set_ltp(13, dec!(1.0));
    h.broker.set_ltp(23, dec!(1.0));
    let summary = om.monitor(dec!(1000), &tag, 29).await.unwrap();

    assert_eq!(summary.reason, ExitReason::TargetReached);
    assert!(om.legs(&tag).iter().all(|l| l.squared_off));
}

#[tokio::test(start_paused = true)]
async fn triggered_stop_loss_leaves_one_leg_to_square_off() {
    let h = harness(27, 12, 0);
    let strikes = StrikesManager::new(h.ctx.clone());
    let mut om = OrderManager::new(h.ctx.clone());
    let tag = Tag::new("p0wss1672122600");

    let pair = strikes.strangle_strikes(dec!(7.0), "NIFTY").await.unwrap();
    om.place_short(&pair, &tag).await.unwrap();
    om.place_short_stop_loss(&tag).await.unwrap();

    // Call stop-loss fires at 10.55: (6.8 - 10.55) * 100 = -375 realized.
    h.broker.set_ltp(13, dec!(10.55));
    // Put collapses: (6.9 - 0.1) * 100 = 680 open.
    h.broker.set_ltp(23, dec!(0.1));

    let summary = om.monitor(dec!(300), &tag, 29).await.unwrap();
    assert_eq!(summary.pnl, dec!(305));
    assert_eq!(summary.square_off_orders.len(), 1);
    assert_eq!(summary.cancelled_stop_losses.len(), 1);
    assert_eq!(buy_backs(&h.broker, &tag), vec![23]);
}

#[tokio::test(start_paused = true)]
async fn transient_square_off_failure_is_retried_until_flat() {
    let h = harness(27, 13, 0);
    let strikes = StrikesManager::new(h.ctx.clone());
    let mut om = OrderManager::new(h.ctx.clone());
    let tag = Tag::new("p0wss1672126200");

    let pair = strikes.strangle_strikes(dec!(7.0), "NIFTY").await.unwrap();
    om.place_short(&pair, &tag).await.unwrap();
    om.place_short_stop_loss(&tag).await.unwrap();

    h.broker.set_ltp(13, dec!(0.5));
    h.broker.set_ltp(23, dec!(0.5));
    // The first buy-back and the retry of it both drop.
    h.broker.fail_next_order(PaperFault::Network);
    h.broker.fail_order_after(1, PaperFault::Network);

    let started = tokio::time::Instant::now();
    let summary = om.monitor(dec!(1000), &tag, 29).await.unwrap();

    assert_eq!(summary.reason, ExitReason::TargetReached);
    assert!(started.elapsed() >= Duration::from_secs(90));
    assert_eq!(om.state(&tag), TagState::Exited);
    assert!(om.legs(&tag).iter().all(|l| l.squared_off));

    let mut bought = buy_backs(&h.broker, &tag);
    bought.sort_unstable();
    assert_eq!(bought, vec![13, 23]);
    assert_eq!(summary.square_off_orders.len(), 2);

    let positions = h.broker.positions(Some(&tag)).await.unwrap();
    assert!(positions.iter().all(|p| p.net_quantity == 0));
    assert_eq!(summary.cancelled_stop_losses.len(), 2);
    assert!(h
        .broker
        .orders()
        .iter()
        .filter(|o| o.is_stop_loss)
        .all(|o| o.status == OrderStatus::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn refused_square_off_keeps_stop_loss_on_open_leg() {
    let h = harness(27, 13, 30);
    let strikes = StrikesManager::new(h.ctx.clone());
    let mut om = OrderManager::new(h.ctx.clone());
    let tag = Tag::new("p0wss1672128000");

    let pair = strikes.strangle_strikes(dec!(7.0), "NIFTY").await.unwrap();
    om.place_short(&pair, &tag).await.unwrap();
    om.place_short_stop_loss(&tag).await.unwrap();

    h.broker.set_ltp(13, dec!(0.5));
    h.broker.set_ltp(23, dec!(0.5));
    h.broker.fail_order_after(1, PaperFault::Rejected("RMS: exchange closed".into()));

    let err = om.monitor(dec!(1000), &tag, 29).await.unwrap_err();
    assert!(err.to_string().contains("RMS: exchange closed"));
    assert_eq!(om.state(&tag), TagState::Monitoring);

    let bought = buy_backs(&h.broker, &tag);
    assert_eq!(bought.len(), 1);
    let open: Vec<i64> = h
        .broker
        .positions(Some(&tag))
        .await
        .unwrap()
        .iter()
        .filter(|p| p.is_open())
        .map(|p| p.scrip_code)
        .collect();
    assert_eq!(open.len(), 1);
    assert_ne!(open[0], bought[0]);

    // The flattened leg's stop is gone; the open leg stays protected.
    for order in h.broker.orders().iter().filter(|o| o.is_stop_loss) {
        let expected = if order.scrip_code == bought[0] {
            OrderStatus::Cancelled
        } else {
            OrderStatus::TriggerPending
        };
        assert_eq!(order.status, expected, "stop-loss on {}", order.scrip_code);
    }
}
