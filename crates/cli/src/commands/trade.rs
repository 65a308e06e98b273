//! The daily run: VIX gate, strike selection, entries, stop-losses and an
//! optional monitoring phase.

use anyhow::Context;
use clap::Args;
use daily_short_core::Tag;
use daily_short_options_manager::{OrderManager, StrikesManager};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct TradeArgs {
    /// Sell the premium-targeted strangle
    #[arg(long)]
    pub strangle: bool,

    /// Sell the ATM straddle
    #[arg(long)]
    pub straddle: bool,

    /// Monitor the new tag until aggregate PnL reaches this amount
    #[arg(long)]
    pub monitor_target: Option<Decimal>,

    /// Simulate orders in memory (market data stays live)
    #[arg(long)]
    pub paper: bool,
}

/// Trading is skipped on days India VIX is strictly above the threshold.
pub fn vix_allows_trading(vix: Decimal, threshold: Decimal) -> bool {
    vix <= threshold
}

pub async fn run(global: &GlobalArgs, args: TradeArgs) -> anyhow::Result<()> {
    let ctx = super::context(global, args.monitor_target, args.paper).await?;
    let config = ctx.config.clone();

    let vix = ctx.gateway.india_vix().await.context("Cannot read India VIX")?;
    info!(%vix, threshold = %config.vix_threshold, "India VIX");
    if !vix_allows_trading(vix, config.vix_threshold) {
        warn!(%vix, "VIX is high today, skipping trading");
        return Ok(());
    }

    let tag = Tag::generate(&config.tag_prefix, ctx.clock.as_ref());
    super::log_config(&config);
    info!(tag = %tag, "Run tag");

    let strikes = StrikesManager::new(ctx.clone());
    let strangle = strikes
        .strangle_strikes(config.closest_premium, &config.index)
        .await
        .context("Strangle selection failed")?;
    let straddle = strikes
        .straddle_strikes(&config.index)
        .await
        .context("Straddle selection failed")?;
    let expiry_day = straddle.expiry_day();
    info!(expiry_day, "Expiry day");
    info!(
        call = %strangle.call.display_name(),
        put = %strangle.put.display_name(),
        premium = %strangle.total_premium(),
        "Strangle strikes"
    );
    info!(
        call = %straddle.call.display_name(),
        put = %straddle.put.display_name(),
        premium = %straddle.total_premium(),
        "Straddle strikes"
    );

    let mut om = OrderManager::new(ctx.clone());
    let mut placed = false;
    for (wanted, pair) in [(args.strangle, &strangle), (args.straddle, &straddle)] {
        if !wanted {
            continue;
        }
        om.place_short(pair, &tag)
            .await
            .with_context(|| format!("{} entry failed for tag {tag}", pair.kind))?;
        om.place_short_stop_loss(&tag)
            .await
            .with_context(|| format!("{} stop-loss failed for tag {tag}", pair.kind))?;
        placed = true;
    }

    if !placed {
        warn!("Neither --strangle nor --straddle given, no orders placed");
        return Ok(());
    }

    if let Some(target) = config.monitor_target {
        let summary = om.monitor(target, &tag, expiry_day).await?;
        info!(
            tag = %summary.tag,
            reason = %summary.reason,
            pnl = %summary.pnl,
            "Run finished"
        );
    } else {
        info!(tag = %tag, "No monitor target, positions left open");
    }

    Ok(())
}
