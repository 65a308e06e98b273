use anyhow::Context;
use clap::Args;
use daily_short_core::Tag;
use daily_short_options_manager::{OrderManager, StrikesManager};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Tag of an earlier run
    #[arg(long)]
    pub tag: String,

    /// Aggregate PnL at which to square off
    #[arg(long)]
    pub target: Decimal,
}

pub async fn run(global: &GlobalArgs, args: MonitorArgs) -> anyhow::Result<()> {
    let ctx = super::context(global, Some(args.target), false).await?;
    let tag = Tag::new(args.tag);

    let expiry_day = StrikesManager::new(ctx.clone())
        .expiry_day(&ctx.config.index)
        .await
        .context("Cannot determine the expiry day")?;

    let mut om = OrderManager::new(ctx);
    let legs = om
        .recover(&tag)
        .await
        .with_context(|| format!("Cannot recover tag {tag}"))?;
    if legs.is_empty() {
        warn!(tag = %tag, "No filled entries under this tag");
    }
    info!(tag = %tag, legs = legs.len(), expiry_day, "Resuming tag");

    let summary = om.monitor(args.target, &tag, expiry_day).await?;
    info!(
        tag = %summary.tag,
        reason = %summary.reason,
        pnl = %summary.pnl,
        square_offs = summary.square_off_orders.len(),
        "Monitoring finished"
    );
    Ok(())
}
