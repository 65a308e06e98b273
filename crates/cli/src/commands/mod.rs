//! Subcommands of the `daily-short` binary.

pub mod monitor;
pub mod pnl;
pub mod status;
pub mod strikes;
pub mod trade;

pub use monitor::MonitorArgs;
pub use status::StatusArgs;
pub use trade::TradeArgs;

use std::sync::Arc;

use daily_short_core::RunConfig;
use daily_short_fivepaisa::BrokerGateway;
use daily_short_options_manager::TradingContext;
use rust_decimal::Decimal;

use crate::session;
use crate::GlobalArgs;

/// Loads the config, logs in and builds the shared context.
async fn context(
    global: &GlobalArgs,
    monitor_target: Option<Decimal>,
    paper: bool,
) -> anyhow::Result<TradingContext> {
    let config = global.load_config(monitor_target)?;
    let gateway: Arc<dyn BrokerGateway> =
        session::connect(&global.creds, paper, &config.index).await?;
    Ok(TradingContext::new(gateway, config))
}

fn log_config(config: &RunConfig) {
    tracing::info!(
        index = %config.index,
        closest_premium = %config.closest_premium,
        stop_loss_factor = %config.stop_loss_factor,
        quantity = config.quantity,
        monitor_target = ?config.monitor_target,
        expiry_cutoff = %config.expiry_cutoff_time,
        partial_fill_policy = ?config.partial_fill_policy,
        "Run configuration"
    );
}
