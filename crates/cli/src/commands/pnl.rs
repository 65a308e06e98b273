use daily_short_options_manager::OrderManager;

use crate::GlobalArgs;

pub async fn run(global: &GlobalArgs) -> anyhow::Result<()> {
    let ctx = super::context(global, None, false).await?;
    let mtm = OrderManager::new(ctx).pnl().await?;
    tracing::info!(%mtm, "MTM");
    println!("MTM = {mtm:.2}");
    Ok(())
}
