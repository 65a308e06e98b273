use anyhow::Context;
use daily_short_options_manager::StrikesManager;

use crate::GlobalArgs;

pub async fn run(global: &GlobalArgs) -> anyhow::Result<()> {
    let ctx = super::context(global, None, false).await?;
    let config = ctx.config.clone();
    super::log_config(&config);

    let strikes = StrikesManager::new(ctx);
    let strangle = strikes
        .strangle_strikes(config.closest_premium, &config.index)
        .await
        .context("Strangle selection failed")?;
    let straddle = strikes
        .straddle_strikes(&config.index)
        .await
        .context("Straddle selection failed")?;

    println!("expiry day {}", straddle.expiry_day());
    for pair in [&strangle, &straddle] {
        println!("{}:", pair.kind);
        for leg in pair.legs() {
            println!(
                "  {:<36} scrip {:>8}  premium {}",
                leg.display_name(),
                leg.scrip_code,
                leg.premium
            );
        }
        println!("  total premium {}", pair.total_premium());
    }
    Ok(())
}
