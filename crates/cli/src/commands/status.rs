use anyhow::Context;
use clap::Args;
use daily_short_core::Tag;
use daily_short_options_manager::OrderManager;

use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Tag of an earlier run
    #[arg(long)]
    pub tag: String,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub async fn run(global: &GlobalArgs, args: StatusArgs) -> anyhow::Result<()> {
    let ctx = super::context(global, None, false).await?;
    let tag = Tag::new(args.tag);

    let mut om = OrderManager::new(ctx);
    om.recover(&tag)
        .await
        .with_context(|| format!("Cannot recover tag {tag}"))?;
    let report = om.debug_status(&tag).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}
