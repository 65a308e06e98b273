use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daily_short_core::{ConfigLoader, ConfigOverrides, RunConfig};
use rust_decimal::Decimal;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod session;

use commands::{MonitorArgs, StatusArgs, TradeArgs};

#[derive(Parser, Debug)]
#[command(name = "daily-short")]
#[command(about = "Daily short straddle/strangle runner for NSE index options on 5paisa", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every subcommand.
#[derive(clap::Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Credentials: a JSON file path, or inline JSON starting with `{`
    #[arg(long, global = true, default_value = "creds.json", env = "DAILY_SHORT_CREDS")]
    pub creds: String,

    /// TOML run configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Index to trade (NIFTY, BANKNIFTY, FINNIFTY)
    #[arg(long, global = true)]
    pub index: Option<String>,

    /// Target premium for strangle strikes
    #[arg(long, global = true)]
    pub closest_premium: Option<Decimal>,

    /// Stop-loss trigger as a multiple of the entry premium
    #[arg(long, global = true)]
    pub stop_loss_factor: Option<Decimal>,

    /// Contracts per leg (a whole number of lots)
    #[arg(long, global = true)]
    pub quantity: Option<u32>,

    /// Default log level; RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log file, appended to on every run
    #[arg(long, global = true, default_value = "daily_logs.txt")]
    pub log_file: PathBuf,
}

impl GlobalArgs {
    /// Loads the run configuration with these flags layered on top.
    pub fn load_config(&self, monitor_target: Option<Decimal>) -> anyhow::Result<RunConfig> {
        let overrides = ConfigOverrides {
            index: self.index.clone(),
            closest_premium: self.closest_premium,
            stop_loss_factor: self.stop_loss_factor,
            quantity: self.quantity,
            monitor_target,
        };
        ConfigLoader::load_with_overrides(self.config.as_deref(), &overrides)
            .context("Invalid run configuration")
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Select strikes, sell them under a fresh tag with stop-losses, and
    /// optionally monitor to a profit target
    Trade(TradeArgs),
    /// Show the strangle and straddle strikes without placing orders
    Strikes,
    /// Monitor an existing tag until its target or the expiry cutoff
    Monitor(MonitorArgs),
    /// Print orders, positions and PnL for a tag
    Status(StatusArgs),
    /// Print the account-wide mark-to-market
    Pnl,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.global)?;

    tracing::info!(command = ?cli.command, "daily-short starting");

    match cli.command {
        Commands::Trade(args) => commands::trade::run(&cli.global, args).await?,
        Commands::Strikes => commands::strikes::run(&cli.global).await?,
        Commands::Monitor(args) => commands::monitor::run(&cli.global, args).await?,
        Commands::Status(args) => commands::status::run(&cli.global, args).await?,
        Commands::Pnl => commands::pnl::run(&cli.global).await?,
    }

    Ok(())
}

/// Logs to stdout and appends the same events, without colour, to the log
/// file.
fn init_logging(global: &GlobalArgs) -> anyhow::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&global.log_file)
        .with_context(|| format!("Cannot open log file {}", global.log_file.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&global.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file)),
        )
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn trade_flags_parse() {
        let cli = Cli::try_parse_from([
            "daily-short",
            "trade",
            "--strangle",
            "--monitor-target",
            "1500",
            "--paper",
            "--quantity",
            "150",
        ])
        .unwrap();

        assert_eq!(cli.global.quantity, Some(150));
        assert_eq!(cli.global.creds, "creds.json");
        match cli.command {
            Commands::Trade(args) => {
                assert!(args.strangle);
                assert!(!args.straddle);
                assert!(args.paper);
                assert_eq!(args.monitor_target, Some(dec!(1500)));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn monitor_requires_tag_and_target() {
        assert!(Cli::try_parse_from(["daily-short", "monitor", "--tag", "p0wss1"]).is_err());
        let cli = Cli::try_parse_from([
            "daily-short",
            "monitor",
            "--tag",
            "p0wss1",
            "--target",
            "900.5",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Monitor(ref a) if a.target == dec!(900.5)));
    }

    #[test]
    fn global_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "daily-short",
            "strikes",
            "--index",
            "BANKNIFTY",
            "--quantity",
            "50",
            "--stop-loss-factor",
            "1.4",
        ])
        .unwrap();

        let config = cli.global.load_config(None).unwrap();
        assert_eq!(config.index, "BANKNIFTY");
        assert_eq!(config.quantity, 50);
        assert_eq!(config.stop_loss_factor, dec!(1.4));
        assert_eq!(config.lots().unwrap(), 2);
    }

    #[test]
    fn quantity_off_lot_is_rejected() {
        let cli = Cli::try_parse_from(["daily-short", "pnl", "--quantity", "70"]).unwrap();
        assert!(cli.global.load_config(None).is_err());
    }

    #[test]
    fn config_file_is_layered_under_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "closest_premium = 9.5\nquantity = 200\n").unwrap();

        let cli = Cli::try_parse_from([
            "daily-short",
            "strikes",
            "--config",
            path.to_str().unwrap(),
            "--quantity",
            "100",
        ])
        .unwrap();
        let config = cli.global.load_config(None).unwrap();
        assert_eq!(config.closest_premium, dec!(9.5));
        assert_eq!(config.quantity, 100);
    }
}
