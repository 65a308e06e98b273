//! Strike selection and order lifecycle for the daily short-options run.
//!
//! - [`StrikesManager`] picks an ATM straddle or a premium-targeted
//!   strangle from the nearest-expiry chain
//! - [`OrderManager`] sells the legs under one tag, attaches stop-losses,
//!   monitors aggregate PnL and squares off on target or at the expiry-day
//!   cutoff
//!
//! Both work against any [`daily_short_fivepaisa::BrokerGateway`]; every
//! exit rule is deterministic.

pub mod context;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod retry;
pub mod stops;
pub mod strikes;
pub mod targets;
pub mod types;

pub use context::TradingContext;
pub use error::{ManagerError, Result};
pub use executor::OrderManager;
pub use retry::Backoff;
pub use stops::{round_to_tick, stop_loss_trigger, TICK_SIZE};
pub use strikes::{select_straddle, select_strangle, StrikesManager};
pub use targets::check_exit;
pub use types::{ExitReason, ExitSummary, Leg, MonitorState, StatusReport, StrikePair, TagState};
