//! Types for strike pairs, legs and per-tag run state.

use daily_short_core::{PairKind, Tag};
use daily_short_fivepaisa::{OptionType, OrderBookEntry, OrderSide, PositionRow, Strike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ManagerError, Result};

/// A call and a put selected together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikePair {
    pub kind: PairKind,
    pub call: Strike,
    pub put: Strike,
}

impl StrikePair {
    /// Pairs a call with a put of the same expiry.
    ///
    /// # Errors
    /// Returns [`ManagerError::MarketData`] if the legs are the wrong option
    /// types or expire on different days.
    pub fn new(kind: PairKind, call: Strike, put: Strike) -> Result<Self> {
        if call.option_type != OptionType::Call || put.option_type != OptionType::Put {
            return Err(ManagerError::MarketData(format!(
                "{kind} needs a CE and a PE, got {} and {}",
                call.option_type, put.option_type
            )));
        }
        if call.expiry_day != put.expiry_day {
            return Err(ManagerError::MarketData(format!(
                "{kind} legs expire on different days: {} vs {}",
                call.expiry_day, put.expiry_day
            )));
        }
        Ok(Self { kind, call, put })
    }

    #[must_use]
    pub fn expiry_day(&self) -> u32 {
        self.call.expiry_day
    }

    /// Premium collected per contract if both legs fill at their quotes.
    #[must_use]
    pub fn total_premium(&self) -> Decimal {
        self.call.premium + self.put.premium
    }

    /// Call first, then put.
    #[must_use]
    pub fn legs(&self) -> [&Strike; 2] {
        [&self.call, &self.put]
    }
}

/// One short option position opened under a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub order_id: String,
    pub strike: Strike,
    pub side: OrderSide,
    /// Contracts.
    pub quantity: u32,
    pub entry_price: Decimal,
    pub stop_loss_order_id: Option<String>,
    pub tag: Tag,
    /// Unknown for legs rebuilt from the order book.
    pub kind: Option<PairKind>,
    pub squared_off: bool,
}

impl Leg {
    #[must_use]
    pub fn has_stop_loss(&self) -> bool {
        self.stop_loss_order_id.is_some()
    }
}

/// Lifecycle of one tag. Ordered; transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagState {
    #[default]
    New,
    LegsPlaced,
    StopLossPlaced,
    Monitoring,
    Exited,
}

impl std::fmt::Display for TagState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::LegsPlaced => write!(f, "legs_placed"),
            Self::StopLossPlaced => write!(f, "stop_loss_placed"),
            Self::Monitoring => write!(f, "monitoring"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Per-poll view of a monitored tag.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorState {
    pub tag: Tag,
    pub target: Decimal,
    pub expiry_day: u32,
    pub current_pnl: Decimal,
}

/// Why a monitored tag was closed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExitReason {
    TargetReached,
    ExpiryCutoff,
    /// The tag had exited before monitoring was requested; nothing was sent.
    AlreadyExited,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TargetReached => write!(f, "target_reached"),
            Self::ExpiryCutoff => write!(f, "expiry_cutoff"),
            Self::AlreadyExited => write!(f, "already_exited"),
        }
    }
}

/// Outcome of the exit sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitSummary {
    pub tag: Tag,
    pub reason: ExitReason,
    /// Aggregate PnL observed on the poll that triggered the exit.
    pub pnl: Decimal,
    /// Order ids of the square-off orders.
    pub square_off_orders: Vec<String>,
    /// Stop-loss orders cancelled.
    pub cancelled_stop_losses: Vec<String>,
}

/// Read-only snapshot of a tag, from the broker's books.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub tag: Tag,
    pub state: TagState,
    pub legs: Vec<Leg>,
    pub orders: Vec<OrderBookEntry>,
    pub positions: Vec<PositionRow>,
    pub pnl: Decimal,
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "tag {} ({})", self.tag, self.state)?;
        writeln!(f, "orders:")?;
        for o in &self.orders {
            writeln!(
                f,
                "  {} {:?} {} x{} {}{}",
                o.order_id,
                o.side,
                o.symbol,
                o.quantity,
                o.status,
                o.trigger_price
                    .map(|t| format!(" trigger {t}"))
                    .unwrap_or_default()
            )?;
        }
        writeln!(f, "positions:")?;
        for p in &self.positions {
            writeln!(
                f,
                "  {} net {} ltp {} pnl {}",
                p.symbol,
                p.net_quantity,
                p.ltp,
                p.pnl()
            )?;
        }
        write!(f, "pnl {}", self.pnl)
    }
}
