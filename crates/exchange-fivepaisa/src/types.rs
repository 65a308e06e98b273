//! Core types for NSE index options trading through 5paisa.

use chrono::NaiveDate;
use daily_short_core::Tag;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option type as printed in NSE/5paisa scrip names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(rename = "CE")]
    Call,
    #[serde(rename = "PE")]
    Put,
}

impl OptionType {
    /// Parses the `CE`/`PE` code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            c if c.eq_ignore_ascii_case("CE") => Some(Self::Call),
            c if c.eq_ignore_ascii_case("PE") => Some(Self::Put),
            _ => None,
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CE"),
            Self::Put => write!(f, "PE"),
        }
    }
}

/// A quoted option strike. Point-in-time; never updated after fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strike {
    /// Broker scrip name, e.g. `NIFTY 29 Dec 2022 CE 18000.00`.
    pub symbol: String,
    /// Broker instrument id used for order placement.
    pub scrip_code: i64,
    pub option_type: OptionType,
    pub strike_price: Decimal,
    /// Last traded premium.
    pub premium: Decimal,
    /// Day of month of the expiry.
    pub expiry_day: u32,
    pub expiry: NaiveDate,
}

impl Strike {
    /// Human-readable contract description (e.g., "NIFTY 18000CE @ 7.30").
    #[must_use]
    pub fn display_name(&self) -> String {
        format!(
            "{} {}{} @ {}",
            self.symbol, self.strike_price, self.option_type, self.premium
        )
    }
}

/// Nearest-expiry option chain for an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionChain {
    pub index: String,
    /// Spot level of the underlying index.
    pub spot: Decimal,
    pub expiry: NaiveDate,
    pub quotes: Vec<Strike>,
}

impl OptionChain {
    pub fn calls(&self) -> impl Iterator<Item = &Strike> {
        self.quotes
            .iter()
            .filter(|s| s.option_type == OptionType::Call)
    }

    pub fn puts(&self) -> impl Iterator<Item = &Strike> {
        self.quotes
            .iter()
            .filter(|s| s.option_type == OptionType::Put)
    }

    /// Quote for a specific strike and type.
    #[must_use]
    pub fn quote(&self, strike_price: Decimal, option_type: OptionType) -> Option<&Strike> {
        self.quotes
            .iter()
            .find(|s| s.option_type == option_type && s.strike_price == strike_price)
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// 5paisa wire code.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Buy => "B",
            Self::Sell => "S",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "B" | "BUY" | "Buy" => Some(Self::Buy),
            "S" | "SELL" | "Sell" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    /// Rests until the last traded price reaches the trigger, then executes
    /// at market.
    StopLoss { trigger_price: Decimal },
}

/// An order to place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub scrip_code: i64,
    pub symbol: String,
    pub side: OrderSide,
    /// Contracts (not lots).
    pub quantity: u32,
    pub kind: OrderKind,
    /// Run tag, sent as the broker's remote order id.
    pub tag: Tag,
}

impl OrderRequest {
    #[must_use]
    pub fn market(strike: &Strike, side: OrderSide, quantity: u32, tag: &Tag) -> Self {
        Self {
            scrip_code: strike.scrip_code,
            symbol: strike.symbol.clone(),
            side,
            quantity,
            kind: OrderKind::Market,
            tag: tag.clone(),
        }
    }

    #[must_use]
    pub fn stop_loss(
        strike: &Strike,
        side: OrderSide,
        quantity: u32,
        trigger_price: Decimal,
        tag: &Tag,
    ) -> Self {
        Self {
            kind: OrderKind::StopLoss { trigger_price },
            ..Self::market(strike, side, quantity, tag)
        }
    }
}

/// Broker acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    /// Broker order id.
    pub order_id: String,
    pub exchange_order_id: Option<String>,
    /// Average execution price, when the order filled immediately.
    pub fill_price: Option<Decimal>,
}

/// Order status as reported on the order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    TriggerPending,
    PartiallyExecuted,
    Executed,
    Cancelled,
    Rejected,
    Other(String),
}

impl OrderStatus {
    /// Maps the broker's free-text status (e.g. "Fully Executed").
    #[must_use]
    pub fn from_broker(status: &str) -> Self {
        let lower = status.to_ascii_lowercase();
        if lower.contains("trigger") {
            Self::TriggerPending
        } else if lower.contains("partial") {
            Self::PartiallyExecuted
        } else if lower.contains("executed") || lower.contains("complete") {
            Self::Executed
        } else if lower.contains("cancel") {
            Self::Cancelled
        } else if lower.contains("reject") {
            Self::Rejected
        } else if lower.contains("pending") || lower.contains("open") || lower.contains("placed")
        {
            Self::Pending
        } else {
            Self::Other(status.to_string())
        }
    }

    /// True while the order can still trade or be cancelled.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::TriggerPending | Self::PartiallyExecuted
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::TriggerPending => write!(f, "trigger_pending"),
            Self::PartiallyExecuted => write!(f, "partially_executed"),
            Self::Executed => write!(f, "executed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Rejected => write!(f, "rejected"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// One order on the broker's order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookEntry {
    pub order_id: String,
    pub exchange_order_id: Option<String>,
    pub scrip_code: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub pending_quantity: u32,
    pub status: OrderStatus,
    /// Remote order id echoed back by the broker; the run tag for our orders.
    pub tag: Option<Tag>,
    /// Limit or average price as reported; zero for unfilled market orders.
    pub price: Decimal,
    pub trigger_price: Option<Decimal>,
    pub is_stop_loss: bool,
}

/// Net position in one scrip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRow {
    pub scrip_code: i64,
    pub symbol: String,
    /// Positive long, negative short.
    pub net_quantity: i64,
    pub buy_avg: Decimal,
    pub sell_avg: Decimal,
    pub ltp: Decimal,
    /// Booked PnL on quantity already closed.
    pub realized_pnl: Decimal,
    /// Mark-to-market PnL on the open quantity.
    pub unrealized_pnl: Decimal,
}

impl PositionRow {
    #[must_use]
    pub fn pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.net_quantity != 0
    }
}
