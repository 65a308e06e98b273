//! Exit rules for a monitored tag.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime};
use rust_decimal::Decimal;

use crate::types::ExitReason;

/// Decides whether the tag should be closed out on this poll.
///
/// The profit target wins over the expiry cutoff when both hold. `now` must
/// be in IST.
#[must_use]
pub fn check_exit(
    pnl: Decimal,
    target: Decimal,
    now: DateTime<FixedOffset>,
    expiry_day: u32,
    cutoff: NaiveTime,
) -> Option<ExitReason> {
    if pnl >= target {
        tracing::info!(%pnl, %target, "Profit target reached");
        return Some(ExitReason::TargetReached);
    }

    if now.day() == expiry_day && now.time() >= cutoff {
        tracing::info!(%pnl, expiry_day, %cutoff, "Expiry-day cutoff reached");
        return Some(ExitReason::ExpiryCutoff);
    }

    None
}
