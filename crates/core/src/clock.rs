//! Time abstraction.
//!
//! Exchange-facing decisions (expiry-day cutoff) are made in India Standard
//! Time, which has a fixed +05:30 offset and no daylight saving.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use parking_lot::Mutex;

const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// The IST offset (+05:30).
#[must_use]
pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;

    fn now_ist(&self) -> DateTime<FixedOffset> {
        self.now().with_timezone(&ist())
    }

    fn unix_timestamp(&self) -> i64 {
        self.now().timestamp()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Starts the clock at a wall time given in IST.
    #[must_use]
    pub fn at_ist(start: DateTime<FixedOffset>) -> Self {
        Self::new(start.with_timezone(&Utc))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn ist_is_five_thirty_ahead() {
        assert_eq!(ist().local_minus_utc(), 19_800);
    }

    #[test]
    fn manual_clock_reports_ist_wall_time() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2022, 12, 29, 9, 45, 0).unwrap());
        let local = clock.now_ist();
        assert_eq!(local.day(), 29);
        assert_eq!((local.hour(), local.minute()), (15, 15));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2022, 12, 29, 4, 0, 0).unwrap());
        let before = clock.unix_timestamp();
        clock.advance(chrono::Duration::seconds(90));
        assert_eq!(clock.unix_timestamp() - before, 90);
    }
}
