//! Run identifiers.
//!
//! Every order placed by one run carries the same tag, which the broker
//! echoes back on its order book. That makes the tag the only key needed to
//! find a run's legs again after a restart.

use serde::{Deserialize, Serialize};

use crate::clock::Clock;

pub const DEFAULT_TAG_PREFIX: &str = "p0wss";

/// `"<prefix><unix-timestamp-seconds>"`.
///
/// Second resolution: two runs started within the same second get the same
/// tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Wraps an existing tag, e.g. one given on the command line.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    #[must_use]
    pub fn from_timestamp(prefix: &str, unix_secs: i64) -> Self {
        Self(format!("{prefix}{unix_secs}"))
    }

    /// A fresh tag for a run starting now.
    #[must_use]
    pub fn generate(prefix: &str, clock: &dyn Clock) -> Self {
        Self::from_timestamp(prefix, clock.unix_timestamp())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
