//! Shared building blocks for the daily short-options strategy.
//!
//! - [`RunConfig`]: typed, validated run configuration
//! - [`ConfigLoader`]: layered loading (defaults, TOML file, environment)
//! - [`Tag`]: the run identifier shared by every leg of one run
//! - [`Clock`]: wall-clock abstraction, IST-aware

pub mod clock;
pub mod config;
pub mod config_loader;
pub mod tag;

pub use clock::{ist, Clock, ManualClock, SystemClock};
pub use config::{ConfigError, IndexSpec, PairKind, PartialFillPolicy, RunConfig};
pub use config_loader::{ConfigLoader, ConfigOverrides};
pub use tag::{Tag, DEFAULT_TAG_PREFIX};
