use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tag::DEFAULT_TAG_PREFIX;

/// Configuration validation and loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value the strategy cannot run with.
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },

    /// The configuration sources could not be read or merged.
    #[error("failed to load configuration: {0}")]
    Load(String),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(err.to_string())
    }
}

/// Which kind of pair a set of legs was selected as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairKind {
    Straddle,
    Strangle,
}

impl std::fmt::Display for PairKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Straddle => write!(f, "straddle"),
            Self::Strangle => write!(f, "strangle"),
        }
    }
}

/// What to do when one entry leg fills and its sibling is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialFillPolicy {
    /// Leave the filled leg open and report the rejection.
    #[default]
    Surface,
    /// Buy back the filled leg(s) at market, then report the rejection.
    Unwind,
}

/// Static contract metadata for a tradeable index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub symbol: &'static str,
    pub lot_size: u32,
}

impl IndexSpec {
    const KNOWN: [Self; 3] = [
        Self {
            symbol: "NIFTY",
            lot_size: 50,
        },
        Self {
            symbol: "BANKNIFTY",
            lot_size: 25,
        },
        Self {
            symbol: "FINNIFTY",
            lot_size: 40,
        },
    ];

    /// Looks up a known index by symbol (case-insensitive).
    #[must_use]
    pub fn lookup(symbol: &str) -> Option<Self> {
        Self::KNOWN
            .iter()
            .copied()
            .find(|spec| spec.symbol.eq_ignore_ascii_case(symbol))
    }
}

/// Run configuration.
///
/// Every field has a default matching the strategy's usual NIFTY setup.
/// Construct through [`RunConfig::validate`] (or the loader, which calls it)
/// before handing the config to the managers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Index to trade (NIFTY, BANKNIFTY, FINNIFTY).
    pub index: String,
    /// Strangle strikes are chosen by premium closest to this value.
    pub closest_premium: Decimal,
    /// Stop-loss trigger as a multiple of the collected premium (e.g. 1.55).
    pub stop_loss_factor: Decimal,
    /// Overrides `stop_loss_factor` for straddle legs.
    pub straddle_stop_loss_factor: Option<Decimal>,
    /// Overrides `stop_loss_factor` for strangle legs.
    pub strangle_stop_loss_factor: Option<Decimal>,
    /// Contracts per leg; must be a whole number of lots.
    pub quantity: u32,
    /// Lot size override; defaults to the index's exchange lot size.
    pub lot_size: Option<u32>,
    pub tag_prefix: String,
    /// Aggregate PnL (currency units) at which the run squares off.
    pub monitor_target: Option<Decimal>,
    /// Time of day (IST) on expiry day at which positions are force-closed.
    #[serde(with = "hhmm")]
    pub expiry_cutoff_time: NaiveTime,
    pub poll_interval_secs: u64,
    /// Upper bound for the backoff between failed polls.
    pub max_poll_backoff_secs: u64,
    /// Retries for option-chain fetches before the run aborts.
    pub market_data_retries: u32,
    pub partial_fill_policy: PartialFillPolicy,
    /// Trading is skipped when India VIX is above this level.
    pub vix_threshold: Decimal,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            index: "NIFTY".to_string(),
            closest_premium: Decimal::new(70, 1),
            stop_loss_factor: Decimal::new(155, 2),
            straddle_stop_loss_factor: None,
            strangle_stop_loss_factor: None,
            quantity: 100,
            lot_size: None,
            tag_prefix: DEFAULT_TAG_PREFIX.to_string(),
            monitor_target: None,
            expiry_cutoff_time: NaiveTime::from_hms_opt(15, 15, 0).unwrap_or_default(),
            poll_interval_secs: 15,
            max_poll_backoff_secs: 120,
            market_data_retries: 3,
            partial_fill_policy: PartialFillPolicy::Surface,
            vix_threshold: Decimal::from(20),
        }
    }
}

impl RunConfig {
    /// Checks every invariant the managers rely on.
    ///
    /// Values are rejected, never rounded: a quantity of 70 against a lot
    /// size of 50 is an error, not one lot.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.index.trim().is_empty() {
            return Err(ConfigError::invalid("index", "must not be empty"));
        }

        if self.closest_premium <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "closest_premium",
                format!("must be positive, got {}", self.closest_premium),
            ));
        }

        check_stop_loss_factor("stop_loss_factor", self.stop_loss_factor)?;
        if let Some(factor) = self.straddle_stop_loss_factor {
            check_stop_loss_factor("straddle_stop_loss_factor", factor)?;
        }
        if let Some(factor) = self.strangle_stop_loss_factor {
            check_stop_loss_factor("strangle_stop_loss_factor", factor)?;
        }

        let lot_size = self.lot_size()?;
        if self.quantity == 0 {
            return Err(ConfigError::invalid("quantity", "must be at least one lot"));
        }
        if self.quantity % lot_size != 0 {
            return Err(ConfigError::invalid(
                "quantity",
                format!(
                    "{} is not a multiple of the {} lot size {}",
                    self.quantity, self.index, lot_size
                ),
            ));
        }

        if let Some(target) = self.monitor_target {
            if target <= Decimal::ZERO {
                return Err(ConfigError::invalid(
                    "monitor_target",
                    format!("must be positive, got {target}"),
                ));
            }
        }

        if self.tag_prefix.is_empty() {
            return Err(ConfigError::invalid("tag_prefix", "must not be empty"));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("poll_interval_secs", "must be positive"));
        }
        if self.max_poll_backoff_secs < self.poll_interval_secs {
            return Err(ConfigError::invalid(
                "max_poll_backoff_secs",
                "must not be shorter than the poll interval",
            ));
        }

        Ok(self)
    }

    /// Lot size for the configured index.
    pub fn lot_size(&self) -> Result<u32, ConfigError> {
        match self.lot_size {
            Some(0) => Err(ConfigError::invalid("lot_size", "must be positive")),
            Some(size) => Ok(size),
            None => IndexSpec::lookup(&self.index)
                .map(|spec| spec.lot_size)
                .ok_or_else(|| {
                    ConfigError::invalid(
                        "lot_size",
                        format!("unknown index {}; set lot_size explicitly", self.index),
                    )
                }),
        }
    }

    /// Number of lots each leg is placed as.
    pub fn lots(&self) -> Result<u32, ConfigError> {
        Ok(self.quantity / self.lot_size()?)
    }

    /// Stop-loss factor applied to legs of the given kind.
    #[must_use]
    pub fn stop_loss_factor_for(&self, kind: PairKind) -> Decimal {
        let specific = match kind {
            PairKind::Straddle => self.straddle_stop_loss_factor,
            PairKind::Strangle => self.strangle_stop_loss_factor,
        };
        specific.unwrap_or(self.stop_loss_factor)
    }
}

fn check_stop_loss_factor(field: &'static str, factor: Decimal) -> Result<(), ConfigError> {
    if factor <= Decimal::ONE {
        return Err(ConfigError::invalid(
            field,
            format!("must be greater than 1.0, got {factor}"),
        ));
    }
    Ok(())
}

/// `HH:MM` (or `HH:MM:SS`) time-of-day encoding.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|e| serde::de::Error::custom(format!("invalid time of day '{raw}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::default().validate().unwrap();
        assert_eq!(config.index, "NIFTY");
        assert_eq!(config.closest_premium, dec!(7.0));
        assert_eq!(config.stop_loss_factor, dec!(1.55));
        assert_eq!(config.quantity, 100);
        assert_eq!(config.tag_prefix, "p0wss");
    }

    #[test]
    fn quantity_in_whole_lots_is_accepted() {
        let config = RunConfig {
            quantity: 100,
            lot_size: Some(50),
            ..RunConfig::default()
        };
        assert_eq!(config.lots().unwrap(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn quantity_not_in_whole_lots_is_rejected() {
        let config = RunConfig {
            quantity: 70,
            lot_size: Some(50),
            ..RunConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "quantity", .. }));
        assert!(err.to_string().contains("70"));
    }

    #[test]
    fn stop_loss_factor_must_exceed_one() {
        for factor in [dec!(1.0), dec!(0.8), dec!(-1.55)] {
            let config = RunConfig {
                stop_loss_factor: factor,
                ..RunConfig::default()
            };
            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::Invalid {
                        field: "stop_loss_factor",
                        ..
                    })
                ),
                "factor {factor} should be rejected"
            );
        }
    }

    #[test]
    fn per_kind_factor_is_validated_and_applied() {
        let bad = RunConfig {
            straddle_stop_loss_factor: Some(dec!(0.9)),
            ..RunConfig::default()
        };
        assert!(bad.validate().is_err());

        let config = RunConfig {
            straddle_stop_loss_factor: Some(dec!(1.3)),
            ..RunConfig::default()
        };
        assert_eq!(config.stop_loss_factor_for(PairKind::Straddle), dec!(1.3));
        assert_eq!(config.stop_loss_factor_for(PairKind::Strangle), dec!(1.55));
    }

    #[test]
    fn lot_size_defaults_from_index() {
        let config = RunConfig {
            index: "banknifty".to_string(),
            quantity: 50,
            ..RunConfig::default()
        };
        assert_eq!(config.lot_size().unwrap(), 25);
        assert_eq!(config.lots().unwrap(), 2);
    }

    #[test]
    fn unknown_index_needs_explicit_lot_size() {
        let config = RunConfig {
            index: "MIDCPNIFTY".to_string(),
            ..RunConfig::default()
        };
        assert!(config.clone().validate().is_err());

        let config = RunConfig {
            lot_size: Some(100),
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn non_positive_target_is_rejected() {
        let config = RunConfig {
            monitor_target: Some(dec!(0)),
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn cutoff_time_round_trips_as_hhmm() {
        let json = serde_json::to_value(RunConfig::default()).unwrap();
        assert_eq!(json["expiry_cutoff_time"], "15:15");

        let parsed: RunConfig =
            serde_json::from_str(r#"{"expiry_cutoff_time": "14:50:00"}"#).unwrap();
        assert_eq!(
            parsed.expiry_cutoff_time,
            NaiveTime::from_hms_opt(14, 50, 0).unwrap()
        );
    }
}
