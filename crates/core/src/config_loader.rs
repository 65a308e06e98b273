use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::{ConfigError, RunConfig};

/// Environment variable prefix, e.g. `DAILY_SHORT_QUANTITY=150`.
pub const ENV_PREFIX: &str = "DAILY_SHORT_";

/// Values supplied on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closest_premium: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_factor: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_target: Option<Decimal>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the run configuration from defaults, an optional TOML file and
    /// `DAILY_SHORT_*` environment variables, in increasing precedence.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the merged
    /// configuration fails validation.
    pub fn load(path: Option<&Path>) -> Result<RunConfig, ConfigError> {
        Self::load_with_overrides(path, &ConfigOverrides::default())
    }

    /// Same as [`ConfigLoader::load`], with command-line values on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the merged
    /// configuration fails validation.
    pub fn load_with_overrides(
        path: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<RunConfig, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(RunConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::Load(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: RunConfig = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        tracing::debug!(?config, "Run configuration loaded");
        config.validate()
    }
}
