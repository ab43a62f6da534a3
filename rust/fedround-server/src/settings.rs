//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. An
//! example configuration file can be found in the `configs/` directory located in the repository
//! root.

use std::{fmt, net::SocketAddr, path::Path};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    pub api: ApiSettings,
    #[validate]
    pub rounds: RoundSettings,
    #[validate]
    pub strategy: StrategySettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("fedround").separator("__"))?;
        config.try_into()
    }
}

#[derive(Debug, Deserialize, Clone)]
/// REST API settings.
pub struct ApiSettings {
    /// The address to which the REST API should be bound.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [api]
    /// bind_address = "0.0.0.0:8081"
    /// # or
    /// bind_address = "127.0.0.1:8081"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDROUND_API__BIND_ADDRESS=127.0.0.1:8081
    /// ```
    pub bind_address: SocketAddr,
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
#[validate(schema(function = "validate_rounds"))]
/// Round settings.
pub struct RoundSettings {
    /// The number of federated rounds to run before shutting down. Must be at least `1`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [rounds]
    /// num_rounds = 3
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDROUND_ROUNDS__NUM_ROUNDS=3
    /// ```
    pub num_rounds: u64,

    /// The number of seconds to wait for `strategy.min_available_clients` registrations before
    /// a round fails. A round that fails while waiting is started again and does not count
    /// towards `num_rounds`.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: u64,

    /// The number of seconds a fit or evaluate phase may take. Clients that did not answer by
    /// then are counted as failures. Must be at least `1`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [rounds]
    /// round_timeout = 600
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDROUND_ROUNDS__ROUND_TIMEOUT=600
    /// ```
    pub round_timeout: u64,

    /// The number of seconds the coordinator keeps answering after the last round, so that
    /// polling clients learn about the shutdown.
    #[serde(default)]
    pub shutdown_grace: u64,
}

fn default_wait_timeout() -> u64 {
    86400
}

impl RoundSettings {
    fn validate_rounds(&self) -> Result<(), ValidationError> {
        // the validate attribute only accepts literals, therefore we check the invariants here
        if self.num_rounds >= 1 && self.round_timeout >= 1 && self.wait_timeout >= 1 {
            Ok(())
        } else {
            Err(ValidationError::new("invalid round settings"))
        }
    }
}

fn validate_rounds(s: &RoundSettings) -> Result<(), ValidationError> {
    s.validate_rounds()
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
#[validate(schema(function = "validate_strategy"))]
/// FedAvg strategy settings.
///
/// In each round `max(floor(available * fraction_fit), min_fit_clients)` registered clients are
/// sampled for training, capped at the number of available clients. Evaluation sampling works
/// the same way.
pub struct StrategySettings {
    /// The fraction of available clients sampled for training, `0 < fraction_fit <= 1`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [strategy]
    /// fraction_fit = 1.0
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDROUND_STRATEGY__FRACTION_FIT=1.0
    /// ```
    pub fraction_fit: f64,
    /// The fraction of available clients sampled for evaluation, `0 <= fraction_evaluate <= 1`.
    /// Evaluation is skipped if it is `0`.
    pub fraction_evaluate: f64,
    /// The minimal number of clients sampled for training.
    pub min_fit_clients: usize,
    /// The minimal number of clients sampled for evaluation.
    pub min_evaluate_clients: usize,
    /// The number of registered clients a round waits for before sampling. It must be at least
    /// as large as both sampling minimums.
    pub min_available_clients: usize,
    /// Whether a round is aggregated although some sampled clients failed.
    #[serde(default = "default_accept_failures")]
    pub accept_failures: bool,
}

fn default_accept_failures() -> bool {
    true
}

impl StrategySettings {
    fn validate_strategy(&self) -> Result<(), ValidationError> {
        self.validate_fractions()?;
        self.validate_counts()
    }

    /// Checks the validity of the sampling fractions.
    fn validate_fractions(&self) -> Result<(), ValidationError> {
        if 0. < self.fraction_fit
            && self.fraction_fit <= 1.
            && 0. <= self.fraction_evaluate
            && self.fraction_evaluate <= 1.
        {
            Ok(())
        } else {
            Err(ValidationError::new("invalid sampling fraction(s)"))
        }
    }

    /// Checks the validity of the client counts.
    fn validate_counts(&self) -> Result<(), ValidationError> {
        if 1 <= self.min_fit_clients
            && self.min_fit_clients <= self.min_available_clients
            && self.min_evaluate_clients <= self.min_available_clients
        {
            Ok(())
        } else {
            Err(ValidationError::new("invalid client count(s)"))
        }
    }
}

fn validate_strategy(s: &StrategySettings) -> Result<(), ValidationError> {
    s.validate_strategy()
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDROUND_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.2.15/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Default for RoundSettings {
        fn default() -> Self {
            Self {
                num_rounds: 3,
                wait_timeout: 86400,
                round_timeout: 600,
                shutdown_grace: 5,
            }
        }
    }

    impl Default for StrategySettings {
        fn default() -> Self {
            Self {
                fraction_fit: 1.0,
                fraction_evaluate: 1.0,
                min_fit_clients: 2,
                min_evaluate_clients: 2,
                min_available_clients: 2,
                accept_failures: true,
            }
        }
    }

    #[test]
    fn test_settings_new() {
        let settings = Settings::new("../../configs/server.toml").unwrap();
        assert_eq!(settings.rounds.num_rounds, 3);
        assert!(Settings::new("").is_err());
    }

    #[test]
    fn test_validate_rounds() {
        assert!(RoundSettings::default().validate().is_ok());
        assert!(RoundSettings {
            num_rounds: 0,
            ..RoundSettings::default()
        }
        .validate()
        .is_err());
        assert!(RoundSettings {
            round_timeout: 0,
            ..RoundSettings::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_validate_strategy_fractions() {
        assert!(StrategySettings::default().validate_fractions().is_ok());
        assert!(StrategySettings {
            fraction_evaluate: 0.,
            ..StrategySettings::default()
        }
        .validate_fractions()
        .is_ok());
        assert!(StrategySettings {
            fraction_fit: 0.,
            ..StrategySettings::default()
        }
        .validate_fractions()
        .is_err());
        assert!(StrategySettings {
            fraction_fit: 1.5,
            ..StrategySettings::default()
        }
        .validate_fractions()
        .is_err());
        assert!(StrategySettings {
            fraction_evaluate: -0.1,
            ..StrategySettings::default()
        }
        .validate_fractions()
        .is_err());
    }

    #[test]
    fn test_validate_strategy_counts() {
        assert!(StrategySettings::default().validate_counts().is_ok());
        assert!(StrategySettings {
            min_fit_clients: 0,
            ..StrategySettings::default()
        }
        .validate_counts()
        .is_err());
        assert!(StrategySettings {
            min_fit_clients: 3,
            ..StrategySettings::default()
        }
        .validate_counts()
        .is_err());
        assert!(StrategySettings {
            min_evaluate_clients: 3,
            ..StrategySettings::default()
        }
        .validate_counts()
        .is_err());
    }
}
