//! Loading and validation of the participant settings.
//!
//! Values defined in the configuration file can be overridden by environment variables, e.g.
//! `FEDROUND_TRAINING__EPOCHS=2`. An example configuration file can be found in the `configs/`
//! directory located in the repository root.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize, Clone)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    pub api: ApiSettings,
    #[validate]
    pub agent: AgentSettings,
    #[validate]
    pub model: ModelSettings,
    #[validate]
    pub data: DataSettings,
    #[validate]
    pub training: TrainingSettings,
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
/// Coordinator connection settings.
pub struct ApiSettings {
    /// The address of the coordinator's REST API, either `host:port` or a `http` URL.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [api]
    /// server_address = "127.0.0.1:8081"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDROUND_API__SERVER_ADDRESS=http://127.0.0.1:8081
    /// ```
    pub server_address: String,
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
/// Polling settings.
pub struct AgentSettings {
    /// The number of milliseconds between two task requests.
    #[validate(range(min = 1))]
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// The number of consecutive failed requests tolerated before the participant gives up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    10
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
/// Settings of the local softmax regression model.
///
/// All participants of a federation must agree on the model dimensions, otherwise their
/// parameters can't be loaded.
pub struct ModelSettings {
    #[validate(range(min = 1))]
    pub num_features: usize,
    #[validate(range(min = 2))]
    pub num_classes: usize,
    /// The seed of the initial weights.
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Validate, Deserialize, Clone)]
/// Settings of the local datasets.
pub struct DataSettings {
    /// A directory holding `x_train.npy`, `y_train.npy`, `x_test.npy` and `y_test.npy`.
    ///
    /// Features are read as `f32` matrices with one sample per row and labels as `i64` vectors.
    /// If it is not set, the synthetic data is used instead.
    pub dir: Option<PathBuf>,
    #[validate]
    #[serde(default)]
    pub synthetic: SyntheticSettings,
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
#[validate(schema(function = "validate_synthetic"))]
/// Settings of the synthetic blob datasets.
pub struct SyntheticSettings {
    pub train_samples: usize,
    pub test_samples: usize,
    /// The seed of the samples, which should differ between participants.
    pub seed: u64,
    /// The seed of the class centers, which must be shared by all participants.
    pub center_seed: u64,
    /// The standard deviation of the samples around their class center.
    pub noise: f32,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            train_samples: 200,
            test_samples: 50,
            seed: 0,
            center_seed: 42,
            noise: 1.0,
        }
    }
}

impl SyntheticSettings {
    fn validate_synthetic(&self) -> Result<(), ValidationError> {
        if self.train_samples >= 1
            && self.test_samples >= 1
            && self.noise.is_finite()
            && self.noise > 0.
        {
            Ok(())
        } else {
            Err(ValidationError::new("invalid synthetic data settings"))
        }
    }
}

fn validate_synthetic(s: &SyntheticSettings) -> Result<(), ValidationError> {
    s.validate_synthetic()
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
#[validate(schema(function = "validate_training"))]
/// Local training settings.
pub struct TrainingSettings {
    /// The number of passes over the local training set per fit task.
    #[validate(range(min = 1))]
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[validate(range(min = 1))]
    pub batch_size: usize,
    pub learning_rate: f32,
}

fn default_epochs() -> usize {
    1
}

impl TrainingSettings {
    fn validate_training(&self) -> Result<(), ValidationError> {
        if self.learning_rate.is_finite() && self.learning_rate > 0. {
            Ok(())
        } else {
            Err(ValidationError::new("invalid learning rate"))
        }
    }
}

fn validate_training(s: &TrainingSettings) -> Result<(), ValidationError> {
    s.validate_training()
}

#[derive(Debug, Deserialize, Clone)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of `tracing` filter directives.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "fedround_client=info"
    /// ```
    pub filter: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn training() -> TrainingSettings {
        TrainingSettings {
            epochs: 1,
            batch_size: 32,
            learning_rate: 0.1,
        }
    }

    #[test]
    fn test_settings_new() {
        let settings = Settings::new("../../configs/client.toml").unwrap();
        assert_eq!(settings.model.num_features, 2);
        assert_eq!(settings.model.num_classes, 3);
        assert!(settings.data.dir.is_none());
        assert!(Settings::new("").is_err());
    }

    #[test]
    fn test_validate_training() {
        assert!(training().validate().is_ok());
        assert!(TrainingSettings {
            learning_rate: 0.,
            ..training()
        }
        .validate()
        .is_err());
        assert!(TrainingSettings {
            batch_size: 0,
            ..training()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_validate_synthetic() {
        assert!(SyntheticSettings::default().validate().is_ok());
        assert!(SyntheticSettings {
            noise: f32::NAN,
            ..SyntheticSettings::default()
        }
        .validate()
        .is_err());
        assert!(SyntheticSettings {
            train_samples: 0,
            ..SyntheticSettings::default()
        }
        .validate()
        .is_err());
    }
}
