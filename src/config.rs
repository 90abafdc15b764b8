use crate::{jobs::DEFAULT_JOB_RETENTION, trainer::TrainingConfig};
use ::config::{ConfigError, Environment};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub model_dir: PathBuf,
    pub learning_rate: f64,
    pub epochs: usize,
    pub max_batch_size: usize,
    pub job_retention: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Config {
    /// Reads `DEMAND_*` environment variables on top of the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix("DEMAND").try_parsing(true))
    }

    pub fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        let defaults = TrainingConfig::default();
        let config: Config = ::config::Config::builder()
            .set_default("bind_addr", "0.0.0.0:8000")?
            .set_default("model_dir", "./saved-model")?
            .set_default("learning_rate", defaults.learning_rate)?
            .set_default("epochs", defaults.epochs as u64)?
            .set_default("max_batch_size", defaults.max_batch_size as u64)?
            .set_default("job_retention", DEFAULT_JOB_RETENTION as u64)?
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn training(&self) -> TrainingConfig {
        TrainingConfig {
            epochs: self.epochs,
            learning_rate: self.learning_rate,
            max_batch_size: self.max_batch_size,
            seed: self.seed,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::Message(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.epochs == 0 {
            return Err(ConfigError::Message("epochs must be at least 1".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Message("max_batch_size must be at least 1".to_string()));
        }
        if self.job_retention == 0 {
            return Err(ConfigError::Message("job_retention must be at least 1".to_string()));
        }
        Ok(())
    }
}
