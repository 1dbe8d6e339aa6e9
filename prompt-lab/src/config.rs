use anyhow::Result;
use config::{Config as ConfigLoader, Environment, File};
use prompt_lab_core::RunConfig;
use serde::Deserialize;
use std::path::PathBuf;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub log_level: String,
    pub log_format: LogFormat,
    /// Directory for task checkpoints.
    pub checkpoint_dir: PathBuf,
    #[validate(nested)]
    pub run: RunConfig,
    #[validate(nested)]
    pub simulation: SimulationConfig,
}

/// Behaviour of the built-in simulated provider.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct SimulationConfig {
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    /// Probability in `[0, 1]` that a call fails.
    #[validate(custom(function = "validate_probability"))]
    pub failure_rate: f64,
    #[validate(custom(function = "validate_price"))]
    pub cost_per_1k_tokens: f64,
}

fn validate_probability(value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new("probability"))
    }
}

fn validate_price(value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::new("price"))
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("PROMPT_LAB").separator("__"))
            .build()?;

        Self::from_loader(config)
    }

    fn from_loader(config: ConfigLoader) -> Result<Self> {
        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "prompt_lab=debug,prompt_lab_engine=debug".to_string(),
            log_format: LogFormat::Pretty,
            checkpoint_dir: PathBuf::from(".prompt-lab/tasks"),
            run: RunConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_latency_ms: 50,
            max_latency_ms: 400,
            failure_rate: 0.1,
            cost_per_1k_tokens: 0.002,
        }
    }
}
