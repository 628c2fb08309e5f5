//! Configuration management for the variability pipeline
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (varimodel.toml)
//! - Environment variables (VARIMODEL_*)
//!
//! ## Example config file (varimodel.toml):
//! ```toml
//! [model]
//! name = "kubernetes"
//! definitions = "./resources/_definitions.json"
//! output = "./variability_model/kubernetes.model"
//!
//! [mapping]
//! table = "./resources/keymap.tsv"
//!
//! [validation]
//! workers = 8
//! batch_size = 256
//! time_budget_ms = 5000
//! checkpoint = "./validation.checkpoint"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::batch::BatchConfig;

/// Main configuration for the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Model generation settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Key mapping settings
    #[serde(default)]
    pub mapping: MappingConfig,

    /// Batch validation settings
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Model generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name (becomes the synthetic root feature)
    #[serde(default = "default_model_name")]
    pub name: String,

    /// Path to the raw definitions document
    #[serde(default = "default_definitions_path")]
    pub definitions: PathBuf,

    /// Where the serialized model is written
    #[serde(default = "default_output_path")]
    pub output: PathBuf,

    /// Schema version stamped into the model header
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Top-level kinds to synthesize; empty means every definition
    #[serde(default)]
    pub kinds: Vec<String>,
}

/// Key mapping configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MappingConfig {
    /// Curated mapping table; derived from the model when absent
    #[serde(default)]
    pub table: Option<PathBuf>,
}

/// Batch validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Worker pool size
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Job queue bound
    #[serde(default = "default_queue_bound")]
    pub queue_bound: usize,

    /// Documents per checkpointed batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Per-document time budget in milliseconds; 0 disables the guard
    #[serde(default = "default_time_budget_ms")]
    pub time_budget_ms: u64,

    /// Completed-batch checkpoint file
    #[serde(default)]
    pub checkpoint: Option<PathBuf>,
}

// Default value functions
fn default_model_name() -> String {
    "kubernetes".to_string()
}

fn default_definitions_path() -> PathBuf {
    PathBuf::from("_definitions.json")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("variability.model")
}

fn default_schema_version() -> String {
    "0.1.0".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_queue_bound() -> usize {
    64
}

fn default_batch_size() -> usize {
    256
}

fn default_time_budget_ms() -> u64 {
    5000
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            definitions: default_definitions_path(),
            output: default_output_path(),
            schema_version: default_schema_version(),
            kinds: Vec::new(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_bound: default_queue_bound(),
            batch_size: default_batch_size(),
            time_budget_ms: default_time_budget_ms(),
            checkpoint: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["varimodel.toml", ".varimodel.toml", "config/varimodel.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("org", "caosd", "varimodel") {
            let xdg_config = config_dir.config_dir().join("varimodel.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("VARIMODEL")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Batch settings derived from the validation section
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            workers: self.validation.workers,
            queue_bound: self.validation.queue_bound,
            batch_size: self.validation.batch_size,
            time_budget: match self.validation.time_budget_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            checkpoint_path: self.validation.checkpoint.clone(),
        }
    }
}
