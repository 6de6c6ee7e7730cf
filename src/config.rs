//! Configuration management for the lifecycle engine
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (lifecycle.toml)
//! - Environment variables (LIFECYCLE__*)
//!
//! ## Example config file (lifecycle.toml):
//! ```toml
//! [registry]
//! path = "./registry"
//!
//! [analysis]
//! samples = 256
//! acceptance_threshold = 0.95
//!
//! [migration]
//! batch_size = 10000
//! max_batch_retries = 3
//! parallelism = 1
//! checkpoint_dir = "./checkpoints"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::analyzer::PatternSamplingConfig;

/// Main configuration for the lifecycle engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Pattern sampling used by change analysis
    #[serde(default)]
    pub analysis: PatternSamplingConfig,

    /// Migration executor settings
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory backing the registry; in memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Migration executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Records per batch unless the request overrides it
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retries per batch before the job fails
    #[serde(default = "default_max_batch_retries")]
    pub max_batch_retries: u32,

    /// Base backoff between batch retries, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Batches in flight at once (1 = sequential)
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Records re-transformed and compared after cutover
    #[serde(default = "default_post_validation_samples")]
    pub post_validation_samples: usize,

    /// How long the pre-cutover structure is kept after a migration
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    /// Also validate migrated records against the target JSON Schema
    #[serde(default)]
    pub validate_against_target_schema: bool,

    /// Directory for job checkpoints
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

fn default_batch_size() -> usize {
    10_000
}

fn default_max_batch_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_parallelism() -> usize {
    1
}

fn default_post_validation_samples() -> usize {
    100
}

fn default_retention_hours() -> u64 {
    72
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_batch_retries: default_max_batch_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            parallelism: default_parallelism(),
            post_validation_samples: default_post_validation_samples(),
            retention_hours: default_retention_hours(),
            validate_against_target_schema: false,
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

impl MigrationConfig {
    /// Backoff before retry number `attempt` (1-based)
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }
}

impl LifecycleConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["lifecycle.toml", ".lifecycle.toml", "config/lifecycle.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "schema-lifecycle") {
            let xdg_config = config_dir.config_dir().join("lifecycle.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (LIFECYCLE__MIGRATION__BATCH_SIZE=...)
        builder = builder.add_source(
            Environment::with_prefix("LIFECYCLE")
                .prefix_separator("__")
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

    /// Get the registry path, resolving relative paths
    pub fn registry_path(&self) -> Option<PathBuf> {
        self.registry.path.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                std::env::current_dir().unwrap_or_default().join(p)
            }
        })
    }
}
