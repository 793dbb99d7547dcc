//! Configuration module for StagePipe
//!
//! This module handles engine and application configuration:
//! - Engine defaults applied to every pipeline (channel capacity, fairness,
//!   idle timeout, worker thread names)
//! - Settings for the bundled demo pipeline
//! - The log filter installed by the binary
//!
//! # Files
//!
//! JSON is the primary format. Files with a `.toml` extension are read and
//! written as TOML.
//!
//! # Example
//!
//! ```ignore
//! use stagepipe_rs::config::AppConfig;
//!
//! let config = AppConfig::load_or_default("stagepipe.json");
//! let pipeline = Pipeline::with_config(config.engine.clone());
//! config.save("stagepipe.toml")?;
//! ```

use crate::error::{Result, StagePipeError};
use crate::pipeline::FairnessPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default channel capacity
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Default prefix for stage worker thread names
pub const DEFAULT_THREAD_PREFIX: &str = "stage";

/// Default number of items the demo source emits
pub const DEFAULT_DEMO_ITEMS: i64 = 10;

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,stagepipe_rs=debug";

/// On-disk formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

// ==================== Engine Config ====================

/// Defaults applied by `Pipeline::with_config` and the supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of channels created with `Pipeline::channel()`. 0 = rendezvous.
    #[serde(default = "default_capacity")]
    pub default_capacity: usize,

    /// Input fairness for stages that do not set their own
    #[serde(default)]
    pub fairness: FairnessPolicy,

    /// Idle timeout for stages that do not set their own. None = wait forever.
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,

    /// Worker threads are named `<prefix>-<stage name>`
    #[serde(default = "default_thread_prefix")]
    pub thread_name_prefix: String,
}

fn default_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_thread_prefix() -> String {
    DEFAULT_THREAD_PREFIX.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_capacity: DEFAULT_CHANNEL_CAPACITY,
            fairness: FairnessPolicy::default(),
            idle_timeout_ms: None,
            thread_name_prefix: default_thread_prefix(),
        }
    }
}

impl EngineConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}

// ==================== Demo Settings ====================

/// Settings for the reference pipeline run by the binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoSettings {
    /// Source emits `0..item_count`
    #[serde(default = "default_item_count")]
    pub item_count: i64,

    /// Artificial delay per item in the sink, to make backpressure visible
    #[serde(default)]
    pub sink_delay_ms: u64,
}

fn default_item_count() -> i64 {
    DEFAULT_DEMO_ITEMS
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            item_count: DEFAULT_DEMO_ITEMS,
            sink_delay_ms: 0,
        }
    }
}

// ==================== App Config ====================

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub demo: DemoSettings,
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            engine: EngineConfig::default(),
            demo: DemoSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StagePipeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        match ConfigFormat::from_path(path) {
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| {
                StagePipeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            }),
            // Parse as JSON (primary format)
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| {
                StagePipeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            }),
        }
    }

    /// Load a config file, falling back to defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config to disk, as TOML for `.toml` paths and JSON otherwise
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StagePipeError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = match ConfigFormat::from_path(path) {
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| StagePipeError::Serialization(e.to_string()))?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| StagePipeError::Serialization(e.to_string()))?,
        };

        std::fs::write(path, content).map_err(|e| {
            StagePipeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}
