//! Writer configuration
//!
//! Loaded from an optional JSON file. Every key has a default, so `{}` is a
//! complete configuration. Command-line flags are applied on top by the CLI.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::append_log::{
    AppendOptions, Durability, LogError, LogResult, RotationPolicy, SeqStrategy,
};
use crate::observability::{log_event, Event};

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory holding every session's files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Seal the active segment at this size (default 64 MiB)
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Seal the active segment this long after its last write (default 600)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// "none", "always" or {"every_n": N}
    #[serde(default)]
    pub durability: Durability,

    /// "unsequenced", "scanned", "allocated" or {"explicit": N}
    #[serde(default)]
    pub sequencing: SeqStrategy,

    #[serde(default)]
    pub enable_lock: bool,

    #[serde(default)]
    pub strict_queue: bool,

    /// Spool file for sealed-segment notifications; logged only when absent
    #[serde(default)]
    pub queue_spool: Option<PathBuf>,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("data/append_logs")
}
fn default_max_size_bytes() -> u64 {
    67108864
} // 64 MiB
fn default_max_age_secs() -> u64 {
    600
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            max_size_bytes: default_max_size_bytes(),
            max_age_secs: default_max_age_secs(),
            durability: Durability::default(),
            sequencing: SeqStrategy::default(),
            enable_lock: false,
            strict_queue: false,
            queue_spool: None,
        }
    }
}

impl LogConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> LogResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            LogError::Config(format!("failed to read config {}: {}", path.display(), e))
        })?;

        let config = Self::from_json(&content)?;

        let path_str = path.display().to_string();
        let log_dir = config.log_dir.display().to_string();
        log_event(
            Event::ConfigLoaded,
            &[("path", path_str.as_str()), ("log_dir", log_dir.as_str())],
        );
        Ok(config)
    }

    /// Parse and validate configuration JSON
    pub fn from_json(content: &str) -> LogResult<Self> {
        let config: LogConfig = serde_json::from_str(content)
            .map_err(|e| LogError::Config(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LogResult<()> {
        if self.max_size_bytes == 0 {
            return Err(LogError::Config("max_size_bytes must be > 0".into()));
        }
        if self.durability == Durability::EveryN(0) {
            return Err(LogError::Config("durability.every_n must be > 0".into()));
        }
        Ok(())
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy::new(self.max_size_bytes, Duration::from_secs(self.max_age_secs))
    }

    pub fn to_append_options(&self) -> AppendOptions {
        AppendOptions {
            rotation: self.rotation_policy(),
            durability: self.durability,
            sequencing: self.sequencing,
            use_lock: self.enable_lock,
            strict_queue: self.strict_queue,
        }
    }
}
