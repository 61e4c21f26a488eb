//! Shutdown timing configuration.
//!
//! Configuration can be built in code, parsed from YAML, or read from the
//! environment:
//!
//! ```yaml
//! timeout_ms: 5000
//! second_timeout_ms: 15000
//! ```

use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default wait bound for the gate drain and for each stage.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment variable names.
pub mod vars {
    /// Wait bound, in milliseconds, for the gate drain and every stage.
    pub const STAGEWISE_TIMEOUT_MS: &str = "STAGEWISE_TIMEOUT_MS";
    /// Override for the first stage.
    pub const STAGEWISE_FIRST_TIMEOUT_MS: &str = "STAGEWISE_FIRST_TIMEOUT_MS";
    /// Override for the second stage.
    pub const STAGEWISE_SECOND_TIMEOUT_MS: &str = "STAGEWISE_SECOND_TIMEOUT_MS";
    /// Override for the third stage.
    pub const STAGEWISE_THIRD_TIMEOUT_MS: &str = "STAGEWISE_THIRD_TIMEOUT_MS";
}

/// Config loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file does not exist.
    #[error("config file not found: {path}")]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The config file exists but could not be read.
    #[error("failed to read config: {source}")]
    ReadError {
        /// Underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The YAML could not be parsed into a [`ShutdownConfig`].
    #[error("invalid YAML at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    ParseError {
        /// Line of the error, when the parser reports one.
        line: Option<usize>,
        /// Parser message.
        message: String,
    },

    /// An environment variable held something other than milliseconds.
    #[error("invalid value for {var}: {message}")]
    InvalidValue {
        /// Variable name.
        var: String,
        /// What was wrong with the value.
        message: String,
    },

    /// The configuration parsed but is not usable.
    #[error("validation error: {message}")]
    ValidationError {
        /// What failed validation.
        message: String,
    },
}

/// Wait bounds applied by the shutdown sequence.
///
/// `timeout_ms` bounds the admission gate drain and every stage; the
/// per-stage fields override it for a single stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Wait bound in milliseconds.
    pub timeout_ms: u64,
    /// First stage override in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_timeout_ms: Option<u64>,
    /// Second stage override in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second_timeout_ms: Option<u64>,
    /// Third stage override in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub third_timeout_ms: Option<u64>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_ms: millis(DEFAULT_TIMEOUT),
            first_timeout_ms: None,
            second_timeout_ms: None,
            third_timeout_ms: None,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ShutdownConfig {
    /// Config with a single wait bound for every phase.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout_ms: millis(timeout),
            ..Self::default()
        }
    }

    /// Wait bound for the admission gate drain, and for stages without an
    /// override.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Wait bound for `stage`.
    pub fn stage_timeout(&self, stage: Stage) -> Duration {
        self.stage_override(stage)
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.timeout())
    }

    /// Set the wait bound for every phase, clearing stage overrides.
    pub fn set_timeout(&mut self, timeout: Duration) {
        *self = Self::with_timeout(timeout);
    }

    /// Override the wait bound for one stage.
    pub fn set_stage_timeout(&mut self, stage: Stage, timeout: Duration) {
        *self.stage_override_mut(stage) = Some(millis(timeout));
    }

    fn stage_override(&self, stage: Stage) -> Option<u64> {
        match stage {
            Stage::First => self.first_timeout_ms,
            Stage::Second => self.second_timeout_ms,
            Stage::Third => self.third_timeout_ms,
        }
    }

    fn stage_override_mut(&mut self, stage: Stage) -> &mut Option<u64> {
        match stage {
            Stage::First => &mut self.first_timeout_ms,
            Stage::Second => &mut self.second_timeout_ms,
            Stage::Third => &mut self.third_timeout_ms,
        }
    }

    /// Parse and validate YAML configuration.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ShutdownConfig =
            serde_yaml::from_str(contents).map_err(|e| ConfigError::ParseError {
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Build configuration from `STAGEWISE_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(ms) = env_millis(vars::STAGEWISE_TIMEOUT_MS)? {
            config.timeout_ms = ms;
        }
        config.first_timeout_ms = env_millis(vars::STAGEWISE_FIRST_TIMEOUT_MS)?;
        config.second_timeout_ms = env_millis(vars::STAGEWISE_SECOND_TIMEOUT_MS)?;
        config.third_timeout_ms = env_millis(vars::STAGEWISE_THIRD_TIMEOUT_MS)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject zero wait bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "timeout_ms must be greater than zero".to_string(),
            });
        }
        for stage in Stage::ALL {
            if self.stage_override(stage) == Some(0) {
                return Err(ConfigError::ValidationError {
                    message: format!("{}_timeout_ms must be greater than zero", stage),
                });
            }
        }
        Ok(())
    }
}

fn env_millis(var: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(var) {
        Ok(v) => v.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            message: format!("expected milliseconds, got {:?}", v),
        }),
        Err(_) => Ok(None),
    }
}
