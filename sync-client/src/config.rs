//! Client configuration.
//!
//! Configuration can be built in code or loaded from a TOML file:
//!
//! ```toml
//! tombstone_text = "Message removed"
//! event_buffer = 512
//! log_filter = "convo_sync_client=debug"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use sync_core::{VisibilityPolicy, DEFAULT_TOMBSTONE_TEXT};

/// Configuration for [`ChatClient`](crate::ChatClient).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatConfig {
    /// Placeholder written into tombstoned messages and rendered in their place.
    #[serde(default = "default_tombstone_text")]
    pub tombstone_text: String,
    /// Capacity of each push event queue (default: 256).
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Default `tracing` filter when `RUST_LOG` is unset (default: "info").
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_tombstone_text() -> String {
    DEFAULT_TOMBSTONE_TEXT.to_string()
}

fn default_event_buffer() -> usize {
    256
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            tombstone_text: default_tombstone_text(),
            event_buffer: default_event_buffer(),
            log_filter: default_log_filter(),
        }
    }
}

impl ChatConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the type system cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "event_buffer",
                reason: "must be at least 1".into(),
            });
        }
        if self.tombstone_text.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "tombstone_text",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Set the tombstone placeholder.
    pub fn with_tombstone_text(mut self, text: &str) -> Self {
        self.tombstone_text = text.to_string();
        self
    }

    /// Set the push queue capacity.
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Set the default log filter.
    pub fn with_log_filter(mut self, filter: &str) -> Self {
        self.log_filter = filter.to_string();
        self
    }

    /// Visibility policy using the configured placeholder.
    pub fn policy(&self) -> VisibilityPolicy {
        VisibilityPolicy::new(self.tombstone_text.clone())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
