//! Layered settings loading.
//!
//! Sources are applied in order, later ones overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. `config/table-queue.{toml,yaml,json}` if present
//! 3. An explicitly named file, which must exist
//! 4. Environment variables prefixed `TQ__`, e.g. `TQ__TABLE_NAME=jobs`

use crate::error::{ConfigError, ValidationError};
use crate::message::validate_name;
use crate::store::StoreOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const ENV_PREFIX: &str = "TQ";
const LOCAL_CONFIG_FILE: &str = "config/table-queue";

/// Runtime settings for a queue deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Name of the queue table
    pub table_name: String,

    /// SQLite database file
    pub database_path: PathBuf,

    /// Seconds a redelivered message stays invisible
    pub redelivery_time_seconds: u64,

    /// Attempt budget before a message is marked as failed
    pub attempts_before_failure: u32,

    /// How long a single fetch keeps polling before reporting an empty queue
    pub fetch_window_ms: u64,

    /// Pause between polls inside the fetch window
    pub poll_interval_ms: u64,

    /// Consumer sleep after an empty fetch
    pub idle_sleep_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            table_name: "queue".to_string(),
            database_path: PathBuf::from("queue.db"),
            redelivery_time_seconds: 180,
            attempts_before_failure: 5,
            fetch_window_ms: 200,
            poll_interval_ms: 10,
            idle_sleep_ms: 200,
        }
    }
}

impl QueueSettings {
    /// Load settings from the standard sources plus an optional explicit file
    pub fn load(explicit_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(LOCAL_CONFIG_FILE).required(false));

        if let Some(path) = explicit_file {
            info!(path = %path.display(), "Loading settings from explicit path");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(loading)?
            .try_deserialize()
            .map_err(loading)?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that cannot produce a working queue
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name("table_name", &self.table_name).map_err(invalid)?;

        if self.attempts_before_failure == 0 {
            return Err(invalid(ValidationError::OutOfRange {
                field: "attempts_before_failure".to_string(),
                message: "must be at least 1".to_string(),
            }));
        }

        if self.fetch_window_ms == 0 {
            return Err(invalid(ValidationError::OutOfRange {
                field: "fetch_window_ms".to_string(),
                message: "must be at least 1".to_string(),
            }));
        }

        Ok(())
    }

    /// Store options derived from these settings
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            table_name: self.table_name.clone(),
            fetch_window: Duration::from_millis(self.fetch_window_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

fn loading(err: config::ConfigError) -> ConfigError {
    ConfigError::Loading {
        message: err.to_string(),
    }
}

fn invalid(err: ValidationError) -> ConfigError {
    ConfigError::Invalid {
        message: err.to_string(),
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
