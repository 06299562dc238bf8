//! Queue policy and handler registries.
//!
//! A [`Config`] is assembled once at startup, then shared read-only by the
//! [`Producer`](crate::Producer) and [`Consumer`](crate::Consumer). The
//! registries only grow; registering the same alias or queue twice is an error.

use crate::error::{ConfigError, QueueError};
use crate::job::{Job, Processor};
use crate::message::{validate_name, QueueName};
use crate::serializer::{JsonSerializer, Serializer};
use crate::settings::QueueSettings;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Retry policy, handler registries and body serializer
#[derive(Clone)]
pub struct Config {
    redelivery_time_in_seconds: u64,
    number_of_attempts_before_failure: u32,
    jobs: HashMap<String, Arc<dyn Job>>,
    job_types: HashMap<&'static str, String>,
    processors: HashMap<QueueName, Arc<dyn Processor>>,
    serializer: Arc<dyn Serializer>,
}

impl Config {
    pub const DEFAULT_REDELIVERY_TIME_SECONDS: u64 = 180;
    pub const DEFAULT_ATTEMPTS_BEFORE_FAILURE: u32 = 5;

    pub fn new() -> Self {
        Self {
            redelivery_time_in_seconds: Self::DEFAULT_REDELIVERY_TIME_SECONDS,
            number_of_attempts_before_failure: Self::DEFAULT_ATTEMPTS_BEFORE_FAILURE,
            jobs: HashMap::new(),
            job_types: HashMap::new(),
            processors: HashMap::new(),
            serializer: Arc::new(JsonSerializer),
        }
    }

    /// Seed the retry policy from loaded settings
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self::new()
            .with_redelivery_time(settings.redelivery_time_seconds)
            .with_attempts_before_failure(settings.attempts_before_failure)
    }

    /// Seconds a redelivered message stays invisible
    pub fn with_redelivery_time(mut self, seconds: u64) -> Self {
        self.redelivery_time_in_seconds = seconds;
        self
    }

    /// Attempt budget for handlers that do not declare their own
    pub fn with_attempts_before_failure(mut self, attempts: u32) -> Self {
        self.number_of_attempts_before_failure = attempts;
        self
    }

    pub fn with_serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Register a job under an alias.
    ///
    /// The job can afterwards be dispatched by its alias or by its Rust type.
    /// Fails if the alias or the job's queue name is malformed, or if the
    /// alias is already taken.
    pub fn register_job<J>(mut self, alias: &str, job: J) -> Result<Self, QueueError>
    where
        J: Job + 'static,
    {
        validate_name("job_alias", alias)?;
        QueueName::new(job.queue())?;

        if self.jobs.contains_key(alias) {
            return Err(ConfigError::DuplicateJob {
                alias: alias.to_string(),
            }
            .into());
        }

        debug!(alias = alias, queue = job.queue(), "Registered job");
        self.job_types
            .entry(std::any::type_name::<J>())
            .or_insert_with(|| alias.to_string());
        self.jobs.insert(alias.to_string(), Arc::new(job));
        Ok(self)
    }

    /// Bind a processor to a queue
    pub fn register_processor<P>(mut self, queue: &str, processor: P) -> Result<Self, QueueError>
    where
        P: Processor + 'static,
    {
        let queue = QueueName::new(queue)?;

        if self.processors.contains_key(&queue) {
            return Err(ConfigError::DuplicateProcessor {
                queue: queue.to_string(),
            }
            .into());
        }

        debug!(queue = %queue, "Registered processor");
        self.processors.insert(queue, Arc::new(processor));
        Ok(self)
    }

    pub fn redelivery_time_in_seconds(&self) -> u64 {
        self.redelivery_time_in_seconds
    }

    pub fn number_of_attempts_before_failure(&self) -> u32 {
        self.number_of_attempts_before_failure
    }

    pub fn serializer(&self) -> &dyn Serializer {
        self.serializer.as_ref()
    }

    /// Whether a job is registered under the given alias or type name
    pub fn has_job(&self, name_or_alias: &str) -> bool {
        self.job_alias(name_or_alias).is_ok()
    }

    /// Resolve a job by alias, falling back to its Rust type name
    pub fn job(&self, name_or_alias: &str) -> Result<Arc<dyn Job>, ConfigError> {
        let alias = self.job_alias(name_or_alias)?;
        self.jobs
            .get(alias)
            .cloned()
            .ok_or_else(|| ConfigError::JobNotRegistered {
                name: name_or_alias.to_string(),
            })
    }

    /// Canonical alias for an alias or a registered Rust type name
    pub fn job_alias<'a>(&'a self, name_or_alias: &'a str) -> Result<&'a str, ConfigError> {
        if self.jobs.contains_key(name_or_alias) {
            return Ok(name_or_alias);
        }

        self.job_types
            .get(name_or_alias)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::JobNotRegistered {
                name: name_or_alias.to_string(),
            })
    }

    /// Alias a job type was first registered under
    pub fn alias_of<J: Job + 'static>(&self) -> Result<&str, ConfigError> {
        self.job_alias(std::any::type_name::<J>())
    }

    pub fn processor(&self, queue: &QueueName) -> Option<Arc<dyn Processor>> {
        self.processors.get(queue).cloned()
    }

    pub(crate) fn processors(&self) -> impl Iterator<Item = (&QueueName, &Arc<dyn Processor>)> {
        self.processors.iter()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut jobs: Vec<&String> = self.jobs.keys().collect();
        jobs.sort();
        let mut processors: Vec<&QueueName> = self.processors.keys().collect();
        processors.sort();

        f.debug_struct("Config")
            .field("redelivery_time_in_seconds", &self.redelivery_time_in_seconds)
            .field(
                "number_of_attempts_before_failure",
                &self.number_of_attempts_before_failure,
            )
            .field("jobs", &jobs)
            .field("processors", &processors)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
