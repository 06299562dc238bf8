//! Storage port for the queue table.
//!
//! The [`Store`] trait is everything the producer and consumer need from
//! persistence. Drivers live in [`crate::stores`].

use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueName, Status};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Persistence operations against the queue table
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Create the backing table if it does not exist yet
    async fn init(&self) -> Result<(), QueueError>;

    /// Persist a new message and return it with its assigned id.
    ///
    /// Fails with `StorageError::NotConfirmed` unless exactly one row was written.
    async fn send(&self, message: Message) -> Result<Message, QueueError>;

    /// Fetch the next eligible message.
    ///
    /// Only messages on `queues` are considered unless the slice is empty.
    /// Lower priority values come first, then older messages. The store keeps
    /// polling for its fetch window before returning `None`.
    async fn fetch_next(&self, queues: &[QueueName]) -> Result<Option<Message>, QueueError>;

    /// Atomically move a fetched message to `IN_PROCESS`.
    ///
    /// Returns `false` if another consumer claimed it first. On success the
    /// message status is updated in place.
    async fn claim(&self, message: &mut Message) -> Result<bool, QueueError>;

    /// Update only the status column of a persisted message
    async fn change_status(&self, message: &mut Message, status: Status) -> Result<(), QueueError>;

    /// Mark a persisted message as `FAILURE` and record the last error.
    ///
    /// The row keeps its id and is never fetched again.
    async fn fail(&self, message: &mut Message, error: Option<String>) -> Result<(), QueueError>;

    /// Remove a persisted message
    async fn delete(&self, message: &Message) -> Result<(), QueueError>;

    /// Look up a message by id
    async fn find(&self, id: &MessageId) -> Result<Option<Message>, QueueError>;

    /// List messages in a status, oldest first
    async fn list_by_status(
        &self,
        status: Status,
        queue: Option<QueueName>,
        limit: usize,
    ) -> Result<Vec<Message>, QueueError>;

    /// Count messages per status
    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

/// Driver options shared by all stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Name of the queue table
    pub table_name: String,
    /// How long `fetch_next` keeps polling an empty queue
    pub fetch_window: Duration,
    /// Pause between polls inside the fetch window
    pub poll_interval: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            table_name: "queue".to_string(),
            fetch_window: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Message counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub new: u64,
    pub in_process: u64,
    pub redelivered: u64,
    pub failure: u64,
    pub undefined_handler: u64,
}

impl QueueStats {
    pub fn add(&mut self, status: Status, count: u64) {
        match status {
            Status::New => self.new += count,
            Status::InProcess => self.in_process += count,
            Status::Redelivered => self.redelivered += count,
            Status::Failure => self.failure += count,
            Status::UndefinedHandler => self.undefined_handler += count,
        }
    }

    pub fn count(&self, status: Status) -> u64 {
        match status {
            Status::New => self.new,
            Status::InProcess => self.in_process,
            Status::Redelivered => self.redelivered,
            Status::Failure => self.failure,
            Status::UndefinedHandler => self.undefined_handler,
        }
    }

    pub fn total(&self) -> u64 {
        Status::ALL.iter().map(|status| self.count(*status)).sum()
    }
}

/// Run `attempt` until it yields a message or the fetch window closes.
///
/// The first attempt always runs, and one last attempt is made at the deadline.
pub(crate) async fn poll_window<F, Fut>(
    options: &StoreOptions,
    mut attempt: F,
) -> Result<Option<Message>, QueueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<Message>, QueueError>>,
{
    let deadline = Instant::now() + options.fetch_window;
    loop {
        if let Some(message) = attempt().await? {
            return Ok(Some(message));
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(options.poll_interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
