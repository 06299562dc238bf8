//! Message construction and enqueueing.

use crate::config::Config;
use crate::error::{QueueError, SerializationError};
use crate::job::Job;
use crate::message::{Message, QueueName, Status, Timestamp};
use crate::store::Store;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Builds messages and hands them to the store
#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn Store>,
    config: Arc<Config>,
}

impl Producer {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Wrap a body into a new `NEW` message for `queue`.
    ///
    /// String bodies are stored verbatim. Any other value is encoded with the
    /// configured serializer. Bodies serde cannot represent (for example maps
    /// with non-string keys) fail with a serialization error.
    pub fn create_message<B>(&self, queue: &str, body: &B) -> Result<Message, QueueError>
    where
        B: Serialize + ?Sized,
    {
        let queue = QueueName::new(queue)?;
        let value = serde_json::to_value(body).map_err(|e| SerializationError::Unserializable {
            type_name: std::any::type_name::<B>().to_string(),
            message: e.to_string(),
        })?;

        let body = match value {
            Value::String(text) => text,
            other => self.config.serializer().serialize(&other)?,
        };

        Ok(Message::new(queue, body))
    }

    /// Persist a message, returning it with its assigned id
    pub async fn send(&self, message: Message) -> Result<Message, QueueError> {
        let sent = self.store.send(message).await?;
        debug!(
            message_id = %sent.id()?,
            queue = %sent.queue(),
            status = %sent.status(),
            attempts = sent.attempts(),
            "Message sent"
        );
        Ok(sent)
    }

    /// Send `data` to a registered job, addressed by alias or Rust type name.
    ///
    /// The message goes to the job's queue with `event` set to the job alias.
    #[instrument(skip(self, data))]
    pub async fn dispatch<D>(&self, name_or_alias: &str, data: &D) -> Result<Message, QueueError>
    where
        D: Serialize + ?Sized,
    {
        let job = self.config.job(name_or_alias)?;
        let alias = self.config.job_alias(name_or_alias)?.to_string();

        let message = self
            .create_message(job.queue(), data)?
            .with_event(alias)
            .mark_as_job();

        self.send(message).await
    }

    /// Send `data` to the job registered for type `J`
    pub async fn dispatch_job<J, D>(&self, data: &D) -> Result<Message, QueueError>
    where
        J: Job + 'static,
        D: Serialize + ?Sized,
    {
        self.dispatch(std::any::type_name::<J>(), data).await
    }

    /// Derive the message that supersedes `message` on redelivery.
    ///
    /// `NEW` and `IN_PROCESS` become `REDELIVERED`; every other status is kept.
    /// The redelivery time is `now + redelivery time`, unless `message` is
    /// already hidden for longer. `FAILURE` messages get no redelivery time.
    pub fn make_redelivery_message(&self, message: &Message) -> Message {
        let status = match message.status() {
            Status::New | Status::InProcess => Status::Redelivered,
            other => other,
        };

        let delay = i64::try_from(self.config.redelivery_time_in_seconds()).unwrap_or(i64::MAX);
        let candidate = Timestamp::now().plus_seconds(delay);
        let redelivered_at = match message.redelivered_at() {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        };

        Message::derive_redelivery(message, status, Some(redelivered_at))
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;
