//! Handler contracts.
//!
//! Work is handled either by a [`Job`], registered under an alias and
//! addressed by a message's `event`, or by a [`Processor`] bound to a queue.
//! Both receive a [`Context`] and answer with a [`Disposition`].

use crate::error::{SerializationError, UnsupportedResultError};
use crate::message::Message;
use crate::producer::Producer;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// Disposition
// ============================================================================

/// Outcome a handler reports for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Disposition {
    /// Processed; delete the message.
    Ack,
    /// Not processable; delete the message without redelivery.
    Reject,
    /// Try again later; redeliver with one more attempt.
    Requeue,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ACK",
            Self::Reject => "REJECT",
            Self::Requeue => "REQUEUE",
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disposition {
    type Err = UnsupportedResultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACK" => Ok(Self::Ack),
            "REJECT" => Ok(Self::Reject),
            "REQUEUE" => Ok(Self::Requeue),
            other => Err(UnsupportedResultError {
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<&str> for Disposition {
    type Error = UnsupportedResultError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============================================================================
// Context
// ============================================================================

/// Everything a handler gets to see about the message it is processing
#[derive(Clone)]
pub struct Context {
    producer: Arc<Producer>,
    message: Message,
    data: Value,
}

impl Context {
    pub fn new(producer: Arc<Producer>, message: Message, data: Value) -> Self {
        Self {
            producer,
            message,
            data,
        }
    }

    /// Producer for enqueueing follow-up work
    pub fn producer(&self) -> &Arc<Producer> {
        &self.producer
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Deserialized message body.
    ///
    /// Bodies that parse as JSON arrive decoded, so a body sent as the string
    /// `"42"` or `"true"` is seen here as a number or a bool. Bodies that do
    /// not parse arrive as a JSON string; the raw text is always available
    /// from `message().body()`.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Decode the body into a concrete type
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, SerializationError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("message", &self.message)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Handler Traits
// ============================================================================

/// A named unit of work dispatched through [`Producer::dispatch`].
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use table_queue_core::{Context, Disposition, Job};
///
/// struct SendWelcomeMail;
///
/// #[async_trait]
/// impl Job for SendWelcomeMail {
///     async fn handle(&self, ctx: Context) -> anyhow::Result<Disposition> {
///         let _address = ctx.data()["email"].as_str();
///         Ok(Disposition::Ack)
///     }
///
///     fn queue(&self) -> &str {
///         "mail"
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync {
    /// Process one message
    async fn handle(&self, ctx: Context) -> anyhow::Result<Disposition>;

    /// Queue that dispatched messages for this job are sent to
    fn queue(&self) -> &str {
        "default"
    }

    /// Attempt budget for this job, overriding the configured default
    fn attempts(&self) -> Option<u32> {
        None
    }
}

/// Ad-hoc handler bound to a queue.
///
/// Implemented for every async closure taking a [`Context`].
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, ctx: Context) -> anyhow::Result<Disposition>;
}

#[async_trait]
impl<F, Fut> Processor for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Disposition>> + Send + 'static,
{
    async fn process(&self, ctx: Context) -> anyhow::Result<Disposition> {
        (self)(ctx).await
    }
}

/// Resolved handler for a single message
#[derive(Clone)]
pub enum Handler {
    Job(Arc<dyn Job>),
    Processor(Arc<dyn Processor>),
}

impl Handler {
    pub async fn invoke(&self, ctx: Context) -> anyhow::Result<Disposition> {
        match self {
            Self::Job(job) => job.handle(ctx).await,
            Self::Processor(processor) => processor.process(ctx).await,
        }
    }

    /// Attempt budget override, if the handler declares one
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Job(job) => job.attempts(),
            Self::Processor(_) => None,
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Job(_) => f.write_str("Handler::Job"),
            Self::Processor(_) => f.write_str("Handler::Processor"),
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
