//! Poll, claim, dispatch and resolve.
//!
//! Each cycle of a [`Consumer`]:
//!
//! 1. fetches the next eligible message from the store,
//! 2. claims it (`IN_PROCESS`) with a conditional update,
//! 3. routes it to a job (by `event`) or to the processor bound to its queue,
//! 4. runs the handler and resolves its disposition.
//!
//! Handler failures, panics and missing handlers never stop the loop. They
//! are turned into a redelivery with one more attempt, or into a terminal
//! `FAILURE` row once the attempt budget is used up. Errors while persisting
//! that outcome are logged and published on the optional error channel.

use crate::error::{ConfigError, QueueError};
use crate::job::{Context, Disposition, Handler, Processor};
use crate::message::{Message, MessageId, QueueName, Status};
use crate::producer::Producer;
use crate::store::Store;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Default pause after an empty poll
pub const DEFAULT_IDLE_SLEEP: Duration = Duration::from_millis(200);

/// What happened to a fetched message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Handler returned ACK; the message was deleted.
    Acknowledged,
    /// Handler returned REJECT; the message was deleted without redelivery.
    Rejected,
    /// Handler returned REQUEUE; a redelivery was enqueued.
    Requeued { attempts: u32 },
    /// Handler failed; a redelivery was enqueued.
    Redelivered { attempts: u32 },
    /// No handler was found; a redelivery was enqueued.
    UndefinedHandler { attempts: u32 },
    /// Attempt budget exhausted; the message was kept as `FAILURE`.
    Failed { attempts: u32 },
    /// Another consumer claimed the message first.
    ClaimLost,
}

/// Why a message is being redelivered
#[derive(Debug, Clone, Copy)]
enum Retry {
    Requeue,
    Failure,
    UndefinedHandler,
}

impl Retry {
    fn status(self) -> Status {
        match self {
            Self::Requeue | Self::Failure => Status::Redelivered,
            Self::UndefinedHandler => Status::UndefinedHandler,
        }
    }

    fn resolution(self, attempts: u32) -> Resolution {
        match self {
            Self::Requeue => Resolution::Requeued { attempts },
            Self::Failure => Resolution::Redelivered { attempts },
            Self::UndefinedHandler => Resolution::UndefinedHandler { attempts },
        }
    }
}

/// A persistence error that the consumer swallowed to keep running
#[derive(Debug)]
pub struct ResolutionFailure {
    pub message_id: Option<MessageId>,
    pub queue: Option<QueueName>,
    pub error: QueueError,
}

/// Long-running message consumer
pub struct Consumer {
    store: Arc<dyn Store>,
    producer: Arc<Producer>,
    processors: HashMap<QueueName, Arc<dyn Processor>>,
    idle_sleep: Duration,
    errors: Option<mpsc::UnboundedSender<ResolutionFailure>>,
}

impl Consumer {
    /// Create a consumer; processors registered on the producer's config are bound
    pub fn new(store: Arc<dyn Store>, producer: Arc<Producer>) -> Self {
        let processors = producer
            .config()
            .processors()
            .map(|(queue, processor)| (queue.clone(), processor.clone()))
            .collect();

        Self {
            store,
            producer,
            processors,
            idle_sleep: DEFAULT_IDLE_SLEEP,
            errors: None,
        }
    }

    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    /// Publish swallowed persistence errors on `sender`
    pub fn with_error_channel(mut self, sender: mpsc::UnboundedSender<ResolutionFailure>) -> Self {
        self.errors = Some(sender);
        self
    }

    /// Bind a processor to a queue
    pub fn bind<P>(&mut self, queue: &str, processor: P) -> Result<(), QueueError>
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

        info!(queue = %queue, "Processor bound");
        self.processors.insert(queue, Arc::new(processor));
        Ok(())
    }

    /// Consume `queues` (all queues if empty) until the process ends
    pub async fn consume(&self, queues: &[QueueName]) {
        let (_keep_open, shutdown) = watch::channel(false);
        self.run(queues, shutdown, None).await;
    }

    /// Consume until `shutdown` turns true; returns the number of messages handled.
    ///
    /// Shutdown is checked between cycles, so a message being handled is
    /// always resolved first.
    pub async fn consume_until(&self, queues: &[QueueName], shutdown: watch::Receiver<bool>) -> usize {
        self.run(queues, shutdown, None).await
    }

    /// Consume until shutdown or until `limit` messages were handled
    pub async fn run(
        &self,
        queues: &[QueueName],
        mut shutdown: watch::Receiver<bool>,
        limit: Option<usize>,
    ) -> usize {
        let mut handled = 0;
        info!(queues = ?queues, "Consumer started");

        loop {
            if *shutdown.borrow() || limit.is_some_and(|max| handled >= max) {
                break;
            }

            match self.process_next(queues).await {
                Ok(Some(Resolution::ClaimLost)) => {}
                Ok(Some(_)) => handled += 1,
                Ok(None) => self.idle(&mut shutdown).await,
                Err(e) => {
                    error!(error = %e, "Polling the queue failed");
                    self.report(None, None, e);
                    self.idle(&mut shutdown).await;
                }
            }
        }

        info!(handled = handled, "Consumer stopped");
        handled
    }

    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        // A closed channel disables the second branch, so the sleep still applies
        tokio::select! {
            _ = tokio::time::sleep(self.idle_sleep) => {}
            Ok(()) = shutdown.changed() => {}
        }
    }

    /// Run one poll / claim / dispatch / resolve cycle.
    ///
    /// Returns `None` when no message became eligible within the store's
    /// fetch window. Fetch and claim errors are returned; everything after a
    /// successful claim is resolved here.
    pub async fn process_next(&self, queues: &[QueueName]) -> Result<Option<Resolution>, QueueError> {
        let Some(mut message) = self.store.fetch_next(queues).await? else {
            return Ok(None);
        };

        if !self.store.claim(&mut message).await? {
            debug!(message_id = %message.id()?, "Message claimed by another consumer");
            return Ok(Some(Resolution::ClaimLost));
        }

        debug!(
            message_id = %message.id()?,
            queue = %message.queue(),
            attempts = message.attempts(),
            "Message claimed"
        );

        let Some(handler) = self.route(&message) else {
            warn!(
                message_id = %message.id()?,
                queue = %message.queue(),
                event = ?message.event(),
                "No handler for message"
            );
            let budget = self.producer.config().number_of_attempts_before_failure();
            let error = undefined_handler_error(&message);
            return Ok(Some(
                self.redeliver(message, budget, Retry::UndefinedHandler, Some(error))
                    .await,
            ));
        };

        let budget = handler
            .attempts()
            .unwrap_or_else(|| self.producer.config().number_of_attempts_before_failure());

        let resolution = match self.invoke(&handler, &message).await {
            Ok(disposition) => self.resolve(message, disposition, budget).await,
            Err(e) => {
                let description = format!("{e:#}");
                warn!(
                    message_id = %message.id()?,
                    queue = %message.queue(),
                    attempts = message.attempts(),
                    error = %description,
                    "Handler failed"
                );
                self.redeliver(message, budget, Retry::Failure, Some(description))
                    .await
            }
        };

        Ok(Some(resolution))
    }

    fn route(&self, message: &Message) -> Option<Handler> {
        if message.is_job() {
            let event = message.event()?;
            return self.producer.config().job(event).ok().map(Handler::Job);
        }

        self.processors
            .get(message.queue())
            .cloned()
            .map(Handler::Processor)
    }

    /// Run the handler on its own task so a panic becomes an ordinary failure
    async fn invoke(&self, handler: &Handler, message: &Message) -> anyhow::Result<Disposition> {
        let data = self
            .producer
            .config()
            .serializer()
            .deserialize(message.body())
            .unwrap_or_else(|_| Value::String(message.body().to_string()));
        let ctx = Context::new(self.producer.clone(), message.clone(), data);
        let handler = handler.clone();

        tokio::spawn(async move { handler.invoke(ctx).await })
            .await
            .map_err(|e| anyhow::anyhow!("handler panicked: {e}"))?
    }

    async fn resolve(&self, message: Message, disposition: Disposition, budget: u32) -> Resolution {
        let deleted = match disposition {
            Disposition::Requeue => {
                return self.redeliver(message, budget, Retry::Requeue, None).await;
            }
            Disposition::Ack | Disposition::Reject => self.store.delete(&message).await,
        };

        match deleted {
            Ok(()) => {
                info!(
                    message_id = ?message.id().ok(),
                    queue = %message.queue(),
                    disposition = %disposition,
                    "Message resolved"
                );
                if disposition == Disposition::Ack {
                    Resolution::Acknowledged
                } else {
                    Resolution::Rejected
                }
            }
            Err(e) => {
                let description = e.to_string();
                self.report(message.id().ok().cloned(), Some(message.queue().clone()), e);
                self.redeliver(message, budget, Retry::Failure, Some(description))
                    .await
            }
        }
    }

    /// Supersede `message` with a redelivery, or mark it as failed once
    /// `attempts + 1` reaches `budget`.
    async fn redeliver(
        &self,
        mut message: Message,
        budget: u32,
        reason: Retry,
        error: Option<String>,
    ) -> Resolution {
        let message_id = message.id().ok().cloned();
        let queue = message.queue().clone();

        let attempts = message.attempts().saturating_add(1);
        if attempts >= budget {
            let error = error.or_else(|| message.error().map(str::to_string));
            match self.store.fail(&mut message, error).await {
                Ok(()) => warn!(
                    message_id = ?message_id,
                    queue = %queue,
                    attempts = attempts,
                    "Attempts exhausted, message marked as failed"
                ),
                Err(e) => self.report(message_id, Some(queue), e),
            }
            return Resolution::Failed { attempts };
        }

        message.set_status(reason.status());
        if error.is_some() {
            message.set_error(error);
        }

        let next = self.producer.make_redelivery_message(&message);
        let attempts = next.attempts();

        match self.producer.send(next).await {
            Ok(sent) => {
                if let Err(e) = self.store.delete(&message).await {
                    self.report(message_id.clone(), Some(queue.clone()), e);
                }
                info!(
                    message_id = ?message_id,
                    redelivery_id = ?sent.id().ok(),
                    queue = %queue,
                    status = %sent.status(),
                    attempts = attempts,
                    "Message redelivered"
                );
            }
            Err(e) => self.report(message_id, Some(queue), e),
        }

        reason.resolution(attempts)
    }

    fn report(&self, message_id: Option<MessageId>, queue: Option<QueueName>, error: QueueError) {
        error!(
            message_id = ?message_id,
            queue = ?queue,
            error = %error,
            "Failed to persist message resolution; continuing"
        );

        if let Some(sender) = &self.errors {
            let _ = sender.send(ResolutionFailure {
                message_id,
                queue,
                error,
            });
        }
    }
}

fn undefined_handler_error(message: &Message) -> String {
    match (message.is_job(), message.event()) {
        (true, Some(event)) => format!("Job \"{}\" is not registered", event),
        (true, None) => "Job message has no event".to_string(),
        (false, _) => format!("No processor bound to queue \"{}\"", message.queue()),
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut queues: Vec<&QueueName> = self.processors.keys().collect();
        queues.sort();
        f.debug_struct("Consumer")
            .field("processors", &queues)
            .field("idle_sleep", &self.idle_sleep)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
