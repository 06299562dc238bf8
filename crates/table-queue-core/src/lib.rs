//! # Table Queue Core
//!
//! A job and message queue whose only backing store is a single relational
//! table.
//!
//! Producers insert rows; consumers poll for the next eligible row, claim it,
//! hand it to a [`Job`] or [`Processor`] and act on the returned
//! [`Disposition`]. Failed or requeued work is superseded by a new row with
//! one more attempt, hidden until its redelivery time. Once the attempt
//! budget is used up the row is kept with status `FAILURE`.
//!
//! ## Module Organization
//!
//! - [`message`] - Message entity, priorities and statuses
//! - [`store`] - Storage contract and queue statistics
//! - [`stores`] - SQLite and in-memory stores
//! - [`producer`] / [`consumer`] - Enqueueing and the consume loop
//! - [`job`] - Handler contracts
//! - [`config`] / [`settings`] - Registries and file/env settings
//! - [`error`] - Error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use table_queue_core::{Config, Consumer, Context, Disposition, Producer, SqliteStore, Store, StoreOptions};
//!
//! # async fn example() -> Result<(), table_queue_core::QueueError> {
//! let store = Arc::new(SqliteStore::open("queue.db", StoreOptions::default())?);
//! store.init().await?;
//!
//! let producer = Arc::new(Producer::new(store.clone(), Arc::new(Config::new())));
//! let message = producer.create_message("orders", &serde_json::json!({"id": 7}))?;
//! producer.send(message).await?;
//!
//! let mut consumer = Consumer::new(store, producer);
//! consumer.bind("orders", |ctx: Context| async move {
//!     println!("order {}", ctx.data()["id"]);
//!     Ok::<_, anyhow::Error>(Disposition::Ack)
//! })?;
//! consumer.consume(&[]).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod job;
pub mod message;
pub mod producer;
pub mod serializer;
pub mod settings;
pub mod store;
pub mod stores;

pub use config::Config;
pub use consumer::{Consumer, Resolution, ResolutionFailure};
pub use error::{
    ConfigError, QueueError, SerializationError, StorageError, UnsupportedResultError,
    ValidationError,
};
pub use job::{Context, Disposition, Handler, Job, Processor};
pub use message::{Message, MessageId, MessageRecord, Priority, QueueName, Status, Timestamp};
pub use producer::Producer;
pub use serializer::{JsonSerializer, Serializer};
pub use settings::QueueSettings;
pub use store::{QueueStats, Store, StoreOptions};
pub use stores::{MemoryStore, SqliteStore};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
