//! In-memory store for testing and embedding.
//!
//! Rows live in a map behind a lock. Fetch ordering, eligibility and the
//! conditional claim behave like the SQLite store, so the same consumer code
//! can be exercised without a database.

use crate::error::{QueueError, StorageError};
use crate::message::{Message, MessageId, QueueName, Status, Timestamp};
use crate::store::{poll_window, QueueStats, Store, StoreOptions};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// A persisted row with its insertion order
#[derive(Clone)]
struct StoredMessage {
    sequence: u64,
    message: Message,
}

#[derive(Default)]
struct Table {
    rows: HashMap<MessageId, StoredMessage>,
    next_sequence: u64,
}

/// Store keeping the queue table in process memory
#[derive(Clone)]
pub struct MemoryStore {
    table: Arc<RwLock<Table>>,
    options: StoreOptions,
}

impl MemoryStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            table: Arc::new(RwLock::new(Table::default())),
            options,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Table>, QueueError> {
        self.table.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Table>, QueueError> {
        self.table.write().map_err(|_| poisoned())
    }

    fn next_eligible(&self, queues: &[QueueName]) -> Result<Option<Message>, QueueError> {
        let now = Timestamp::now();
        let table = self.read()?;

        let next = table
            .rows
            .values()
            .filter(|row| queues.is_empty() || queues.contains(row.message.queue()))
            .filter(|row| row.message.is_eligible(now))
            .min_by_key(|row| {
                (
                    row.message.priority(),
                    row.message.created_at(),
                    row.sequence,
                )
            });

        Ok(next.map(|row| row.message.clone()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

fn poisoned() -> QueueError {
    StorageError::Unavailable {
        message: "in-memory table lock poisoned".to_string(),
    }
    .into()
}

fn missing_id(operation: &str) -> QueueError {
    StorageError::MissingId {
        operation: operation.to_string(),
    }
    .into()
}

#[async_trait]
impl Store for MemoryStore {
    async fn init(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn send(&self, mut message: Message) -> Result<Message, QueueError> {
        let id = MessageId::new();
        message.assign_id(id.clone())?;

        let mut table = self.write()?;
        let sequence = table.next_sequence;
        table.next_sequence += 1;
        table.rows.insert(
            id,
            StoredMessage {
                sequence,
                message: message.clone(),
            },
        );

        Ok(message)
    }

    async fn fetch_next(&self, queues: &[QueueName]) -> Result<Option<Message>, QueueError> {
        poll_window(&self.options, || async { self.next_eligible(queues) }).await
    }

    async fn claim(&self, message: &mut Message) -> Result<bool, QueueError> {
        let id = message.id().map_err(|_| missing_id("claim"))?.clone();
        let mut table = self.write()?;

        match table.rows.get_mut(&id) {
            Some(row) if row.message.status().is_fetchable() => {
                row.message.set_status(Status::InProcess);
                message.set_status(Status::InProcess);
                Ok(true)
            }
            _ => {
                debug!(message_id = %id, "Claim lost");
                Ok(false)
            }
        }
    }

    async fn change_status(&self, message: &mut Message, status: Status) -> Result<(), QueueError> {
        let id = message.id().map_err(|_| missing_id("change status"))?.clone();
        let mut table = self.write()?;

        if let Some(row) = table.rows.get_mut(&id) {
            row.message.set_status(status);
        }
        message.set_status(status);
        Ok(())
    }

    async fn fail(&self, message: &mut Message, error: Option<String>) -> Result<(), QueueError> {
        let id = message.id().map_err(|_| missing_id("fail"))?.clone();
        let mut table = self.write()?;

        if let Some(row) = table.rows.get_mut(&id) {
            row.message.set_status(Status::Failure);
            row.message.set_error(error.clone());
        }
        message.set_status(Status::Failure);
        message.set_error(error);
        Ok(())
    }

    async fn delete(&self, message: &Message) -> Result<(), QueueError> {
        let id = message.id().map_err(|_| missing_id("delete"))?;
        self.write()?.rows.remove(id);
        Ok(())
    }

    async fn find(&self, id: &MessageId) -> Result<Option<Message>, QueueError> {
        Ok(self.read()?.rows.get(id).map(|row| row.message.clone()))
    }

    async fn list_by_status(
        &self,
        status: Status,
        queue: Option<QueueName>,
        limit: usize,
    ) -> Result<Vec<Message>, QueueError> {
        let table = self.read()?;
        let mut rows: Vec<&StoredMessage> = table
            .rows
            .values()
            .filter(|row| row.message.status() == status)
            .filter(|row| queue.as_ref().map_or(true, |q| row.message.queue() == q))
            .collect();
        rows.sort_by_key(|row| (row.message.created_at(), row.sequence));

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|row| row.message.clone())
            .collect())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let table = self.read()?;
        let mut stats = QueueStats::default();
        for row in table.rows.values() {
            stats.add(row.message.status(), 1);
        }
        Ok(stats)
    }
}
