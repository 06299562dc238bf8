//! Common test utilities for table-queue integration tests
//!
//! This module provides:
//! - A SQLite-backed queue in a temporary directory
//! - Recording processors for observing what consumers handled

use std::sync::{Arc, Mutex};
use std::time::Duration;
use table_queue_core::{
    Config, Consumer, Context, Disposition, MessageId, Producer, SqliteStore, Store, StoreOptions,
};
use tempfile::TempDir;

/// A queue database that lives as long as the value
pub struct TestQueue {
    pub dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub producer: Arc<Producer>,
}

impl TestQueue {
    pub async fn new(config: Config) -> Self {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let producer = Arc::new(Producer::new(store.clone(), Arc::new(config)));
        Self {
            dir,
            store,
            producer,
        }
    }

    /// A consumer on its own connection to the same database
    #[allow(dead_code)]
    pub async fn consumer(&self) -> Consumer {
        let store = open(&self.dir).await;
        let producer = Arc::new(Producer::new(store.clone(), self.producer.config().clone()));
        Consumer::new(store, producer).with_idle_sleep(Duration::from_millis(10))
    }
}

/// Store options with a short fetch window so empty polls return quickly
pub fn fast_options() -> StoreOptions {
    StoreOptions {
        fetch_window: Duration::from_millis(30),
        poll_interval: Duration::from_millis(5),
        ..StoreOptions::default()
    }
}

async fn open(dir: &TempDir) -> Arc<SqliteStore> {
    let store = SqliteStore::open(dir.path().join("queue.db"), fast_options()).unwrap();
    store.init().await.unwrap();
    Arc::new(store)
}

/// Ids and bodies seen by a recording processor
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<(MessageId, String)>>>,
}

#[allow(dead_code)]
impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A processor that records each message and answers `disposition`
    pub fn processor(
        &self,
        disposition: Disposition,
    ) -> impl Fn(Context) -> std::future::Ready<anyhow::Result<Disposition>> + Send + Sync + 'static
    {
        let seen = self.seen.clone();
        move |ctx: Context| {
            let message = ctx.message();
            if let Ok(id) = message.id() {
                seen.lock()
                    .unwrap()
                    .push((id.clone(), message.body().to_string()));
            }
            std::future::ready(Ok(disposition))
        }
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.seen.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }
}
