//! SQLite store.
//!
//! The queue lives in a single table (default name `queue`):
//!
//! | column         | type        | nullable |
//! |----------------|-------------|----------|
//! | id             | CHAR(36)    | no, primary key |
//! | status         | VARCHAR     | no |
//! | attempts       | SMALLINT    | no |
//! | queue          | VARCHAR     | no |
//! | event          | VARCHAR     | yes |
//! | is_job         | BOOLEAN     | no, default false |
//! | body           | TEXT        | yes |
//! | priority       | SMALLINT    | yes |
//! | error          | TEXT        | yes |
//! | redelivered_at | DATETIME    | yes |
//! | created_at     | DATETIME    | no |
//! | exact_time     | BIGINT      | no |
//!
//! Timestamps are stored as fixed-width UTC text so that text comparison and
//! chronological order agree. The connection sits behind `Arc<Mutex<_>>` and
//! every statement runs on the blocking thread pool; the lock is never held
//! across an await.

use crate::error::{QueueError, StorageError};
use crate::message::{
    validate_name, Message, MessageId, MessageRecord, QueueName, Status, Timestamp,
};
use crate::store::{poll_window, QueueStats, Store, StoreOptions};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const COLUMNS: &str = "id, status, attempts, queue, event, is_job, body, priority, error, \
                       redelivered_at, created_at, exact_time";

/// Store backed by a SQLite table
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    options: StoreOptions,
    table: Arc<str>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, QueueError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::from_connection(conn, options)
    }

    /// Private in-memory database
    pub fn in_memory(options: StoreOptions) -> Result<Self, QueueError> {
        Self::from_connection(Connection::open_in_memory()?, options)
    }

    /// Wrap an existing connection
    pub fn from_connection(conn: Connection, options: StoreOptions) -> Result<Self, QueueError> {
        validate_name("table_name", &options.table_name)?;
        let table: Arc<str> = Arc::from(format!("\"{}\"", options.table_name));

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            options,
            table,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.options.table_name
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_connection<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(&Connection, &str) -> Result<T, QueueError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let table = self.table.clone();

        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| StorageError::Unavailable {
                message: format!("connection mutex poisoned: {e}"),
            })?;
            f(&*guard, &*table)
        })
        .await
        .map_err(|e| StorageError::Unavailable {
            message: format!("blocking task failed: {e}"),
        })?
    }

    async fn next_eligible(&self, queues: Vec<String>) -> Result<Option<Message>, QueueError> {
        self.with_connection(move |conn, table| {
            let now = Timestamp::now();
            let mut sql = format!(
                "SELECT {COLUMNS} FROM {table} \
                 WHERE status IN ('NEW', 'REDELIVERED') \
                 AND (redelivered_at IS NULL OR redelivered_at <= ?1) \
                 AND exact_time <= ?2"
            );
            let mut values = vec![
                Value::Text(format_timestamp(now)),
                Value::Integer(now.epoch_seconds()),
            ];

            if !queues.is_empty() {
                let placeholders: Vec<String> = (0..queues.len())
                    .map(|i| format!("?{}", i + 3))
                    .collect();
                sql.push_str(&format!(" AND queue IN ({})", placeholders.join(", ")));
                values.extend(queues.into_iter().map(Value::Text));
            }
            sql.push_str(" ORDER BY priority ASC, created_at ASC, rowid ASC LIMIT 1");

            let row = conn
                .query_row(&sql, params_from_iter(values.iter()), read_row)
                .optional()?;
            row.map(RawRow::into_message).transpose()
        })
        .await
    }
}

fn format_timestamp(ts: Timestamp) -> String {
    ts.as_datetime().format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(column: &str, text: &str) -> Result<chrono::DateTime<chrono::Utc>, StorageError> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| StorageError::CorruptRow {
            column: column.to_string(),
            message: e.to_string(),
        })
}

fn missing_id(operation: &str) -> QueueError {
    StorageError::MissingId {
        operation: operation.to_string(),
    }
    .into()
}

/// Row exactly as SQLite returns it
struct RawRow {
    id: String,
    status: String,
    attempts: i64,
    queue: String,
    event: Option<String>,
    is_job: bool,
    body: Option<String>,
    priority: Option<i16>,
    error: Option<String>,
    redelivered_at: Option<String>,
    created_at: String,
    exact_time: i64,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        status: row.get(1)?,
        attempts: row.get(2)?,
        queue: row.get(3)?,
        event: row.get(4)?,
        is_job: row.get(5)?,
        body: row.get(6)?,
        priority: row.get(7)?,
        error: row.get(8)?,
        redelivered_at: row.get(9)?,
        created_at: row.get(10)?,
        exact_time: row.get(11)?,
    })
}

impl RawRow {
    fn into_message(self) -> Result<Message, QueueError> {
        let redelivered_at = self
            .redelivered_at
            .as_deref()
            .map(|text| parse_timestamp("redelivered_at", text))
            .transpose()?;
        let created_at = parse_timestamp("created_at", &self.created_at)?;

        let record = MessageRecord {
            id: self.id,
            status: self.status,
            attempts: self.attempts,
            queue: self.queue,
            event: self.event,
            is_job: self.is_job,
            body: self.body,
            priority: self.priority,
            error: self.error,
            redelivered_at,
            created_at,
            exact_time: self.exact_time,
        };
        Ok(Message::try_from(record)?)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn init(&self) -> Result<(), QueueError> {
        let table_name = self.options.table_name.clone();
        self.with_connection(move |conn, table| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id CHAR(36) NOT NULL PRIMARY KEY,
                    status VARCHAR(255) NOT NULL,
                    attempts SMALLINT NOT NULL DEFAULT 0,
                    queue VARCHAR(255) NOT NULL,
                    event VARCHAR(255),
                    is_job BOOLEAN NOT NULL DEFAULT 0,
                    body TEXT,
                    priority SMALLINT,
                    error TEXT,
                    redelivered_at DATETIME,
                    created_at DATETIME NOT NULL,
                    exact_time BIGINT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS \"{table_name}_fetch_idx\"
                    ON {table} (priority, created_at, queue, status, event, id);"
            ))?;
            Ok(())
        })
        .await?;

        info!(table = %self.options.table_name, "Queue table ready");
        Ok(())
    }

    async fn send(&self, mut message: Message) -> Result<Message, QueueError> {
        message.assign_id(MessageId::new())?;
        let row = message.clone();

        self.with_connection(move |conn, table| {
            let affected = conn.execute(
                &format!("INSERT INTO {table} ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
                params![
                    row.id()?.as_str(),
                    row.status().as_str(),
                    row.attempts(),
                    row.queue().as_str(),
                    row.event(),
                    row.is_job(),
                    row.body(),
                    row.priority().value(),
                    row.error(),
                    row.redelivered_at().map(format_timestamp),
                    format_timestamp(row.created_at()),
                    row.exact_time(),
                ],
            )?;

            if affected != 1 {
                return Err(StorageError::NotConfirmed { affected }.into());
            }
            Ok(())
        })
        .await?;

        debug!(message_id = %message.id()?, queue = %message.queue(), "Message stored");
        Ok(message)
    }

    async fn fetch_next(&self, queues: &[QueueName]) -> Result<Option<Message>, QueueError> {
        let queues: Vec<String> = queues.iter().map(|q| q.as_str().to_string()).collect();
        poll_window(&self.options, || self.next_eligible(queues.clone())).await
    }

    async fn claim(&self, message: &mut Message) -> Result<bool, QueueError> {
        let id = message.id().map_err(|_| missing_id("claim"))?.to_string();

        let claimed = self
            .with_connection(move |conn, table| {
                let affected = conn.execute(
                    &format!(
                        "UPDATE {table} SET status = ?1 \
                         WHERE id = ?2 AND status IN ('NEW', 'REDELIVERED')"
                    ),
                    params![Status::InProcess.as_str(), id],
                )?;
                Ok(affected == 1)
            })
            .await?;

        if claimed {
            message.set_status(Status::InProcess);
        }
        Ok(claimed)
    }

    async fn change_status(&self, message: &mut Message, status: Status) -> Result<(), QueueError> {
        let id = message.id().map_err(|_| missing_id("change status"))?.to_string();

        // FAILURE rows must not carry a redelivery time
        self.with_connection(move |conn, table| {
            conn.execute(
                &format!(
                    "UPDATE {table} SET status = ?1, \
                     redelivered_at = CASE WHEN ?1 = 'FAILURE' THEN NULL ELSE redelivered_at END \
                     WHERE id = ?2"
                ),
                params![status.as_str(), id],
            )?;
            Ok(())
        })
        .await?;

        message.set_status(status);
        Ok(())
    }

    async fn fail(&self, message: &mut Message, error: Option<String>) -> Result<(), QueueError> {
        let id = message.id().map_err(|_| missing_id("fail"))?.to_string();
        let recorded = error.clone();

        self.with_connection(move |conn, table| {
            conn.execute(
                &format!(
                    "UPDATE {table} SET status = ?1, error = ?2, redelivered_at = NULL WHERE id = ?3"
                ),
                params![Status::Failure.as_str(), recorded, id],
            )?;
            Ok(())
        })
        .await?;

        message.set_status(Status::Failure);
        message.set_error(error);
        Ok(())
    }

    async fn delete(&self, message: &Message) -> Result<(), QueueError> {
        let id = message.id().map_err(|_| missing_id("delete"))?.to_string();

        self.with_connection(move |conn, table| {
            conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
            Ok(())
        })
        .await
    }

    async fn find(&self, id: &MessageId) -> Result<Option<Message>, QueueError> {
        let id = id.to_string();

        self.with_connection(move |conn, table| {
            let row = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM {table} WHERE id = ?1"),
                    params![id],
                    read_row,
                )
                .optional()?;
            row.map(RawRow::into_message).transpose()
        })
        .await
    }

    async fn list_by_status(
        &self,
        status: Status,
        queue: Option<QueueName>,
        limit: usize,
    ) -> Result<Vec<Message>, QueueError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_connection(move |conn, table| {
            let mut values = vec![Value::Text(status.as_str().to_string())];
            let mut sql = format!("SELECT {COLUMNS} FROM {table} WHERE status = ?1");
            if let Some(queue) = queue {
                sql.push_str(" AND queue = ?2");
                values.push(Value::Text(queue.to_string()));
            }
            sql.push_str(&format!(" ORDER BY created_at ASC, rowid ASC LIMIT {limit}"));

            let mut statement = conn.prepare(&sql)?;
            let rows = statement.query_map(params_from_iter(values.iter()), read_row)?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?.into_message()?);
            }
            Ok(messages)
        })
        .await
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.with_connection(|conn, table| {
            let mut statement =
                conn.prepare(&format!("SELECT status, COUNT(*) FROM {table} GROUP BY status"))?;
            let rows = statement.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut stats = QueueStats::default();
            for row in rows {
                let (status, count) = row?;
                let status = Status::from_str(&status).map_err(|e| StorageError::CorruptRow {
                    column: "status".to_string(),
                    message: e.to_string(),
                })?;
                stats.add(status, u64::try_from(count).unwrap_or_default());
            }
            Ok(stats)
        })
        .await
    }
}
