//! Message types for queue operations including core domain identifiers.

use crate::error::{StorageError, ValidationError};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

const MAX_NAME_LENGTH: usize = 255;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9._-]+$").expect("name pattern is valid"))
}

/// Validate a queue name, job alias or table name.
///
/// Names are 1-255 characters drawn from ASCII letters, digits, `.`, `_` and `-`.
pub(crate) fn validate_name(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: format!("must be 1-{} characters", MAX_NAME_LENGTH),
        });
    }

    if !name_pattern().is_match(name) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: format!("\"{}\" contains invalid characters", name),
        });
    }

    Ok(())
}

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_name("queue_name", &name)?;
        Ok(Self(name))
    }

    /// Name of the queue jobs land on unless they declare otherwise
    pub fn default_queue() -> Self {
        Self("default".to_string())
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(value: QueueName) -> Self {
        value.0
    }
}

/// Unique identifier for a persisted message (UUID v4, 36 characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        uuid::Uuid::parse_str(s).map_err(|e| ValidationError::InvalidFormat {
            field: "message_id".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for MessageId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MessageId> for String {
    fn from(value: MessageId) -> Self {
        value.0
    }
}

/// Timestamp wrapper for consistent time handling.
///
/// Precision is truncated to microseconds so that values survive a round trip
/// through the storage layer unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "DateTime<Utc>")]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// 0000-01-01 00:00:00 UTC in microseconds since the epoch
    const EARLIEST_MICROS: i64 = -62_167_219_200_000_000;

    /// 9999-12-31 23:59:59.999999 UTC in microseconds since the epoch.
    /// Stored text compares in time order only while the year has four digits.
    const LATEST_MICROS: i64 = 253_402_300_799_999_999;

    /// Create timestamp for current time
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Create timestamp from DateTime, clamped to years 0000 through 9999
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let micros = dt
            .timestamp_micros()
            .clamp(Self::EARLIEST_MICROS, Self::LATEST_MICROS);
        let clamped = DateTime::from_timestamp_micros(micros).unwrap_or(dt);
        Self(clamped.trunc_subsecs(6))
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Whole seconds since the Unix epoch
    pub fn epoch_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// Timestamp shifted by the given number of seconds, saturating at the
    /// representable range
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        let shifted = Duration::try_seconds(seconds)
            .and_then(|d| self.0.checked_add_signed(d))
            .unwrap_or(if seconds >= 0 {
                DateTime::<Utc>::MAX_UTC
            } else {
                DateTime::<Utc>::MIN_UTC
            });
        Self::from_datetime(shifted)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::from_datetime(value)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.6f"))
    }
}

// ============================================================================
// Priority and Status
// ============================================================================

/// Dequeue priority. Lower numeric values are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
#[repr(i16)]
pub enum Priority {
    VeryLow = -2,
    Low = -1,
    #[default]
    Default = 0,
    High = 1,
    VeryHigh = 2,
}

impl Priority {
    /// Numeric value as stored in the `priority` column
    pub fn value(self) -> i16 {
        self as i16
    }
}

impl TryFrom<i16> for Priority {
    type Error = ValidationError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            -2 => Ok(Self::VeryLow),
            -1 => Ok(Self::Low),
            0 => Ok(Self::Default),
            1 => Ok(Self::High),
            2 => Ok(Self::VeryHigh),
            other => Err(ValidationError::OutOfRange {
                field: "priority".to_string(),
                message: format!("{} is not within -2..=2", other),
            }),
        }
    }
}

impl From<Priority> for i16 {
    fn from(value: Priority) -> Self {
        value.value()
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Lifecycle status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    New,
    InProcess,
    Redelivered,
    Failure,
    UndefinedHandler,
}

impl Status {
    /// All valid statuses, in lifecycle order
    pub const ALL: [Status; 5] = [
        Status::New,
        Status::InProcess,
        Status::Redelivered,
        Status::Failure,
        Status::UndefinedHandler,
    ];

    /// Canonical column value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::InProcess => "IN_PROCESS",
            Self::Redelivered => "REDELIVERED",
            Self::Failure => "FAILURE",
            Self::UndefinedHandler => "UNDEFINED_HANDLER",
        }
    }

    /// Whether consumers may fetch a message in this status
    pub fn is_fetchable(&self) -> bool {
        matches!(self, Self::New | Self::Redelivered)
    }

    /// Whether the status is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failure)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "status".to_string(),
                message: format!("\"{}\" is not a valid status", s),
            })
    }
}

// ============================================================================
// Message
// ============================================================================

/// A unit of work stored in the queue table.
///
/// Fields controlled by the producer (priority, event, visibility time) are set
/// with the `with_*` builders. Lifecycle fields (id, status, attempts, error,
/// redelivery time) change only through the crate's producer, consumer and
/// store code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    id: Option<MessageId>,
    status: Status,
    queue: QueueName,
    event: Option<String>,
    is_job: bool,
    body: String,
    priority: Priority,
    attempts: u32,
    error: Option<String>,
    exact_time: i64,
    created_at: Timestamp,
    redelivered_at: Option<Timestamp>,
}

impl Message {
    /// Create a new, unsent message with status `NEW` that is visible immediately
    pub fn new(queue: QueueName, body: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: None,
            status: Status::New,
            queue,
            event: None,
            is_job: false,
            body: body.into(),
            priority: Priority::Default,
            attempts: 0,
            error: None,
            exact_time: now.epoch_seconds(),
            created_at: now,
            redelivered_at: None,
        }
    }

    /// Set dequeue priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the event tag used to route job messages
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Hide the message from consumers until the given epoch second
    pub fn with_exact_time(mut self, epoch_seconds: i64) -> Self {
        self.exact_time = epoch_seconds;
        self
    }

    /// Hide the message from consumers for the given number of seconds from now
    pub fn with_delay(mut self, seconds: i64) -> Self {
        self.exact_time = Timestamp::now().epoch_seconds().saturating_add(seconds);
        self
    }

    /// Get the storage id.
    ///
    /// A message only has an id once a store has persisted it.
    pub fn id(&self) -> Result<&MessageId, StorageError> {
        self.id.as_ref().ok_or_else(|| StorageError::MissingId {
            operation: "read id".to_string(),
        })
    }

    /// Whether a store has assigned an id
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    pub fn is_job(&self) -> bool {
        self.is_job
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn exact_time(&self) -> i64 {
        self.exact_time
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn redelivered_at(&self) -> Option<Timestamp> {
        self.redelivered_at
    }

    /// Whether this message is a redelivery of an earlier one
    pub fn is_redelivered(&self) -> bool {
        self.status == Status::Redelivered || self.redelivered_at.is_some()
    }

    /// Whether a consumer may fetch this message at `now`
    pub fn is_eligible(&self, now: Timestamp) -> bool {
        self.status.is_fetchable()
            && self.redelivered_at.map_or(true, |at| at <= now)
            && self.exact_time <= now.epoch_seconds()
    }

    /// Record the id assigned by a store.
    ///
    /// Ids are write-once; assigning a second id fails.
    pub(crate) fn assign_id(&mut self, id: MessageId) -> Result<(), StorageError> {
        if let Some(existing) = &self.id {
            return Err(StorageError::AlreadyPersisted {
                id: existing.to_string(),
            });
        }
        self.id = Some(id);
        Ok(())
    }

    // Lifecycle mutation, reachable only from producer, consumer and stores.

    pub(crate) fn set_status(&mut self, status: Status) {
        self.status = status;
        if status.is_terminal() {
            self.redelivered_at = None;
        }
    }

    pub(crate) fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    pub(crate) fn mark_as_job(mut self) -> Self {
        self.is_job = true;
        self
    }

    /// Build the successor of `previous` for redelivery.
    ///
    /// The successor carries queue, body, priority, event, job flag and error
    /// forward, and has one more attempt than `previous`.
    pub(crate) fn derive_redelivery(
        previous: &Message,
        status: Status,
        redelivered_at: Option<Timestamp>,
    ) -> Self {
        let mut next = Message::new(previous.queue.clone(), previous.body.clone())
            .with_priority(previous.priority);
        next.event = previous.event.clone();
        next.is_job = previous.is_job;
        next.error = previous.error.clone();
        next.attempts = previous.attempts.saturating_add(1);
        next.status = status;
        next.redelivered_at = redelivered_at;
        if status.is_terminal() {
            next.redelivered_at = None;
        }
        next
    }
}

// ============================================================================
// Storage Row
// ============================================================================

/// Raw row of the queue table, as read by a store driver.
///
/// Nullable columns fall back to the message defaults when converted: an
/// absent body becomes empty and an absent priority becomes `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub status: String,
    pub attempts: i64,
    pub queue: String,
    pub event: Option<String>,
    pub is_job: bool,
    pub body: Option<String>,
    pub priority: Option<i16>,
    pub error: Option<String>,
    pub redelivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub exact_time: i64,
}

impl TryFrom<MessageRecord> for Message {
    type Error = StorageError;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        let corrupt = |column: &str, err: &dyn std::fmt::Display| StorageError::CorruptRow {
            column: column.to_string(),
            message: err.to_string(),
        };

        let id = MessageId::from_str(&record.id).map_err(|e| corrupt("id", &e))?;
        let status = Status::from_str(&record.status).map_err(|e| corrupt("status", &e))?;
        let queue = QueueName::new(record.queue).map_err(|e| corrupt("queue", &e))?;
        let priority = Priority::try_from(record.priority.unwrap_or(0))
            .map_err(|e| corrupt("priority", &e))?;
        let attempts = u32::try_from(record.attempts).map_err(|e| corrupt("attempts", &e))?;

        let mut message = Message {
            id: None,
            status,
            queue,
            event: record.event,
            is_job: record.is_job,
            body: record.body.unwrap_or_default(),
            priority,
            attempts,
            error: record.error,
            exact_time: record.exact_time,
            created_at: Timestamp::from_datetime(record.created_at),
            redelivered_at: record.redelivered_at.map(Timestamp::from_datetime),
        };
        message.assign_id(id)?;
        Ok(message)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
