//! Error types for queue operations.
//!
//! Every fallible operation in the crate returns [`QueueError`], which wraps one
//! of five categories:
//!
//! - [`ValidationError`] - malformed names, out-of-range priorities, unknown statuses
//! - [`ConfigError`] - duplicate or missing job / processor registrations
//! - [`StorageError`] - persistence failures and precondition violations
//! - [`SerializationError`] - bodies that cannot be encoded or decoded
//! - [`UnsupportedResultError`] - handler results outside ACK / REJECT / REQUEUE

use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Unsupported handler result: {0}")]
    UnsupportedResult(#[from] UnsupportedResultError),
}

impl QueueError {
    /// Check if error is transient and the operation may succeed if retried.
    ///
    /// Only storage failures can be transient. Precondition violations such as
    /// a missing id are permanent because retrying cannot change the outcome.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Validation(_) => false,
            Self::Config(_) => false,
            Self::Serialization(_) => false,
            Self::UnsupportedResult(_) => false,
        }
    }
}

/// Validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

/// Registration and lookup errors for jobs and processors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Job \"{alias}\" is already registered in the jobs")]
    DuplicateJob { alias: String },

    #[error("Processor for queue \"{queue}\" is already registered")]
    DuplicateProcessor { queue: String },

    #[error("Job \"{name}\" is not registered in the jobs")]
    JobNotRegistered { name: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration loading failed: {message}")]
    Loading { message: String },
}

/// Persistence failures and precondition violations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Write was not confirmed: {affected} rows affected, expected 1")]
    NotConfirmed { affected: usize },

    #[error("Message has no id; cannot {operation}")]
    MissingId { operation: String },

    #[error("Message already persisted with id {id}")]
    AlreadyPersisted { id: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Stored row has invalid {column}: {message}")]
    CorruptRow { column: String, message: String },

    #[error("Storage unavailable: {message}")]
    Unavailable { message: String },
}

impl StorageError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotConfirmed { .. } => true,
            Self::MissingId { .. } => false,
            Self::AlreadyPersisted { .. } => false,
            Self::Database { .. } => true,
            Self::CorruptRow { .. } => false,
            Self::Unavailable { .. } => true,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

/// Errors during message body serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Body of type {type_name} cannot be serialized: {message}")]
    Unserializable { type_name: String, message: String },
}

/// A handler produced a result that is not one of ACK, REJECT or REQUEUE
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("\"{value}\" is not a supported result; expected ACK, REJECT or REQUEUE")]
pub struct UnsupportedResultError {
    pub value: String,
}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.into())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
