//! Storage error types and result alias.
//!
//! This module defines the error types that can occur during store operations.
//! All store implementations must map their internal errors to these standardized
//! error types.
//!
//! # Error Types
//!
//! - [`StorageError::TableNotFound`] - The addressed table does not exist
//! - [`StorageError::InvalidItem`] - An item is missing its key attribute or is not an object
//! - [`StorageError::BatchTooLarge`] - A multi-item call exceeded the store's native limit
//! - [`StorageError::ChunkWriteFailed`] - One chunk of a bulk upsert failed
//! - [`StorageError::Connection`] - Network or connection-related failures
//! - [`StorageError::Serialization`] - Record encoding/decoding failures
//! - [`StorageError::Internal`] - Store-specific internal errors
//! - [`StorageError::Timeout`] - Operation exceeded time limit
//!
//! # Example
//!
//! ```
//! use keysign_storage::{StorageError, StorageResult};
//!
//! fn lookup(table: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::table_not_found(table))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via the `#[source]` attribute, enabling
/// debugging tools to display the full error context.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The addressed table does not exist.
    #[error("Table not found: {table}")]
    TableNotFound {
        /// Name of the missing table.
        table: String,
    },

    /// An item could not be stored because it is malformed.
    ///
    /// Raised when the item is not a JSON object or lacks a string value for
    /// the table's key attribute.
    #[error("Invalid item for table {table}: {reason}")]
    InvalidItem {
        /// Table the item was addressed to.
        table: String,
        /// Why the item was rejected.
        reason: String,
    },

    /// A multi-item call carried more items than the store accepts per call.
    ///
    /// Callers are expected to chunk; see [`BulkWriter`](crate::BulkWriter).
    #[error("Batch of {count} items exceeds the limit of {max}")]
    BatchTooLarge {
        /// Number of items in the rejected call.
        count: usize,
        /// Maximum number of items per call.
        max: usize,
    },

    /// One chunk of a bulk upsert failed.
    ///
    /// Chunks committed before the failure stay written; chunk writes are not
    /// transactional with each other.
    #[error("Chunk {chunk} failed after {committed} items were committed")]
    ChunkWriteFailed {
        /// Zero-based index of the failed chunk.
        chunk: usize,
        /// Number of items durably committed when the call gave up.
        committed: usize,
        /// The error returned by the failed chunk write.
        #[source]
        source: Box<StorageError>,
    },

    /// Connection or network error.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Serialization or deserialization error.
    ///
    /// Occurs when a record cannot be encoded into an item or decoded from one.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal store error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out.
    #[error("Operation timeout")]
    Timeout,
}

impl StorageError {
    /// Creates a new `TableNotFound` error.
    #[must_use]
    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound { table: table.into() }
    }

    /// Creates a new `InvalidItem` error.
    #[must_use]
    pub fn invalid_item(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidItem { table: table.into(), reason: reason.into() }
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Returns `true` for errors that may succeed if the operation is repeated.
    ///
    /// Only connection failures and timeouts are transient. A failed chunk is
    /// transient when its underlying cause is.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout => true,
            Self::ChunkWriteFailed { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source(err.to_string(), err)
    }
}

/// Errors raised when validating configuration values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric field is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// The minimum allowed value.
        min: String,
        /// The value that was supplied.
        value: String,
    },

    /// A numeric field is above its allowed maximum.
    #[error("{field} must be at most {max}, got {value}")]
    AboveMaximum {
        /// Name of the offending field.
        field: &'static str,
        /// The maximum allowed value.
        max: String,
        /// The value that was supplied.
        value: String,
    },

    /// A field could not be parsed or is otherwise unusable.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
