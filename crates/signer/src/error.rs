//! Signing pipeline error types.
//!
//! [`SignerError`] is the error surfaced by every entry point of this crate.
//! Store and queue failures are wrapped unchanged so callers can still reach
//! the underlying [`StorageError`] or [`QueueError`] and its transience.

use std::time::Duration;

use keysign_queue::QueueError;
use keysign_storage::{ConfigError, StorageError};
use thiserror::Error;

use crate::validation::ValidationErrors;

/// Result type alias for signing pipeline operations.
pub type Result<T, E = SignerError> = std::result::Result<T, E>;

/// Errors raised by the signing pipeline.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SignerError {
    /// No key could be checked out before the timeout elapsed.
    ///
    /// Fatal for the current invocation. Redelivery of the batch is left to
    /// the dispatch transport.
    #[error("no signing key became available within {timeout:?}")]
    KeyUnavailable {
        /// How long the checkout waited.
        timeout: Duration,
    },

    /// An inbound message failed boundary validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// A key's stored material could not be decoded into a signing key.
    #[error("invalid key material for key {key_id}: {reason}")]
    InvalidKeyMaterial {
        /// Id of the offending key.
        key_id: String,
        /// Why the material was rejected.
        reason: String,
    },

    /// A checked-out key could not be pushed back onto the checkout queue.
    #[error("failed to return key {key_id} to the checkout queue")]
    KeyReturnFailed {
        /// Id of the key that could not be returned.
        key_id: String,
        /// The queue error raised by the push.
        #[source]
        source: QueueError,
    },

    /// A message carried a different event type than the consumer handles.
    #[error("expected {expected} event, got {actual}")]
    UnexpectedEvent {
        /// Tag the consumer handles.
        expected: &'static str,
        /// Tag found on the message.
        actual: String,
    },

    /// A store operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A queue operation failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SignerError {
    /// Creates a [`SignerError::InvalidKeyMaterial`].
    pub fn invalid_key_material(key_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKeyMaterial { key_id: key_id.into(), reason: reason.into() }
    }

    /// Returns `true` if retrying the same invocation later may succeed.
    ///
    /// A checkout timeout is transient: keys return to the pool as other
    /// workers finish. Validation and key material errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::KeyUnavailable { .. } => true,
            Self::KeyReturnFailed { source, .. } | Self::Queue(source) => source.is_transient(),
            Self::Storage(err) => err.is_transient(),
            Self::Validation(_)
            | Self::InvalidKeyMaterial { .. }
            | Self::UnexpectedEvent { .. }
            | Self::Config(_) => false,
        }
    }
}
