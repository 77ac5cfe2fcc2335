//! Wire messages exchanged over the queues.
//!
//! Every message travels inside an [`Event`] envelope of the form
//! `{"type": <tag>, "detail": {...}}`. Tags are fixed strings chosen here and
//! never derived from Rust type names, so renaming a type cannot change the
//! wire format.
//!
//! | Tag | Payload | Topic |
//! |-----|---------|-------|
//! | `key.available` | [`AvailableKey`] | key checkout |
//! | `sign.batch` | [`SignBatchCommand`] | sign dispatch |
//! | `sign.start` | [`StartSignCommand`] | run trigger |
//! | `seed.documents` | [`SeedDocumentsCommand`] | seed |

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    error::{Result, SignerError},
    model::Key,
};

/// Tag of [`AvailableKey`] messages.
pub const KEY_AVAILABLE: &str = "key.available";

/// Tag of [`SignBatchCommand`] messages.
pub const SIGN_BATCH: &str = "sign.batch";

/// Tag of [`StartSignCommand`] messages.
pub const SIGN_START: &str = "sign.start";

/// Tag of [`SeedDocumentsCommand`] messages.
pub const SEED_DOCUMENTS: &str = "seed.documents";

/// A key that is free to be checked out.
///
/// The public half is not republished.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct AvailableKey {
    /// Key id.
    pub id: String,
    /// Base64 secret key material.
    pub private: String,
}

impl AvailableKey {
    /// Creates an available-key message.
    pub fn new(id: impl Into<String>, private: impl Into<String>) -> Self {
        Self { id: id.into(), private: private.into() }
    }
}

impl From<&Key> for AvailableKey {
    fn from(key: &Key) -> Self {
        Self::new(key.id.clone(), key.private.clone())
    }
}

impl fmt::Debug for AvailableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvailableKey")
            .field("id", &self.id)
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// One batch of document ids to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignBatchCommand {
    /// Zero-based position of the batch within its run.
    #[serde(alias = "batch")]
    pub batch_index: usize,
    /// Ids of the documents in the batch, in backlog order.
    pub message_ids: Vec<String>,
}

/// Starts a signing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSignCommand {
    /// Number of documents per dispatched batch.
    pub batch_size: usize,
}

/// Seeds `count` random documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedDocumentsCommand {
    /// Number of documents to create.
    pub count: usize,
}

/// Tagged envelope carried by every queue message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum Event {
    /// A key returned to the pool.
    #[serde(rename = "key.available")]
    KeyAvailable(AvailableKey),
    /// A batch to sign.
    #[serde(rename = "sign.batch")]
    SignBatch(SignBatchCommand),
    /// A run trigger.
    #[serde(rename = "sign.start")]
    StartSign(StartSignCommand),
    /// A seeding request.
    #[serde(rename = "seed.documents")]
    SeedDocuments(SeedDocumentsCommand),
}

impl Event {
    /// The wire tag of this event.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::KeyAvailable(_) => KEY_AVAILABLE,
            Self::SignBatch(_) => SIGN_BATCH,
            Self::StartSign(_) => SIGN_START,
            Self::SeedDocuments(_) => SEED_DOCUMENTS,
        }
    }

    /// Encodes the envelope as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Queue`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SignerError::Queue(e.into()))
    }

    /// Unwraps the payload, failing if the event carries a different type.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::UnexpectedEvent`] naming both tags.
    pub fn into_payload<T: EventPayload>(self) -> Result<T> {
        let actual = self.tag();
        T::from_event(self).ok_or_else(|| SignerError::UnexpectedEvent {
            expected: T::TAG,
            actual: actual.to_owned(),
        })
    }
}

/// A message type that can travel inside an [`Event`].
pub trait EventPayload: Sized {
    /// Wire tag of this payload type.
    const TAG: &'static str;

    /// Wraps the payload in its envelope.
    fn into_event(self) -> Event;

    /// Extracts the payload if `event` carries this type.
    fn from_event(event: Event) -> Option<Self>;
}

macro_rules! event_payload {
    ($ty:ty, $variant:ident, $tag:expr) => {
        impl EventPayload for $ty {
            const TAG: &'static str = $tag;

            fn into_event(self) -> Event {
                Event::$variant(self)
            }

            fn from_event(event: Event) -> Option<Self> {
                match event {
                    Event::$variant(payload) => Some(payload),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Event {
            fn from(payload: $ty) -> Self {
                payload.into_event()
            }
        }
    };
}

event_payload!(AvailableKey, KeyAvailable, KEY_AVAILABLE);
event_payload!(SignBatchCommand, SignBatch, SIGN_BATCH);
event_payload!(StartSignCommand, StartSign, SIGN_START);
event_payload!(SeedDocumentsCommand, SeedDocuments, SEED_DOCUMENTS);
