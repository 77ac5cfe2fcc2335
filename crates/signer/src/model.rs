//! Persisted records: keys, documents and signatures.
//!
//! Each record lives in its own table keyed by `id`. Ownership of a key is
//! never recorded here; a key is checked out by whoever popped its
//! [`AvailableKey`](crate::events::AvailableKey) message.

use std::fmt;

use keysign_storage::TableSchema;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Table holding the signing key pool.
pub const KEY_TABLE: &str = "key";

/// Table holding the documents to sign.
pub const DOCUMENT_TABLE: &str = "message";

/// Table holding produced signatures, keyed by document id.
pub const SIGNATURE_TABLE: &str = "signature";

/// Schema of the key table.
#[must_use]
pub fn key_schema() -> TableSchema {
    TableSchema::new(KEY_TABLE)
}

/// Schema of the document table.
#[must_use]
pub fn document_schema() -> TableSchema {
    TableSchema::new(DOCUMENT_TABLE)
}

/// Schema of the signature table.
#[must_use]
pub fn signature_schema() -> TableSchema {
    TableSchema::new(SIGNATURE_TABLE)
}

/// A signing key pair.
///
/// `private` is the base64 Ed25519 secret seed and `public` the base64
/// verifying key. All fields are scrubbed from memory on drop, and `Debug`
/// never prints the private half.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Key {
    /// Unique key id.
    pub id: String,
    /// Base64 secret key material.
    pub private: String,
    /// Base64 public key material.
    pub public: String,
}

impl Key {
    /// Creates a key record.
    pub fn new(
        id: impl Into<String>,
        private: impl Into<String>,
        public: impl Into<String>,
    ) -> Self {
        Self { id: id.into(), private: private.into(), public: public.into() }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("private", &"[REDACTED]")
            .field("public", &self.public)
            .finish()
    }
}

/// A document awaiting, or holding, a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Unique document id.
    pub id: String,
    /// Content that gets signed.
    pub content: String,
}

impl Document {
    /// Creates a document record.
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { id: id.into(), content: content.into() }
    }
}

/// The signature of one document, keyed by the document id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Id of the signed document.
    pub id: String,
    /// Id of the key that produced the signature.
    pub key_id: String,
    /// Base64 signature over the document content.
    pub signature: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_debug_redacts_private() {
        let key = Key::new("k-0123456789", "c2VjcmV0LXNlZWQ=", "cHVibGlj");
        let rendered = format!("{key:?}");
        assert!(rendered.contains("k-0123456789"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("c2VjcmV0LXNlZWQ="));
    }

    #[test]
    fn test_signature_wire_names() {
        let sig = Signature {
            id: "doc-0000000001".into(),
            key_id: "k-0123456789".into(),
            signature: "c2ln".into(),
        };
        let value = serde_json::to_value(&sig).unwrap();
        assert_eq!(value["keyId"], "k-0123456789");
        assert!(value.get("key_id").is_none());

        let back: Signature = serde_json::from_value(value).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn test_schemas_use_table_names() {
        assert_eq!(key_schema().name(), KEY_TABLE);
        assert_eq!(document_schema().name(), DOCUMENT_TABLE);
        assert_eq!(signature_schema().name(), SIGNATURE_TABLE);
        assert_eq!(signature_schema().key_attribute(), "id");
    }
}
