//! Table-oriented key-value store abstraction for the keysign pipeline.
//!
//! This crate provides the [`StorageBackend`] trait and the machinery built
//! directly on it: an in-memory store, a throttled chunked bulk writer and
//! reader, and paginated scans. The signing pipeline keeps its keys,
//! documents and signatures in stores of this shape.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Signing pipeline                       │
//! │      (startup, orchestrator, signing workers, handlers)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                       Record stores                         │
//! │     KeyStore │ DocumentStore │ SignatureStore (keysign)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     keysign-storage                         │
//! │   BulkWriter / BulkReader (chunking, in-flight cap)         │
//! │   scan_all (continuation-token paging)                      │
//! │   StorageBackend trait                                      │
//! │   (get, put, batch_get, batch_put, scan_page, tables)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      MemoryBackend                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use keysign_storage::{MemoryBackend, ScanRequest, StorageBackend, TableSchema, scan::scan_all};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!     backend.create_table(&TableSchema::new("message")).await?;
//!
//!     let item = json!({"id": "msg-000001", "content": "Alice"});
//!     backend.put("message", item.as_object().cloned().unwrap_or_default()).await?;
//!
//!     let all = scan_all(&backend, "message", &ScanRequest::default()).await?;
//!     assert_eq!(all.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! # Implementing a Store
//!
//! 1. Implement the [`StorageBackend`] trait
//! 2. Report the native per-call limits via `max_batch_write` / `max_batch_get`
//! 3. Map store-specific errors to [`StorageError`]
//! 4. Run the [`conformance`] suite against it
//!
//! See the [`memory`] module source for a reference implementation.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (item builders, pre-populated stores,
//!   [`FlakyBackend`](testutil::FlakyBackend)) and the `conformance` suite.
//! - **`failpoints`**: Compiles in the `bulk-before-chunk-write` and `memory-batch-put` fail
//!   points.

#![deny(unsafe_code)]

pub mod backend;
pub mod bulk;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod conformance;
pub mod error;
pub mod memory;
pub mod scan;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use backend::{StorageBackend, from_item, to_item};
pub use bulk::{BulkConfig, BulkProgress, BulkReader, BulkWriteStats, BulkWriter};
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use memory::{MemoryBackend, MemoryLimits};
pub use scan::{scan_all, scan_records};
pub use types::{ContinuationToken, Filter, Item, ScanPage, ScanRequest, TableSchema};
