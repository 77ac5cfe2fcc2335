//! Key-checkout batch signing.
//!
//! Signs every document in a store using a fixed pool of signing keys,
//! spreading the work over concurrent workers. Key exclusivity comes from a
//! FIFO queue: a worker owns a key exactly while it holds the key's message,
//! and hands it back by re-enqueueing it.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────┐   purge, push every key   ┌──────────────────┐
//!  sign.start ───► │ Orchestrator │ ────────────────────────► │ KeyCheckoutQueue │
//!                  └──────┬───────┘                           └───┬──────────▲───┘
//!                         │ partition + publish                 pop │          │ push back
//!                         ▼                                         ▼          │
//!                ┌────────────────────┐   sign.batch   ┌──────────────────────┴┐
//!                │ BatchDispatchQueue │ ─────────────► │  SigningWorker (xN)   │
//!                └────────────────────┘                └──────────┬────────────┘
//!                                                     fetch │     │ bulk upsert
//!                                                           ▼     ▼
//!                                              DocumentStore     SignatureStore
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use keysign::{SignerApp, SignerConfig};
//! use keysign_queue::MemoryQueue;
//! use keysign_storage::MemoryBackend;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SignerConfig::builder()
//!         .key_pool_size(2)
//!         .document_seed_count(10)
//!         .seed_chunk_size(5)
//!         .build()?;
//!     let app = SignerApp::new(config, MemoryBackend::new(), MemoryQueue::new())?;
//!
//!     app.startup().setup().await?;
//!     app.documents().seed(10, true).await?;
//!
//!     let summary = app.handlers().start_sign(r#"{"batchSize": 4}"#).await?;
//!     assert_eq!(summary.batches, 3);
//!
//!     let report = app.runner().drain(Duration::from_millis(20)).await?;
//!     assert_eq!(report.signed, 10);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`checkout`] and [`dispatch`]: the two queues
//! - [`worker`]: per-batch signing state machine
//! - [`orchestrator`]: run lifecycle
//! - [`store`]: key, document and signature tables
//! - [`startup`] and [`handlers`]: setup, seeding and entry points
//! - [`runner`]: in-process consumer of the dispatch topic

#![deny(unsafe_code)]

pub mod app;
pub mod checkout;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handlers;
pub mod model;
pub mod orchestrator;
pub mod runner;
pub mod startup;
pub mod store;
pub mod validation;
pub mod worker;

pub use app::SignerApp;
pub use checkout::KeyCheckoutQueue;
pub use config::SignerConfig;
pub use dispatch::{BatchDispatchQueue, partition};
pub use error::{Result, SignerError};
pub use events::{AvailableKey, Event, SeedDocumentsCommand, SignBatchCommand, StartSignCommand};
pub use handlers::{HandlerOutput, Handlers};
pub use model::{Document, Key, Signature};
pub use orchestrator::{Orchestrator, RunSummary};
pub use runner::{DispatchRunner, DrainReport};
pub use startup::{SetupReport, StartupService};
pub use store::{DocumentStore, KeyStore, SignatureStore};
pub use validation::{FieldError, Validate, ValidationErrors};
pub use worker::{BatchOutcome, PartialFetch, SigningWorker, WorkerState};
