//! Throttled chunked bulk operations.
//!
//! Stores accept a bounded number of items per multi-item call. This module
//! provides [`BulkWriter`], which splits an arbitrarily large upsert into
//! chunks and writes them with at most `max_in_flight` chunk writes running at
//! once, and [`BulkReader`], the matching chunked fetch-by-id.
//!
//! # Examples
//!
//! ```
//! use keysign_storage::{BulkConfig, BulkWriter, MemoryBackend, StorageBackend, TableSchema};
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! backend.create_table(&TableSchema::new("signature")).await.unwrap();
//!
//! let config = BulkConfig::builder().chunk_size(25).max_in_flight(4).build().unwrap();
//! let writer = BulkWriter::new(backend.clone(), config);
//!
//! let items = (0..100)
//!     .map(|i| json!({"id": format!("doc-{i:06}")}).as_object().cloned().unwrap())
//!     .collect();
//! let stats = writer.bulk_upsert("signature", items).await.unwrap();
//!
//! assert_eq!(stats.items, 100);
//! assert_eq!(stats.chunks, 4);
//! # });
//! ```
//!
//! # Failure semantics
//!
//! A failed chunk is not retried. Once a chunk fails no further chunks are
//! started, chunks already in flight are allowed to finish, and the call
//! returns [`StorageError::ChunkWriteFailed`] carrying the number of items
//! that were committed. Committed chunks are not rolled back.

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use fail::fail_point;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::{JoinError, JoinSet},
};
use tracing::{Instrument, debug, trace, warn};

use crate::{ConfigError, StorageBackend, StorageError, StorageResult, types::Item};

/// Default number of items per chunk, matching the common native multi-item
/// write limit of document stores.
pub const DEFAULT_CHUNK_SIZE: usize = 25;

/// Configuration for bulk reads and writes.
///
/// # Validation
///
/// - `chunk_size` must be `>= 1`
/// - `max_in_flight`, when set, must be `>= 1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Maximum number of items per chunk. Clamped to the store's own limit.
    pub(crate) chunk_size: usize,
    /// Maximum number of chunk operations in flight. `None` is unbounded.
    pub(crate) max_in_flight: Option<usize>,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE, max_in_flight: None }
    }
}

#[bon::bon]
impl BulkConfig {
    /// Creates a new bulk configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `chunk_size` or `max_in_flight` is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_CHUNK_SIZE)] chunk_size: usize,
        max_in_flight: Option<usize>,
    ) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "chunk_size",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if max_in_flight == Some(0) {
            return Err(ConfigError::BelowMinimum {
                field: "max_in_flight",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(Self { chunk_size, max_in_flight })
    }

    /// Returns the configured chunk size.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the in-flight cap, or `None` when unbounded.
    #[must_use]
    pub fn max_in_flight(&self) -> Option<usize> {
        self.max_in_flight
    }
}

/// Live progress of bulk writes, readable while a write is in flight.
///
/// A single `BulkProgress` may be shared between several writers to observe
/// their combined throughput.
#[derive(Debug, Default)]
pub struct BulkProgress {
    items: AtomicUsize,
    chunks: AtomicUsize,
}

impl BulkProgress {
    /// Creates a zeroed counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Items committed so far.
    #[must_use]
    pub fn items_committed(&self) -> usize {
        self.items.load(Ordering::Relaxed)
    }

    /// Chunks committed so far.
    #[must_use]
    pub fn chunks_committed(&self) -> usize {
        self.chunks.load(Ordering::Relaxed)
    }

    fn record(&self, items: usize) {
        self.items.fetch_add(items, Ordering::Relaxed);
        self.chunks.fetch_add(1, Ordering::Relaxed);
    }
}

/// Statistics from one successful [`BulkWriter::bulk_upsert`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteStats {
    /// Number of items written.
    pub items: usize,
    /// Number of chunks written.
    pub chunks: usize,
    /// Wall-clock time spent.
    pub duration: Duration,
}

/// Chunked, concurrency-capped bulk upsert.
///
/// # Cloning
///
/// Clones share the same backend and the same [`BulkProgress`].
#[derive(Debug, Clone)]
pub struct BulkWriter<B> {
    backend: B,
    config: BulkConfig,
    progress: Arc<BulkProgress>,
}

impl<B> BulkWriter<B>
where
    B: StorageBackend + Clone + 'static,
{
    /// Creates a writer with its own progress counter.
    pub fn new(backend: B, config: BulkConfig) -> Self {
        Self { backend, config, progress: Arc::new(BulkProgress::new()) }
    }

    /// Replaces the progress counter with a shared one.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<BulkProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Returns the progress counter.
    #[must_use]
    pub fn progress(&self) -> Arc<BulkProgress> {
        Arc::clone(&self.progress)
    }

    /// Returns the writer's configuration.
    #[must_use]
    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn effective_chunk_size(&self) -> usize {
        self.config.chunk_size.min(self.backend.max_batch_write()).max(1)
    }

    /// Upserts `items` into `table` in chunks.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ChunkWriteFailed`] if any chunk fails. Items in
    /// chunks that completed are committed and counted in `committed`.
    #[tracing::instrument(skip(self, items), fields(count = items.len()))]
    pub async fn bulk_upsert(&self, table: &str, items: Vec<Item>) -> StorageResult<BulkWriteStats> {
        let start = Instant::now();
        let chunk_size = self.effective_chunk_size();
        debug!(
            table,
            count = items.len(),
            chunk_size,
            max_in_flight = ?self.config.max_in_flight,
            "enter-bulk-upsert"
        );

        if items.is_empty() {
            return Ok(BulkWriteStats::default());
        }

        let table: Arc<str> = Arc::from(table);
        let limiter = self.config.max_in_flight.map(|n| Arc::new(Semaphore::new(n)));
        let failed = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();
        let mut tally = Tally::default();

        let mut remaining = items.into_iter().peekable();
        let mut index = 0;
        while remaining.peek().is_some() {
            let permit = acquire(limiter.as_ref()).await?;
            if failed.load(Ordering::Acquire) {
                break;
            }

            let chunk: Vec<Item> = remaining.by_ref().take(chunk_size).collect();
            let backend = self.backend.clone();
            let table = Arc::clone(&table);
            let failed = Arc::clone(&failed);
            tally.pending.insert(index);
            tasks.spawn(
                async move {
                    let _permit = permit;
                    let result = write_chunk(&backend, &table, chunk).await;
                    if result.is_err() {
                        failed.store(true, Ordering::Release);
                    }
                    (index, result)
                }
                .in_current_span(),
            );
            index += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            tally.absorb(joined, &self.progress);
        }

        let duration = start.elapsed();
        if let Some((chunk, source)) = tally.failure() {
            warn!(
                table = %table,
                chunk,
                committed = tally.items,
                error = %source,
                "bulk upsert aborted"
            );
            return Err(StorageError::ChunkWriteFailed {
                chunk,
                committed: tally.items,
                source: Box::new(source),
            });
        }

        debug!(
            table = %table,
            items = tally.items,
            chunks = tally.chunks,
            duration_ms = duration.as_millis() as u64,
            "exit-bulk-upsert"
        );
        Ok(BulkWriteStats { items: tally.items, chunks: tally.chunks, duration })
    }
}

async fn write_chunk<B: StorageBackend>(
    backend: &B,
    table: &str,
    chunk: Vec<Item>,
) -> StorageResult<usize> {
    let len = chunk.len();
    fail_point!("bulk-before-chunk-write", |_| {
        Err(StorageError::internal("injected failure before chunk write"))
    });
    backend.batch_put(table, chunk).await?;
    Ok(len)
}

/// Results gathered from finished chunk tasks.
#[derive(Default)]
struct Tally {
    items: usize,
    chunks: usize,
    /// Spawned chunks that have not reported back.
    pending: BTreeSet<usize>,
    first_error: Option<(Option<usize>, StorageError)>,
}

impl Tally {
    fn absorb(
        &mut self,
        joined: Result<(usize, StorageResult<usize>), JoinError>,
        progress: &BulkProgress,
    ) {
        let (chunk, err) = match joined {
            Ok((index, Ok(len))) => {
                self.pending.remove(&index);
                self.items += len;
                self.chunks += 1;
                progress.record(len);
                trace!(chunk = index, items = len, "chunk committed");
                return;
            },
            Ok((index, Err(err))) => {
                self.pending.remove(&index);
                (Some(index), err)
            },
            Err(join_err) => {
                (None, StorageError::internal_with_source("chunk task did not complete", join_err))
            },
        };
        if self.first_error.is_none() {
            self.first_error = Some((chunk, err));
        }
    }

    /// The first failure, with an unreported chunk standing in for a task
    /// that never returned its index.
    fn failure(&mut self) -> Option<(usize, StorageError)> {
        let (chunk, err) = self.first_error.take()?;
        let chunk = chunk.or_else(|| self.pending.first().copied()).unwrap_or_default();
        Some((chunk, err))
    }
}

async fn acquire(limiter: Option<&Arc<Semaphore>>) -> StorageResult<Option<OwnedSemaphorePermit>> {
    match limiter {
        Some(semaphore) => Arc::clone(semaphore)
            .acquire_owned()
            .await
            .map(Some)
            .map_err(|e| StorageError::internal_with_source("bulk limiter closed", e)),
        None => Ok(None),
    }
}

/// Chunked, concurrency-capped fetch by id.
#[derive(Debug, Clone)]
pub struct BulkReader<B> {
    backend: B,
    config: BulkConfig,
}

impl<B> BulkReader<B>
where
    B: StorageBackend + Clone + 'static,
{
    /// Creates a reader. Chunks are sized by the store's batch-get limit.
    pub fn new(backend: B, config: BulkConfig) -> Self {
        Self { backend, config }
    }

    /// Fetches every item of `table` whose id is in `ids`.
    ///
    /// Missing ids are omitted. Results are grouped by chunk in request order;
    /// order within a chunk follows the store.
    ///
    /// # Errors
    ///
    /// Returns the first chunk error; outstanding chunk reads are cancelled.
    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn fetch(&self, table: &str, ids: &[String]) -> StorageResult<Vec<Item>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_size = self.backend.max_batch_get().max(1);
        let table: Arc<str> = Arc::from(table);
        let limiter = self.config.max_in_flight.map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();
        let mut chunks = 0;

        for (index, chunk) in ids.chunks(chunk_size).enumerate() {
            let permit = acquire(limiter.as_ref()).await?;
            let backend = self.backend.clone();
            let table = Arc::clone(&table);
            let chunk = chunk.to_vec();
            tasks.spawn(
                async move {
                    let _permit = permit;
                    backend.batch_get(&table, &chunk).await.map(|items| (index, items))
                }
                .in_current_span(),
            );
            chunks += 1;
        }

        let mut gathered: Vec<Option<Vec<Item>>> = vec![None; chunks];
        while let Some(joined) = tasks.join_next().await {
            let (index, items) = joined
                .map_err(|e| StorageError::internal_with_source("chunk task did not complete", e))??;
            gathered[index] = Some(items);
        }

        let found: Vec<Item> = gathered.into_iter().flatten().flatten().collect();
        debug!(table = %table, requested = ids.len(), found = found.len(), chunks, "bulk fetch");
        Ok(found)
    }
}
