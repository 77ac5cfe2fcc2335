//! Shared test utilities for store testing.
//!
//! This module provides common helpers for creating test stores, generating
//! test items, injecting failures, and asserting on [`StorageResult`] values.
//! It is feature-gated behind `testutil` to prevent leaking into production
//! builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! keysign-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use keysign_storage::testutil::{FlakyBackend, make_items, populated_backend};
//! ```

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;

use crate::{
    StorageBackend,
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
    types::{Item, ScanPage, ScanRequest, TableSchema},
};

/// Create a deterministic test id from a prefix and index.
///
/// Produces ids like `"prefix-000042"` (zero-padded to 6 digits). The
/// zero-padding ensures lexicographic ordering matches numeric ordering,
/// which is important for scan ordering tests.
#[must_use]
pub fn make_id(prefix: &str, idx: usize) -> String {
    format!("{prefix}-{idx:06}")
}

/// Create a test item `{"id": make_id(prefix, idx), "content": ...}`.
#[must_use]
pub fn make_item(prefix: &str, idx: usize) -> Item {
    let mut item = Item::new();
    item.insert("id".into(), json!(make_id(prefix, idx)));
    item.insert("content".into(), json!(format!("content {idx}")));
    item
}

/// Create `count` test items with sequential ids.
#[must_use]
pub fn make_items(prefix: &str, count: usize) -> Vec<Item> {
    (0..count).map(|i| make_item(prefix, i)).collect()
}

/// Create a [`MemoryBackend`] with `table` holding `count` items.
///
/// # Panics
///
/// Panics if any write fails (should not happen with `MemoryBackend`).
pub async fn populated_backend(table: &str, count: usize) -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.create_table(&TableSchema::new(table)).await.expect("create table failed");
    for item in make_items(table, count) {
        backend.put(table, item).await.expect("populate put failed");
    }
    backend
}

/// A wrapper that fails selected `batch_put` / `batch_get` calls.
///
/// Calls are numbered from zero in the order they reach the wrapper. A call
/// whose number is in the failure set returns [`StorageError::Connection`]
/// without reaching the inner store. An optional write delay keeps chunk
/// writes in flight long enough to observe concurrency.
#[derive(Clone)]
pub struct FlakyBackend<B> {
    inner: B,
    fail_puts: Arc<HashSet<usize>>,
    fail_gets: Arc<HashSet<usize>>,
    put_calls: Arc<AtomicUsize>,
    get_calls: Arc<AtomicUsize>,
    write_delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl<B: StorageBackend> FlakyBackend<B> {
    /// Wraps `inner` without any failures configured.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            fail_puts: Arc::default(),
            fail_gets: Arc::default(),
            put_calls: Arc::default(),
            get_calls: Arc::default(),
            write_delay: None,
            in_flight: Arc::default(),
            peak_in_flight: Arc::default(),
        }
    }

    /// Fails the `batch_put` calls with these numbers.
    #[must_use]
    pub fn failing_puts(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.fail_puts = Arc::new(calls.into_iter().collect());
        self
    }

    /// Fails the `batch_get` calls with these numbers.
    #[must_use]
    pub fn failing_gets(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.fail_gets = Arc::new(calls.into_iter().collect());
        self
    }

    /// Sleeps for `delay` inside every `batch_put`.
    #[must_use]
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Number of `batch_put` calls received so far.
    #[must_use]
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Number of `batch_get` calls received so far.
    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Highest number of `batch_put` calls observed running at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

/// Decrements the in-flight counter when a write finishes, even on early return.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<B: StorageBackend> StorageBackend for FlakyBackend<B> {
    async fn get(&self, table: &str, id: &str) -> StorageResult<Option<Item>> {
        self.inner.get(table, id).await
    }

    async fn put(&self, table: &str, item: Item) -> StorageResult<()> {
        self.inner.put(table, item).await
    }

    async fn batch_get(&self, table: &str, ids: &[String]) -> StorageResult<Vec<Item>> {
        let call = self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.contains(&call) {
            return Err(StorageError::connection(format!("injected failure on batch_get #{call}")));
        }
        self.inner.batch_get(table, ids).await
    }

    async fn batch_put(&self, table: &str, items: Vec<Item>) -> StorageResult<()> {
        let call = self.put_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_puts.contains(&call) {
            return Err(StorageError::connection(format!("injected failure on batch_put #{call}")));
        }
        self.inner.batch_put(table, items).await
    }

    async fn scan_page(&self, table: &str, request: &ScanRequest) -> StorageResult<ScanPage> {
        self.inner.scan_page(table, request).await
    }

    async fn count(&self, table: &str) -> StorageResult<usize> {
        self.inner.count(table).await
    }

    async fn create_table(&self, schema: &TableSchema) -> StorageResult<bool> {
        self.inner.create_table(schema).await
    }

    async fn drop_table(&self, table: &str) -> StorageResult<bool> {
        self.inner.drop_table(table).await
    }

    async fn list_tables(&self) -> StorageResult<Vec<String>> {
        self.inner.list_tables().await
    }

    fn max_batch_write(&self) -> usize {
        self.inner.max_batch_write()
    }

    fn max_batch_get(&self) -> usize {
        self.inner.max_batch_get()
    }
}

/// Assert that a [`StorageResult`] is `Ok`.
///
/// Returns the inner value on success, panics with a descriptive message
/// on failure.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use keysign_storage::assert_storage_ok;
/// use keysign_storage::error::StorageResult;
///
/// let result: StorageResult<i32> = Ok(42);
/// let value = assert_storage_ok!(result);
/// assert_eq!(value, 42);
/// ```
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::TableNotFound`].
#[macro_export]
macro_rules! assert_table_not_found {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::TableNotFound { .. })),
            "expected StorageError::TableNotFound, got: {:?}",
            $result,
        );
    };
}

/// Helper to verify that a result is a `ChunkWriteFailed` error.
pub fn is_chunk_write_failed<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::ChunkWriteFailed { .. }))
}
