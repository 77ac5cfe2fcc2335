//! In-memory store implementation.
//!
//! This module provides [`MemoryBackend`], an in-memory implementation of
//! [`StorageBackend`] suitable for tests, local runs and the queue-driven
//! signing pipeline when no external database is configured.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Ordered storage**: Rows are stored in a [`BTreeMap`] per table, so scans
//!   page through ids in lexicographic order
//! - **Native limits**: `batch_get`/`batch_put` enforce per-call maximums the
//!   same way a remote document store would
//!
//! # Example
//!
//! ```
//! use keysign_storage::{MemoryBackend, StorageBackend, TableSchema};
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! backend.create_table(&TableSchema::new("message")).await.unwrap();
//!
//! let item = json!({"id": "m1", "content": "hello"}).as_object().cloned().unwrap();
//! backend.put("message", item).await.unwrap();
//!
//! assert_eq!(backend.count("message").await.unwrap(), 1);
//! # });
//! ```
//!
//! # Performance Characteristics
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | get | O(log n) |
//! | put | O(log n) |
//! | batch_get | O(k log n) |
//! | scan_page | O(log n + p) where p is the page size |
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - A `batch_put` call is atomic, which is stronger than most remote stores

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::Arc,
};

use async_trait::async_trait;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    ConfigError,
    backend::{DEFAULT_MAX_BATCH_GET, DEFAULT_MAX_BATCH_WRITE, StorageBackend},
    error::{StorageError, StorageResult},
    types::{ContinuationToken, Item, ScanPage, ScanRequest, TableSchema, item_key, project},
};

/// Default number of rows evaluated per scan page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Per-call limits enforced by [`MemoryBackend`].
///
/// # Validation
///
/// Every limit must be `>= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    page_size: usize,
    max_batch_write: usize,
    max_batch_get: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_batch_write: DEFAULT_MAX_BATCH_WRITE,
            max_batch_get: DEFAULT_MAX_BATCH_GET,
        }
    }
}

#[bon::bon]
impl MemoryLimits {
    /// Creates a new set of limits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if any limit is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_PAGE_SIZE)] page_size: usize,
        #[builder(default = DEFAULT_MAX_BATCH_WRITE)] max_batch_write: usize,
        #[builder(default = DEFAULT_MAX_BATCH_GET)] max_batch_get: usize,
    ) -> Result<Self, ConfigError> {
        for (field, value) in [
            ("page_size", page_size),
            ("max_batch_write", max_batch_write),
            ("max_batch_get", max_batch_get),
        ] {
            if value == 0 {
                return Err(ConfigError::BelowMinimum {
                    field,
                    min: "1".into(),
                    value: "0".into(),
                });
            }
        }
        Ok(Self { page_size, max_batch_write, max_batch_get })
    }

    /// Returns the number of rows evaluated per scan page.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

#[derive(Debug)]
struct Table {
    schema: TableSchema,
    rows: BTreeMap<String, Item>,
}

impl Table {
    fn key_of(&self, item: &Item) -> StorageResult<String> {
        item_key(item, self.schema.key_attribute()).map(str::to_owned).ok_or_else(|| {
            StorageError::invalid_item(
                self.schema.name(),
                format!("missing string attribute `{}`", self.schema.key_attribute()),
            )
        })
    }
}

/// In-memory store holding one ordered map per table.
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying tables.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<RwLock<BTreeMap<String, Table>>>,
    limits: MemoryLimits,
}

impl MemoryBackend {
    /// Creates an empty store with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store with the given limits.
    #[must_use]
    pub fn with_limits(limits: MemoryLimits) -> Self {
        Self { tables: Arc::default(), limits }
    }

    /// Returns the limits this store enforces.
    #[must_use]
    pub fn limits(&self) -> MemoryLimits {
        self.limits
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("tables", &self.tables.read().keys().collect::<Vec<_>>())
            .field("limits", &self.limits)
            .finish()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip(self))]
    async fn get(&self, table: &str, id: &str) -> StorageResult<Option<Item>> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| StorageError::table_not_found(table))?;
        Ok(t.rows.get(id).cloned())
    }

    #[tracing::instrument(skip(self, item))]
    async fn put(&self, table: &str, item: Item) -> StorageResult<()> {
        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| StorageError::table_not_found(table))?;
        let key = t.key_of(&item)?;
        t.rows.insert(key, item);
        Ok(())
    }

    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    async fn batch_get(&self, table: &str, ids: &[String]) -> StorageResult<Vec<Item>> {
        if ids.len() > self.limits.max_batch_get {
            return Err(StorageError::BatchTooLarge {
                count: ids.len(),
                max: self.limits.max_batch_get,
            });
        }
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| StorageError::table_not_found(table))?;
        Ok(ids.iter().filter_map(|id| t.rows.get(id).cloned()).collect())
    }

    #[tracing::instrument(skip(self, items), fields(count = items.len()))]
    async fn batch_put(&self, table: &str, items: Vec<Item>) -> StorageResult<()> {
        if items.len() > self.limits.max_batch_write {
            return Err(StorageError::BatchTooLarge {
                count: items.len(),
                max: self.limits.max_batch_write,
            });
        }

        fail_point!("memory-batch-put", |_| {
            Err(StorageError::internal("injected failure in memory batch put"))
        });

        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| StorageError::table_not_found(table))?;

        // Validate the whole call before touching any row so a bad item
        // leaves the table unchanged.
        let keyed = items
            .into_iter()
            .map(|item| Ok((t.key_of(&item)?, item)))
            .collect::<StorageResult<Vec<_>>>()?;
        t.rows.extend(keyed);
        Ok(())
    }

    #[tracing::instrument(skip(self, request), fields(resumed = request.start_after.is_some()))]
    async fn scan_page(&self, table: &str, request: &ScanRequest) -> StorageResult<ScanPage> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| StorageError::table_not_found(table))?;

        let start = match &request.start_after {
            Some(token) => Bound::Excluded(token.as_str()),
            None => Bound::Unbounded,
        };
        let mut rows = t.rows.range::<str, _>((start, Bound::Unbounded));

        let mut items = Vec::new();
        let mut last_evaluated = None;
        for (id, item) in rows.by_ref().take(self.limits.page_size) {
            last_evaluated = Some(id);
            if request.filter.as_ref().is_some_and(|f| !f.matches(item)) {
                continue;
            }
            items.push(match &request.projection {
                Some(attrs) => project(item, attrs),
                None => item.clone(),
            });
        }

        let next = match (rows.next(), last_evaluated) {
            (Some(_), Some(id)) => Some(ContinuationToken::new(id.as_str())),
            _ => None,
        };

        tracing::trace!(returned = items.len(), more = next.is_some(), "scan page read");
        Ok(ScanPage { items, next })
    }

    async fn count(&self, table: &str) -> StorageResult<usize> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| StorageError::table_not_found(table))?;
        Ok(t.rows.len())
    }

    #[tracing::instrument(skip(self), fields(table = schema.name()))]
    async fn create_table(&self, schema: &TableSchema) -> StorageResult<bool> {
        let mut tables = self.tables.write();
        if tables.contains_key(schema.name()) {
            return Ok(false);
        }
        tables.insert(
            schema.name().to_owned(),
            Table { schema: schema.clone(), rows: BTreeMap::new() },
        );
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    async fn drop_table(&self, table: &str) -> StorageResult<bool> {
        Ok(self.tables.write().remove(table).is_some())
    }

    async fn list_tables(&self) -> StorageResult<Vec<String>> {
        Ok(self.tables.read().keys().cloned().collect())
    }

    fn max_batch_write(&self) -> usize {
        self.limits.max_batch_write
    }

    fn max_batch_get(&self) -> usize {
        self.limits.max_batch_get
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::Filter;

    fn item(id: &str) -> Item {
        json!({"id": id, "content": format!("body of {id}")}).as_object().cloned().unwrap()
    }

    async fn backend_with(table: &str, ids: &[&str]) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.create_table(&TableSchema::new(table)).await.unwrap();
        for id in ids {
            backend.put(table, item(id)).await.unwrap();
        }
        backend
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let backend = backend_with("message", &["a"]).await;

        assert_eq!(backend.get("message", "a").await.unwrap(), Some(item("a")));
        assert_eq!(backend.get("message", "b").await.unwrap(), None);

        // Upsert replaces
        let mut updated = item("a");
        updated.insert("content".into(), json!("changed"));
        backend.put("message", updated.clone()).await.unwrap();
        assert_eq!(backend.get("message", "a").await.unwrap(), Some(updated));
        assert_eq!(backend.count("message").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_table() {
        let backend = MemoryBackend::new();
        let err = backend.get("nope", "a").await.unwrap_err();
        assert!(matches!(err, StorageError::TableNotFound { ref table } if table == "nope"));
        assert!(matches!(
            backend.count("nope").await.unwrap_err(),
            StorageError::TableNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_item_without_key_rejected() {
        let backend = backend_with("message", &[]).await;
        let keyless = json!({"content": "x"}).as_object().cloned().unwrap();
        let err = backend.put("message", keyless).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidItem { .. }));
    }

    #[tokio::test]
    async fn test_batch_put_is_all_or_nothing() {
        let backend = backend_with("message", &[]).await;
        let keyless = json!({"content": "x"}).as_object().cloned().unwrap();
        let err = backend.batch_put("message", vec![item("a"), keyless]).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidItem { .. }));
        assert_eq!(backend.count("message").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_limits_enforced() {
        let limits = MemoryLimits::builder().max_batch_write(2).max_batch_get(3).build().unwrap();
        let backend = MemoryBackend::with_limits(limits);
        backend.create_table(&TableSchema::new("message")).await.unwrap();

        let err =
            backend.batch_put("message", vec![item("a"), item("b"), item("c")]).await.unwrap_err();
        assert!(matches!(err, StorageError::BatchTooLarge { count: 3, max: 2 }));

        let ids: Vec<String> = (0..4).map(|i| i.to_string()).collect();
        let err = backend.batch_get("message", &ids).await.unwrap_err();
        assert!(matches!(err, StorageError::BatchTooLarge { count: 4, max: 3 }));
    }

    #[tokio::test]
    async fn test_batch_get_omits_missing() {
        let backend = backend_with("message", &["a", "b"]).await;
        let found = backend
            .batch_get("message", &["a".to_owned(), "zz".to_owned(), "b".to_owned()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_create_drop_recreate() {
        let backend = backend_with("signature", &["a", "b"]).await;
        assert!(!backend.create_table(&TableSchema::new("signature")).await.unwrap());

        backend.recreate_table(&TableSchema::new("signature")).await.unwrap();
        assert_eq!(backend.count("signature").await.unwrap(), 0);

        assert!(backend.drop_table("signature").await.unwrap());
        assert!(!backend.drop_table("signature").await.unwrap());
        assert!(backend.list_tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_pages_in_key_order() {
        let limits = MemoryLimits::builder().page_size(2).build().unwrap();
        let backend = MemoryBackend::with_limits(limits);
        backend.create_table(&TableSchema::new("message")).await.unwrap();
        for id in ["c", "a", "e", "b", "d"] {
            backend.put("message", item(id)).await.unwrap();
        }

        let first = backend.scan_page("message", &ScanRequest::default()).await.unwrap();
        assert_eq!(first.items, vec![item("a"), item("b")]);
        assert_eq!(first.next, Some(ContinuationToken::new("b")));

        let second = backend
            .scan_page("message", &ScanRequest::default().resume(first.next))
            .await
            .unwrap();
        assert_eq!(second.items, vec![item("c"), item("d")]);

        let last = backend
            .scan_page("message", &ScanRequest::default().resume(second.next))
            .await
            .unwrap();
        assert_eq!(last.items, vec![item("e")]);
        assert_eq!(last.next, None);
    }

    #[tokio::test]
    async fn test_filtered_page_can_be_empty_with_token() {
        let limits = MemoryLimits::builder().page_size(2).build().unwrap();
        let backend = MemoryBackend::with_limits(limits);
        backend.create_table(&TableSchema::new("message")).await.unwrap();
        for id in ["a", "b", "c"] {
            backend.put("message", item(id)).await.unwrap();
        }

        let request = ScanRequest::builder().filter(Filter::equals("id", "c")).build();
        let page = backend.scan_page("message", &request).await.unwrap();
        assert!(page.items.is_empty());
        assert!(page.next.is_some());
    }

    #[tokio::test]
    async fn test_scan_projection() {
        let backend = backend_with("message", &["a"]).await;
        let request = ScanRequest::builder().projection(vec!["id".to_owned()]).build();
        let page = backend.scan_page("message", &request).await.unwrap();
        assert_eq!(serde_json::Value::Object(page.items[0].clone()), json!({"id": "a"}));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = MemoryLimits::builder().page_size(0).build().unwrap_err();
        assert_eq!(
            err,
            ConfigError::BelowMinimum { field: "page_size", min: "1".into(), value: "0".into() }
        );
    }

    #[tokio::test]
    async fn test_clones_share_tables() {
        let backend = backend_with("key", &["k1"]).await;
        let clone = backend.clone();
        clone.put("key", item("k2")).await.unwrap();
        assert_eq!(backend.count("key").await.unwrap(), 2);
    }

    mod proptests {
        use std::collections::BTreeSet;

        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Following continuation tokens visits every row exactly once,
            /// in key order, whatever the page size.
            #[test]
            fn scan_visits_every_row_once(
                ids in proptest::collection::btree_set("[a-z0-9]{1,8}", 0..60),
                page_size in 1..20usize,
            ) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("runtime");

                rt.block_on(async {
                    let limits = MemoryLimits::builder().page_size(page_size).build().unwrap();
                    let backend = MemoryBackend::with_limits(limits);
                    backend.create_table(&TableSchema::new("t")).await.unwrap();
                    for id in &ids {
                        backend.put("t", item(id)).await.unwrap();
                    }

                    let mut seen = Vec::new();
                    let mut request = ScanRequest::default();
                    loop {
                        let page = backend.scan_page("t", &request).await.unwrap();
                        prop_assert!(page.items.len() <= page_size);
                        seen.extend(
                            page.items.iter().map(|i| item_key(i, "id").unwrap().to_owned()),
                        );
                        match page.next {
                            Some(token) => request = request.resume(Some(token)),
                            None => break,
                        }
                    }

                    let expected: Vec<String> = ids.iter().cloned().collect();
                    prop_assert_eq!(seen, expected);
                    Ok(())
                })?;
            }

            /// A filtered scan returns exactly the matching rows.
            #[test]
            fn filtered_scan_matches_predicate(
                ids in proptest::collection::btree_set("[a-z]{1,6}", 0..40),
                marked in proptest::collection::btree_set("[a-z]{1,6}", 0..40),
                page_size in 1..10usize,
            ) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("runtime");

                rt.block_on(async {
                    let limits = MemoryLimits::builder().page_size(page_size).build().unwrap();
                    let backend = MemoryBackend::with_limits(limits);
                    backend.create_table(&TableSchema::new("t")).await.unwrap();
                    for id in &ids {
                        let mut row = item(id);
                        if marked.contains(id) {
                            row.insert("keyId".into(), json!("k"));
                        }
                        backend.put("t", row).await.unwrap();
                    }

                    let mut request = ScanRequest::builder().filter(Filter::exists("keyId")).build();
                    let mut seen = BTreeSet::new();
                    loop {
                        let page = backend.scan_page("t", &request).await.unwrap();
                        seen.extend(
                            page.items.iter().map(|i| item_key(i, "id").unwrap().to_owned()),
                        );
                        match page.next {
                            Some(token) => request = request.resume(Some(token)),
                            None => break,
                        }
                    }

                    let expected: BTreeSet<String> = ids.intersection(&marked).cloned().collect();
                    prop_assert_eq!(seen, expected);
                    Ok(())
                })?;
            }
        }
    }
}
