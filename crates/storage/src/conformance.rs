//! Conformance test suite for [`StorageBackend`] implementations.
//!
//! This module provides async check functions that validate whether a
//! [`StorageBackend`] implementation satisfies the trait contract. Every
//! store, whether in-memory or remote, can run the same suite so the
//! signing pipeline behaves identically on top of it.
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each conformance function with
//! a fresh store instance:
//!
//! ```no_run
//! use keysign_storage::conformance;
//! use keysign_storage::MemoryBackend;
//!
//! #[tokio::test]
//! async fn crud_get_returns_none_for_missing_id() {
//!     conformance::crud_get_returns_none_for_missing_id(&MemoryBackend::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Functions | Contract aspect |
//! |----------|-----------|-----------------|
//! | CRUD | 5 tests | Point get/put semantics and key validation |
//! | Tables | 4 tests | create/drop/recreate/list |
//! | Batch | 4 tests | Multi-item calls and their per-call limits |
//! | Scan | 4 tests | Paging, filtering, projection |
//! | Concurrent | 2 tests | Thread-safety under parallel writes |

use std::{collections::BTreeSet, sync::Arc};

use serde_json::json;

use crate::{
    backend::StorageBackend,
    error::StorageError,
    scan::scan_all,
    testutil::{make_id, make_item, make_items},
    types::{Filter, Item, ScanRequest, TableSchema, item_key},
};

async fn fresh_table<B: StorageBackend>(backend: &B, table: &str) {
    backend.recreate_table(&TableSchema::new(table)).await.expect("recreate table");
}

fn ids(items: &[Item]) -> BTreeSet<String> {
    items.iter().filter_map(|i| item_key(i, "id")).map(str::to_owned).collect()
}

// ============================================================================
// CRUD: point get/put semantics (5 tests)
// ============================================================================

/// `get` on a nonexistent id returns `Ok(None)`.
pub async fn crud_get_returns_none_for_missing_id<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "crud_missing").await;
    let result = backend.get("crud_missing", "ghost").await;
    assert!(result.is_ok(), "get should not error on missing id: {result:?}");
    assert_eq!(result.expect("checked above"), None, "missing id should return None");
}

/// `put` then `get` round-trips the item.
pub async fn crud_put_then_get_returns_item<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "crud_roundtrip").await;
    let item = make_item("doc", 1);
    backend.put("crud_roundtrip", item.clone()).await.expect("put should succeed");
    let got = backend.get("crud_roundtrip", &make_id("doc", 1)).await.expect("get");
    assert_eq!(got, Some(item));
}

/// `put` on an existing id replaces the whole item.
pub async fn crud_put_replaces_existing<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "crud_replace").await;
    let mut item = make_item("doc", 1);
    backend.put("crud_replace", item.clone()).await.expect("put");
    item.insert("content".into(), json!("updated"));
    item.insert("keyId".into(), json!("key-0000000001"));
    backend.put("crud_replace", item.clone()).await.expect("overwrite");

    let got = backend.get("crud_replace", &make_id("doc", 1)).await.expect("get");
    assert_eq!(got, Some(item));
    assert_eq!(backend.count("crud_replace").await.expect("count"), 1);
}

/// An item without a string key attribute is rejected.
pub async fn crud_put_without_key_is_rejected<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "crud_keyless").await;
    let mut item = Item::new();
    item.insert("content".into(), json!("no id"));
    let err = backend.put("crud_keyless", item).await.expect_err("keyless put must fail");
    assert!(matches!(err, StorageError::InvalidItem { .. }), "unexpected error: {err:?}");

    let mut numeric = Item::new();
    numeric.insert("id".into(), json!(42));
    let err = backend.put("crud_keyless", numeric).await.expect_err("numeric id must fail");
    assert!(matches!(err, StorageError::InvalidItem { .. }), "unexpected error: {err:?}");
}

/// Operations against a table that does not exist fail with `TableNotFound`.
pub async fn crud_missing_table_is_an_error<B: StorageBackend>(backend: &B) {
    backend.drop_table("crud_absent").await.expect("drop");
    let err = backend.get("crud_absent", "x").await.expect_err("get must fail");
    assert!(matches!(err, StorageError::TableNotFound { .. }), "unexpected error: {err:?}");
    let err = backend.put("crud_absent", make_item("x", 0)).await.expect_err("put must fail");
    assert!(matches!(err, StorageError::TableNotFound { .. }), "unexpected error: {err:?}");
}

// ============================================================================
// Tables: create/drop/recreate/list (4 tests)
// ============================================================================

/// Creating an existing table is a no-op that reports `false`.
pub async fn table_create_is_idempotent<B: StorageBackend>(backend: &B) {
    let schema = TableSchema::new("tbl_create");
    backend.drop_table(schema.name()).await.expect("drop");
    assert!(backend.create_table(&schema).await.expect("create"));
    backend.put(schema.name(), make_item("doc", 0)).await.expect("put");
    assert!(!backend.create_table(&schema).await.expect("create again"));
    assert_eq!(backend.count(schema.name()).await.expect("count"), 1, "create must not truncate");
}

/// Dropping a missing table reports `false` and does not error.
pub async fn table_drop_missing_returns_false<B: StorageBackend>(backend: &B) {
    backend.drop_table("tbl_drop").await.expect("first drop");
    assert!(!backend.drop_table("tbl_drop").await.expect("second drop"));
}

/// `recreate_table` leaves the table empty.
pub async fn table_recreate_empties_table<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "tbl_recreate").await;
    for item in make_items("doc", 5) {
        backend.put("tbl_recreate", item).await.expect("put");
    }
    backend.recreate_table(&TableSchema::new("tbl_recreate")).await.expect("recreate");
    assert_eq!(backend.count("tbl_recreate").await.expect("count"), 0);
}

/// `list_tables` includes every created table.
pub async fn table_list_includes_created<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "tbl_list_a").await;
    fresh_table(backend, "tbl_list_b").await;
    let tables = backend.list_tables().await.expect("list");
    assert!(tables.iter().any(|t| t == "tbl_list_a"));
    assert!(tables.iter().any(|t| t == "tbl_list_b"));
}

// ============================================================================
// Batch: multi-item calls and limits (4 tests)
// ============================================================================

/// Items written with `batch_put` are all readable with `batch_get`.
pub async fn batch_put_then_batch_get<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "batch_rt").await;
    let n = backend.max_batch_write().min(backend.max_batch_get());
    let items = make_items("doc", n);
    backend.batch_put("batch_rt", items.clone()).await.expect("batch_put");

    let wanted: Vec<String> = (0..n).map(|i| make_id("doc", i)).collect();
    let got = backend.batch_get("batch_rt", &wanted).await.expect("batch_get");
    assert_eq!(ids(&got), ids(&items));
}

/// `batch_get` silently omits ids that do not exist.
pub async fn batch_get_omits_missing<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "batch_missing").await;
    backend.put("batch_missing", make_item("doc", 0)).await.expect("put");
    let got = backend
        .batch_get("batch_missing", &[make_id("doc", 0), make_id("doc", 1)])
        .await
        .expect("batch_get");
    assert_eq!(got.len(), 1);
}

/// `batch_put` above the store's per-call limit is rejected.
pub async fn batch_put_over_limit_rejected<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "batch_limit").await;
    let max = backend.max_batch_write();
    let err = backend
        .batch_put("batch_limit", make_items("doc", max + 1))
        .await
        .expect_err("oversized batch_put must fail");
    assert!(
        matches!(err, StorageError::BatchTooLarge { count, max: m } if count == max + 1 && m == max),
        "unexpected error: {err:?}"
    );
}

/// `batch_get` above the store's per-call limit is rejected.
pub async fn batch_get_over_limit_rejected<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "batch_get_limit").await;
    let max = backend.max_batch_get();
    let wanted: Vec<String> = (0..=max).map(|i| make_id("doc", i)).collect();
    let err = backend
        .batch_get("batch_get_limit", &wanted)
        .await
        .expect_err("oversized batch_get must fail");
    assert!(matches!(err, StorageError::BatchTooLarge { .. }), "unexpected error: {err:?}");
}

// ============================================================================
// Scan: paging, filtering, projection (4 tests)
// ============================================================================

/// A scan of an empty table returns no items and no token.
pub async fn scan_empty_table<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "scan_empty").await;
    let page = backend.scan_page("scan_empty", &ScanRequest::default()).await.expect("scan");
    assert!(page.items.is_empty());
    assert!(page.next.is_none(), "empty table must not return a continuation token");
}

/// Following continuation tokens visits every item exactly once.
pub async fn scan_visits_every_item_once<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "scan_all").await;
    let items = make_items("doc", 250);
    for item in &items {
        backend.put("scan_all", item.clone()).await.expect("put");
    }
    let scanned = scan_all(backend, "scan_all", &ScanRequest::default()).await.expect("scan");
    assert_eq!(scanned.len(), items.len(), "scan returned duplicates or gaps");
    assert_eq!(ids(&scanned), ids(&items));
}

/// Filters are honoured across pages.
pub async fn scan_filter_applies<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "scan_filter").await;
    for (i, mut item) in make_items("doc", 40).into_iter().enumerate() {
        if i % 4 == 0 {
            item.insert("keyId".into(), json!("key-0000000001"));
        }
        backend.put("scan_filter", item).await.expect("put");
    }
    let request = ScanRequest::builder().filter(Filter::exists("keyId")).build();
    let scanned = scan_all(backend, "scan_filter", &request).await.expect("scan");
    assert_eq!(scanned.len(), 10);
}

/// Projection keeps only the listed attributes.
pub async fn scan_projection_applies<B: StorageBackend>(backend: &B) {
    fresh_table(backend, "scan_projection").await;
    backend.put("scan_projection", make_item("doc", 0)).await.expect("put");
    let request = ScanRequest::builder().projection(vec!["id".to_owned()]).build();
    let scanned = scan_all(backend, "scan_projection", &request).await.expect("scan");
    assert_eq!(scanned.len(), 1);
    assert_eq!(scanned[0].keys().collect::<Vec<_>>(), vec!["id"]);
}

// ============================================================================
// Concurrent access: thread-safety under parallel writes (2 tests)
// ============================================================================

/// Concurrent puts to distinct ids all land.
///
/// Requires `B: 'static` so the store can be shared across spawned tasks
/// via `Arc`.
pub async fn concurrent_puts_to_distinct_ids<B: StorageBackend + 'static>(backend: Arc<B>) {
    fresh_table(backend.as_ref(), "conc_put").await;
    let mut handles = Vec::new();
    for i in 0..50 {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            backend.put("conc_put", make_item("conc", i)).await.expect("concurrent put");
        }));
    }
    for handle in handles {
        handle.await.expect("task join");
    }
    assert_eq!(backend.count("conc_put").await.expect("count"), 50);
}

/// Concurrent batch writes of disjoint chunks all land.
pub async fn concurrent_batch_puts<B: StorageBackend + 'static>(backend: Arc<B>) {
    fresh_table(backend.as_ref(), "conc_batch").await;
    let chunk = backend.max_batch_write();
    let mut handles = Vec::new();
    for task in 0..8 {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            let items = make_items(&format!("task{task}"), chunk);
            backend.batch_put("conc_batch", items).await.expect("concurrent batch_put");
        }));
    }
    for handle in handles {
        handle.await.expect("task join");
    }
    assert_eq!(backend.count("conc_batch").await.expect("count"), 8 * chunk);
}

// ============================================================================
// Convenience runner: run all conformance tests against a single store
// ============================================================================

/// Run the full conformance suite against the given store.
///
/// ```no_run
/// use std::sync::Arc;
/// use keysign_storage::conformance;
/// use keysign_storage::MemoryBackend;
///
/// #[tokio::test]
/// async fn memory_backend_conformance() {
///     conformance::run_all(Arc::new(MemoryBackend::new())).await;
/// }
/// ```
pub async fn run_all<B: StorageBackend + 'static>(backend: Arc<B>) {
    // CRUD
    crud_get_returns_none_for_missing_id(backend.as_ref()).await;
    crud_put_then_get_returns_item(backend.as_ref()).await;
    crud_put_replaces_existing(backend.as_ref()).await;
    crud_put_without_key_is_rejected(backend.as_ref()).await;
    crud_missing_table_is_an_error(backend.as_ref()).await;

    // Tables
    table_create_is_idempotent(backend.as_ref()).await;
    table_drop_missing_returns_false(backend.as_ref()).await;
    table_recreate_empties_table(backend.as_ref()).await;
    table_list_includes_created(backend.as_ref()).await;

    // Batch
    batch_put_then_batch_get(backend.as_ref()).await;
    batch_get_omits_missing(backend.as_ref()).await;
    batch_put_over_limit_rejected(backend.as_ref()).await;
    batch_get_over_limit_rejected(backend.as_ref()).await;

    // Scan
    scan_empty_table(backend.as_ref()).await;
    scan_visits_every_item_once(backend.as_ref()).await;
    scan_filter_applies(backend.as_ref()).await;
    scan_projection_applies(backend.as_ref()).await;

    // Concurrent
    concurrent_puts_to_distinct_ids(Arc::clone(&backend)).await;
    concurrent_batch_puts(Arc::clone(&backend)).await;
}
