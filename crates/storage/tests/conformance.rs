//! Conformance test suite for `MemoryBackend`.
//!
//! Each test function corresponds to a single conformance check, providing
//! fine-grained failure reporting. The `run_all` test exercises the full
//! suite as a one-liner to verify no tests are accidentally omitted.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use keysign_storage::{MemoryBackend, MemoryLimits, conformance};

/// A store with a small page size so scans always span several pages.
fn paged() -> MemoryBackend {
    MemoryBackend::with_limits(MemoryLimits::builder().page_size(7).build().expect("limits"))
}

// ============================================================================
// CRUD (5 tests)
// ============================================================================

#[tokio::test]
async fn crud_get_returns_none_for_missing_id() {
    conformance::crud_get_returns_none_for_missing_id(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn crud_put_then_get_returns_item() {
    conformance::crud_put_then_get_returns_item(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn crud_put_replaces_existing() {
    conformance::crud_put_replaces_existing(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn crud_put_without_key_is_rejected() {
    conformance::crud_put_without_key_is_rejected(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn crud_missing_table_is_an_error() {
    conformance::crud_missing_table_is_an_error(&MemoryBackend::new()).await;
}

// ============================================================================
// Tables (4 tests)
// ============================================================================

#[tokio::test]
async fn table_create_is_idempotent() {
    conformance::table_create_is_idempotent(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn table_drop_missing_returns_false() {
    conformance::table_drop_missing_returns_false(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn table_recreate_empties_table() {
    conformance::table_recreate_empties_table(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn table_list_includes_created() {
    conformance::table_list_includes_created(&MemoryBackend::new()).await;
}

// ============================================================================
// Batch (4 tests)
// ============================================================================

#[tokio::test]
async fn batch_put_then_batch_get() {
    conformance::batch_put_then_batch_get(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn batch_get_omits_missing() {
    conformance::batch_get_omits_missing(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn batch_put_over_limit_rejected() {
    conformance::batch_put_over_limit_rejected(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn batch_get_over_limit_rejected() {
    conformance::batch_get_over_limit_rejected(&MemoryBackend::new()).await;
}

// ============================================================================
// Scan (4 tests)
// ============================================================================

#[tokio::test]
async fn scan_empty_table() {
    conformance::scan_empty_table(&paged()).await;
}

#[tokio::test]
async fn scan_visits_every_item_once() {
    conformance::scan_visits_every_item_once(&paged()).await;
}

#[tokio::test]
async fn scan_filter_applies() {
    conformance::scan_filter_applies(&paged()).await;
}

#[tokio::test]
async fn scan_projection_applies() {
    conformance::scan_projection_applies(&paged()).await;
}

// ============================================================================
// Concurrent (2 tests)
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_puts_to_distinct_ids() {
    conformance::concurrent_puts_to_distinct_ids(Arc::new(MemoryBackend::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_batch_puts() {
    conformance::concurrent_batch_puts(Arc::new(MemoryBackend::new())).await;
}

// ============================================================================
// Full suite
// ============================================================================

#[tokio::test]
async fn run_all() {
    conformance::run_all(Arc::new(MemoryBackend::new())).await;
    conformance::run_all(Arc::new(paged())).await;
}
