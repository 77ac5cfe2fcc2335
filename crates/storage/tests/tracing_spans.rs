//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on store and bulk operations.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use keysign_storage::{
    BulkConfig, BulkReader, BulkWriter, MemoryBackend, ScanRequest, StorageBackend, TableSchema,
    scan_all,
    testutil::{make_id, make_item, make_items},
};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn collect() -> (Arc<Mutex<Vec<String>>>, tracing::subscriber::DefaultGuard) {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let subscriber = tracing_subscriber::registry().with(collector);
    (spans, tracing::subscriber::set_default(subscriber))
}

async fn backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.create_table(&TableSchema::new("doc")).await.expect("create");
    backend
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn memory_backend_put_creates_span() {
    let (spans, _guard) = collect();

    let backend = backend().await;
    backend.put("doc", make_item("d", 0)).await.expect("put should succeed");

    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == "put"), "expected a 'put' span, got: {recorded:?}");
}

#[tokio::test]
async fn memory_backend_get_creates_span() {
    let (spans, _guard) = collect();

    let backend = backend().await;
    let _ = backend.get("doc", "missing").await;

    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == "get"), "expected a 'get' span, got: {recorded:?}");
}

#[tokio::test]
async fn bulk_upsert_creates_span_per_chunk() {
    let (spans, _guard) = collect();

    let backend = backend().await;
    let writer = BulkWriter::new(backend, BulkConfig::default());
    writer.bulk_upsert("doc", make_items("d", 60)).await.expect("bulk upsert");

    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == "bulk_upsert"), "missing 'bulk_upsert': {recorded:?}");
    assert_eq!(
        recorded.iter().filter(|s| *s == "batch_put").count(),
        3,
        "expected one 'batch_put' span per chunk, got: {recorded:?}"
    );
}

#[tokio::test]
async fn all_operations_produce_distinct_spans() {
    let (spans, _guard) = collect();

    let backend = backend().await;

    backend.put("doc", make_item("d", 0)).await.expect("put");
    let _ = backend.get("doc", &make_id("d", 0)).await;
    backend.batch_put("doc", make_items("e", 3)).await.expect("batch_put");
    let _ = backend.batch_get("doc", &[make_id("e", 0)]).await;
    let _ = scan_all(&backend, "doc", &ScanRequest::default()).await;
    let reader = BulkReader::new(backend.clone(), BulkConfig::default());
    let _ = reader.fetch("doc", &[make_id("e", 1)]).await;
    backend.drop_table("doc").await.expect("drop");

    let recorded = spans.lock().expect("lock poisoned");
    let expected = [
        "create_table",
        "put",
        "get",
        "batch_put",
        "batch_get",
        "scan_all",
        "scan_page",
        "fetch",
        "drop_table",
    ];

    for name in &expected {
        assert!(
            recorded.iter().any(|s| s == name),
            "missing span '{name}', recorded: {recorded:?}"
        );
    }
}
