#![allow(clippy::expect_used)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use keysign_storage::{
    BulkConfig, BulkReader, BulkWriter, Item, MemoryBackend, ScanRequest, StorageBackend,
    TableSchema, scan_all,
};
use serde_json::json;
use tokio::runtime::Runtime;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rt() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to create tokio runtime")
}

fn make_items(count: usize) -> Vec<Item> {
    (0..count)
        .map(|i| {
            json!({"id": format!("doc-{i:08}"), "keyId": "key-bench00001", "signature": "AAAA"})
                .as_object()
                .cloned()
                .expect("object")
        })
        .collect()
}

fn empty_backend(rt: &Runtime) -> MemoryBackend {
    rt.block_on(async {
        let backend = MemoryBackend::new();
        backend.create_table(&TableSchema::new("signature")).await.expect("create table");
        backend
    })
}

// ---------------------------------------------------------------------------
// 1. bulk_upsert at several in-flight caps
// ---------------------------------------------------------------------------

fn bulk_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_upsert");
    let rt = rt();
    let items = make_items(5_000);

    group.throughput(Throughput::Elements(items.len() as u64));
    for cap in [Some(1), Some(4), Some(20), None] {
        let label = cap.map_or_else(|| "unbounded".to_owned(), |n| n.to_string());
        let config = BulkConfig::builder().maybe_max_in_flight(cap).build().expect("config");
        let writer = BulkWriter::new(empty_backend(&rt), config);

        group.bench_with_input(BenchmarkId::new("max_in_flight", label), &items, |b, items| {
            b.to_async(&rt).iter(|| {
                let writer = writer.clone();
                let items = items.clone();
                async move {
                    writer.bulk_upsert("signature", items).await.expect("bulk upsert failed");
                }
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 2. bulk fetch and full scan
// ---------------------------------------------------------------------------

fn bulk_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_read");
    let rt = rt();
    let backend = empty_backend(&rt);
    let items = make_items(5_000);
    let ids: Vec<String> = (0..items.len()).map(|i| format!("doc-{i:08}")).collect();
    rt.block_on(async {
        BulkWriter::new(backend.clone(), BulkConfig::default())
            .bulk_upsert("signature", items)
            .await
            .expect("populate");
    });

    group.throughput(Throughput::Elements(ids.len() as u64));
    let reader = BulkReader::new(
        backend.clone(),
        BulkConfig::builder().max_in_flight(20).build().expect("config"),
    );
    group.bench_function("fetch_by_ids", |b| {
        b.to_async(&rt).iter(|| {
            let reader = reader.clone();
            let ids = ids.clone();
            async move {
                reader.fetch("signature", &ids).await.expect("fetch failed");
            }
        });
    });

    group.bench_function("scan_all", |b| {
        b.to_async(&rt).iter(|| {
            let backend = backend.clone();
            async move {
                scan_all(&backend, "signature", &ScanRequest::default()).await.expect("scan failed");
            }
        });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Group registration
// ---------------------------------------------------------------------------

criterion_group!(benches, bulk_upsert, bulk_read);
criterion_main!(benches);
