//! Backlog enumeration over paged scans.
//!
//! Whatever the scan page size, the backlog lists every unsigned document
//! exactly once, and partitioning it covers each id in exactly one batch.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashSet;

use keysign::{Document, DocumentStore, Signature, SignatureStore, partition};
use keysign_storage::{BulkConfig, MemoryBackend, MemoryLimits};
use proptest::prelude::*;

async fn stores(
    page_size: usize,
) -> (DocumentStore<MemoryBackend>, SignatureStore<MemoryBackend>) {
    let limits = MemoryLimits::builder().page_size(page_size).build().expect("limits");
    let backend = MemoryBackend::with_limits(limits);
    let documents = DocumentStore::new(backend.clone(), BulkConfig::default());
    let signatures = SignatureStore::new(backend, BulkConfig::default());
    documents.create(false).await.expect("create documents");
    signatures.recreate().await.expect("create signatures");
    (documents, signatures)
}

fn doc_id(i: usize) -> String {
    format!("doc-{i:010}")
}

proptest! {
    #[test]
    fn backlog_has_no_gaps_or_duplicates(
        total in 0..300usize,
        signed in proptest::collection::btree_set(0..300usize, 0..40),
        page_size in 1..64usize,
        batch_size in 1..50usize,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        let backlog = rt.block_on(async {
            let (documents, signatures) = stores(page_size).await;
            let docs: Vec<Document> =
                (0..total).map(|i| Document::new(doc_id(i), format!("Name {i}"))).collect();
            documents.bulk_upsert(&docs).await.unwrap();

            let rows: Vec<Signature> = signed
                .iter()
                .filter(|&&i| i < total)
                .map(|&i| Signature {
                    id: doc_id(i),
                    key_id: "k-0123456789".into(),
                    signature: "c2ln".into(),
                })
                .collect();
            signatures.bulk_upsert(&rows).await.unwrap();

            documents.unsigned_ids(&signatures).await.unwrap()
        });

        let expected: Vec<String> =
            (0..total).filter(|i| !signed.contains(i)).map(doc_id).collect();
        prop_assert_eq!(&backlog, &expected);

        let batches = partition(&backlog, batch_size);
        let mut seen = HashSet::new();
        for batch in &batches {
            for id in &batch.message_ids {
                prop_assert!(seen.insert(id.clone()), "{} in two batches", id);
            }
        }
        prop_assert_eq!(seen.len(), backlog.len());
    }
}
