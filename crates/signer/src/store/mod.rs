//! Typed stores for keys, documents and signatures.
//!
//! Each store wraps a [`StorageBackend`] table and converts between records
//! and store items. Bulk writes go through a [`BulkWriter`] so every store
//! honors the configured chunk size and in-flight cap.
//!
//! [`BulkWriter`]: keysign_storage::BulkWriter

mod documents;
mod keys;
pub mod names;
mod signatures;

pub use documents::{DocumentStore, FetchedDocuments};
pub use keys::KeyStore;
pub use signatures::SignatureStore;

use keysign_storage::{
    Item, ScanRequest, StorageBackend, StorageResult, scan_all, to_item, types::item_key,
};
use serde::Serialize;

/// Bounds required of the backend shared by every store.
///
/// Blanket-implemented for any cloneable [`StorageBackend`].
pub trait Backend: StorageBackend + Clone + 'static {}

impl<B: StorageBackend + Clone + 'static> Backend for B {}

fn to_items<T: Serialize>(records: &[T]) -> StorageResult<Vec<Item>> {
    records.iter().map(to_item).collect()
}

/// Ids of every row in `table`, in scan order.
async fn scan_ids<B: Backend>(backend: &B, table: &str) -> StorageResult<Vec<String>> {
    let request = ScanRequest::builder().projection(vec!["id".to_owned()]).build();
    let items = scan_all(backend, table, &request).await?;
    Ok(items.iter().filter_map(|item| item_key(item, "id")).map(str::to_owned).collect())
}
