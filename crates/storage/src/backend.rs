//! Store contract definition.
//!
//! This module defines the [`StorageBackend`] trait, the table-oriented
//! key-value interface every store implementation provides.
//!
//! # Design Philosophy
//!
//! - **Tables of JSON items**: each table is keyed by one string attribute
//! - **Async by default**: all operations are async for non-blocking I/O
//! - **Bounded multi-item calls**: `batch_get`/`batch_put` reject oversized calls; callers chunk
//!   (see [`BulkWriter`](crate::BulkWriter) and [`BulkReader`](crate::BulkReader))
//! - **Paged scans**: `scan_page` returns one page plus an opaque continuation token (see
//!   [`scan_all`](crate::scan::scan_all))
//!
//! Record semantics (keys, documents, signatures) live in the layers built on
//! top of this trait, not in the stores.

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    error::{StorageError, StorageResult},
    types::{Item, ScanPage, ScanRequest, TableSchema},
};

/// Default maximum number of items accepted by one [`StorageBackend::batch_put`] call.
pub const DEFAULT_MAX_BATCH_WRITE: usize = 25;

/// Default maximum number of ids accepted by one [`StorageBackend::batch_get`] call.
pub const DEFAULT_MAX_BATCH_GET: usize = 100;

/// Abstract table-oriented key-value store.
///
/// Implementations must be thread-safe (`Send + Sync`) and support concurrent
/// operations. They are expected to be cheap to clone, sharing the same
/// underlying data between clones.
///
/// # Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](StorageBackend::get) | Point read by id |
/// | [`put`](StorageBackend::put) | Point upsert |
/// | [`batch_get`](StorageBackend::batch_get) | Multi-id read, bounded per call |
/// | [`batch_put`](StorageBackend::batch_put) | Multi-item upsert, bounded per call |
/// | [`scan_page`](StorageBackend::scan_page) | One page of a filtered, projected scan |
/// | [`count`](StorageBackend::count) | Number of items in a table |
/// | [`create_table`](StorageBackend::create_table) | Create a table if absent |
/// | [`drop_table`](StorageBackend::drop_table) | Delete a table if present |
/// | [`recreate_table`](StorageBackend::recreate_table) | Drop then create (truncate) |
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves one item by id.
    ///
    /// Returns `Ok(None)` when the table exists but holds no such item.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, table: &str, id: &str) -> StorageResult<Option<Item>>;

    /// Inserts or replaces one item, keyed by the table's key attribute.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn put(&self, table: &str, item: Item) -> StorageResult<()>;

    /// Retrieves several items by id.
    ///
    /// Missing ids are silently omitted, so the result may be shorter than
    /// `ids`. Result order is unspecified.
    ///
    /// # Errors
    ///
    /// [`StorageError::BatchTooLarge`] if `ids` exceeds
    /// [`max_batch_get`](StorageBackend::max_batch_get).
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn batch_get(&self, table: &str, ids: &[String]) -> StorageResult<Vec<Item>>;

    /// Inserts or replaces several items in one call.
    ///
    /// # Errors
    ///
    /// [`StorageError::BatchTooLarge`] if `items` exceeds
    /// [`max_batch_write`](StorageBackend::max_batch_write).
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn batch_put(&self, table: &str, items: Vec<Item>) -> StorageResult<()>;

    /// Reads one page of a scan.
    ///
    /// The filter is applied after items are read and the projection after
    /// filtering. A page may be empty yet carry a continuation token.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn scan_page(&self, table: &str, request: &ScanRequest) -> StorageResult<ScanPage>;

    /// Returns the number of items in a table.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn count(&self, table: &str) -> StorageResult<usize>;

    /// Creates a table. Returns `false` if it already existed.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn create_table(&self, schema: &TableSchema) -> StorageResult<bool>;

    /// Deletes a table and all its items. Returns `false` if it did not exist.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn drop_table(&self, table: &str) -> StorageResult<bool>;

    /// Lists the names of all tables.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_tables(&self) -> StorageResult<Vec<String>>;

    /// Drops and re-creates a table, leaving it empty.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn recreate_table(&self, schema: &TableSchema) -> StorageResult<()> {
        self.drop_table(schema.name()).await?;
        self.create_table(schema).await?;
        Ok(())
    }

    /// Maximum number of items per [`batch_put`](StorageBackend::batch_put) call.
    fn max_batch_write(&self) -> usize {
        DEFAULT_MAX_BATCH_WRITE
    }

    /// Maximum number of ids per [`batch_get`](StorageBackend::batch_get) call.
    fn max_batch_get(&self) -> usize {
        DEFAULT_MAX_BATCH_GET
    }

    /// Serializes `record` and upserts it.
    ///
    /// # Errors
    ///
    /// [`StorageError::Serialization`] if `record` does not serialize to a JSON object.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn put_record<T>(&self, table: &str, record: &T) -> StorageResult<()>
    where
        T: Serialize + Send + Sync,
    {
        let item = to_item(record)?;
        self.put(table, item).await
    }

    /// Reads one item by id and deserializes it.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_record<T>(&self, table: &str, id: &str) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.get(table, id).await?.map(from_item).transpose()
    }
}

/// Serializes a record into an [`Item`].
///
/// # Errors
///
/// [`StorageError::Serialization`] if the record is not a JSON object.
pub fn to_item<T: Serialize + ?Sized>(record: &T) -> StorageResult<Item> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StorageError::serialization(format!(
            "records must serialize to JSON objects, got {}",
            json_kind(&other)
        ))),
    }
}

/// Deserializes an [`Item`] into a record.
///
/// # Errors
///
/// [`StorageError::Serialization`] if the item does not match `T`.
pub fn from_item<T: DeserializeOwned>(item: Item) -> StorageResult<T> {
    Ok(serde_json::from_value(serde_json::Value::Object(item))?)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
