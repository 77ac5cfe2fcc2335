//! Paginated scans.
//!
//! [`StorageBackend::scan_page`] returns one page at a time. [`scan_all`]
//! follows continuation tokens until the store reports no more pages, so
//! callers never assume a maximum result size.

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    StorageBackend, StorageResult,
    backend::from_item,
    types::{Item, ScanRequest},
};

/// Reads every page of a scan and returns the accumulated items.
///
/// An empty table yields an empty vector after a single page request.
///
/// # Errors
///
/// Returns the first page error; items from earlier pages are discarded.
#[tracing::instrument(skip(backend, request))]
pub async fn scan_all<B>(backend: &B, table: &str, request: &ScanRequest) -> StorageResult<Vec<Item>>
where
    B: StorageBackend,
{
    let mut items = Vec::new();
    let mut pages = 0usize;
    let mut page_request = request.clone();

    loop {
        let page = backend.scan_page(table, &page_request).await?;
        pages += 1;
        items.extend(page.items);
        debug!(table, pages, accumulated = items.len(), more = page.next.is_some(), "scan-paging");

        match page.next {
            Some(token) => page_request = request.resume(Some(token)),
            None => break,
        }
    }

    Ok(items)
}

/// Like [`scan_all`], deserializing each item into `T`.
///
/// # Errors
///
/// Returns the first page error or the first item that does not decode.
pub async fn scan_records<B, T>(
    backend: &B,
    table: &str,
    request: &ScanRequest,
) -> StorageResult<Vec<T>>
where
    B: StorageBackend,
    T: DeserializeOwned,
{
    scan_all(backend, table, request).await?.into_iter().map(from_item).collect()
}
