use keysign_storage::{BulkConfig, BulkWriteStats, BulkWriter, ScanRequest, scan_records};
use tracing::info;

use super::{Backend, scan_ids, to_items};
use crate::{
    error::Result,
    model::{SIGNATURE_TABLE, Signature, signature_schema},
};

/// Signatures keyed by document id.
///
/// Upserts are last-write-wins on the document id, so rewriting a batch
/// leaves the table unchanged.
#[derive(Debug, Clone)]
pub struct SignatureStore<B> {
    writer: BulkWriter<B>,
}

impl<B: Backend> SignatureStore<B> {
    /// Creates a store over `backend`.
    pub fn new(backend: B, bulk: BulkConfig) -> Self {
        Self { writer: BulkWriter::new(backend, bulk) }
    }

    fn backend(&self) -> &B {
        self.writer.backend()
    }

    /// Returns the writer used for bulk upserts.
    pub fn writer(&self) -> &BulkWriter<B> {
        &self.writer
    }

    /// Drops and recreates the signature table, discarding every row.
    ///
    /// # Errors
    ///
    /// Returns a store error if the table cannot be recreated.
    #[tracing::instrument(skip(self))]
    pub async fn recreate(&self) -> Result<()> {
        self.backend().recreate_table(&signature_schema()).await?;
        info!(table = SIGNATURE_TABLE, "signature table recreated");
        Ok(())
    }

    /// Upserts `signatures` in throttled chunks.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ChunkWriteFailed`](keysign_storage::StorageError::ChunkWriteFailed)
    /// if any chunk fails; earlier chunks stay written.
    pub async fn bulk_upsert(&self, signatures: &[Signature]) -> Result<BulkWriteStats> {
        let items = to_items(signatures)?;
        Ok(self.writer.bulk_upsert(SIGNATURE_TABLE, items).await?)
    }

    /// Number of stored signatures.
    ///
    /// # Errors
    ///
    /// Returns a store error if the table is missing.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.backend().count(SIGNATURE_TABLE).await?)
    }

    /// Ids of every signed document.
    ///
    /// # Errors
    ///
    /// Returns a store error if any scan page fails.
    pub async fn ids(&self) -> Result<Vec<String>> {
        Ok(scan_ids(self.backend(), SIGNATURE_TABLE).await?)
    }

    /// The signature of document `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails or the row does not decode.
    pub async fn get(&self, id: &str) -> Result<Option<Signature>> {
        Ok(self.backend().get_record(SIGNATURE_TABLE, id).await?)
    }

    /// Every stored signature.
    ///
    /// # Errors
    ///
    /// Returns a store error if any scan page fails.
    pub async fn all(&self) -> Result<Vec<Signature>> {
        Ok(scan_records(self.backend(), SIGNATURE_TABLE, &ScanRequest::default()).await?)
    }
}
