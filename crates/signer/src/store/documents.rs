use std::collections::{HashMap, HashSet};

use keysign_storage::{BulkConfig, BulkReader, BulkWriteStats, BulkWriter, from_item};
use tracing::{debug, info, warn};

use super::{Backend, SignatureStore, names, scan_ids, to_items};
use crate::{
    crypto,
    error::Result,
    model::{DOCUMENT_TABLE, Document, document_schema},
};

/// Result of a fetch by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedDocuments {
    /// Documents found, in the order their ids were requested.
    pub documents: Vec<Document>,
    /// Requested ids with no document.
    pub missing: Vec<String>,
}

/// The documents to sign.
#[derive(Debug, Clone)]
pub struct DocumentStore<B> {
    writer: BulkWriter<B>,
    reader: BulkReader<B>,
}

impl<B: Backend> DocumentStore<B> {
    /// Creates a store over `backend`. `bulk.max_in_flight` caps concurrent
    /// chunk reads as well as writes.
    pub fn new(backend: B, bulk: BulkConfig) -> Self {
        Self {
            reader: BulkReader::new(backend.clone(), bulk),
            writer: BulkWriter::new(backend, bulk),
        }
    }

    fn backend(&self) -> &B {
        self.writer.backend()
    }

    /// Creates the document table. With `force`, an existing table is
    /// dropped first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the table cannot be created.
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, force: bool) -> Result<()> {
        if force {
            self.backend().recreate_table(&document_schema()).await?;
        } else if !self.backend().create_table(&document_schema()).await? {
            debug!(table = DOCUMENT_TABLE, "table-already-exists");
        }
        Ok(())
    }

    /// Upserts one document.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    pub async fn upsert(&self, document: &Document) -> Result<()> {
        Ok(self.backend().put_record(DOCUMENT_TABLE, document).await?)
    }

    /// Upserts `documents` in throttled chunks.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ChunkWriteFailed`](keysign_storage::StorageError::ChunkWriteFailed)
    /// if any chunk fails; earlier chunks stay written.
    pub async fn bulk_upsert(&self, documents: &[Document]) -> Result<BulkWriteStats> {
        let items = to_items(documents)?;
        Ok(self.writer.bulk_upsert(DOCUMENT_TABLE, items).await?)
    }

    /// Number of stored documents.
    ///
    /// # Errors
    ///
    /// Returns a store error if the table is missing.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.backend().count(DOCUMENT_TABLE).await?)
    }

    /// Writes `count` documents with random ids and generated names.
    ///
    /// Without `force`, seeding is skipped when the table already holds
    /// documents. Returns the number of documents written.
    ///
    /// # Errors
    ///
    /// Returns a store error if counting or writing fails.
    #[tracing::instrument(skip(self))]
    pub async fn seed(&self, count: usize, force: bool) -> Result<usize> {
        debug!(count, force, "enter-message-seed");
        if !force {
            let existing = self.count().await?;
            if existing > 0 {
                info!(existing, "skip-message-seed");
                return Ok(0);
            }
        }

        let documents: Vec<Document> = {
            let mut rng = rand::thread_rng();
            (0..count).map(|_| Document::new(crypto::new_id(), names::full_name(&mut rng))).collect()
        };
        let stats = self.bulk_upsert(&documents).await?;
        info!(count = stats.items, chunks = stats.chunks, "exit-message-seed");
        Ok(stats.items)
    }

    /// Fetches the documents with the given ids.
    ///
    /// Reads run in chunks of the store's batch-get limit, at most
    /// `max_in_flight` at once. Documents come back in request order; ids
    /// with no document are listed in [`FetchedDocuments::missing`].
    ///
    /// # Errors
    ///
    /// Returns the first chunk read error, or a serialization error for a
    /// row that does not decode.
    #[tracing::instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn by_ids(&self, ids: &[String]) -> Result<FetchedDocuments> {
        debug!(ids = ids.len(), "enter-message-by-ids");
        let items = self.reader.fetch(DOCUMENT_TABLE, ids).await?;

        let mut found: HashMap<String, Document> = HashMap::with_capacity(items.len());
        for item in items {
            let document: Document = from_item(item)?;
            found.insert(document.id.clone(), document);
        }

        let mut fetched = FetchedDocuments::default();
        for id in ids {
            match found.get(id) {
                Some(document) => fetched.documents.push(document.clone()),
                None => fetched.missing.push(id.clone()),
            }
        }

        if !fetched.missing.is_empty() {
            warn!(
                requested = ids.len(),
                missing = fetched.missing.len(),
                "fetch returned fewer documents than requested"
            );
        }
        debug!(ids = ids.len(), messages = fetched.documents.len(), "exit-message-by-ids");
        Ok(fetched)
    }

    /// Ids of every document, in scan order.
    ///
    /// # Errors
    ///
    /// Returns a store error if any scan page fails.
    pub async fn ids(&self) -> Result<Vec<String>> {
        Ok(scan_ids(self.backend(), DOCUMENT_TABLE).await?)
    }

    /// Ids of documents with no signature, in scan order.
    ///
    /// # Errors
    ///
    /// Returns a store error if either scan fails.
    #[tracing::instrument(skip_all)]
    pub async fn unsigned_ids(&self, signatures: &SignatureStore<B>) -> Result<Vec<String>> {
        let signed: HashSet<String> = signatures.ids().await?.into_iter().collect();
        let unsigned: Vec<String> =
            self.ids().await?.into_iter().filter(|id| !signed.contains(id)).collect();
        debug!(signed = signed.len(), unsigned = unsigned.len(), "unsigned ids");
        Ok(unsigned)
    }
}
