use keysign_storage::{BulkConfig, BulkWriter, ScanRequest, scan_records};
use tracing::{debug, info};

use super::{Backend, to_items};
use crate::{
    crypto,
    error::Result,
    model::{KEY_TABLE, Key, key_schema},
};

/// The fixed pool of signing keys.
///
/// Keys are written once, when the pool is seeded, and never modified. Which
/// worker holds a key is not recorded here.
#[derive(Debug, Clone)]
pub struct KeyStore<B> {
    writer: BulkWriter<B>,
}

impl<B: Backend> KeyStore<B> {
    /// Creates a store over `backend`.
    pub fn new(backend: B, bulk: BulkConfig) -> Self {
        Self { writer: BulkWriter::new(backend, bulk) }
    }

    fn backend(&self) -> &B {
        self.writer.backend()
    }

    /// Creates the key table. With `force`, an existing table is dropped
    /// first and every key is lost.
    ///
    /// # Errors
    ///
    /// Returns a store error if the table cannot be created.
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, force: bool) -> Result<()> {
        if force {
            self.backend().recreate_table(&key_schema()).await?;
        } else if !self.backend().create_table(&key_schema()).await? {
            debug!(table = KEY_TABLE, "table-already-exists");
        }
        Ok(())
    }

    /// Generates and stores `count` keys, unless the pool already holds keys.
    ///
    /// Returns the generated keys, or `None` when seeding was skipped.
    ///
    /// # Errors
    ///
    /// Returns a store error if counting or writing fails.
    #[tracing::instrument(skip(self))]
    pub async fn seed(&self, count: usize) -> Result<Option<Vec<Key>>> {
        debug!(count, "enter-key-seed");
        let existing = self.count().await?;
        if existing > 0 {
            info!(existing, "skip-key-seed");
            return Ok(None);
        }

        let keys: Vec<Key> = (0..count).map(|_| crypto::generate_key()).collect();
        let stats = self.writer.bulk_upsert(KEY_TABLE, to_items(&keys)?).await?;
        info!(upserted = stats.items, "exit-key-seed");
        Ok(Some(keys))
    }

    /// Every key in the pool.
    ///
    /// # Errors
    ///
    /// Returns a store error if any scan page fails.
    pub async fn keys(&self) -> Result<Vec<Key>> {
        Ok(scan_records(self.backend(), KEY_TABLE, &ScanRequest::default()).await?)
    }

    /// The key with id `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub async fn get(&self, id: &str) -> Result<Option<Key>> {
        Ok(self.backend().get_record(KEY_TABLE, id).await?)
    }

    /// Number of keys in the pool.
    ///
    /// # Errors
    ///
    /// Returns a store error if the table is missing.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.backend().count(KEY_TABLE).await?)
    }
}
