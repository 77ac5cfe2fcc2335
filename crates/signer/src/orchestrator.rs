//! Run orchestration: reset, seed the checkout queue, partition, dispatch.
//!
//! A run is safe to repeat. Each run recreates the signature table and
//! re-signs the whole backlog, so the final state after two runs equals the
//! state after one.

use chrono::{DateTime, Utc};
use keysign_queue::QueueTransport;
use serde::Serialize;
use tracing::info;

use crate::{
    checkout::KeyCheckoutQueue,
    crypto,
    dispatch::{BatchDispatchQueue, partition},
    error::Result,
    store::{Backend, DocumentStore, KeyStore, SignatureStore},
};

/// What one run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Random id of the run, used to correlate its log events.
    pub run_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the last batch was published.
    pub finished_at: DateTime<Utc>,
    /// Keys pushed onto the checkout queue.
    pub keys_seeded: usize,
    /// Documents in the backlog.
    pub documents: usize,
    /// Batch messages published.
    pub batches: usize,
    /// Documents per batch.
    pub batch_size: usize,
}

/// Drives a signing run.
#[derive(Debug, Clone)]
pub struct Orchestrator<B, Q> {
    checkout: KeyCheckoutQueue<Q>,
    dispatch: BatchDispatchQueue<Q>,
    keys: KeyStore<B>,
    documents: DocumentStore<B>,
    signatures: SignatureStore<B>,
}

impl<B, Q> Orchestrator<B, Q>
where
    B: Backend,
    Q: QueueTransport,
{
    /// Creates an orchestrator over the given queues and stores.
    pub fn new(
        checkout: KeyCheckoutQueue<Q>,
        dispatch: BatchDispatchQueue<Q>,
        keys: KeyStore<B>,
        documents: DocumentStore<B>,
        signatures: SignatureStore<B>,
    ) -> Self {
        Self { checkout, dispatch, keys, documents, signatures }
    }

    /// Purges both queues and empties the signature table.
    ///
    /// Keys held by running workers would be lost from the pool, so this must
    /// only run while no worker is in flight.
    ///
    /// # Errors
    ///
    /// Returns the first queue or store error.
    #[tracing::instrument(skip(self))]
    pub async fn reset(&self) -> Result<()> {
        let keys = self.checkout.purge().await?;
        let batches = self.dispatch.purge().await?;
        self.signatures.recreate().await?;
        info!(keys, batches, "reset");
        Ok(())
    }

    /// Runs the full lifecycle and returns once every batch is published.
    ///
    /// 1. reset queues and the signature table
    /// 2. push every key onto the checkout queue
    /// 3. enumerate unsigned documents
    /// 4. partition them into batches of `batch_size`
    /// 5. publish one message per batch
    ///
    /// # Errors
    ///
    /// Returns the first queue or store error. A failure after step 2 leaves
    /// the key pool fully available, so the run can simply be repeated.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, batch_size: usize) -> Result<RunSummary> {
        let run_id = crypto::new_id();
        let started_at = Utc::now();
        info!(%run_id, batch_size, "enter-sign-start");

        self.reset().await?;

        let keys = self.keys.keys().await?;
        let keys_seeded = self.checkout.push_all(&keys).await?;

        let backlog = self.documents.unsigned_ids(&self.signatures).await?;
        let batches = partition(&backlog, batch_size);
        let published = self.dispatch.publish(&batches).await?;

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            keys_seeded,
            documents: backlog.len(),
            batches: published,
            batch_size,
        };
        info!(
            run_id = %summary.run_id,
            keys = summary.keys_seeded,
            documents = summary.documents,
            batches = summary.batches,
            "exit-sign-start"
        );
        Ok(summary)
    }
}
