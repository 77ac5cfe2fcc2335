//! Signing worker.
//!
//! One call to [`SigningWorker::handle_batch`] processes one batch message:
//!
//! ```text
//! START ─┬─ pop key ───────┬─► KEY_ACQUIRED ─► SIGNED ─► KEY_RETURNED ─► PERSISTED ─► DONE
//!        └─ fetch by ids ──┘
//!
//! any step ─► FAILED
//! ```
//!
//! The key checkout and the document fetch run concurrently. Once a key has
//! been popped it is pushed back on every path: before the signatures are
//! written on success, and before the error is surfaced on failure. A key is
//! therefore never held past the point where it is needed, and a failed
//! invocation never shrinks the pool.
//!
//! Signature rows are keyed by document id, so a redelivered batch rewrites
//! the same rows.

use std::fmt;

use keysign_queue::QueueTransport;
use keysign_storage::BulkWriteStats;
use tracing::{debug, error, trace, warn};

use crate::{
    checkout::KeyCheckoutQueue,
    crypto::KeySigner,
    error::{Result, SignerError},
    events::{AvailableKey, SignBatchCommand},
    model::{Document, Signature},
    store::{Backend, DocumentStore, SignatureStore},
};

/// States a worker invocation moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Batch message received.
    Start,
    /// Key checked out and documents fetched.
    KeyAcquired,
    /// Every fetched document signed.
    Signed,
    /// Key pushed back onto the checkout queue.
    KeyReturned,
    /// Signatures written.
    Persisted,
    /// Invocation succeeded.
    Done,
    /// Invocation failed.
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "START",
            Self::KeyAcquired => "KEY_ACQUIRED",
            Self::Signed => "SIGNED",
            Self::KeyReturned => "KEY_RETURNED",
            Self::Persisted => "PERSISTED",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        })
    }
}

/// The fetch returned fewer documents than the batch named.
///
/// Not an error: the documents that were found are still signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFetch {
    /// Number of ids in the batch.
    pub requested: usize,
    /// Ids with no document.
    pub missing: Vec<String>,
}

/// Result of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Index of the processed batch.
    pub batch_index: usize,
    /// Key used, or `None` for an empty batch.
    pub key_id: Option<String>,
    /// Number of signatures written.
    pub signed: usize,
    /// Set when some documents were missing.
    pub partial_fetch: Option<PartialFetch>,
    /// States visited, in order.
    pub trail: Vec<WorkerState>,
    /// Bulk write statistics for the signature upsert.
    pub write: BulkWriteStats,
}

#[derive(Debug)]
struct Trail {
    batch: usize,
    states: Vec<WorkerState>,
}

impl Trail {
    fn start(batch: usize) -> Self {
        trace!(batch, state = %WorkerState::Start, "worker state");
        Self { batch, states: vec![WorkerState::Start] }
    }

    fn enter(&mut self, state: WorkerState) {
        trace!(batch = self.batch, %state, "worker state");
        self.states.push(state);
    }

    fn fail(&mut self, err: &SignerError) {
        let from = self.states.last().copied().unwrap_or(WorkerState::Start);
        warn!(batch = self.batch, %from, error = %err, "worker failed");
        self.states.push(WorkerState::Failed);
    }
}

/// Processes batch messages: checks out a key, signs, returns the key and
/// persists the signatures.
#[derive(Debug, Clone)]
pub struct SigningWorker<B, Q> {
    checkout: KeyCheckoutQueue<Q>,
    documents: DocumentStore<B>,
    signatures: SignatureStore<B>,
}

impl<B, Q> SigningWorker<B, Q>
where
    B: Backend,
    Q: QueueTransport,
{
    /// Creates a worker over the given checkout queue and stores.
    pub fn new(
        checkout: KeyCheckoutQueue<Q>,
        documents: DocumentStore<B>,
        signatures: SignatureStore<B>,
    ) -> Self {
        Self { checkout, documents, signatures }
    }

    /// Signs every document of one batch.
    ///
    /// # Errors
    ///
    /// - [`SignerError::KeyUnavailable`] if no key could be checked out; nothing is written
    /// - [`SignerError::Storage`] if the fetch or the signature write fails
    /// - [`SignerError::InvalidKeyMaterial`] if the checked-out key cannot sign
    /// - [`SignerError::KeyReturnFailed`] if the key could not be pushed back
    ///
    /// In every case except `KeyUnavailable` and `KeyReturnFailed`, a key that
    /// was checked out has been returned before the error is reported.
    #[tracing::instrument(
        skip_all,
        fields(batch = command.batch_index, ids = command.message_ids.len())
    )]
    pub async fn handle_batch(&self, command: &SignBatchCommand) -> Result<BatchOutcome> {
        let mut trail = Trail::start(command.batch_index);

        if command.message_ids.is_empty() {
            debug!(batch = command.batch_index, "empty batch");
            trail.enter(WorkerState::Done);
            return Ok(BatchOutcome {
                batch_index: command.batch_index,
                key_id: None,
                signed: 0,
                partial_fetch: None,
                trail: trail.states,
                write: BulkWriteStats::default(),
            });
        }

        let (checkout, fetched) =
            tokio::join!(self.checkout.pop(), self.documents.by_ids(&command.message_ids));

        let key = match checkout {
            Ok(key) => key,
            Err(err) => {
                trail.fail(&err);
                return Err(err);
            },
        };

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(err) => return Err(self.abort(&mut trail, &key, err).await),
        };
        trail.enter(WorkerState::KeyAcquired);

        let partial_fetch = (!fetched.missing.is_empty()).then(|| {
            warn!(
                batch = command.batch_index,
                requested = command.message_ids.len(),
                missing = fetched.missing.len(),
                "partial fetch, signing documents found"
            );
            PartialFetch { requested: command.message_ids.len(), missing: fetched.missing }
        });

        let signatures = match sign_all(&key, &fetched.documents) {
            Ok(signatures) => signatures,
            Err(err) => return Err(self.abort(&mut trail, &key, err).await),
        };
        trail.enter(WorkerState::Signed);

        if let Err(err) = self.release(&key).await {
            trail.fail(&err);
            return Err(err);
        }
        trail.enter(WorkerState::KeyReturned);

        let write = match self.signatures.bulk_upsert(&signatures).await {
            Ok(write) => write,
            Err(err) => {
                trail.fail(&err);
                return Err(err);
            },
        };
        trail.enter(WorkerState::Persisted);
        trail.enter(WorkerState::Done);

        debug!(
            batch = command.batch_index,
            key_id = %key.id,
            signed = signatures.len(),
            chunks = write.chunks,
            duration_ms = write.duration.as_millis() as u64,
            "batch signed"
        );
        Ok(BatchOutcome {
            batch_index: command.batch_index,
            key_id: Some(key.id.clone()),
            signed: signatures.len(),
            partial_fetch,
            trail: trail.states,
            write,
        })
    }

    async fn release(&self, key: &AvailableKey) -> Result<()> {
        self.checkout.push(key).await.map_err(|err| {
            let source = match err {
                SignerError::Queue(source) => source,
                other => keysign_queue::QueueError::internal(other.to_string()),
            };
            SignerError::KeyReturnFailed { key_id: key.id.clone(), source }
        })
    }

    /// Returns `key` after a failure and hands back the error to report.
    async fn abort(&self, trail: &mut Trail, key: &AvailableKey, err: SignerError) -> SignerError {
        trail.fail(&err);
        match self.release(key).await {
            Ok(()) => {
                debug!(key_id = %key.id, "key returned after failure");
                err
            },
            Err(release_err) => {
                error!(key_id = %key.id, cause = %err, "key could not be returned after failure");
                release_err
            },
        }
    }
}

fn sign_all(key: &AvailableKey, documents: &[Document]) -> Result<Vec<Signature>> {
    let signer = KeySigner::from_available(key)?;
    Ok(documents.iter().map(|document| signer.sign(document)).collect())
}
