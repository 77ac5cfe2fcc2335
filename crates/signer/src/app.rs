//! Composition root.

use keysign_queue::QueueTransport;
use keysign_storage::{ConfigError, StorageBackend};

use crate::{
    checkout::KeyCheckoutQueue,
    config::SignerConfig,
    dispatch::BatchDispatchQueue,
    error::Result,
    handlers::Handlers,
    orchestrator::{Orchestrator, RunSummary},
    runner::DispatchRunner,
    startup::StartupService,
    store::{Backend, DocumentStore, KeyStore, SignatureStore},
    worker::SigningWorker,
};

/// Every component of the signing pipeline, wired over one store and one
/// queue transport.
///
/// Components are built once here and handed to each other through their
/// constructors. Clones share the underlying store and queue.
///
/// # Example
///
/// ```
/// use keysign::{SignerApp, SignerConfig};
/// use keysign_queue::MemoryQueue;
/// use keysign_storage::MemoryBackend;
///
/// let config = SignerConfig::builder().key_pool_size(2).build()?;
/// let app = SignerApp::new(config, MemoryBackend::new(), MemoryQueue::new())?;
/// assert_eq!(app.checkout().topic(), "keys.fifo");
/// # Ok::<(), keysign::SignerError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SignerApp<B, Q> {
    config: SignerConfig,
    checkout: KeyCheckoutQueue<Q>,
    dispatch: BatchDispatchQueue<Q>,
    keys: KeyStore<B>,
    documents: DocumentStore<B>,
    signatures: SignatureStore<B>,
    worker: SigningWorker<B, Q>,
    orchestrator: Orchestrator<B, Q>,
    startup: StartupService<B, Q>,
    handlers: Handlers<B, Q>,
    runner: DispatchRunner<B, Q>,
}

impl<B, Q> SignerApp<B, Q>
where
    B: Backend,
    Q: QueueTransport + Clone + 'static,
{
    /// Wires the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Config`](crate::SignerError::Config) if the
    /// configuration is invalid, or if `chunk_size` exceeds the backend's
    /// multi-item write limit.
    pub fn new(config: SignerConfig, backend: B, queue: Q) -> Result<Self> {
        config.validate()?;
        let max_batch_write = backend.max_batch_write();
        if config.chunk_size() > max_batch_write {
            return Err(ConfigError::AboveMaximum {
                field: "chunk_size",
                max: max_batch_write.to_string(),
                value: config.chunk_size().to_string(),
            }
            .into());
        }
        let bulk = config.bulk()?;

        let checkout =
            KeyCheckoutQueue::new(queue.clone(), config.key_topic(), config.checkout_timeout());
        let dispatch = BatchDispatchQueue::new(queue.clone(), config.sign_topic());

        let keys = KeyStore::new(backend.clone(), bulk);
        let documents = DocumentStore::new(backend.clone(), bulk);
        let signatures = SignatureStore::new(backend, bulk);

        let worker = SigningWorker::new(checkout.clone(), documents.clone(), signatures.clone());
        let orchestrator = Orchestrator::new(
            checkout.clone(),
            dispatch.clone(),
            keys.clone(),
            documents.clone(),
            signatures.clone(),
        );
        let startup = StartupService::new(
            config.clone(),
            queue.clone(),
            keys.clone(),
            documents.clone(),
            signatures.clone(),
        );
        let handlers = Handlers::new(
            startup.clone(),
            orchestrator.clone(),
            worker.clone(),
            documents.clone(),
            signatures.clone(),
        );
        let runner = DispatchRunner::builder()
            .queue(queue)
            .worker(worker.clone())
            .sign_topic(config.sign_topic())
            .dead_letter_topic(config.dead_letter_topic())
            .concurrency(config.dispatch_concurrency())
            .max_receive_count(config.max_receive_count())
            .build();

        Ok(Self {
            config,
            checkout,
            dispatch,
            keys,
            documents,
            signatures,
            worker,
            orchestrator,
            startup,
            handlers,
            runner,
        })
    }

    /// Starts a run with the configured batch size.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::run`].
    pub async fn start(&self) -> Result<RunSummary> {
        self.orchestrator.run(self.config.batch_size()).await
    }

    #[must_use]
    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    #[must_use]
    pub fn checkout(&self) -> &KeyCheckoutQueue<Q> {
        &self.checkout
    }

    #[must_use]
    pub fn dispatch(&self) -> &BatchDispatchQueue<Q> {
        &self.dispatch
    }

    #[must_use]
    pub fn keys(&self) -> &KeyStore<B> {
        &self.keys
    }

    #[must_use]
    pub fn documents(&self) -> &DocumentStore<B> {
        &self.documents
    }

    #[must_use]
    pub fn signatures(&self) -> &SignatureStore<B> {
        &self.signatures
    }

    #[must_use]
    pub fn worker(&self) -> &SigningWorker<B, Q> {
        &self.worker
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator<B, Q> {
        &self.orchestrator
    }

    #[must_use]
    pub fn startup(&self) -> &StartupService<B, Q> {
        &self.startup
    }

    #[must_use]
    pub fn handlers(&self) -> &Handlers<B, Q> {
        &self.handlers
    }

    #[must_use]
    pub fn runner(&self) -> &DispatchRunner<B, Q> {
        &self.runner
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use keysign_queue::MemoryQueue;
    use keysign_storage::{MemoryBackend, MemoryLimits};

    use super::*;
    use crate::SignerError;

    #[test]
    fn test_wiring_follows_config() {
        let config = SignerConfig::builder()
            .key_topic("https://sqs.local/000000000000/pool.fifo")
            .sign_topic("batches")
            .checkout_timeout(Duration::from_secs(3))
            .build()
            .unwrap();
        let app = SignerApp::new(config, MemoryBackend::new(), MemoryQueue::new()).unwrap();
        assert_eq!(app.checkout().topic(), "pool.fifo");
        assert_eq!(app.checkout().timeout(), Duration::from_secs(3));
        assert_eq!(app.dispatch().topic(), "batches");
    }

    #[tokio::test]
    async fn test_components_share_state() {
        let config = SignerConfig::builder().key_pool_size(3).document_seed_count(0).build().unwrap();
        let app = SignerApp::new(config, MemoryBackend::new(), MemoryQueue::new()).unwrap();
        app.startup().setup().await.unwrap();
        assert_eq!(app.keys().count().await.unwrap(), 3);

        let summary = app.start().await.unwrap();
        assert_eq!(summary.keys_seeded, 3);
        assert_eq!(summary.batch_size, 1000);
        assert_eq!(app.checkout().available().await.unwrap(), 3);
    }

    #[test]
    fn test_chunk_size_bounded_by_backend() {
        let config = SignerConfig::builder().chunk_size(30).build().unwrap();
        let err = SignerApp::new(config, MemoryBackend::new(), MemoryQueue::new()).unwrap_err();
        assert!(matches!(
            err,
            SignerError::Config(ConfigError::AboveMaximum { field: "chunk_size", ref max, ref value })
                if max == "25" && value == "30"
        ));

        let limits = MemoryLimits::builder().max_batch_write(10).build().unwrap();
        let config = SignerConfig::builder().chunk_size(10).build().unwrap();
        assert!(SignerApp::new(config, MemoryBackend::with_limits(limits), MemoryQueue::new()).is_ok());
    }
}
