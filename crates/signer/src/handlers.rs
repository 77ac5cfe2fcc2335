//! Entry points, one per inbound message type.
//!
//! Every entry point takes the raw JSON body it was invoked with and
//! validates it before doing any work. A body that does not parse is
//! reported as a single `body` field error, so callers only ever see
//! [`SignerError::Validation`] for bad input.

use keysign_queue::QueueTransport;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    error::{Result, SignerError},
    events::{Event, SeedDocumentsCommand, SignBatchCommand, StartSignCommand},
    orchestrator::{Orchestrator, RunSummary},
    startup::{SetupReport, StartupService},
    store::{Backend, DocumentStore, SignatureStore},
    validation::{Validate, ValidationErrors},
    worker::{BatchOutcome, SigningWorker},
};

/// Parses `json` into `T` and validates it.
///
/// # Errors
///
/// Returns [`SignerError::Validation`] if the body is not valid JSON for `T`
/// or breaks one of `T`'s field rules.
pub fn decode<T>(json: &str) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_str(json)
        .map_err(|e| ValidationErrors::single("body", e.to_string()))?;
    value.validate()?;
    Ok(value)
}

/// Result of [`Handlers::handle_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutput {
    /// A run was started.
    Started(RunSummary),
    /// A batch was signed.
    Signed(BatchOutcome),
    /// Documents were seeded.
    Seeded(usize),
}

const ROUTED_EVENTS: &str = "sign.start, sign.batch or seed.documents";

/// Inbound entry points of the signing pipeline.
#[derive(Debug, Clone)]
pub struct Handlers<B, Q> {
    startup: StartupService<B, Q>,
    orchestrator: Orchestrator<B, Q>,
    worker: SigningWorker<B, Q>,
    documents: DocumentStore<B>,
    signatures: SignatureStore<B>,
}

impl<B, Q> Handlers<B, Q>
where
    B: Backend,
    Q: QueueTransport,
{
    /// Creates the entry points over already-wired components.
    pub fn new(
        startup: StartupService<B, Q>,
        orchestrator: Orchestrator<B, Q>,
        worker: SigningWorker<B, Q>,
        documents: DocumentStore<B>,
        signatures: SignatureStore<B>,
    ) -> Self {
        Self { startup, orchestrator, worker, documents, signatures }
    }

    /// Prepares topics and tables. See [`StartupService::setup`].
    ///
    /// # Errors
    ///
    /// Returns the first queue or store error.
    pub async fn startup(&self) -> Result<SetupReport> {
        self.startup.setup().await
    }

    /// Starts a run from a `{"batchSize": n}` body.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Validation`] for a bad body, otherwise any
    /// error of [`Orchestrator::run`].
    pub async fn start_sign(&self, json: &str) -> Result<RunSummary> {
        let command: StartSignCommand = decode(json)?;
        self.orchestrator.run(command.batch_size).await
    }

    /// Signs one batch from a `{"batchIndex": i, "messageIds": [...]}` body.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Validation`] for a bad body, otherwise any
    /// error of [`SigningWorker::handle_batch`].
    pub async fn sign(&self, json: &str) -> Result<BatchOutcome> {
        let command: SignBatchCommand = decode(json)?;
        self.worker.handle_batch(&command).await
    }

    /// Seeds documents from a `{"count": n}` body.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Validation`] for a bad body, otherwise a store
    /// error.
    pub async fn seed(&self, json: &str) -> Result<usize> {
        let command: SeedDocumentsCommand = decode(json)?;
        self.startup.seed(command).await
    }

    /// Ids of documents that have no signature yet.
    ///
    /// # Errors
    ///
    /// Returns a store error if a scan fails.
    pub async fn unsigned_ids(&self) -> Result<Vec<String>> {
        self.documents.unsigned_ids(&self.signatures).await
    }

    /// Routes a tagged envelope to the matching entry point.
    ///
    /// # Errors
    ///
    /// - [`SignerError::Validation`] if the envelope or its payload is invalid
    /// - [`SignerError::UnexpectedEvent`] for an event type with no entry point
    /// - any error of the handler the event was routed to
    pub async fn handle_event(&self, json: &str) -> Result<HandlerOutput> {
        let event: Event = serde_json::from_str(json)
            .map_err(|e| ValidationErrors::single("body", e.to_string()))?;
        debug!(tag = event.tag(), "routing event");

        match event {
            Event::StartSign(command) => {
                command.validate()?;
                Ok(HandlerOutput::Started(self.orchestrator.run(command.batch_size).await?))
            },
            Event::SignBatch(command) => {
                command.validate()?;
                Ok(HandlerOutput::Signed(self.worker.handle_batch(&command).await?))
            },
            Event::SeedDocuments(command) => {
                command.validate()?;
                Ok(HandlerOutput::Seeded(self.startup.seed(command).await?))
            },
            other => Err(SignerError::UnexpectedEvent {
                expected: ROUTED_EVENTS,
                actual: other.tag().to_owned(),
            }),
        }
    }
}
