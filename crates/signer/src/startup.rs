//! First-time setup and document seeding.

use keysign_queue::QueueTransport;
use tracing::{debug, info};

use crate::{
    config::SignerConfig,
    error::Result,
    events::{Event, SeedDocumentsCommand},
    store::{Backend, DocumentStore, KeyStore, SignatureStore},
};

/// What [`StartupService::setup`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupReport {
    /// Keys generated for the pool; zero if the pool already existed.
    pub keys_seeded: usize,
    /// Seed commands published; zero if documents already existed.
    pub seed_commands: usize,
}

/// Splits `total` into seed commands of at most `chunk` documents each.
#[must_use]
pub fn seed_commands(total: usize, chunk: usize) -> Vec<SeedDocumentsCommand> {
    let chunk = chunk.max(1);
    let mut commands = Vec::with_capacity(total.div_ceil(chunk));
    let mut remaining = total;
    while remaining > 0 {
        let count = remaining.min(chunk);
        commands.push(SeedDocumentsCommand { count });
        remaining -= count;
    }
    commands
}

/// Prepares topics and tables, and seeds keys and documents on first run.
#[derive(Debug, Clone)]
pub struct StartupService<B, Q> {
    config: SignerConfig,
    queue: Q,
    keys: KeyStore<B>,
    documents: DocumentStore<B>,
    signatures: SignatureStore<B>,
}

impl<B, Q> StartupService<B, Q>
where
    B: Backend,
    Q: QueueTransport,
{
    /// Creates a startup service.
    pub fn new(
        config: SignerConfig,
        queue: Q,
        keys: KeyStore<B>,
        documents: DocumentStore<B>,
        signatures: SignatureStore<B>,
    ) -> Self {
        Self { config, queue, keys, documents, signatures }
    }

    /// Runs the setup sequence. Safe to repeat: existing keys and documents
    /// are kept, only the signature table is emptied.
    ///
    /// Document seeding is not done inline. When the document table is
    /// empty, the seed count is fanned out as [`SeedDocumentsCommand`]
    /// messages on the seed topic, each handled by [`seed`](Self::seed).
    ///
    /// # Errors
    ///
    /// Returns the first queue or store error.
    #[tracing::instrument(skip(self))]
    pub async fn setup(&self) -> Result<SetupReport> {
        for topic in [
            self.config.key_topic(),
            self.config.sign_topic(),
            self.config.seed_topic(),
            self.config.dead_letter_topic(),
        ] {
            if self.queue.ensure_topic(topic).await? {
                debug!(topic, "topic created");
            }
        }

        self.keys.create(false).await?;
        let keys_seeded = self
            .keys
            .seed(self.config.key_pool_size())
            .await?
            .map_or(0, |keys| keys.len());

        self.signatures.recreate().await?;

        self.documents.create(false).await?;
        let mut seed_commands_published = 0;
        if self.documents.count().await? == 0 {
            let bodies = seed_commands(
                self.config.document_seed_count(),
                self.config.seed_chunk_size(),
            )
            .into_iter()
            .map(|command| Event::from(command).encode())
            .collect::<Result<Vec<_>>>()?;
            seed_commands_published =
                self.queue.push_batch(self.config.seed_topic(), bodies).await?.len();
        }

        let report = SetupReport { keys_seeded, seed_commands: seed_commands_published };
        info!(keys = report.keys_seeded, seed_commands = report.seed_commands, "setup complete");
        Ok(report)
    }

    /// Handles one seed command by writing `count` new documents.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    #[tracing::instrument(skip(self))]
    pub async fn seed(&self, command: SeedDocumentsCommand) -> Result<usize> {
        self.documents.seed(command.count, true).await
    }
}
