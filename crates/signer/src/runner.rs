//! In-process consumer of the dispatch topic.
//!
//! [`DispatchRunner`] stands in for the platform that would otherwise invoke
//! one signing worker per batch message. It pops batch messages, runs up to
//! `concurrency` workers at once and applies the redelivery policy: a failed
//! message goes back on the dispatch topic until it has been received
//! `max_receive_count` times, then moves to the dead-letter topic.

use std::{sync::Arc, time::Duration};

use keysign_queue::{QueueError, QueueMessage, QueueTransport};
use tokio::{
    sync::{AcquireError, Semaphore},
    task::{JoinError, JoinSet},
};
use tracing::{Instrument, debug, error, info, warn};

use crate::{
    error::{Result, SignerError},
    events::{Event, SignBatchCommand},
    store::Backend,
    validation::Validate,
    worker::SigningWorker,
};

/// Totals from one [`DispatchRunner::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Batch messages processed successfully.
    pub succeeded: usize,
    /// Deliveries that failed, including those later retried.
    pub failed_attempts: usize,
    /// Messages moved to the dead-letter topic.
    pub dead_lettered: usize,
    /// Signatures written by successful deliveries.
    pub signed: usize,
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Succeeded { signed: usize },
    Retried,
    DeadLettered,
}

impl DrainReport {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Succeeded { signed } => {
                self.succeeded += 1;
                self.signed += signed;
            },
            Delivery::Retried => self.failed_attempts += 1,
            Delivery::DeadLettered => {
                self.failed_attempts += 1;
                self.dead_lettered += 1;
            },
        }
    }
}

/// Results gathered from finished worker tasks.
#[derive(Default)]
struct Tally {
    report: DrainReport,
    /// First runner-level error. Later ones are logged and dropped.
    failure: Option<SignerError>,
}

impl Tally {
    fn absorb(&mut self, joined: std::result::Result<Result<Delivery>, JoinError>) {
        match joined {
            Ok(Ok(delivery)) => self.report.record(delivery),
            Ok(Err(err)) => self.fail(err),
            Err(err) => {
                error!(error = %err, "worker task failed");
                self.fail(SignerError::Queue(QueueError::internal(format!(
                    "worker task failed: {err}"
                ))));
            },
        }
    }

    fn fail(&mut self, err: SignerError) {
        match self.failure {
            Some(_) => warn!(error = %err, "further runner error during drain"),
            None => self.failure = Some(err),
        }
    }
}

/// Runs signing workers against the dispatch topic.
#[derive(Debug, Clone)]
pub struct DispatchRunner<B, Q> {
    queue: Q,
    worker: SigningWorker<B, Q>,
    sign_topic: String,
    dead_letter_topic: String,
    concurrency: usize,
    max_receive_count: u32,
}

#[bon::bon]
impl<B, Q> DispatchRunner<B, Q>
where
    B: Backend,
    Q: QueueTransport + Clone + 'static,
{
    /// Creates a runner. `concurrency` and `max_receive_count` are raised to
    /// at least one.
    #[builder]
    pub fn new(
        queue: Q,
        worker: SigningWorker<B, Q>,
        #[builder(into)] sign_topic: String,
        #[builder(into)] dead_letter_topic: String,
        #[builder(default = 1)] concurrency: usize,
        #[builder(default = 1)] max_receive_count: u32,
    ) -> Self {
        Self {
            queue,
            worker,
            sign_topic,
            dead_letter_topic,
            concurrency: concurrency.max(1),
            max_receive_count: max_receive_count.max(1),
        }
    }

    /// Processes batch messages until the dispatch topic has stayed empty
    /// for `idle_timeout` with no worker in flight.
    ///
    /// Finished workers are collected before every pop. When a pop times out
    /// the runner waits for every worker still in flight, then polls the
    /// topic once more in case one of them requeued its message.
    ///
    /// # Errors
    ///
    /// Returns a queue error if a message cannot be requeued or
    /// dead-lettered, or if the dispatch topic cannot be read. After the
    /// first such error no further message is popped, and the error is
    /// returned only once every in-flight worker has finished, so every
    /// checked-out key is back on the checkout queue. Worker failures are not
    /// errors here; they feed the redelivery policy.
    #[tracing::instrument(skip(self), fields(topic = %self.sign_topic, concurrency = self.concurrency))]
    pub async fn drain(&self, idle_timeout: Duration) -> Result<DrainReport> {
        let limiter = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<Result<Delivery>> = JoinSet::new();
        let mut tally = Tally::default();

        loop {
            while let Some(joined) = tasks.try_join_next() {
                tally.absorb(joined);
            }
            if tally.failure.is_some() {
                break;
            }

            let permit = match Arc::clone(&limiter).acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    tally.fail(closed(err));
                    break;
                },
            };
            let message = match self.queue.pop(&self.sign_topic, idle_timeout).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    drop(permit);
                    if tasks.is_empty() {
                        break;
                    }
                    while let Some(joined) = tasks.join_next().await {
                        tally.absorb(joined);
                    }
                    continue;
                },
                Err(err) => {
                    tally.fail(err.into());
                    break;
                },
            };

            let runner = self.clone();
            tasks.spawn(
                async move {
                    let _permit = permit;
                    runner.deliver(message).await
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            tally.absorb(joined);
        }

        let Tally { report, failure } = tally;
        if let Some(err) = failure {
            warn!(
                succeeded = report.succeeded,
                failed_attempts = report.failed_attempts,
                error = %err,
                "dispatch drain aborted"
            );
            return Err(err);
        }
        info!(
            succeeded = report.succeeded,
            failed_attempts = report.failed_attempts,
            dead_lettered = report.dead_lettered,
            signed = report.signed,
            "dispatch drained"
        );
        Ok(report)
    }

    async fn deliver(&self, message: QueueMessage) -> Result<Delivery> {
        let command = match decode_batch(&message) {
            Ok(command) => command,
            Err(err) => {
                warn!(message_id = %message.id, error = %err, "undeliverable batch message");
                self.dead_letter(message).await?;
                return Ok(Delivery::DeadLettered);
            },
        };

        match self.worker.handle_batch(&command).await {
            Ok(outcome) => Ok(Delivery::Succeeded { signed: outcome.signed }),
            Err(err) if message.receive_count < self.max_receive_count => {
                debug!(
                    batch = command.batch_index,
                    receive_count = message.receive_count,
                    error = %err,
                    "batch failed, redelivering"
                );
                self.queue.requeue(&self.sign_topic, message).await?;
                Ok(Delivery::Retried)
            },
            Err(err) => {
                warn!(
                    batch = command.batch_index,
                    receive_count = message.receive_count,
                    error = %err,
                    "batch failed, dead-lettering"
                );
                self.dead_letter(message).await?;
                Ok(Delivery::DeadLettered)
            },
        }
    }

    async fn dead_letter(&self, message: QueueMessage) -> Result<()> {
        self.queue.push(&self.dead_letter_topic, message.body).await?;
        Ok(())
    }
}

fn decode_batch(message: &QueueMessage) -> Result<SignBatchCommand> {
    let command: SignBatchCommand = message.decode::<Event>()?.into_payload()?;
    command.validate()?;
    Ok(command)
}

fn closed(_: AcquireError) -> SignerError {
    SignerError::Queue(QueueError::internal("worker limiter closed"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use keysign_queue::MemoryQueue;
    use keysign_storage::{BulkConfig, MemoryBackend, testutil::FlakyBackend};

    use super::*;
    use crate::{
        checkout::KeyCheckoutQueue,
        crypto,
        dispatch::{BatchDispatchQueue, partition},
        events::StartSignCommand,
        model::{Document, Key},
        store::{DocumentStore, SignatureStore},
    };

    const IDLE: Duration = Duration::from_millis(50);

    struct Fixture<B: Backend> {
        queue: MemoryQueue,
        runner: DispatchRunner<B, MemoryQueue>,
        worker: SigningWorker<B, MemoryQueue>,
        dispatch: BatchDispatchQueue<MemoryQueue>,
        checkout: KeyCheckoutQueue<MemoryQueue>,
        signatures: SignatureStore<B>,
        ids: Vec<String>,
    }

    async fn fixture<B: Backend>(backend: B, docs: usize, keys: usize) -> Fixture<B> {
        let queue = MemoryQueue::new();
        for topic in ["keys.fifo", "sign", "sign-dlq"] {
            queue.ensure_topic(topic).await.unwrap();
        }
        let bulk = BulkConfig::default();
        let documents = DocumentStore::new(backend.clone(), bulk);
        let signatures = SignatureStore::new(backend, bulk);
        documents.create(false).await.unwrap();
        signatures.recreate().await.unwrap();

        let batch: Vec<Document> =
            (0..docs).map(|i| Document::new(format!("doc-{i:010}"), format!("Name {i}"))).collect();
        documents.bulk_upsert(&batch).await.unwrap();

        let checkout = KeyCheckoutQueue::new(queue.clone(), "keys.fifo", Duration::from_secs(1));
        let pool: Vec<Key> = (0..keys).map(|_| crypto::generate_key()).collect();
        checkout.push_all(&pool).await.unwrap();

        let worker = SigningWorker::new(checkout.clone(), documents, signatures.clone());
        let runner = DispatchRunner::builder()
            .queue(queue.clone())
            .worker(worker.clone())
            .sign_topic("sign")
            .dead_letter_topic("sign-dlq")
            .concurrency(4)
            .max_receive_count(3)
            .build();
        Fixture {
            queue: queue.clone(),
            runner,
            worker,
            dispatch: BatchDispatchQueue::new(queue, "sign"),
            checkout,
            signatures,
            ids: batch.into_iter().map(|d| d.id).collect(),
        }
    }

    #[tokio::test]
    async fn test_drain_signs_every_batch() {
        let f = fixture(MemoryBackend::new(), 40, 2).await;
        f.dispatch.publish(&partition(&f.ids, 7)).await.unwrap();

        let report = f.runner.drain(IDLE).await.unwrap();
        assert_eq!(report, DrainReport { succeeded: 6, failed_attempts: 0, dead_lettered: 0, signed: 40 });
        assert_eq!(f.signatures.count().await.unwrap(), 40);
        assert_eq!(f.checkout.available().await.unwrap(), 2);
        assert_eq!(f.queue.len("sign").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_is_redelivered() {
        // Put call 0 seeds the documents.
        let flaky = FlakyBackend::new(MemoryBackend::new()).failing_puts([1]);
        let f = fixture(flaky, 5, 1).await;
        f.dispatch.publish(&partition(&f.ids, 5)).await.unwrap();

        let report = f.runner.drain(IDLE).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed_attempts, 1);
        assert_eq!(report.dead_lettered, 0);
        assert_eq!(f.signatures.count().await.unwrap(), 5);
        assert_eq!(f.checkout.available().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_batch_is_dead_lettered() {
        let flaky = FlakyBackend::new(MemoryBackend::new()).failing_puts(1..4);
        let f = fixture(flaky, 3, 1).await;
        f.dispatch.publish(&partition(&f.ids, 3)).await.unwrap();

        let report = f.runner.drain(IDLE).await.unwrap();
        assert_eq!(report, DrainReport { succeeded: 0, failed_attempts: 3, dead_lettered: 1, signed: 0 });
        assert_eq!(f.queue.len("sign-dlq").await.unwrap(), 1);
        assert_eq!(f.checkout.available().await.unwrap(), 1);

        let event: Event = f.queue.pop_json("sign-dlq", Duration::ZERO).await.unwrap().unwrap();
        let command: SignBatchCommand = event.into_payload().unwrap();
        assert_eq!(command.message_ids, f.ids);
    }

    #[tokio::test]
    async fn test_foreign_message_is_dead_lettered() {
        let f = fixture(MemoryBackend::new(), 0, 1).await;
        let body = Event::from(StartSignCommand { batch_size: 1 }).encode().unwrap();
        f.queue.push("sign", body).await.unwrap();

        let report = f.runner.drain(IDLE).await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(f.queue.len("sign-dlq").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_idle_topic() {
        let f = fixture(MemoryBackend::new(), 0, 1).await;
        assert_eq!(f.runner.drain(IDLE).await.unwrap(), DrainReport::default());
    }

    #[tokio::test]
    async fn test_drain_returns_after_one_idle_period() {
        let f = fixture(MemoryBackend::new(), 20, 2).await;
        f.dispatch.publish(&partition(&f.ids, 1)).await.unwrap();

        let idle = Duration::from_millis(200);
        let started = std::time::Instant::now();
        let report = f.runner.drain(idle).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.succeeded, 20);
        assert_eq!(f.signatures.count().await.unwrap(), 20);
        assert!(elapsed < Duration::from_millis(1500), "drain took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_queue_failure_waits_for_in_flight_workers() {
        let f = fixture(MemoryBackend::new(), 16, 2).await;
        let runner = DispatchRunner::builder()
            .queue(f.queue.clone())
            .worker(f.worker.clone())
            .sign_topic("sign")
            .dead_letter_topic("missing-dlq")
            .concurrency(4)
            .max_receive_count(3)
            .build();

        let body = Event::from(StartSignCommand { batch_size: 1 }).encode().unwrap();
        f.queue.push("sign", body).await.unwrap();
        f.dispatch.publish(&partition(&f.ids, 2)).await.unwrap();

        let err = runner.drain(IDLE).await.unwrap_err();
        assert!(matches!(err, SignerError::Queue(_)), "{err:?}");
        assert_eq!(f.checkout.available().await.unwrap(), 2);
    }
}
