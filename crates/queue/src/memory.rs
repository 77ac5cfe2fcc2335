//! In-memory queue implementation.
//!
//! [`MemoryQueue`] keeps one FIFO per topic. A pop that finds the topic empty
//! parks on a [`Notify`] until a push arrives or its deadline passes, so
//! waiting consumers do not poll.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, trace};

use crate::{
    error::{QueueError, QueueResult},
    transport::{QueueMessage, QueueTransport},
};

#[derive(Default)]
struct Topic {
    messages: Mutex<VecDeque<QueueMessage>>,
    arrivals: Notify,
}

impl Topic {
    fn take(&self) -> Option<QueueMessage> {
        let mut message = self.messages.lock().pop_front()?;
        message.receive_count += 1;
        Some(message)
    }

    fn append(&self, messages: impl IntoIterator<Item = QueueMessage>) {
        let mut count = 0;
        {
            let mut queue = self.messages.lock();
            for message in messages {
                queue.push_back(message);
                count += 1;
            }
        }
        for _ in 0..count {
            self.arrivals.notify_one();
        }
    }
}

/// In-memory FIFO queue with blocking pop.
///
/// # Cloning
///
/// `MemoryQueue` is cheaply cloneable via [`Arc`]. All clones share the same
/// topics.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    topics: Arc<RwLock<HashMap<String, Arc<Topic>>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryQueue {
    /// Creates a queue with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, name: &str) -> QueueResult<Arc<Topic>> {
        self.topics.read().get(name).cloned().ok_or_else(|| QueueError::topic_not_found(name))
    }

    fn message(&self, body: String) -> QueueMessage {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        QueueMessage { id: format!("{seq:016x}"), body, receive_count: 0 }
    }
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("topics", &self.topics.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn ensure_topic(&self, topic: &str) -> QueueResult<bool> {
        let mut topics = self.topics.write();
        if topics.contains_key(topic) {
            return Ok(false);
        }
        topics.insert(topic.to_owned(), Arc::default());
        debug!(topic, "topic created");
        Ok(true)
    }

    async fn push(&self, topic: &str, body: String) -> QueueResult<String> {
        let target = self.topic(topic)?;
        let message = self.message(body);
        let id = message.id.clone();
        target.append([message]);
        trace!(topic, id = %id, "message pushed");
        Ok(id)
    }

    async fn push_batch(&self, topic: &str, bodies: Vec<String>) -> QueueResult<Vec<String>> {
        let target = self.topic(topic)?;
        let messages: Vec<QueueMessage> = bodies.into_iter().map(|b| self.message(b)).collect();
        let ids = messages.iter().map(|m| m.id.clone()).collect();
        trace!(topic, count = messages.len(), "message batch pushed");
        target.append(messages);
        Ok(ids)
    }

    async fn requeue(&self, topic: &str, message: QueueMessage) -> QueueResult<()> {
        let target = self.topic(topic)?;
        trace!(topic, id = %message.id, receive_count = message.receive_count, "message requeued");
        target.append([message]);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn pop(&self, topic: &str, timeout: Duration) -> QueueResult<Option<QueueMessage>> {
        let source = self.topic(topic)?;
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a push between the check
            // and the wait is not missed.
            let notified = source.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = source.take() {
                return Ok(Some(message));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let last_chance = source.take();
                if last_chance.is_none() {
                    debug!(topic, ?timeout, "pop timed out");
                }
                return Ok(last_chance);
            }
        }
    }

    async fn purge(&self, topic: &str) -> QueueResult<usize> {
        let target = self.topic(topic)?;
        let dropped = {
            let mut queue = target.messages.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        debug!(topic, dropped, "topic purged");
        Ok(dropped)
    }

    async fn len(&self, topic: &str) -> QueueResult<usize> {
        Ok(self.topic(topic)?.messages.lock().len())
    }
}
