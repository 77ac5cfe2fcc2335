//! Key checkout queue.
//!
//! Keys are checked out by popping their [`AvailableKey`] message off a FIFO
//! topic and checked back in by pushing it again. Whoever holds the popped
//! message owns the key; there is no lock or ownership field anywhere else.
//! Because each message is delivered to exactly one consumer, no two workers
//! can hold the same key at once, and FIFO order keeps every key in rotation.

use std::time::{Duration, Instant};

use keysign_queue::{QueueMessage, QueueTransport};
use tracing::{debug, warn};

use crate::{
    error::{Result, SignerError},
    events::{AvailableKey, Event},
    model::Key,
    validation::Validate,
};

/// Exclusive-access channel over the key pool.
#[derive(Debug, Clone)]
pub struct KeyCheckoutQueue<Q> {
    queue: Q,
    topic: String,
    timeout: Duration,
}

impl<Q: QueueTransport> KeyCheckoutQueue<Q> {
    /// Creates a checkout queue on `topic`. Checkouts wait at most `timeout`.
    pub fn new(queue: Q, topic: impl Into<String>, timeout: Duration) -> Self {
        Self { queue, topic: topic.into(), timeout }
    }

    /// The topic holding available keys.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The default checkout timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Makes `key` available for checkout.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Queue`] if the push fails.
    #[tracing::instrument(skip_all, fields(key_id = %key.id))]
    pub async fn push(&self, key: &AvailableKey) -> Result<()> {
        let body = Event::KeyAvailable(key.clone()).encode()?;
        self.queue.push(&self.topic, body).await?;
        debug!(key_id = %key.id, "enqueue-key");
        Ok(())
    }

    /// Makes every key in `keys` available, in order. Returns the number pushed.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Queue`] if the push fails.
    pub async fn push_all(&self, keys: &[Key]) -> Result<usize> {
        let bodies = keys
            .iter()
            .map(|key| Event::KeyAvailable(AvailableKey::from(key)).encode())
            .collect::<Result<Vec<_>>>()?;
        let pushed = self.queue.push_batch(&self.topic, bodies).await?.len();
        debug!(pushed, "keys made available");
        Ok(pushed)
    }

    /// Checks out the next available key, waiting up to the default timeout.
    ///
    /// # Errors
    ///
    /// See [`pop_within`](Self::pop_within).
    pub async fn pop(&self) -> Result<AvailableKey> {
        self.pop_within(self.timeout).await
    }

    /// Checks out the next available key, waiting up to `timeout`.
    ///
    /// The caller owns the returned key and must [`push`](Self::push) it back
    /// once it is no longer needed.
    ///
    /// # Errors
    ///
    /// - [`SignerError::KeyUnavailable`] if no key arrives in time
    /// - [`SignerError::UnexpectedEvent`] if the topic held a different message type
    /// - [`SignerError::Validation`] if the key message is malformed
    /// - [`SignerError::Queue`] if the pop fails
    #[tracing::instrument(skip(self))]
    pub async fn pop_within(&self, timeout: Duration) -> Result<AvailableKey> {
        debug!("enter-dequeue-key");
        let started = Instant::now();
        let Some(message) = self.queue.pop(&self.topic, timeout).await? else {
            warn!(?timeout, "unable-to-find-available-key");
            return Err(SignerError::KeyUnavailable { timeout });
        };

        let key = match decode_key(&message) {
            Ok(key) => key,
            Err(err) => {
                warn!(message_id = %message.id, error = %err, "dropped-undecodable-key-message");
                return Err(err);
            },
        };
        debug!(
            key_id = %key.id,
            waited_ms = started.elapsed().as_millis() as u64,
            "exit-dequeue-key"
        );
        Ok(key)
    }

    /// Discards every queued key message. Keys currently checked out are
    /// unaffected. Only safe while no worker is running.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Queue`] if the purge fails.
    pub async fn purge(&self) -> Result<usize> {
        let dropped = self.queue.purge(&self.topic).await?;
        debug!(dropped, "key queue purged");
        Ok(dropped)
    }

    /// Approximate number of keys waiting to be checked out.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Queue`] if the topic cannot be inspected.
    pub async fn available(&self) -> Result<usize> {
        Ok(self.queue.len(&self.topic).await?)
    }
}

fn decode_key(message: &QueueMessage) -> Result<AvailableKey> {
    let key: AvailableKey = message.decode::<Event>()?.into_payload()?;
    key.validate()?;
    Ok(key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use keysign_queue::MemoryQueue;

    use super::*;
    use crate::{crypto, events::StartSignCommand};

    async fn checkout() -> KeyCheckoutQueue<MemoryQueue> {
        let queue = MemoryQueue::new();
        queue.ensure_topic("keys.fifo").await.unwrap();
        KeyCheckoutQueue::new(queue, "keys.fifo", Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_push_pop_round_trip() {
        let checkout = checkout().await;
        let key = crypto::generate_key();
        checkout.push(&AvailableKey::from(&key)).await.unwrap();
        assert_eq!(checkout.available().await.unwrap(), 1);

        let popped = checkout.pop().await.unwrap();
        assert_eq!(popped.id, key.id);
        assert_eq!(popped.private, key.private);
        assert_eq!(checkout.available().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keys_rotate_in_fifo_order() {
        let checkout = checkout().await;
        let keys: Vec<Key> = (0..3).map(|_| crypto::generate_key()).collect();
        assert_eq!(checkout.push_all(&keys).await.unwrap(), 3);

        let first = checkout.pop().await.unwrap();
        checkout.push(&first).await.unwrap();
        let order: Vec<String> = [
            checkout.pop().await.unwrap().id.clone(),
            checkout.pop().await.unwrap().id.clone(),
            checkout.pop().await.unwrap().id.clone(),
        ]
        .into();
        assert_eq!(order, [keys[1].id.clone(), keys[2].id.clone(), keys[0].id.clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pool_times_out() {
        let checkout = checkout().await;
        let err = checkout.pop_within(Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, SignerError::KeyUnavailable { timeout } if timeout == Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_wrong_message_type() {
        let checkout = checkout().await;
        let body = Event::from(StartSignCommand { batch_size: 1 }).encode().unwrap();
        checkout.queue.push("keys.fifo", body).await.unwrap();
        assert!(matches!(
            checkout.pop().await.unwrap_err(),
            SignerError::UnexpectedEvent { .. }
        ));
    }

    #[tokio::test]
    async fn test_purge_leaves_checked_out_keys_alone() {
        let checkout = checkout().await;
        let keys: Vec<Key> = (0..3).map(|_| crypto::generate_key()).collect();
        checkout.push_all(&keys).await.unwrap();

        let held = checkout.pop().await.unwrap();
        assert_eq!(checkout.purge().await.unwrap(), 2);
        assert_eq!(checkout.available().await.unwrap(), 0);

        checkout.push(&held).await.unwrap();
        assert_eq!(checkout.available().await.unwrap(), 1);
    }
}
