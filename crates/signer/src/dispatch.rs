//! Batch partitioning and the batch dispatch queue.
//!
//! The orchestrator is the only producer on the dispatch topic and signing
//! workers are the only consumers. There is no reply path: a batch is known
//! to be done only through the rows it leaves in the signature table.

use keysign_queue::QueueTransport;
use tracing::{debug, info};

use crate::{
    error::Result,
    events::{Event, SignBatchCommand},
};

/// Splits `ids` into consecutive batches of `batch_size` ids.
///
/// Batches are indexed from zero in backlog order and every batch holds
/// exactly `batch_size` ids except possibly the last. Together they cover
/// `ids` exactly once. A `batch_size` of zero is treated as one.
#[must_use]
pub fn partition(ids: &[String], batch_size: usize) -> Vec<SignBatchCommand> {
    ids.chunks(batch_size.max(1))
        .enumerate()
        .map(|(batch_index, chunk)| SignBatchCommand { batch_index, message_ids: chunk.to_vec() })
        .collect()
}

/// Work-distribution channel carrying one message per batch.
#[derive(Debug, Clone)]
pub struct BatchDispatchQueue<Q> {
    queue: Q,
    topic: String,
}

impl<Q: QueueTransport> BatchDispatchQueue<Q> {
    /// Creates a dispatch queue on `topic`.
    pub fn new(queue: Q, topic: impl Into<String>) -> Self {
        Self { queue, topic: topic.into() }
    }

    /// The dispatch topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes one message per batch, in order. Returns the number published.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Queue`](crate::SignerError::Queue) if the push
    /// fails.
    #[tracing::instrument(skip_all, fields(batches = batches.len()))]
    pub async fn publish(&self, batches: &[SignBatchCommand]) -> Result<usize> {
        let bodies = batches
            .iter()
            .map(|batch| Event::SignBatch(batch.clone()).encode())
            .collect::<Result<Vec<_>>>()?;
        let published = self.queue.push_batch(&self.topic, bodies).await?.len();
        info!(topic = %self.topic, published, "batches published");
        Ok(published)
    }

    /// Discards every queued batch message.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Queue`](crate::SignerError::Queue) if the purge
    /// fails.
    pub async fn purge(&self) -> Result<usize> {
        let dropped = self.queue.purge(&self.topic).await?;
        debug!(dropped, "dispatch queue purged");
        Ok(dropped)
    }

    /// Approximate number of batches waiting for a worker.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Queue`](crate::SignerError::Queue) if the topic
    /// cannot be inspected.
    pub async fn pending(&self) -> Result<usize> {
        Ok(self.queue.len(&self.topic).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use keysign_queue::MemoryQueue;

    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("doc-{i:010}")).collect()
    }

    #[test]
    fn test_partition_sizes() {
        let batches = partition(&ids(5), 2);
        let sizes: Vec<usize> = batches.iter().map(|b| b.message_ids.len()).collect();
        assert_eq!(sizes, [2, 2, 1]);
        let indices: Vec<usize> = batches.iter().map(|b| b.batch_index).collect();
        assert_eq!(indices, [0, 1, 2]);
    }

    #[test]
    fn test_partition_empty_backlog() {
        assert!(partition(&[], 10).is_empty());
    }

    #[test]
    fn test_partition_zero_batch_size() {
        assert_eq!(partition(&ids(3), 0).len(), 3);
    }

    #[tokio::test]
    async fn test_publish_in_order() {
        let queue = MemoryQueue::new();
        queue.ensure_topic("sign").await.unwrap();
        let dispatch = BatchDispatchQueue::new(queue.clone(), "sign");

        let batches = partition(&ids(7), 3);
        assert_eq!(dispatch.publish(&batches).await.unwrap(), 3);
        assert_eq!(dispatch.pending().await.unwrap(), 3);

        for expected in &batches {
            let event: Event = queue.pop_json("sign", Duration::ZERO).await.unwrap().unwrap();
            assert_eq!(event, Event::SignBatch(expected.clone()));
        }
    }

    #[tokio::test]
    async fn test_purge() {
        let queue = MemoryQueue::new();
        queue.ensure_topic("sign").await.unwrap();
        let dispatch = BatchDispatchQueue::new(queue, "sign");
        dispatch.publish(&partition(&ids(4), 1)).await.unwrap();
        assert_eq!(dispatch.purge().await.unwrap(), 4);
        assert_eq!(dispatch.pending().await.unwrap(), 0);
    }

    mod proptests {
        use std::collections::HashSet;

        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn partition_is_a_disjoint_cover(n in 0usize..500, batch_size in 1usize..64) {
                let backlog = ids(n);
                let batches = partition(&backlog, batch_size);

                prop_assert_eq!(batches.len(), n.div_ceil(batch_size));
                for (i, batch) in batches.iter().enumerate() {
                    prop_assert_eq!(batch.batch_index, i);
                    if i + 1 < batches.len() {
                        prop_assert_eq!(batch.message_ids.len(), batch_size);
                    } else {
                        prop_assert!(!batch.message_ids.is_empty());
                        prop_assert!(batch.message_ids.len() <= batch_size);
                    }
                }

                let joined: Vec<String> =
                    batches.iter().flat_map(|b| b.message_ids.iter().cloned()).collect();
                prop_assert_eq!(&joined, &backlog);
                let unique: HashSet<&String> = joined.iter().collect();
                prop_assert_eq!(unique.len(), n);
            }
        }
    }
}
