//! Queue contract definition.
//!
//! This module defines the [`QueueTransport`] trait: named topics holding
//! opaque string messages, delivered in FIFO order to whichever consumer pops
//! first. Each pop hands the message to exactly one consumer; possession of a
//! popped message is how the signing pipeline expresses ownership of a key.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::QueueResult;

/// One message held by, or popped from, a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Transport-assigned message id.
    pub id: String,
    /// Opaque message body, usually JSON.
    pub body: String,
    /// Number of times this message has been handed to a consumer, counting
    /// the current delivery.
    pub receive_count: u32,
}

impl QueueMessage {
    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// [`QueueError::Serialization`](crate::QueueError::Serialization) if the
    /// body does not decode into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> QueueResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Abstract topic queue.
///
/// Implementations must be thread-safe and cheap to clone, sharing the same
/// topics between clones.
///
/// # Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`ensure_topic`](QueueTransport::ensure_topic) | Create a topic if absent |
/// | [`push`](QueueTransport::push) | Append one message |
/// | [`push_batch`](QueueTransport::push_batch) | Append several messages in order |
/// | [`requeue`](QueueTransport::requeue) | Append a popped message, keeping its receive count |
/// | [`pop`](QueueTransport::pop) | Remove the oldest message, waiting up to a timeout |
/// | [`purge`](QueueTransport::purge) | Drop every queued message |
/// | [`len`](QueueTransport::len) | Approximate number of queued messages |
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Creates `topic` if it does not exist. Returns `false` if it already did.
    #[must_use = "queue operations may fail and errors must be handled"]
    async fn ensure_topic(&self, topic: &str) -> QueueResult<bool>;

    /// Appends one message and returns its id.
    #[must_use = "queue operations may fail and errors must be handled"]
    async fn push(&self, topic: &str, body: String) -> QueueResult<String>;

    /// Appends several messages, preserving their order, and returns their ids.
    #[must_use = "queue operations may fail and errors must be handled"]
    async fn push_batch(&self, topic: &str, bodies: Vec<String>) -> QueueResult<Vec<String>>;

    /// Appends a previously popped message to the tail of `topic`, keeping its
    /// id and receive count.
    #[must_use = "queue operations may fail and errors must be handled"]
    async fn requeue(&self, topic: &str, message: QueueMessage) -> QueueResult<()>;

    /// Removes and returns the oldest message, waiting up to `timeout` for one
    /// to arrive. Returns `Ok(None)` on timeout.
    ///
    /// A message is delivered to exactly one caller.
    #[must_use = "queue operations may fail and errors must be handled"]
    async fn pop(&self, topic: &str, timeout: Duration) -> QueueResult<Option<QueueMessage>>;

    /// Drops every queued message and returns how many were dropped.
    #[must_use = "queue operations may fail and errors must be handled"]
    async fn purge(&self, topic: &str) -> QueueResult<usize>;

    /// Returns the approximate number of queued messages.
    #[must_use = "queue operations may fail and errors must be handled"]
    async fn len(&self, topic: &str) -> QueueResult<usize>;

    /// Serializes `value` as JSON and pushes it.
    #[must_use = "queue operations may fail and errors must be handled"]
    async fn push_json<T>(&self, topic: &str, value: &T) -> QueueResult<String>
    where
        T: Serialize + Send + Sync,
    {
        let body = serde_json::to_string(value)?;
        self.push(topic, body).await
    }

    /// Pops one message and decodes its body as JSON.
    #[must_use = "queue operations may fail and errors must be handled"]
    async fn pop_json<T>(&self, topic: &str, timeout: Duration) -> QueueResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.pop(topic, timeout).await?.map(|m| m.decode()).transpose()
    }
}

/// Returns the topic name for a configured queue address.
///
/// Queue addresses may be full URLs such as
/// `https://sqs.eu-west-1.amazonaws.com/123456789012/keys.fifo`; the topic is
/// the last `/`-separated segment. Plain names are returned unchanged.
#[must_use]
pub fn topic_name(address: &str) -> &str {
    let trimmed = address.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_name_from_url() {
        assert_eq!(
            topic_name("https://sqs.eu-west-1.amazonaws.com/123456789012/keys.fifo"),
            "keys.fifo"
        );
        assert_eq!(topic_name("sign"), "sign");
        assert_eq!(topic_name("http://localhost:9324/queue/seed/"), "seed");
    }

    #[test]
    fn test_message_decode() {
        let message =
            QueueMessage { id: "1".into(), body: r#"{"count":3}"#.into(), receive_count: 1 };
        let value: serde_json::Value = message.decode().unwrap();
        assert_eq!(value["count"], 3);

        let bad = QueueMessage { body: "{".into(), ..message };
        assert!(bad.decode::<serde_json::Value>().is_err());
    }
}
