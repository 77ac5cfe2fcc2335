//! Topic queues for the keysign pipeline.
//!
//! Two uses share one contract: the key checkout pool, where possession of a
//! popped message is exclusive ownership of a signing key, and the batch
//! dispatch and seed topics, which fan work out to independent consumers.
//!
//! ```
//! use std::time::Duration;
//!
//! use keysign_queue::{MemoryQueue, QueueTransport};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let queue = MemoryQueue::new();
//! queue.ensure_topic("keys.fifo").await.unwrap();
//! queue.push("keys.fifo", "key-1".to_owned()).await.unwrap();
//!
//! let message = queue.pop("keys.fifo", Duration::from_secs(1)).await.unwrap();
//! assert_eq!(message.map(|m| m.body).as_deref(), Some("key-1"));
//! # });
//! ```

#![deny(unsafe_code)]

pub mod error;
pub mod memory;
pub mod transport;

pub use error::{BoxError, QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use transport::{QueueMessage, QueueTransport, topic_name};
