//! Signing pipeline configuration.
//!
//! [`SignerConfig`] gathers every knob of a deployment: batch fan-out, the
//! checkout timeout, concurrency caps on workers and store chunks, seeding
//! sizes and the topic names. It can be built in code, deserialized (with
//! durations such as `"10m"` or `"250ms"`), or read from the environment.

use std::time::Duration;

use keysign_queue::topic_name;
use keysign_storage::{BulkConfig, ConfigError};
use serde::{Deserialize, Serialize};

const DEFAULT_BATCH_SIZE: usize = 1000;
const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_DISPATCH_CONCURRENCY: usize = 10;
const DEFAULT_DB_CONCURRENCY: usize = 20;
const DEFAULT_CHUNK_SIZE: usize = 25;
const DEFAULT_KEY_POOL_SIZE: usize = 100;
const DEFAULT_DOCUMENT_SEED_COUNT: usize = 100_000;
const DEFAULT_SEED_CHUNK_SIZE: usize = 10_000;
const DEFAULT_MAX_RECEIVE_COUNT: u32 = 3;
const DEFAULT_KEY_TOPIC: &str = "keys.fifo";
const DEFAULT_SIGN_TOPIC: &str = "sign";
const DEFAULT_SEED_TOPIC: &str = "seed";
const DEFAULT_DEAD_LETTER_TOPIC: &str = "sign-dlq";

/// Configuration for [`SignerApp`](crate::SignerApp) and its components.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use keysign::SignerConfig;
///
/// let config = SignerConfig::builder()
///     .batch_size(2)
///     .checkout_timeout(Duration::from_secs(5))
///     .dispatch_concurrency(2)
///     .build()?;
/// assert_eq!(config.batch_size(), 2);
/// assert_eq!(config.key_topic(), "keys.fifo");
/// # Ok::<(), keysign_storage::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignerConfig {
    /// Documents per dispatched batch.
    pub(crate) batch_size: usize,

    /// How long a worker waits to check out a key.
    #[serde(with = "humantime_serde")]
    pub(crate) checkout_timeout: Duration,

    /// Maximum number of signing workers running at once.
    pub(crate) dispatch_concurrency: usize,

    /// Maximum number of concurrent chunk reads or writes per bulk operation.
    pub(crate) db_concurrency: usize,

    /// Items per bulk write chunk.
    pub(crate) chunk_size: usize,

    /// Number of keys generated when the pool is first seeded.
    pub(crate) key_pool_size: usize,

    /// Number of documents seeded at startup when the document table is empty.
    pub(crate) document_seed_count: usize,

    /// Maximum documents per seed command.
    pub(crate) seed_chunk_size: usize,

    /// Deliveries of a batch message before it is dead-lettered.
    pub(crate) max_receive_count: u32,

    /// Topic holding available keys.
    pub(crate) key_topic: String,

    /// Topic holding batch messages.
    pub(crate) sign_topic: String,

    /// Topic holding seed commands.
    pub(crate) seed_topic: String,

    /// Topic receiving batch messages that exhausted their deliveries.
    pub(crate) dead_letter_topic: String,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
            dispatch_concurrency: DEFAULT_DISPATCH_CONCURRENCY,
            db_concurrency: DEFAULT_DB_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            key_pool_size: DEFAULT_KEY_POOL_SIZE,
            document_seed_count: DEFAULT_DOCUMENT_SEED_COUNT,
            seed_chunk_size: DEFAULT_SEED_CHUNK_SIZE,
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
            key_topic: DEFAULT_KEY_TOPIC.into(),
            sign_topic: DEFAULT_SIGN_TOPIC.into(),
            seed_topic: DEFAULT_SEED_TOPIC.into(),
            dead_letter_topic: DEFAULT_DEAD_LETTER_TOPIC.into(),
        }
    }
}

fn at_least_one(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::BelowMinimum { field, min: "1".into(), value: "0".into() });
    }
    Ok(())
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Invalid { field, reason: "must not be empty".into() });
    }
    Ok(())
}

#[bon::bon]
impl SignerConfig {
    /// Creates a configuration, validating every field.
    ///
    /// Queue names may be given as full queue URLs; the last path segment is
    /// used as the topic name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if any count, size or
    /// concurrency is zero (`document_seed_count` excepted), and
    /// [`ConfigError::Invalid`] for an empty topic name.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_BATCH_SIZE)] batch_size: usize,
        #[builder(default = DEFAULT_CHECKOUT_TIMEOUT)] checkout_timeout: Duration,
        #[builder(default = DEFAULT_DISPATCH_CONCURRENCY)] dispatch_concurrency: usize,
        #[builder(default = DEFAULT_DB_CONCURRENCY)] db_concurrency: usize,
        #[builder(default = DEFAULT_CHUNK_SIZE)] chunk_size: usize,
        #[builder(default = DEFAULT_KEY_POOL_SIZE)] key_pool_size: usize,
        #[builder(default = DEFAULT_DOCUMENT_SEED_COUNT)] document_seed_count: usize,
        #[builder(default = DEFAULT_SEED_CHUNK_SIZE)] seed_chunk_size: usize,
        #[builder(default = DEFAULT_MAX_RECEIVE_COUNT)] max_receive_count: u32,
        #[builder(into, default = DEFAULT_KEY_TOPIC.to_owned())] key_topic: String,
        #[builder(into, default = DEFAULT_SIGN_TOPIC.to_owned())] sign_topic: String,
        #[builder(into, default = DEFAULT_SEED_TOPIC.to_owned())] seed_topic: String,
        #[builder(into, default = DEFAULT_DEAD_LETTER_TOPIC.to_owned())] dead_letter_topic: String,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            batch_size,
            checkout_timeout,
            dispatch_concurrency,
            db_concurrency,
            chunk_size,
            key_pool_size,
            document_seed_count,
            seed_chunk_size,
            max_receive_count,
            key_topic: topic_name(&key_topic).to_owned(),
            sign_topic: topic_name(&sign_topic).to_owned(),
            seed_topic: topic_name(&seed_topic).to_owned(),
            dead_letter_topic: topic_name(&dead_letter_topic).to_owned(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads the configuration from process environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `BATCH_SIZE` | `batch_size` |
    /// | `CHECKOUT_TIMEOUT` | `checkout_timeout` (humantime, e.g. `10m`) |
    /// | `DISPATCH_CONCURRENCY` | `dispatch_concurrency` |
    /// | `DB_CONCURRENCY` | `db_concurrency` |
    /// | `KEY_QUEUE` | `key_topic` |
    /// | `SIGN_QUEUE` | `sign_topic` |
    /// | `SEED_QUEUE` | `seed_topic` |
    ///
    /// Unset or empty variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a value that does not parse, or
    /// any error [`SignerConfig::new`] would return.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = var("BATCH_SIZE") {
            config.batch_size = parse_count("BATCH_SIZE", &v)?;
        }
        if let Some(v) = var("CHECKOUT_TIMEOUT") {
            config.checkout_timeout =
                humantime_serde::re::humantime::parse_duration(v.trim()).map_err(|e| {
                    ConfigError::Invalid { field: "CHECKOUT_TIMEOUT", reason: e.to_string() }
                })?;
        }
        if let Some(v) = var("DISPATCH_CONCURRENCY") {
            config.dispatch_concurrency = parse_count("DISPATCH_CONCURRENCY", &v)?;
        }
        if let Some(v) = var("DB_CONCURRENCY") {
            config.db_concurrency = parse_count("DB_CONCURRENCY", &v)?;
        }
        if let Some(v) = var("KEY_QUEUE") {
            config.key_topic = topic_name(v.trim()).to_owned();
        }
        if let Some(v) = var("SIGN_QUEUE") {
            config.sign_topic = topic_name(v.trim()).to_owned();
        }
        if let Some(v) = var("SEED_QUEUE") {
            config.seed_topic = topic_name(v.trim()).to_owned();
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants enforced by the builder.
    ///
    /// Deserialized configurations skip the builder, so callers loading a
    /// configuration from a file should call this before use.
    ///
    /// # Errors
    ///
    /// See [`SignerConfig::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("batch_size", self.batch_size)?;
        at_least_one("dispatch_concurrency", self.dispatch_concurrency)?;
        at_least_one("db_concurrency", self.db_concurrency)?;
        at_least_one("chunk_size", self.chunk_size)?;
        at_least_one("key_pool_size", self.key_pool_size)?;
        at_least_one("seed_chunk_size", self.seed_chunk_size)?;
        if self.max_receive_count == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_receive_count",
                min: "1".into(),
                value: "0".into(),
            });
        }
        non_empty("key_topic", &self.key_topic)?;
        non_empty("sign_topic", &self.sign_topic)?;
        non_empty("seed_topic", &self.seed_topic)?;
        non_empty("dead_letter_topic", &self.dead_letter_topic)?;
        Ok(())
    }

    /// Returns the number of documents per batch.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns the key checkout timeout.
    #[must_use]
    pub fn checkout_timeout(&self) -> Duration {
        self.checkout_timeout
    }

    /// Returns the maximum number of concurrent signing workers.
    #[must_use]
    pub fn dispatch_concurrency(&self) -> usize {
        self.dispatch_concurrency
    }

    /// Returns the per-operation cap on concurrent store chunks.
    #[must_use]
    pub fn db_concurrency(&self) -> usize {
        self.db_concurrency
    }

    /// Returns the bulk write chunk size.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the number of keys seeded into an empty pool.
    #[must_use]
    pub fn key_pool_size(&self) -> usize {
        self.key_pool_size
    }

    /// Returns the number of documents seeded at startup.
    #[must_use]
    pub fn document_seed_count(&self) -> usize {
        self.document_seed_count
    }

    /// Returns the maximum documents per seed command.
    #[must_use]
    pub fn seed_chunk_size(&self) -> usize {
        self.seed_chunk_size
    }

    /// Returns the deliveries allowed before a batch is dead-lettered.
    #[must_use]
    pub fn max_receive_count(&self) -> u32 {
        self.max_receive_count
    }

    /// Returns the key checkout topic.
    #[must_use]
    pub fn key_topic(&self) -> &str {
        &self.key_topic
    }

    /// Returns the batch dispatch topic.
    #[must_use]
    pub fn sign_topic(&self) -> &str {
        &self.sign_topic
    }

    /// Returns the seed topic.
    #[must_use]
    pub fn seed_topic(&self) -> &str {
        &self.seed_topic
    }

    /// Returns the dead-letter topic.
    #[must_use]
    pub fn dead_letter_topic(&self) -> &str {
        &self.dead_letter_topic
    }

    /// Bulk settings for store reads and writes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the chunk settings are invalid.
    pub fn bulk(&self) -> Result<BulkConfig, ConfigError> {
        BulkConfig::builder()
            .chunk_size(self.chunk_size)
            .max_in_flight(self.db_concurrency)
            .build()
    }
}

fn parse_count(field: &'static str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::Invalid { field, reason: format!("{value:?}: {e}") })
}
