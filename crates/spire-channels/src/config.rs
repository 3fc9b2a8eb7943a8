//! Broadcaster configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happens when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Evict the oldest unread message.
    #[default]
    DropOldest,
    /// Make the fan-out wait for space, up to `block_timeout_ms`, then disconnect.
    Block,
    /// Disconnect the subscriber immediately.
    Close,
}

/// Where history is stored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-process ring buffer.
    #[default]
    Memory,
    /// Redis sorted sets (requires the `redis` feature).
    Redis {
        /// Connection URL, e.g. `redis://127.0.0.1/`.
        #[serde(default)]
        url: String,
        /// Prefix for history keys.
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
    },
}

fn default_key_prefix() -> String {
    "spire:channels".to_string()
}

/// Broadcaster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// History backend.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Messages kept per topic for replay. Zero disables history.
    #[serde(default)]
    pub history_capacity: usize,

    /// Default policy for subscriber queues.
    #[serde(default)]
    pub backpressure_policy: BackpressurePolicy,

    /// Maximum wait under [`BackpressurePolicy::Block`].
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,

    /// Default subscriber queue bound.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Bound of the shared publish queue feeding the fan-out task.
    #[serde(default = "default_publish_queue_capacity")]
    pub publish_queue_capacity: usize,

    /// Topics declared up front.
    #[serde(default)]
    pub topics: Vec<String>,

    /// Whether topics outside `topics` may be used.
    #[serde(default = "default_arbitrary_topics_allowed")]
    pub arbitrary_topics_allowed: bool,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            history_capacity: 0,
            backpressure_policy: BackpressurePolicy::default(),
            block_timeout_ms: default_block_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            publish_queue_capacity: default_publish_queue_capacity(),
            topics: Vec::new(),
            arbitrary_topics_allowed: default_arbitrary_topics_allowed(),
        }
    }
}

fn default_block_timeout_ms() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_publish_queue_capacity() -> usize {
    1024
}

fn default_arbitrary_topics_allowed() -> bool {
    true
}

impl ChannelsConfig {
    /// Sets the history capacity.
    pub fn with_history(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Sets the default backpressure policy.
    pub fn with_policy(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure_policy = policy;
        self
    }

    /// Sets the default subscriber queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the block timeout.
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Restricts the broadcaster to the given topics.
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self.arbitrary_topics_allowed = false;
        self
    }

    /// The block timeout as a [`Duration`].
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }
}
