//! History backends.
//!
//! A backend keeps an ordered, bounded history of messages per topic so new
//! subscribers can replay recent traffic. Two implementations exist:
//!
//! - [`MemoryBackend`]: an in-process ring buffer per topic.
//! - `RedisBackend` (feature `redis`): one sorted set per topic, scored by
//!   sequence number.
//!
//! Backend failures are never fatal to publishing; see
//! [`BackendError`](crate::BackendError).

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BackendConfig;
use crate::error::BackendResult;
use crate::message::Message;

pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;

/// An ordered per-topic message store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Appends a message to its topic's history.
    async fn append(&self, message: &Message) -> BackendResult<()>;

    /// Messages of `topic` with a sequence greater than `since` (all retained
    /// messages when `None`), oldest first.
    async fn history(&self, topic: &str, since: Option<u64>) -> BackendResult<Vec<Message>>;

    /// Drops the oldest messages of `topic` beyond the configured capacity.
    /// Returns how many were evicted.
    async fn evict_if_over_capacity(&self, topic: &str) -> BackendResult<usize>;

    /// Highest stored sequence for `topic`, or zero.
    async fn last_sequence(&self, topic: &str) -> BackendResult<u64>;
}

/// A shared backend handle.
pub type BoxedBackend = Arc<dyn Backend>;

/// Builds the backend described by `config`.
pub async fn connect(config: &BackendConfig, capacity: usize) -> BackendResult<BoxedBackend> {
    match config {
        BackendConfig::Memory => Ok(Arc::new(MemoryBackend::new(capacity))),
        #[cfg(feature = "redis")]
        BackendConfig::Redis { url, key_prefix } => {
            let backend = RedisBackend::connect(url, key_prefix, capacity).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "redis"))]
        BackendConfig::Redis { .. } => Err(crate::error::BackendError::Connection(
            "redis backend requires the `redis` feature".to_string(),
        )),
    }
}
