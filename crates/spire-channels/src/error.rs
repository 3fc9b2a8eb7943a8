//! Error types for the channels broadcaster.

use thiserror::Error;

/// History store failure.
///
/// Never propagated from `publish`: the broadcaster logs it and counts it in
/// [`BroadcasterStats::backend_failures`](crate::BroadcasterStats).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Could not reach the store.
    #[error("backend connection failed: {0}")]
    Connection(String),

    /// A store command failed.
    #[error("backend command failed: {0}")]
    Command(String),

    /// A stored entry could not be decoded.
    #[error("corrupt history entry for topic '{topic}'")]
    Corrupt {
        /// Topic whose history is corrupt.
        topic: String,
    },
}

/// Why a subscriber was disconnected by the broadcaster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackpressureError {
    /// The queue was full under the `close` policy.
    #[error("subscriber queue overflowed (capacity {capacity})")]
    Overflow {
        /// Queue capacity.
        capacity: usize,
    },

    /// The queue stayed full past the `block` timeout.
    #[error("subscriber did not drain within {timeout_ms} ms")]
    BlockTimeout {
        /// The configured timeout.
        timeout_ms: u64,
    },
}

/// Errors returned by the broadcaster API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelsError {
    /// The topic is not declared and arbitrary topics are disabled.
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    /// The broadcaster has been shut down.
    #[error("broadcaster is shut down")]
    Closed,

    /// History store failure on an explicit read.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ChannelsError {
    /// Creates an unknown-topic error.
    pub fn unknown_topic(topic: impl Into<String>) -> Self {
        Self::UnknownTopic(topic.into())
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type for broadcaster operations.
pub type ChannelsResult<T> = Result<T, ChannelsError>;
