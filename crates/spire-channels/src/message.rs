//! Published messages.

use std::sync::Arc;

use bytes::Bytes;

/// An immutable published message.
///
/// Cloning is cheap: the topic and payload are reference-counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: Arc<str>,
    payload: Bytes,
    sequence: u64,
}

impl Message {
    /// Creates a message.
    pub fn new(topic: impl Into<Arc<str>>, payload: impl Into<Bytes>, sequence: u64) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            sequence,
        }
    }

    /// The topic it was published to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The opaque payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Per-topic sequence number, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Consumes the message, returning the payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
