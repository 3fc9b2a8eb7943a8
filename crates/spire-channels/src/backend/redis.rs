//! Redis history store.
//!
//! Each topic is a sorted set at `{prefix}:{topic}` scored by sequence. A
//! member is the 8-byte big-endian sequence followed by the payload, so equal
//! payloads stay distinct and the sequence survives a round trip.

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tracing::debug;

use super::Backend;
use crate::error::{BackendError, BackendResult};
use crate::message::Message;

impl From<RedisError> for BackendError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error() {
            Self::Connection(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}

/// History stored in Redis sorted sets.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    prefix: String,
    capacity: usize,
}

impl RedisBackend {
    /// Connects to `url`. The connection manager reconnects on its own.
    pub async fn connect(url: &str, prefix: &str, capacity: usize) -> BackendResult<Self> {
        if url.is_empty() {
            return Err(BackendError::Connection("redis url is empty".to_string()));
        }
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(url, prefix, capacity, "Connected Redis history backend");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            capacity,
        })
    }

    fn key(&self, topic: &str) -> String {
        format!("{}:{}", self.prefix, topic)
    }

    fn encode(message: &Message) -> Vec<u8> {
        let mut member = Vec::with_capacity(8 + message.payload().len());
        member.extend_from_slice(&message.sequence().to_be_bytes());
        member.extend_from_slice(message.payload());
        member
    }

    fn decode(topic: &str, member: &[u8]) -> BackendResult<Message> {
        if member.len() < 8 {
            return Err(BackendError::Corrupt {
                topic: topic.to_string(),
            });
        }
        let (head, payload) = member.split_at(8);
        let mut seq = [0u8; 8];
        seq.copy_from_slice(head);
        Ok(Message::new(
            topic,
            Bytes::copy_from_slice(payload),
            u64::from_be_bytes(seq),
        ))
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("prefix", &self.prefix)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Backend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn append(&self, message: &Message) -> BackendResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(self.key(message.topic()))
            .arg(message.sequence())
            .arg(Self::encode(message))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn history(&self, topic: &str, since: Option<u64>) -> BackendResult<Vec<Message>> {
        let mut conn = self.conn.clone();
        let min = match since {
            Some(seq) => format!("({seq}"),
            None => "-inf".to_string(),
        };
        let members: Vec<Vec<u8>> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.key(topic))
            .arg(min)
            .arg("+inf")
            .query_async(&mut conn)
            .await?;
        members
            .iter()
            .map(|member| Self::decode(topic, member))
            .collect()
    }

    async fn evict_if_over_capacity(&self, topic: &str) -> BackendResult<usize> {
        let mut conn = self.conn.clone();
        // Keep the newest `capacity` members: remove ranks 0 ..= -(capacity + 1).
        let stop = -(self.capacity as i64) - 1;
        let removed: usize = redis::cmd("ZREMRANGEBYRANK")
            .arg(self.key(topic))
            .arg(0)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn last_sequence(&self, topic: &str) -> BackendResult<u64> {
        let mut conn = self.conn.clone();
        let members: Vec<Vec<u8>> = redis::cmd("ZRANGE")
            .arg(self.key(topic))
            .arg(-1)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        match members.first() {
            Some(member) => Ok(Self::decode(topic, member)?.sequence()),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_encoding() {
        let message = Message::new("news", "hello", 42);
        let member = RedisBackend::encode(&message);
        assert_eq!(&member[..8], &42u64.to_be_bytes());
        assert_eq!(RedisBackend::decode("news", &member).unwrap(), message);
        assert!(RedisBackend::decode("news", b"short").is_err());
    }
}
