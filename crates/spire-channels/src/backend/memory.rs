use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Backend;
use crate::error::BackendResult;
use crate::message::Message;

/// In-process history: one FIFO ring per topic.
#[derive(Debug)]
pub struct MemoryBackend {
    capacity: usize,
    topics: Mutex<HashMap<String, VecDeque<Message>>>,
}

impl MemoryBackend {
    /// Creates a backend retaining up to `capacity` messages per topic.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Number of messages currently held for `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, message: &Message) -> BackendResult<()> {
        self.topics
            .lock()
            .entry(message.topic().to_string())
            .or_default()
            .push_back(message.clone());
        Ok(())
    }

    async fn history(&self, topic: &str, since: Option<u64>) -> BackendResult<Vec<Message>> {
        let topics = self.topics.lock();
        let Some(ring) = topics.get(topic) else {
            return Ok(Vec::new());
        };
        let since = since.unwrap_or(0);
        Ok(ring
            .iter()
            .filter(|m| m.sequence() > since)
            .cloned()
            .collect())
    }

    async fn evict_if_over_capacity(&self, topic: &str) -> BackendResult<usize> {
        let mut topics = self.topics.lock();
        let Some(ring) = topics.get_mut(topic) else {
            return Ok(0);
        };
        let excess = ring.len().saturating_sub(self.capacity);
        ring.drain(..excess);
        if ring.is_empty() {
            topics.remove(topic);
        }
        Ok(excess)
    }

    async fn last_sequence(&self, topic: &str) -> BackendResult<u64> {
        Ok(self
            .topics
            .lock()
            .get(topic)
            .and_then(VecDeque::back)
            .map_or(0, Message::sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_eviction() {
        let backend = MemoryBackend::new(2);
        for seq in 1..=3 {
            backend
                .append(&Message::new("news", format!("m{seq}"), seq))
                .await
                .unwrap();
        }
        assert_eq!(backend.evict_if_over_capacity("news").await.unwrap(), 1);

        let history = backend.history("news", None).await.unwrap();
        let seqs: Vec<u64> = history.iter().map(Message::sequence).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert_eq!(backend.last_sequence("news").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_history_since() {
        let backend = MemoryBackend::new(10);
        for seq in 1..=4 {
            backend.append(&Message::new("t", "x", seq)).await.unwrap();
        }
        let seqs: Vec<u64> = backend
            .history("t", Some(2))
            .await
            .unwrap()
            .iter()
            .map(Message::sequence)
            .collect();
        assert_eq!(seqs, vec![3, 4]);
        assert!(backend.history("other", None).await.unwrap().is_empty());
        assert_eq!(backend.last_sequence("other").await.unwrap(), 0);
    }
}
