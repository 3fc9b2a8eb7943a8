//! Subscriber queues.
//!
//! A [`Subscriber`] is the handle a connection holds after subscribing. The
//! broadcaster keeps a shared reference to the same [`SubscriberState`] and
//! pushes into its bounded queue; the handle pops from it.
//!
//! Dropping the handle unsubscribes it from every topic, synchronously, so a
//! connection task that is cancelled or fails still releases its subscription.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use spire_core::{FeedEvent, OutboundFeed};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::broadcaster::Shared;
use crate::config::BackpressurePolicy;
use crate::error::BackpressureError;
use crate::message::Message;

/// Why a subscriber stopped receiving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Unsubscribed from its last topic (or dropped).
    Unsubscribed,
    /// Disconnected by the broadcaster because it could not keep up.
    Backpressure(BackpressureError),
    /// The broadcaster shut down.
    Shutdown,
}

/// Result of offering a message to a subscriber queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// Appended.
    Queued,
    /// Appended after evicting the oldest entry.
    DroppedOldest,
    /// No room and the policy does not evict.
    Full,
    /// The subscriber is closed.
    Closed,
}

#[derive(Debug, Default)]
struct Queue {
    messages: VecDeque<Message>,
    topics: BTreeSet<String>,
    closed: Option<CloseReason>,
    dropped: u64,
}

/// State shared between a [`Subscriber`] handle and the broadcaster.
#[derive(Debug)]
pub(crate) struct SubscriberState {
    id: Uuid,
    capacity: usize,
    policy: BackpressurePolicy,
    queue: Mutex<Queue>,
    readable: Notify,
    writable: Notify,
}

impl SubscriberState {
    pub(crate) fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            capacity: capacity.max(1),
            policy,
            queue: Mutex::new(Queue::default()),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    pub(crate) fn topics(&self) -> BTreeSet<String> {
        self.queue.lock().topics.clone()
    }

    pub(crate) fn add_topics<'a>(&self, topics: impl IntoIterator<Item = &'a String>) {
        self.queue.lock().topics.extend(topics.into_iter().cloned());
    }

    /// Removes topics, returning those that were actually subscribed and
    /// whether none remain.
    pub(crate) fn remove_topics(&self, topics: Option<&[String]>) -> (Vec<String>, bool) {
        let mut queue = self.queue.lock();
        let removed: Vec<String> = match topics {
            Some(topics) => topics
                .iter()
                .filter(|t| queue.topics.remove(t.as_str()))
                .cloned()
                .collect(),
            None => std::mem::take(&mut queue.topics).into_iter().collect(),
        };
        (removed, queue.topics.is_empty())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.queue.lock().closed.is_some()
    }

    /// Pushes `message` according to the queue policy.
    pub(crate) fn offer(&self, message: Message) -> Offer {
        let mut queue = self.queue.lock();
        if queue.closed.is_some() {
            return Offer::Closed;
        }
        let offer = if queue.messages.len() < self.capacity {
            Offer::Queued
        } else if self.policy == BackpressurePolicy::DropOldest {
            queue.messages.pop_front();
            queue.dropped += 1;
            Offer::DroppedOldest
        } else {
            return Offer::Full;
        };
        queue.messages.push_back(message);
        drop(queue);
        self.readable.notify_one();
        offer
    }

    /// Offers `message` until there is room or the subscriber closes.
    pub(crate) async fn offer_when_ready(&self, message: Message) -> Offer {
        loop {
            match self.offer(message.clone()) {
                Offer::Full => self.writable.notified().await,
                other => return other,
            }
        }
    }

    /// Marks the subscriber closed. Returns `false` if it already was.
    ///
    /// With `discard` the unread queue is dropped; otherwise it stays readable.
    pub(crate) fn close(&self, reason: CloseReason, discard: bool) -> bool {
        let mut queue = self.queue.lock();
        if queue.closed.is_some() {
            return false;
        }
        queue.closed = Some(reason);
        if discard {
            queue.messages.clear();
        }
        drop(queue);
        self.readable.notify_one();
        self.writable.notify_one();
        true
    }

    fn pop(&self) -> Result<Message, bool> {
        let mut queue = self.queue.lock();
        match queue.messages.pop_front() {
            Some(message) => {
                drop(queue);
                self.writable.notify_one();
                Ok(message)
            }
            None => Err(queue.closed.is_some()),
        }
    }
}

/// A subscription handle.
///
/// Receives messages for its topics in per-topic sequence order. Dropping it
/// unsubscribes from everything.
pub struct Subscriber {
    state: Arc<SubscriberState>,
    broadcaster: Weak<Shared>,
}

impl Subscriber {
    pub(crate) fn new(state: Arc<SubscriberState>, broadcaster: Weak<Shared>) -> Self {
        Self { state, broadcaster }
    }

    pub(crate) fn state(&self) -> &Arc<SubscriberState> {
        &self.state
    }

    /// Unique id.
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Topics currently subscribed, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.state.topics().into_iter().collect()
    }

    /// Queue bound.
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Backpressure policy for this subscriber.
    pub fn policy(&self) -> BackpressurePolicy {
        self.state.policy
    }

    /// Unread messages.
    pub fn len(&self) -> usize {
        self.state.queue.lock().messages.len()
    }

    /// Returns `true` if no messages are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages evicted under [`BackpressurePolicy::DropOldest`].
    pub fn dropped(&self) -> u64 {
        self.state.queue.lock().dropped
    }

    /// Whether the subscriber has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Why the subscriber was closed, if it was.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.queue.lock().closed.clone()
    }

    /// Waits for the next message. Returns `None` once closed and drained.
    pub async fn recv(&self) -> Option<Message> {
        loop {
            match self.state.pop() {
                Ok(message) => return Some(message),
                Err(true) => return None,
                Err(false) => self.state.readable.notified().await,
            }
        }
    }

    /// Pops a message if one is waiting.
    pub fn try_recv(&self) -> Option<Message> {
        self.state.pop().ok()
    }

    /// Takes every waiting message without blocking.
    pub fn drain(&self) -> Vec<Message> {
        let messages: Vec<Message> = self.state.queue.lock().messages.drain(..).collect();
        if !messages.is_empty() {
            self.state.writable.notify_one();
        }
        messages
    }

    /// A stream of messages that ends when the subscriber closes.
    pub fn iter_events(&self) -> impl Stream<Item = Message> + '_ {
        futures::stream::unfold(self, |sub| async move {
            sub.recv().await.map(|message| (message, sub))
        })
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.state.id)
            .field("topics", &self.state.topics())
            .field("policy", &self.state.policy)
            .finish()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if let Some(shared) = self.broadcaster.upgrade() {
            shared.detach(&self.state, None);
        }
    }
}

#[async_trait]
impl OutboundFeed for Subscriber {
    async fn next_event(&self) -> FeedEvent {
        match self.recv().await {
            Some(message) => FeedEvent::Payload(message.into_payload()),
            None => FeedEvent::Closed {
                reason: match self.close_reason() {
                    Some(CloseReason::Backpressure(err)) => Some(err.to_string()),
                    _ => None,
                },
            },
        }
    }

    fn try_next_payload(&self) -> Option<Bytes> {
        self.try_recv().map(Message::into_payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(seq: u64) -> Message {
        Message::new("t", format!("m{seq}"), seq)
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let state = SubscriberState::new(2, BackpressurePolicy::DropOldest);
        assert_eq!(state.offer(msg(1)), Offer::Queued);
        assert_eq!(state.offer(msg(2)), Offer::Queued);
        assert_eq!(state.offer(msg(3)), Offer::DroppedOldest);
        assert_eq!(state.pop().map(|m| m.sequence()), Ok(2));
    }

    #[test]
    fn test_full_under_close_policy() {
        let state = SubscriberState::new(1, BackpressurePolicy::Close);
        assert_eq!(state.offer(msg(1)), Offer::Queued);
        assert_eq!(state.offer(msg(2)), Offer::Full);
    }

    #[test]
    fn test_close_keeps_or_discards_queue() {
        let kept = SubscriberState::new(4, BackpressurePolicy::Block);
        kept.offer(msg(1));
        assert!(kept.close(CloseReason::Shutdown, false));
        assert!(!kept.close(CloseReason::Unsubscribed, true));
        assert_eq!(kept.pop().map(|m| m.sequence()), Ok(1));
        assert_eq!(kept.pop(), Err(true));
        assert_eq!(kept.offer(msg(2)), Offer::Closed);

        let discarded = SubscriberState::new(4, BackpressurePolicy::Block);
        discarded.offer(msg(1));
        discarded.close(CloseReason::Unsubscribed, true);
        assert_eq!(discarded.pop(), Err(true));
    }

    #[tokio::test]
    async fn test_offer_when_ready_waits_for_space() {
        let state = Arc::new(SubscriberState::new(1, BackpressurePolicy::Block));
        state.offer(msg(1));

        let waiter = tokio::spawn({
            let state = Arc::clone(&state);
            async move { state.offer_when_ready(msg(2)).await }
        });
        tokio::task::yield_now().await;
        assert_eq!(state.pop().map(|m| m.sequence()), Ok(1));
        assert_eq!(waiter.await.unwrap(), Offer::Queued);
        assert_eq!(state.pop().map(|m| m.sequence()), Ok(2));
    }
}
