//! The broadcaster.
//!
//! # Architecture
//!
//! ```text
//! publish() ──► bounded command queue ──► fan-out task ──► topic lanes ──► subscriber queues
//!                                             │
//!                                             ▼
//!                                     Backend (history)
//! ```
//!
//! - **Single writer**: one background task per broadcaster drains the
//!   command queue. It owns the per-topic sequence counters, so messages on a
//!   topic get gap-free, strictly increasing sequence numbers.
//! - **Membership at publish time**: `publish` takes the topic's subscriber
//!   list when it is called. A subscriber that leaves afterwards still gets
//!   the message; one that joins afterwards does not.
//! - **Topic lanes**: each topic is delivered by its own task, in sequence
//!   order. A subscriber blocking its lane never delays another topic.
//! - **Fine-grained membership**: each topic has its own subscriber list lock.
//!   The topic map lock is only held to look up or create/remove a topic.
//! - **Backpressure**: a full queue is handled per subscriber policy. A
//!   subscriber cut off by backpressure is detached from all topics; nothing
//!   else is affected.
//! - **History**: when `history_capacity > 0` every message is appended to the
//!   backend. Backend failures are logged and counted, never returned to the
//!   publisher.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::backend::{BoxedBackend, MemoryBackend, connect};
use crate::config::{BackpressurePolicy, ChannelsConfig};
use crate::error::{BackendResult, BackpressureError, ChannelsError, ChannelsResult};
use crate::message::Message;
use crate::subscriber::{CloseReason, Offer, Subscriber, SubscriberState};

// =============================================================================
// Options and stats
// =============================================================================

/// Per-subscription settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Replay up to this many stored messages per topic before live traffic.
    pub history: usize,
    /// Queue bound; the broadcaster default when `None`.
    pub capacity: Option<usize>,
    /// Backpressure policy; the broadcaster default when `None`.
    pub policy: Option<BackpressurePolicy>,
}

impl SubscribeOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests history replay.
    pub fn with_history(mut self, history: usize) -> Self {
        self.history = history;
        self
    }

    /// Overrides the queue bound.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Overrides the backpressure policy.
    pub fn with_policy(mut self, policy: BackpressurePolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// A snapshot of broadcaster counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcasterStats {
    /// Messages published.
    pub published: u64,
    /// Messages placed on subscriber queues.
    pub delivered: u64,
    /// Messages evicted from subscriber queues under drop-oldest.
    pub dropped: u64,
    /// Subscribers disconnected by backpressure.
    pub disconnected: u64,
    /// Failed history writes.
    pub backend_failures: u64,
    /// Open subscribers.
    pub subscribers: usize,
    /// Topics with at least one subscriber.
    pub topics: usize,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    disconnected: AtomicU64,
    backend_failures: AtomicU64,
    subscribers: AtomicUsize,
}

// =============================================================================
// Shared state
// =============================================================================

#[derive(Debug, Default)]
struct TopicState {
    subscribers: Mutex<Vec<Arc<SubscriberState>>>,
}

/// State shared by broadcaster handles, subscribers and the fan-out task.
pub(crate) struct Shared {
    config: ChannelsConfig,
    declared: HashSet<String>,
    topics: RwLock<HashMap<String, Arc<TopicState>>>,
    backend: BoxedBackend,
    counters: Counters,
    closed: CancellationToken,
    /// Held while a subscriber list is taken and its command queued, so
    /// commands reach the fan-out task in the order membership was read.
    publish_turn: tokio::sync::Mutex<()>,
}

impl Shared {
    fn check_topic(&self, topic: &str) -> ChannelsResult<()> {
        if self.config.arbitrary_topics_allowed || self.declared.contains(topic) {
            Ok(())
        } else {
            Err(ChannelsError::unknown_topic(topic))
        }
    }

    fn attach(&self, state: &Arc<SubscriberState>, topics: &[String]) {
        state.add_topics(topics);
        for topic in topics {
            // Join while holding the map lock; topics are only removed under the write lock.
            let map = self.topics.read();
            if let Some(entry) = map.get(topic) {
                Self::join(entry, state);
                continue;
            }
            drop(map);
            let mut map = self.topics.write();
            Self::join(map.entry(topic.clone()).or_default(), state);
        }
    }

    fn join(entry: &TopicState, state: &Arc<SubscriberState>) {
        let mut subscribers = entry.subscribers.lock();
        if !subscribers.iter().any(|s| Arc::ptr_eq(s, state)) {
            subscribers.push(Arc::clone(state));
        }
    }

    /// Removes `state` from `topics` (all when `None`). A subscriber left with
    /// no topics is closed and its queue discarded, unless it was already
    /// closed for another reason.
    pub(crate) fn detach(&self, state: &Arc<SubscriberState>, topics: Option<&[String]>) {
        let (removed, none_left) = state.remove_topics(topics);
        for topic in &removed {
            let Some(entry) = self.topics.read().get(topic).cloned() else {
                continue;
            };
            let now_empty = {
                let mut subscribers = entry.subscribers.lock();
                subscribers.retain(|s| !Arc::ptr_eq(s, state));
                subscribers.is_empty()
            };
            if now_empty {
                let mut map = self.topics.write();
                if map
                    .get(topic)
                    .is_some_and(|e| Arc::ptr_eq(e, &entry) && e.subscribers.lock().is_empty())
                {
                    map.remove(topic);
                    trace!(topic = %topic, "Topic has no subscribers, removed");
                }
            }
        }
        if none_left {
            self.close_subscriber(state, CloseReason::Unsubscribed, true);
        }
        if !removed.is_empty() {
            debug!(subscriber = %state.id(), topics = ?removed, "Unsubscribed");
        }
    }

    fn close_subscriber(&self, state: &SubscriberState, reason: CloseReason, discard: bool) {
        if state.close(reason, discard) {
            self.counters.subscribers.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self, topic: &str) -> Vec<Arc<SubscriberState>> {
        self.topics
            .read()
            .get(topic)
            .map(|entry| entry.subscribers.lock().clone())
            .unwrap_or_default()
    }

    fn history_enabled(&self) -> bool {
        self.config.history_capacity > 0
    }
}

// =============================================================================
// Fan-out task
// =============================================================================

enum Command {
    Publish {
        topic: String,
        payload: Bytes,
        subscribers: Vec<Arc<SubscriberState>>,
    },
    Replay {
        state: Arc<SubscriberState>,
        topics: Vec<String>,
        count: usize,
        done: oneshot::Sender<()>,
    },
    Barrier(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Work queued on a topic lane.
enum LaneWork {
    Deliver {
        message: Message,
        subscribers: Vec<Arc<SubscriberState>>,
    },
    Flush(oneshot::Sender<()>),
}

struct FanOut {
    shared: Arc<Shared>,
    /// Last sequence handed out per topic.
    ///
    /// Entries outlive the topic's subscribers: without history this map is
    /// the only record of where a topic left off, and dropping an entry would
    /// restart the topic at 1. It grows with the number of distinct topics
    /// ever published, which the declared topic list bounds unless
    /// `arbitrary_topics_allowed` is set.
    sequences: HashMap<String, u64>,
    /// Delivery lane per topic, kept for as long as `sequences` keeps the topic.
    lanes: HashMap<String, mpsc::Sender<LaneWork>>,
}

impl FanOut {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("Fan-out task started");
        let mut requested = None;
        while let Some(command) = commands.recv().await {
            match command {
                Command::Publish {
                    topic,
                    payload,
                    subscribers,
                } => self.publish(topic, payload, subscribers).await,
                Command::Replay {
                    state,
                    topics,
                    count,
                    done,
                } => self.replay(state, topics, count, done).await,
                Command::Barrier(done) => {
                    let flushed = self.flush_lanes().await;
                    notify_when_flushed(flushed, done);
                }
                Command::Shutdown(done) => {
                    requested = Some(done);
                    break;
                }
            }
        }
        // Also reached when every broadcaster handle is dropped.
        self.shutdown().await;
        if let Some(done) = requested {
            let _ = done.send(());
        }
        debug!("Fan-out task stopped");
    }

    /// Next sequence for `topic`. A topic seen for the first time continues
    /// from the backend's last stored sequence.
    async fn next_sequence(&mut self, topic: &str) -> u64 {
        let last = match self.sequences.get(topic) {
            Some(seq) => *seq,
            None if self.shared.history_enabled() => {
                match self.shared.backend.last_sequence(topic).await {
                    Ok(seq) => seq,
                    Err(err) => {
                        warn!(topic, error = %err, "Could not seed sequence from backend");
                        self.shared
                            .counters
                            .backend_failures
                            .fetch_add(1, Ordering::Relaxed);
                        0
                    }
                }
            }
            None => 0,
        };
        let seq = last + 1;
        self.sequences.insert(topic.to_string(), seq);
        seq
    }

    async fn store(&self, message: &Message) -> BackendResult<()> {
        self.shared.backend.append(message).await?;
        let evicted = self
            .shared
            .backend
            .evict_if_over_capacity(message.topic())
            .await?;
        if evicted > 0 {
            trace!(topic = message.topic(), evicted, "History trimmed");
        }
        Ok(())
    }

    /// Queues `work` on the lane for `topic`, starting the lane on first use.
    async fn hand_off(&mut self, topic: &str, work: LaneWork) {
        if !self.lanes.contains_key(topic) {
            let (tx, rx) = mpsc::channel(self.shared.config.publish_queue_capacity.max(1));
            let lane = Lane {
                shared: Arc::clone(&self.shared),
            };
            tokio::spawn(lane.run(rx).instrument(info_span!("lane", topic)));
            self.lanes.insert(topic.to_string(), tx);
        }
        let Some(lane) = self.lanes.get(topic) else {
            return;
        };
        if lane.send(work).await.is_err() {
            warn!(topic, "Delivery lane is gone, dropping work");
        }
    }

    async fn publish(
        &mut self,
        topic: String,
        payload: Bytes,
        subscribers: Vec<Arc<SubscriberState>>,
    ) {
        let sequence = self.next_sequence(&topic).await;
        let message = Message::new(topic.clone(), payload, sequence);

        if self.shared.history_enabled()
            && let Err(err) = self.store(&message).await
        {
            warn!(
                topic = %topic,
                sequence,
                backend = self.shared.backend.name(),
                error = %err,
                "History write failed, delivering to live subscribers only"
            );
            self.shared
                .counters
                .backend_failures
                .fetch_add(1, Ordering::Relaxed);
        }
        self.shared.counters.published.fetch_add(1, Ordering::Relaxed);

        trace!(
            topic = %topic,
            sequence,
            subscribers = subscribers.len(),
            "Fanning out"
        );
        if !subscribers.is_empty() {
            self.hand_off(&topic, LaneWork::Deliver {
                message,
                subscribers,
            })
            .await;
        }
    }

    /// Queues stored messages for a subscriber that is already attached.
    /// Live messages for the topic land on the same lane behind them.
    async fn replay(
        &mut self,
        state: Arc<SubscriberState>,
        topics: Vec<String>,
        count: usize,
        done: oneshot::Sender<()>,
    ) {
        let mut flushed = Vec::with_capacity(topics.len());
        for topic in &topics {
            match self.shared.backend.history(topic, None).await {
                Ok(history) => {
                    let skip = history.len().saturating_sub(count);
                    for message in history.into_iter().skip(skip) {
                        self.hand_off(topic, LaneWork::Deliver {
                            message,
                            subscribers: vec![Arc::clone(&state)],
                        })
                        .await;
                    }
                    let (tx, rx) = oneshot::channel();
                    self.hand_off(topic, LaneWork::Flush(tx)).await;
                    flushed.push(rx);
                }
                Err(err) => {
                    warn!(topic = %topic, error = %err, "History replay failed");
                    self.shared
                        .counters
                        .backend_failures
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        notify_when_flushed(flushed, done);
    }

    async fn flush_lanes(&self) -> Vec<oneshot::Receiver<()>> {
        let mut flushed = Vec::with_capacity(self.lanes.len());
        for lane in self.lanes.values() {
            let (tx, rx) = oneshot::channel();
            if lane.send(LaneWork::Flush(tx)).await.is_ok() {
                flushed.push(rx);
            }
        }
        flushed
    }

    async fn shutdown(&mut self) {
        join_all(self.flush_lanes().await).await;
        self.lanes.clear();

        let topics: Vec<Arc<TopicState>> =
            self.shared.topics.write().drain().map(|(_, t)| t).collect();
        let mut closed = 0usize;
        for topic in topics {
            for state in topic.subscribers.lock().drain(..) {
                state.remove_topics(None);
                if state.close(CloseReason::Shutdown, false) {
                    self.shared.counters.subscribers.fetch_sub(1, Ordering::Relaxed);
                    closed += 1;
                }
            }
        }
        self.shared.closed.cancel();
        info!(subscribers = closed, "Broadcaster shut down");
    }
}

/// Fires `done` once every lane behind `flushed` has worked through what was
/// queued before its flush marker. Runs off the fan-out task.
fn notify_when_flushed(flushed: Vec<oneshot::Receiver<()>>, done: oneshot::Sender<()>) {
    tokio::spawn(async move {
        join_all(flushed).await;
        let _ = done.send(());
    });
}

// ─── Lanes ───────────────────────────────────────────────────────────────────

/// Delivers one topic's messages in sequence order.
///
/// A [`BackpressurePolicy::Block`] subscriber waiting for room holds up its
/// own topic only. Once a stalled lane's queue fills, the fan-out task waits
/// on it.
struct Lane {
    shared: Arc<Shared>,
}

impl Lane {
    async fn run(self, mut work: mpsc::Receiver<LaneWork>) {
        while let Some(item) = work.recv().await {
            match item {
                LaneWork::Deliver {
                    message,
                    subscribers,
                } => {
                    for state in &subscribers {
                        self.deliver(state, &message).await;
                    }
                }
                LaneWork::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        trace!("Lane stopped");
    }

    async fn deliver(&self, state: &Arc<SubscriberState>, message: &Message) {
        let counters = &self.shared.counters;
        let mut offer = state.offer(message.clone());

        if offer == Offer::Full {
            match state.policy() {
                BackpressurePolicy::Close => {
                    self.disconnect(
                        state,
                        BackpressureError::Overflow {
                            capacity: state.capacity(),
                        },
                    );
                    return;
                }
                BackpressurePolicy::Block => {
                    let timeout = self.shared.config.block_timeout();
                    match tokio::time::timeout(timeout, state.offer_when_ready(message.clone()))
                        .await
                    {
                        Ok(next) => offer = next,
                        Err(_) => {
                            self.disconnect(
                                state,
                                BackpressureError::BlockTimeout {
                                    timeout_ms: self.shared.config.block_timeout_ms,
                                },
                            );
                            return;
                        }
                    }
                }
                BackpressurePolicy::DropOldest => {}
            }
        }

        match offer {
            Offer::Queued => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Offer::DroppedOldest => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Offer::Full | Offer::Closed => {}
        }
    }

    fn disconnect(&self, state: &Arc<SubscriberState>, err: BackpressureError) {
        warn!(subscriber = %state.id(), error = %err, "Disconnecting slow subscriber");
        self.shared
            .close_subscriber(state, CloseReason::Backpressure(err), false);
        self.shared.detach(state, None);
        self.shared
            .counters
            .disconnected
            .fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Publish/subscribe hub.
///
/// Cloning is cheap; all clones share one fan-out task. Construct it at
/// startup and pass it to the handlers that need it. Dropping the last clone
/// shuts the broadcaster down as [`shutdown`](Self::shutdown) would.
#[derive(Clone)]
pub struct Broadcaster {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
}

impl Broadcaster {
    /// Creates a broadcaster with the in-memory backend.
    ///
    /// Must be called inside a Tokio runtime: the fan-out task is spawned here.
    pub fn new(config: ChannelsConfig) -> Self {
        let backend = Arc::new(MemoryBackend::new(config.history_capacity));
        Self::with_backend(config, backend)
    }

    /// Creates a broadcaster using the backend described by `config.backend`.
    pub async fn connect(config: ChannelsConfig) -> ChannelsResult<Self> {
        let backend = connect(&config.backend, config.history_capacity).await?;
        Ok(Self::with_backend(config, backend))
    }

    /// Creates a broadcaster over an explicit backend.
    pub fn with_backend(config: ChannelsConfig, backend: BoxedBackend) -> Self {
        let (tx, rx) = mpsc::channel(config.publish_queue_capacity.max(1));
        let shared = Arc::new(Shared {
            declared: config.topics.iter().cloned().collect(),
            config,
            topics: RwLock::new(HashMap::new()),
            backend,
            counters: Counters::default(),
            closed: CancellationToken::new(),
            publish_turn: tokio::sync::Mutex::new(()),
        });

        info!(
            backend = shared.backend.name(),
            history = shared.config.history_capacity,
            policy = ?shared.config.backpressure_policy,
            "Broadcaster started"
        );

        let fanout = FanOut {
            shared: Arc::clone(&shared),
            sequences: HashMap::new(),
            lanes: HashMap::new(),
        };
        tokio::spawn(fanout.run(rx).instrument(info_span!("fanout")));

        Self {
            shared,
            commands: tx,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &ChannelsConfig {
        &self.shared.config
    }

    fn ensure_open(&self) -> ChannelsResult<()> {
        if self.shared.closed.is_cancelled() {
            Err(ChannelsError::Closed)
        } else {
            Ok(())
        }
    }

    fn normalize<I, S>(&self, topics: I) -> ChannelsResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for topic in topics {
            let topic = topic.into();
            self.shared.check_topic(&topic)?;
            if !out.contains(&topic) {
                out.push(topic);
            }
        }
        Ok(out)
    }

    /// Subscribes to `topics` with default options.
    pub async fn subscribe<I, S>(&self, topics: I) -> ChannelsResult<Subscriber>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_with(topics, SubscribeOptions::default()).await
    }

    /// Subscribes to `topics`.
    ///
    /// With `options.history > 0` the last stored messages of each topic are
    /// queued before any live message.
    pub async fn subscribe_with<I, S>(
        &self,
        topics: I,
        options: SubscribeOptions,
    ) -> ChannelsResult<Subscriber>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_open()?;
        let topics = self.normalize(topics)?;
        let config = &self.shared.config;
        let state = Arc::new(SubscriberState::new(
            options.capacity.unwrap_or(config.queue_capacity),
            options.policy.unwrap_or(config.backpressure_policy),
        ));
        self.shared.counters.subscribers.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber::new(Arc::clone(&state), Arc::downgrade(&self.shared));

        if options.history > 0 && self.shared.history_enabled() {
            let (done, wait) = oneshot::channel();
            {
                // Publishes queued before the replay are in the history it
                // reads; later ones see the subscriber attached.
                let _turn = self.shared.publish_turn.lock().await;
                self.shared.attach(&state, &topics);
                self.commands
                    .send(Command::Replay {
                        state: Arc::clone(&state),
                        topics: topics.clone(),
                        count: options.history,
                        done,
                    })
                    .await
                    .map_err(|_| ChannelsError::Closed)?;
            }
            wait.await.map_err(|_| ChannelsError::Closed)?;
        } else {
            self.shared.attach(&state, &topics);
        }

        debug!(subscriber = %state.id(), topics = ?topics, "Subscribed");
        Ok(subscriber)
    }

    /// Removes `subscriber` from `topics`, or from all topics when `None`.
    ///
    /// Idempotent. A subscriber left with no topics is closed and its unread
    /// queue discarded.
    pub fn unsubscribe(&self, subscriber: &Subscriber, topics: Option<&[&str]>) {
        let topics: Option<Vec<String>> =
            topics.map(|t| t.iter().map(|s| (*s).to_string()).collect());
        self.shared.detach(subscriber.state(), topics.as_deref());
    }

    /// Queues `payload` for delivery on `topic`.
    ///
    /// The message goes to the topic's subscribers as of this call, even if
    /// one unsubscribes before it is fanned out. Waits only for room in the
    /// shared publish queue, never for a slow subscriber.
    pub async fn publish(&self, topic: impl Into<String>, payload: impl Into<Bytes>) -> ChannelsResult<()> {
        self.ensure_open()?;
        let topic = topic.into();
        self.shared.check_topic(&topic)?;
        let _turn = self.shared.publish_turn.lock().await;
        let subscribers = self.shared.snapshot(&topic);
        self.commands
            .send(Command::Publish {
                topic,
                payload: payload.into(),
                subscribers,
            })
            .await
            .map_err(|_| ChannelsError::Closed)
    }

    /// Waits until everything published before this call has been fanned out.
    pub async fn wait_published(&self) -> ChannelsResult<()> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(Command::Barrier(done))
            .await
            .map_err(|_| ChannelsError::Closed)?;
        wait.await.map_err(|_| ChannelsError::Closed)
    }

    /// Stored messages of `topic` with a sequence greater than `since`.
    pub async fn history(&self, topic: &str, since: Option<u64>) -> ChannelsResult<Vec<Message>> {
        self.shared.check_topic(topic)?;
        Ok(self.shared.backend.history(topic, since).await?)
    }

    /// Drains pending publishes, then closes every subscriber.
    ///
    /// Queued messages stay readable; subscribers see the end of their stream
    /// afterwards. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.shared.closed.is_cancelled() {
            return;
        }
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has completed.
    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Resolves once the broadcaster has shut down.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    /// Current counters.
    pub fn stats(&self) -> BroadcasterStats {
        let c = &self.shared.counters;
        BroadcasterStats {
            published: c.published.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            disconnected: c.disconnected.load(Ordering::Relaxed),
            backend_failures: c.backend_failures.load(Ordering::Relaxed),
            subscribers: c.subscribers.load(Ordering::Relaxed),
            topics: self.shared.topics.read().len(),
        }
    }

    /// Number of subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared
            .topics
            .read()
            .get(topic)
            .map_or(0, |entry| entry.subscribers.lock().len())
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("backend", &self.shared.backend.name())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequences_are_per_topic() {
        let broadcaster = Broadcaster::new(ChannelsConfig::default());
        let sub = broadcaster.subscribe(["a", "b"]).await.unwrap();
        broadcaster.publish("a", "1").await.unwrap();
        broadcaster.publish("b", "1").await.unwrap();
        broadcaster.publish("a", "2").await.unwrap();
        broadcaster.wait_published().await.unwrap();

        let mut seqs: Vec<(String, u64)> = sub
            .drain()
            .into_iter()
            .map(|m| (m.topic().to_string(), m.sequence()))
            .collect();
        // Topics are delivered independently; only per-topic order holds.
        seqs.sort();
        assert_eq!(
            seqs,
            vec![("a".into(), 1), ("a".into(), 2), ("b".into(), 1)]
        );
    }

    #[tokio::test]
    async fn test_unknown_topic_rejected() {
        let broadcaster = Broadcaster::new(ChannelsConfig::default().with_topics(["news"]));
        assert!(broadcaster.subscribe(["news"]).await.is_ok());
        assert_eq!(
            broadcaster.publish("sports", "x").await,
            Err(ChannelsError::unknown_topic("sports"))
        );
        assert!(broadcaster.subscribe(["sports"]).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_topic_is_removed() {
        let broadcaster = Broadcaster::new(ChannelsConfig::default());
        let sub = broadcaster.subscribe(["a"]).await.unwrap();
        assert_eq!(broadcaster.stats().topics, 1);
        drop(sub);
        assert_eq!(broadcaster.stats().topics, 0);
        assert_eq!(broadcaster.stats().subscribers, 0);
    }
}
