//! # Spire Channels
//!
//! Publish/subscribe broadcasting for Spire applications.
//!
//! Server-side code publishes opaque payloads to string topics; connected
//! clients (typically WebSockets) hold a [`Subscriber`] and receive every
//! message on their topics in publish order.
//!
//! ```text
//! ┌───────────┐   publish   ┌─────────────┐   fan-out   ┌────────────┐
//! │ Handler A │────────────▶│ Broadcaster │────────────▶│ Subscriber │──▶ WebSocket
//! └───────────┘             │ (lane/topic)│────────────▶│ Subscriber │──▶ WebSocket
//!                           └──────┬──────┘             └────────────┘
//!                                  ▼
//!                           Backend (history)
//! ```
//!
//! Queues are bounded; a full queue is resolved by the subscriber's
//! [`BackpressurePolicy`]. A [`Subscriber`] implements
//! [`OutboundFeed`](spire_core::OutboundFeed), so it can be bound straight to a
//! WebSocket:
//!
//! ```rust,ignore
//! async fn live(socket: WebSocket, channels: Broadcaster) -> HandlerResult {
//!     socket.accept().await?;
//!     let subscriber = channels.subscribe(["news"]).await?;
//!     socket.bind(subscriber, FrameMode::Text);
//!     socket.serve(|_frame| async { Ok(()) }).await
//! }
//! ```

pub mod backend;
mod broadcaster;
mod config;
mod error;
mod message;
mod subscriber;

pub use backend::{Backend, BoxedBackend, MemoryBackend};
#[cfg(feature = "redis")]
pub use backend::RedisBackend;
pub use broadcaster::{Broadcaster, BroadcasterStats, SubscribeOptions};
pub use config::{BackendConfig, BackpressurePolicy, ChannelsConfig};
pub use error::{
    BackendError, BackendResult, BackpressureError, ChannelsError, ChannelsResult,
};
pub use message::Message;
pub use subscriber::{CloseReason, Subscriber};
