//! # Spire
//!
//! Request dispatch and publish/subscribe broadcasting for async Rust web
//! services.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     ┌────────┐     ┌──────────────────────────────┐
//! │ Transport │────▶│ Router │────▶│ HTTP handler  (request/resp) │
//! │  (axum)   │     │        │────▶│ WebSocket handler ◀──┐       │
//! └───────────┘     └────────┘────▶│ Raw handler          │       │
//!                                  └──────────────────────┼───────┘
//!                                   publish ──▶ Broadcaster ──▶ Subscriber
//! ```
//!
//! - **Router**: ordered route table with typed path parameters
//! - **Lifecycles**: drive one connection through the HTTP, WebSocket or
//!   lifespan state machine
//! - **Broadcaster**: topic fan-out with per-topic ordering, bounded queues
//!   and optional history
//! - **Runtime**: configuration, logging and graceful shutdown
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spire::prelude::*;
//!
//! async fn hello(req: Request) -> HandlerResult<Response> {
//!     let name = req.params().get("name").and_then(ParamValue::as_str).unwrap_or("you");
//!     Ok(Response::text(format!("hello {name}")))
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = SpireRuntime::builder()
//!         .routes(|_| Router::new().route(Route::get("/hello/{name}", hello)?))
//!         .build()
//!         .await?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default), `yaml-config`: configuration file formats
//! - `json-log`: JSON log output
//! - `http-server`, `ws-server`, `full-transport`: the axum listener
//! - `redis`: Redis history backend for channels

pub use spire_channels as channels;
pub use spire_core as core;
pub use spire_runtime as runtime;
pub use spire_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use spire::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use spire_runtime::{RuntimeBuilder, SpireConfig, SpireRuntime};

    // Routing and handlers
    pub use spire_core::prelude::*;
    pub use spire_core::{LifespanHandler, PathParams};

    // Channels
    pub use spire_channels::{
        BackpressurePolicy, Broadcaster, ChannelsConfig, Message, SubscribeOptions, Subscriber,
    };
}
