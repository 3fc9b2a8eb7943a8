//! # Spire Transport
//!
//! Network server for the Spire web framework.
//!
//! This crate turns sockets into [`spire_core::Connection`]s and hands them
//! to [`spire_core::Router::dispatch`]. It owns no routing logic of its own.
//!
//! ## Features
//!
//! - `http-server`: plain HTTP requests
//! - `ws-server`: WebSocket upgrades
//! - `full`: both
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  Application        │  (routes, handlers, broadcaster)
//! ├─────────────────────┤
//! │  spire-core         │  (Router, lifecycles, I/O traits)
//! ├─────────────────────┤
//! │  spire-transport    │  <- This crate (axum server, lifespan driver)
//! ├─────────────────────┤
//! │  Network (TCP/HTTP) │
//! └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spire_transport::{bind, serve};
//! use tokio_util::sync::CancellationToken;
//!
//! let listener = bind("127.0.0.1:8000").await?;
//! serve(listener, Arc::new(router), CancellationToken::new()).await?;
//! ```

mod channel;
pub mod error;
pub mod lifespan;

#[cfg(any(feature = "http-server", feature = "ws-server"))]
pub mod server;

pub use error::{ServerError, ServerResult};
pub use lifespan::Lifespan;

#[cfg(any(feature = "http-server", feature = "ws-server"))]
pub use server::{bind, serve};
