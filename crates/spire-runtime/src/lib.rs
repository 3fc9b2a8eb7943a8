//! Spire Runtime - orchestration layer for the Spire web framework.
//!
//! This crate provides:
//! - Layered configuration loading (`ConfigLoader`, `SpireConfig`)
//! - Logging setup (`LoggingBuilder`, `SpanEvents`)
//! - Runtime orchestration (`SpireRuntime`): router, broadcaster, lifespan
//!   hooks and signal handling
//!
//! # Features
//!
//! - `toml-config` (default) / `yaml-config`: configuration file formats
//! - `json-log`: JSON log output
//! - `http-server`, `ws-server`, `full-transport`: bind a real listener in
//!   [`SpireRuntime::serve`]
//! - `redis`: Redis history backend for channels
//!
//! ```ignore
//! use spire_runtime::SpireRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = SpireRuntime::builder()
//!         .routes(|_| Router::new().route(Route::get("/", index)?))
//!         .build()
//!         .await?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, Profile, SpireConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, SpireRuntime};

// Re-export tracing for use by applications
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides the commonly used logging macros and `Level`.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
