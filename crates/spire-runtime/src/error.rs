//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or running a [`SpireRuntime`](crate::SpireRuntime).
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration failed to load or validate.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The route table could not be built.
    #[error("Routing error: {0}")]
    Routing(#[from] spire_core::RoutingError),

    /// The broadcaster backend could not be connected.
    #[error("Channels error: {0}")]
    Channels(#[from] spire_channels::ChannelsError),

    /// The listener or the lifespan connection failed.
    #[error("Server error: {0}")]
    Server(#[from] spire_transport::ServerError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
