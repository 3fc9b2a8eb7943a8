//! Server error types.

use std::io;

use spire_core::TransportError;
use thiserror::Error;

/// Errors raised while running a server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Binding the listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The accept loop failed.
    #[error("server error: {0}")]
    Serve(#[from] io::Error),

    /// The application reported a failed startup.
    #[error("lifespan startup failed: {0}")]
    StartupFailed(String),

    /// The application reported a failed shutdown.
    #[error("lifespan shutdown failed: {0}")]
    ShutdownFailed(String),

    /// The in-process lifespan channel broke.
    #[error("lifespan channel error: {0}")]
    Transport(#[from] TransportError),
}

impl ServerError {
    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
