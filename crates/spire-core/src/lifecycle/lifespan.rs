//! Server lifespan protocol.
//!
//! The server opens a single lifespan connection at boot, sends
//! `lifespan.startup`, and later `lifespan.shutdown`. Each is answered with a
//! `complete` or `failed` event from the registered [`LifespanHandler`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::DispatchOutcome;
use super::io::{ConnectionIo, InboundEvent, OutboundEvent};
use crate::error::{HandlerResult, TransportError};

/// Hooks run on server startup and shutdown.
#[async_trait]
pub trait LifespanHandler: Send + Sync {
    /// Called once before the server accepts connections.
    async fn startup(&self) -> HandlerResult {
        Ok(())
    }

    /// Called once after the server stops accepting connections.
    async fn shutdown(&self) -> HandlerResult {
        Ok(())
    }
}

/// Answers lifespan events until shutdown completes or the channel closes.
pub(crate) async fn run(handler: Option<Arc<dyn LifespanHandler>>, mut io: ConnectionIo) -> DispatchOutcome {
    loop {
        let event = match io.source.receive().await {
            Ok(event) => event,
            Err(TransportError::Disconnected) => return DispatchOutcome::Disconnected,
            Err(err) => {
                error!(error = %err, "Lifespan channel failed");
                return DispatchOutcome::Disconnected;
            }
        };

        let (reply, done) = match event {
            InboundEvent::LifespanStartup => {
                let result = match &handler {
                    Some(h) => h.startup().await,
                    None => Ok(()),
                };
                match result {
                    Ok(()) => {
                        info!("Lifespan startup complete");
                        (OutboundEvent::LifespanStartupComplete, false)
                    }
                    Err(err) => {
                        error!(error = %err, "Lifespan startup failed");
                        (
                            OutboundEvent::LifespanStartupFailed {
                                message: format!("{err:#}"),
                            },
                            true,
                        )
                    }
                }
            }
            InboundEvent::LifespanShutdown => {
                let result = match &handler {
                    Some(h) => h.shutdown().await,
                    None => Ok(()),
                };
                match result {
                    Ok(()) => {
                        info!("Lifespan shutdown complete");
                        (OutboundEvent::LifespanShutdownComplete, true)
                    }
                    Err(err) => {
                        error!(error = %err, "Lifespan shutdown failed");
                        (
                            OutboundEvent::LifespanShutdownFailed {
                                message: format!("{err:#}"),
                            },
                            true,
                        )
                    }
                }
            }
            other => {
                debug!(event = other.name(), "Ignoring non-lifespan event");
                continue;
            }
        };

        if io.sink.send(reply).await.is_err() {
            return DispatchOutcome::Disconnected;
        }
        if done {
            return DispatchOutcome::Completed;
        }
    }
}
