//! Drives the lifespan connection of a router.
//!
//! ```text
//! Lifespan::startup ──► lifespan.startup ──► router ──► startup.complete
//!      ... server runs ...
//! Lifespan::shutdown ─► lifespan.shutdown ─► router ──► shutdown.complete
//! ```

use std::sync::Arc;

use spire_core::{
    Connection, DispatchOutcome, InboundEvent, OutboundEvent, Router, Scope, TransportError,
};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::channel::{self, ServerEnds};
use crate::error::{ServerError, ServerResult};

/// A running lifespan connection.
pub struct Lifespan {
    ends: ServerEnds,
    task: JoinHandle<DispatchOutcome>,
}

impl Lifespan {
    /// Opens the lifespan connection and waits for startup to complete.
    pub async fn startup(router: Arc<Router>) -> ServerResult<Self> {
        let (io, mut ends) = channel::pair();
        let task = tokio::spawn(async move {
            router
                .dispatch(Connection::new(Scope::lifespan(), io))
                .await
        });

        ends.inbound
            .send(InboundEvent::LifespanStartup)
            .map_err(|_| TransportError::Disconnected)?;
        match ends.outbound.recv().await {
            Some(OutboundEvent::LifespanStartupComplete) => {
                info!("Application startup complete");
                Ok(Self { ends, task })
            }
            Some(OutboundEvent::LifespanStartupFailed { message }) => {
                Err(ServerError::StartupFailed(message))
            }
            Some(other) => Err(ServerError::StartupFailed(format!(
                "unexpected lifespan reply: {other:?}"
            ))),
            None => Err(TransportError::Disconnected.into()),
        }
    }

    /// Sends shutdown and waits for the application to finish it.
    pub async fn shutdown(mut self) -> ServerResult<()> {
        if self.ends.inbound.send(InboundEvent::LifespanShutdown).is_err() {
            debug!("Lifespan connection already finished");
            return Ok(());
        }
        let reply = self.ends.outbound.recv().await;
        let outcome = self.task.await;
        debug!(?outcome, "Lifespan connection finished");

        match reply {
            Some(OutboundEvent::LifespanShutdownComplete) | None => {
                info!("Application shutdown complete");
                Ok(())
            }
            Some(OutboundEvent::LifespanShutdownFailed { message }) => {
                Err(ServerError::ShutdownFailed(message))
            }
            Some(other) => Err(ServerError::ShutdownFailed(format!(
                "unexpected lifespan reply: {other:?}"
            ))),
        }
    }
}

impl std::fmt::Debug for Lifespan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifespan")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}
