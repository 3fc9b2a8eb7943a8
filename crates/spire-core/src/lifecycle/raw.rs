//! Raw passthrough lifecycle.
//!
//! The handler receives the scope and the raw [`ConnectionIo`] and owns the
//! protocol from there. The only framework state is open/closed.

use std::sync::Arc;

use tracing::{error, trace};

use super::io::ConnectionIo;
use super::scope::Scope;
use super::{DispatchOutcome, guarded};
use crate::routing::RawHandler;

/// Hands the connection to `handler`.
pub(crate) async fn run(handler: Arc<dyn RawHandler>, scope: Scope, io: ConnectionIo) -> DispatchOutcome {
    trace!(protocol = %scope.protocol, "Raw connection open");
    let outcome = match guarded(handler.call(scope, io)).await {
        Ok(()) => DispatchOutcome::Completed,
        Err(message) => {
            error!(error = %message, "Raw handler failed");
            DispatchOutcome::HandlerFailed { message }
        }
    };
    trace!("Raw connection closed");
    outcome
}
