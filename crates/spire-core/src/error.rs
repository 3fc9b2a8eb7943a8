//! Unified error types for the Spire core.
//!
//! The taxonomy follows the connection boundary:
//! - [`RoutingError`]: no route, wrong method, or a bad registration.
//! - [`ValidationError`]: a route matched but its parameters were malformed.
//! - [`LifecycleError`]: a protocol-sequencing violation (e.g. send before accept).
//! - [`TransportError`]: the peer or the underlying I/O went away.
//!
//! [`DispatchError`] wraps the first three and knows how each one is rendered
//! back to the client (HTTP status or WebSocket close code).

use thiserror::Error;

use crate::routing::{Method, RouteKind};

// =============================================================================
// Routing Errors
// =============================================================================

/// Errors raised while registering or resolving routes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No registered pattern matches the path.
    #[error("no {kind} route matches '{path}'")]
    NotFound {
        /// The requested path.
        path: String,
        /// The route kind that was searched.
        kind: RouteKind,
    },

    /// A pattern matched, but none of its HTTP routes accepts the method.
    #[error("method {method} is not allowed for '{path}'")]
    MethodNotAllowed {
        /// The requested path.
        path: String,
        /// The rejected method.
        method: Method,
        /// Methods the matched pattern does accept, sorted.
        allowed: Vec<Method>,
    },

    /// An equivalent pattern + method + kind is already registered.
    #[error("duplicate {kind} route '{pattern}'")]
    DuplicateRoute {
        /// The pattern being registered.
        pattern: String,
        /// The kind of the conflicting route.
        kind: RouteKind,
    },

    /// The route definition itself is malformed.
    #[error("invalid route '{pattern}': {reason}")]
    InvalidRoute {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl RoutingError {
    /// Creates a not-found error.
    pub fn not_found(path: impl Into<String>, kind: RouteKind) -> Self {
        Self::NotFound {
            path: path.into(),
            kind,
        }
    }

    /// Creates an invalid-route error.
    pub fn invalid(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRoute {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for [`RoutingError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// A matched route received input it could not coerce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value '{value}' for parameter '{parameter}': expected {expected}")]
pub struct ValidationError {
    /// Parameter name.
    pub parameter: String,
    /// The raw (decoded) value that failed.
    pub value: String,
    /// Human-readable description of what was expected.
    pub expected: String,
}

impl ValidationError {
    /// Creates a validation error.
    pub fn new(
        parameter: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self {
            parameter: parameter.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors surfaced by the protocol I/O boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer disconnected or the event stream ended.
    #[error("connection closed by peer")]
    Disconnected,

    /// Sending an event failed.
    #[error("failed to send event: {0}")]
    SendFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Lifecycle Errors
// =============================================================================

/// Protocol-sequencing violations and I/O failures inside a lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// Frame I/O attempted before `accept`.
    #[error("cannot {action} before the websocket is accepted")]
    NotAccepted {
        /// What the caller tried to do.
        action: &'static str,
    },

    /// The state machine does not allow this transition.
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: &'static str,
        /// Requested state.
        to: &'static str,
    },

    /// The connection is already closed.
    #[error("connection is closed")]
    Closed,

    /// The transport delivered an event that does not fit the protocol.
    #[error("unexpected event: expected {expected}, got {got}")]
    UnexpectedEvent {
        /// The event the lifecycle was waiting for.
        expected: &'static str,
        /// The event that arrived.
        got: &'static str,
    },

    /// Underlying transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl LifecycleError {
    /// Returns `true` if the error means the peer is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Closed)
    }
}

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Errors that stop a connection before (or instead of) its handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Route resolution failed.
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Route matched, parameters malformed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Protocol sequencing failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl DispatchError {
    /// HTTP status used when this error is answered over HTTP.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Routing(RoutingError::NotFound { .. }) => 404,
            Self::Routing(RoutingError::MethodNotAllowed { .. }) => 405,
            Self::Routing(_) => 500,
            Self::Validation(_) => 400,
            Self::Lifecycle(_) => 500,
        }
    }

    /// Close code used when this error is answered over a WebSocket.
    pub fn close_code(&self) -> u16 {
        use crate::lifecycle::close_code;

        match self {
            Self::Routing(RoutingError::NotFound { .. }) => close_code::NOT_FOUND,
            Self::Routing(_) => close_code::POLICY_VIOLATION,
            Self::Validation(_) => close_code::BAD_REQUEST,
            Self::Lifecycle(_) => close_code::INTERNAL_ERROR,
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for routing operations.
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Result type returned by application handlers.
pub type HandlerResult<T = ()> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        let not_found: DispatchError = RoutingError::not_found("/x", RouteKind::Http).into();
        assert_eq!(not_found.http_status(), 404);

        let not_allowed: DispatchError = RoutingError::MethodNotAllowed {
            path: "/x".into(),
            method: Method::Post,
            allowed: vec![Method::Get],
        }
        .into();
        assert_eq!(not_allowed.http_status(), 405);

        let invalid: DispatchError = ValidationError::new("id", "abc", "int").into();
        assert_eq!(invalid.http_status(), 400);
    }

    #[test]
    fn test_close_code_mapping() {
        let not_found: DispatchError = RoutingError::not_found("/ws", RouteKind::WebSocket).into();
        assert_eq!(not_found.close_code(), 4404);

        let invalid: DispatchError = ValidationError::new("room", "x", "uuid").into();
        assert_eq!(invalid.close_code(), 4400);
    }

    #[test]
    fn test_disconnect_detection() {
        assert!(LifecycleError::from(TransportError::Disconnected).is_disconnect());
        assert!(!LifecycleError::NotAccepted { action: "send" }.is_disconnect());
    }
}
