//! Connection scope.
//!
//! The [`Scope`] is the connection-level context handed to every lifecycle:
//! protocol, path, method, headers and, after routing, the bound path
//! parameters and the matched route.

use std::fmt;
use std::sync::Arc;

use percent_encoding::percent_decode_str;

use super::io::ConnectionIo;
use crate::routing::{Method, PathParams, Route};

/// The protocol of an incoming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// HTTP request/response.
    Http,
    /// WebSocket.
    WebSocket,
    /// Server lifespan events.
    Lifespan,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http => "http",
            Self::WebSocket => "websocket",
            Self::Lifespan => "lifespan",
        })
    }
}

/// Request headers with lower-cased names, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Creates an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header; the name is lower-cased.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
    }

    /// First value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Connection-level context.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Connection protocol.
    pub protocol: Protocol,
    /// Request path, not decoded.
    pub path: String,
    /// HTTP method (`GET` for WebSocket handshakes).
    pub method: Method,
    /// Request headers.
    pub headers: Headers,
    /// Raw query string, without the leading `?`.
    pub query_string: String,
    /// Peer address, when known.
    pub remote_addr: Option<String>,
    /// Typed path parameters, filled in by the router.
    pub path_params: PathParams,
    /// The matched route, filled in by the router.
    pub route: Option<Arc<Route>>,
}

impl Scope {
    fn new(protocol: Protocol, method: Method, path: impl Into<String>) -> Self {
        Self {
            protocol,
            path: path.into(),
            method,
            headers: Headers::new(),
            query_string: String::new(),
            remote_addr: None,
            path_params: PathParams::default(),
            route: None,
        }
    }

    /// Scope for an HTTP request.
    pub fn http(method: Method, path: impl Into<String>) -> Self {
        Self::new(Protocol::Http, method, path)
    }

    /// Scope for a WebSocket handshake.
    pub fn websocket(path: impl Into<String>) -> Self {
        Self::new(Protocol::WebSocket, Method::Get, path)
    }

    /// Scope for the lifespan channel.
    pub fn lifespan() -> Self {
        Self::new(Protocol::Lifespan, Method::Get, "")
    }

    /// Sets the headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the raw query string.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = query.into();
        self
    }

    /// Sets the peer address.
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Decoded query parameters in order. `+` decodes to a space.
    pub fn query_params(&self) -> Vec<(String, String)> {
        self.query_string
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (decode_query(key), decode_query(value))
            })
            .collect()
    }

    /// First query parameter named `name`.
    pub fn query(&self, name: &str) -> Option<String> {
        self.query_params()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }
}

fn decode_query(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// An incoming connection: its scope plus the I/O to drive it.
#[derive(Debug)]
pub struct Connection {
    /// Connection context.
    pub scope: Scope,
    /// Event I/O.
    pub io: ConnectionIo,
}

impl Connection {
    /// Creates a connection.
    pub fn new(scope: Scope, io: ConnectionIo) -> Self {
        Self { scope, io }
    }
}
