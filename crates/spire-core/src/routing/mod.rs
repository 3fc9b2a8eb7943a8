//! Route definitions, path patterns and the router.

pub mod path;
pub mod route;
pub mod router;

pub use path::{ParamKind, ParamValue, PathParams, PathPattern, Segment, split_path};
pub use route::{
    BoxFuture, HttpHandler, Method, RawHandler, Route, RouteHandler, RouteKind, WebSocketHandler,
};
pub use router::{RouteMatch, Router, RouterService};
