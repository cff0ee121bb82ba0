//! Handler module - route registration and handler invocation.
//!
//! Provides:
//! - [`RegistryBuilder`] / [`ServiceRegistry`] - maps route keys to handlers
//! - [`RequestContext`] - session, services and cancellation for a request
//! - [`HandlerError`] - failures converted to error responses
//!
//! # Example
//!
//! ```ignore
//! use aonbas_server::handler::RegistryBuilder;
//! use aonbas_server::schema::RouteShape;
//!
//! let mut builder = RegistryBuilder::new();
//!
//! // Raw handler over the whole request
//! builder.route("echo", RouteShape::any(), |request, _ctx| async move {
//!     Ok(Response::ok(request.body))
//! })?;
//!
//! // Typed handler: body deserialized into `StationQuery`
//! builder.typed("metro.trains", RouteShape::any(), |query: StationQuery, ctx| async move {
//!     ctx.service::<MetroService>()?.trains(&query.station).await
//! })?;
//!
//! let registry = builder.build();
//! ```

mod context;
mod error;
mod registry;

pub use context::{RequestContext, SessionUpdate};
pub use error::HandlerError;
pub use registry::{
    BoxFuture, FnHandler, Handler, HandlerResult, RegistryBuilder, RouteNotFound, ServiceRegistry,
    TypedHandler,
};
