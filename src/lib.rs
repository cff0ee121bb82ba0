//! # aonbas-server
//!
//! Request-dispatching network server core.
//!
//! Clients open TCP connections and send length-prefixed frames carrying
//! JSON requests. Each request names a route; the dispatcher runs the
//! handler registered for it on a worker runtime and the response goes back
//! on the same connection, tagged with the request's correlation ID.
//!
//! ## Architecture
//!
//! - **Wire codec** ([`codec`], [`protocol`]): framing and JSON messages
//! - **Connection manager** ([`transport`]): accept loop, per-connection
//!   state, outbound queue, orderly shutdown
//! - **Service registry** ([`handler`], [`services`]): route table and the
//!   shared services handlers depend on
//! - **Dispatcher** ([`dispatch`]): timeout, panic isolation, error mapping
//! - **Outbound client** ([`upstream`]): pooled HTTP with retry
//! - **Schema registry** ([`schema`]): machine-readable route descriptions
//!
//! ## Example
//!
//! ```ignore
//! use aonbas_server::{RegistryBuilder, Response, RouteShape, Server};
//!
//! #[tokio::main]
//! async fn main() -> aonbas_server::Result<()> {
//!     let mut routes = RegistryBuilder::new();
//!     routes.route("echo", RouteShape::any(), |request, _ctx| async move {
//!         Ok(Response::ok(request.body))
//!     })?;
//!
//!     let server = Server::builder().registry(routes.build()).bind().await?;
//!     server.run_until(tokio::signal::ctrl_c()).await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod schema;
pub mod server;
pub mod services;
pub mod telemetry;
pub mod transit;
pub mod transport;
pub mod upstream;

pub use client::WireClient;
pub use codec::{ErrorCode, Request, Response};
pub use config::ServerConfig;
pub use dispatch::Dispatcher;
pub use error::{Result, ServerError};
pub use handler::{HandlerError, RegistryBuilder, RequestContext, ServiceRegistry};
pub use schema::{RouteShape, SchemaRegistry};
pub use server::{Server, ServerBuilder, ServerSettings};
pub use services::ServiceContainer;
pub use transport::ShutdownReport;
pub use upstream::{UpstreamClient, UpstreamError};
