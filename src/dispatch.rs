//! Dispatcher: route lookup, handler invocation, timeout.
//!
//! Handlers run on the worker runtime, never on the I/O threads. The
//! dispatcher awaits the worker task under the per-request timeout; on
//! expiry it cancels the request's token and answers 504 immediately while
//! the handler keeps running in the background until it notices the
//! cancellation or completes. Its result is then dropped.

use std::time::Duration;

use tokio::runtime::Handle;

use crate::codec::{ErrorCode, Request, Response};
use crate::handler::{RequestContext, ServiceRegistry};

/// Routes requests to handlers and converts every outcome to a response.
#[derive(Clone)]
pub struct Dispatcher {
    registry: ServiceRegistry,
    workers: Handle,
    request_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher spawning handlers onto `workers`.
    pub fn new(registry: ServiceRegistry, workers: Handle, request_timeout: Duration) -> Self {
        Self {
            registry,
            workers,
            request_timeout,
        }
    }

    /// The route table.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Dispatch one request. Always yields exactly one response carrying the
    /// request's correlation ID.
    pub async fn dispatch(&self, request: Request, ctx: RequestContext) -> Response {
        let correlation_id = request.correlation_id;
        let route = request.route.clone();

        let handler = match self.registry.resolve(&route) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::debug!(route = %route, correlation_id, "Route not found");
                return Response::error(ErrorCode::RouteNotFound, e.to_string())
                    .with_correlation(correlation_id);
            }
        };

        let cancel = ctx.cancellation().clone();
        let task = self.workers.spawn(handler.call(request, ctx));

        let response = match tokio::time::timeout(self.request_timeout, task).await {
            Ok(Ok(Ok(response))) => response,
            Ok(Ok(Err(e))) => {
                tracing::warn!(route = %route, correlation_id, error = %e, "Handler returned error");
                e.into_response()
            }
            Ok(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    "handler panicked"
                } else {
                    "handler was cancelled"
                };
                tracing::error!(route = %route, correlation_id, "Handler task failed: {}", message);
                Response::error(ErrorCode::HandlerFailure, message)
            }
            Err(_) => {
                cancel.cancel();
                tracing::warn!(
                    route = %route,
                    correlation_id,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Handler timed out"
                );
                Response::error(
                    ErrorCode::Timeout,
                    format!(
                        "route '{}' did not complete within {} ms",
                        route,
                        self.request_timeout.as_millis()
                    ),
                )
            }
        };

        response.with_correlation(correlation_id)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
