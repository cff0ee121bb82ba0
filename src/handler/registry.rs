//! Route registry: route key to handler.
//!
//! Routes are registered on a [`RegistryBuilder`] at startup and frozen into
//! a [`ServiceRegistry`]. The frozen registry is an `Arc`'d map, so
//! resolution from many dispatch tasks needs no locking.
//!
//! # Example
//!
//! ```
//! use aonbas_server::codec::Response;
//! use aonbas_server::handler::RegistryBuilder;
//! use aonbas_server::schema::RouteShape;
//!
//! let mut builder = RegistryBuilder::new();
//! builder
//!     .route("echo", RouteShape::any(), |request, _ctx| async move {
//!         Ok(Response::ok(request.body))
//!     })
//!     .unwrap();
//!
//! let registry = builder.build();
//! assert!(registry.resolve("echo").is_ok());
//! assert!(registry.resolve("nope").is_err());
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::{HandlerError, RequestContext};
use crate::codec::{JsonCodec, Request, Response};
use crate::error::{Result, ServerError};
use crate::schema::RouteShape;

/// Result type for handler functions.
pub type HandlerResult = std::result::Result<Response, HandlerError>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Handle a decoded request.
    fn call(&self, request: Request, ctx: RequestContext) -> BoxFuture<'static, HandlerResult>;
}

/// Handler over the raw [`Request`].
pub struct FnHandler<F, Fut>
where
    F: Fn(Request, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(Request, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Wrap a closure.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(Request, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: Request, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(request, ctx))
    }
}

/// Wrapper that deserializes the body into `T` and serializes the output
/// into a 200 response.
///
/// A body that does not fit `T` yields 400 `BAD_REQUEST`.
pub struct TypedHandler<F, T, O, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<O, HandlerError>> + Send + 'static,
{
    handler: Arc<F>,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, O, Fut> TypedHandler<F, T, O, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<O, HandlerError>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _phantom: PhantomData,
        }
    }
}

impl<F, T, O, Fut> Handler for TypedHandler<F, T, O, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<O, HandlerError>> + Send + 'static,
{
    fn call(&self, request: Request, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            let input: T = JsonCodec::from_value(request.body)
                .map_err(|e| HandlerError::BadRequest(e.to_string()))?;
            let output = handler(input, ctx).await?;
            Ok(Response::ok(JsonCodec::to_value(&output)?))
        })
    }
}

/// Lookup miss on [`ServiceRegistry::resolve`].
#[derive(Debug, Error)]
#[error("no handler registered for route '{0}'")]
pub struct RouteNotFound(pub String);

struct RouteEntry {
    handler: Arc<dyn Handler>,
    shape: RouteShape,
}

/// Startup-time route table.
#[derive(Default)]
pub struct RegistryBuilder {
    routes: HashMap<String, RouteEntry>,
    order: Vec<String>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `route`.
    ///
    /// # Errors
    ///
    /// [`ServerError::EmptyRoute`] for an empty key and
    /// [`ServerError::DuplicateRoute`] if the key is already taken.
    pub fn register<H: Handler>(
        &mut self,
        route: &str,
        shape: RouteShape,
        handler: H,
    ) -> Result<&mut Self> {
        if route.is_empty() {
            return Err(ServerError::EmptyRoute);
        }
        if self.routes.contains_key(route) {
            return Err(ServerError::DuplicateRoute(route.to_string()));
        }

        self.routes.insert(
            route.to_string(),
            RouteEntry {
                handler: Arc::new(handler),
                shape,
            },
        );
        self.order.push(route.to_string());
        Ok(self)
    }

    /// Register a closure over the raw request.
    pub fn route<F, Fut>(&mut self, route: &str, shape: RouteShape, handler: F) -> Result<&mut Self>
    where
        F: Fn(Request, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(route, shape, FnHandler::new(handler))
    }

    /// Register a closure over a typed body.
    pub fn typed<F, T, O, Fut>(
        &mut self,
        route: &str,
        shape: RouteShape,
        handler: F,
    ) -> Result<&mut Self>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<O, HandlerError>> + Send + 'static,
    {
        self.register(route, shape, TypedHandler::new(handler))
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True if no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Freeze the table.
    pub fn build(self) -> ServiceRegistry {
        ServiceRegistry {
            routes: Arc::new(self.routes),
            order: Arc::new(self.order),
        }
    }
}

/// Frozen route table, cheap to clone and safe to share.
#[derive(Clone)]
pub struct ServiceRegistry {
    routes: Arc<HashMap<String, RouteEntry>>,
    order: Arc<Vec<String>>,
}

impl ServiceRegistry {
    /// Exact-match lookup.
    pub fn resolve(&self, route: &str) -> std::result::Result<Arc<dyn Handler>, RouteNotFound> {
        self.routes
            .get(route)
            .map(|entry| Arc::clone(&entry.handler))
            .ok_or_else(|| RouteNotFound(route.to_string()))
    }

    /// Registered routes with their shapes, in registration order.
    pub fn shapes(&self) -> impl Iterator<Item = (&str, &RouteShape)> + '_ {
        self.order.iter().filter_map(move |route| {
            self.routes
                .get(route)
                .map(|entry| (route.as_str(), &entry.shape))
        })
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True if no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("routes", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn echo_builder() -> RegistryBuilder {
        let mut builder = RegistryBuilder::new();
        builder
            .route("echo", RouteShape::any(), |request, _ctx| async move {
                Ok(Response::ok(request.body))
            })
            .unwrap();
        builder
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = echo_builder().build();

        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("echo").is_ok());
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let mut builder = echo_builder();
        let result = builder.route("echo", RouteShape::any(), |_request, _ctx| async move {
            Ok(Response::ok(json!(null)))
        });

        assert!(matches!(result, Err(ServerError::DuplicateRoute(route)) if route == "echo"));
    }

    #[test]
    fn test_empty_route_rejected() {
        let mut builder = RegistryBuilder::new();
        let result = builder.route("", RouteShape::any(), |_request, _ctx| async move {
            Ok(Response::ok(json!(null)))
        });

        assert!(matches!(result, Err(ServerError::EmptyRoute)));
        assert!(builder.is_empty());
    }

    #[test]
    fn test_route_not_found() {
        let registry = echo_builder().build();
        let err = registry.resolve("Echo").err().unwrap();

        assert_eq!(err.to_string(), "no handler registered for route 'Echo'");
    }

    #[test]
    fn test_shapes_in_registration_order() {
        let mut builder = RegistryBuilder::new();
        for route in ["zeta", "alpha", "mid"] {
            builder
                .route(route, RouteShape::any(), |_r, _c| async { Ok(Response::ok(json!(1))) })
                .unwrap();
        }

        let registry = builder.build();
        let routes: Vec<&str> = registry.shapes().map(|(route, _)| route).collect();
        assert_eq!(routes, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn test_fn_handler_call() {
        let registry = echo_builder().build();
        let handler = registry.resolve("echo").unwrap();

        let request = Request::new("echo").with_body(json!("hi"));
        let response = handler.call(request, RequestContext::new("echo", 1)).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!("hi"));
    }

    #[derive(Deserialize)]
    struct Sum {
        a: i64,
        b: i64,
    }

    fn sum_registry() -> ServiceRegistry {
        let mut builder = RegistryBuilder::new();
        builder
            .typed("sum", RouteShape::any(), |input: Sum, _ctx| async move {
                Ok::<_, HandlerError>(json!({ "total": input.a + input.b }))
            })
            .unwrap();
        builder.build()
    }

    #[tokio::test]
    async fn test_typed_handler_success() {
        let handler = sum_registry().resolve("sum").unwrap();
        let request = Request::new("sum").with_body(json!({"a": 2, "b": 3}));

        let response = handler.call(request, RequestContext::new("sum", 1)).await.unwrap();
        assert_eq!(response.body, json!({"total": 5}));
    }

    #[tokio::test]
    async fn test_typed_handler_bad_body() {
        let handler = sum_registry().resolve("sum").unwrap();
        let request = Request::new("sum").with_body(json!({"a": "two"}));

        let err = handler
            .call(request, RequestContext::new("sum", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::BadRequest(_)));
        assert_eq!(err.into_response().status, 400);
    }
}
