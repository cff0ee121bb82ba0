//! Request context for handlers.
//!
//! Gives a handler access to:
//! - the route and correlation ID of the request
//! - a snapshot of the connection's session attributes
//! - `set_attribute` / `remove_attribute`, forwarded to the connection task
//! - the service container
//! - a cancellation token fired on timeout or disconnect
//!
//! # Example
//!
//! ```ignore
//! async fn login(request: Request, ctx: RequestContext) -> HandlerResult {
//!     ctx.set_attribute("user", "anna");
//!     Ok(Response::ok(json!("welcome")))
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::HandlerError;
use crate::services::ServiceContainer;

/// Change to a connection's session attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Insert or replace an attribute.
    Set(String, String),
    /// Remove an attribute.
    Remove(String),
}

impl SessionUpdate {
    /// Apply this update to an attribute map.
    pub fn apply(self, attributes: &mut HashMap<String, String>) {
        match self {
            SessionUpdate::Set(key, value) => {
                attributes.insert(key, value);
            }
            SessionUpdate::Remove(key) => {
                attributes.remove(&key);
            }
        }
    }
}

/// Context passed to request handlers.
///
/// # Thread Safety
///
/// `RequestContext` is `Clone` and `Send`; handlers run on the worker
/// runtime. The connection's attribute map is never touched from here:
/// writes travel back to the owning connection task over a channel and
/// become visible to requests dispatched after the update is applied.
#[derive(Clone)]
pub struct RequestContext {
    route: String,
    correlation_id: u32,
    connection_id: u64,
    attributes: Arc<HashMap<String, String>>,
    session: Option<mpsc::UnboundedSender<SessionUpdate>>,
    services: ServiceContainer,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Create a detached context (no connection, no services).
    pub fn new(route: impl Into<String>, correlation_id: u32) -> Self {
        Self {
            route: route.into(),
            correlation_id,
            connection_id: 0,
            attributes: Arc::new(HashMap::new()),
            session: None,
            services: ServiceContainer::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the connection this request arrived on.
    pub fn with_connection(
        mut self,
        connection_id: u64,
        attributes: Arc<HashMap<String, String>>,
        session: mpsc::UnboundedSender<SessionUpdate>,
    ) -> Self {
        self.connection_id = connection_id;
        self.attributes = attributes;
        self.session = Some(session);
        self
    }

    /// Attach the service container.
    pub fn with_services(mut self, services: ServiceContainer) -> Self {
        self.services = services;
        self
    }

    /// Use the given cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Route key of the request.
    #[inline]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Correlation ID of the request.
    #[inline]
    pub fn correlation_id(&self) -> u32 {
        self.correlation_id
    }

    /// ID of the connection the request arrived on (0 if detached).
    #[inline]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Session attribute as of dispatch time.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// All session attributes as of dispatch time.
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Set a session attribute on the owning connection.
    ///
    /// Returns `false` if the connection is gone (or the context is detached).
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        self.send_update(SessionUpdate::Set(key.into(), value.into()))
    }

    /// Remove a session attribute on the owning connection.
    pub fn remove_attribute(&self, key: impl Into<String>) -> bool {
        self.send_update(SessionUpdate::Remove(key.into()))
    }

    fn send_update(&self, update: SessionUpdate) -> bool {
        match &self.session {
            Some(tx) => tx.send(update).is_ok(),
            None => false,
        }
    }

    /// The service container.
    pub fn services(&self) -> &ServiceContainer {
        &self.services
    }

    /// Resolve a bound service, failing the request if it is missing.
    pub fn service<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, HandlerError> {
        Ok(self.services.require::<T>()?)
    }

    /// Token cancelled when the request times out or its connection closes.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Shorthand for `cancellation().is_cancelled()`.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("route", &self.route)
            .field("correlation_id", &self.correlation_id)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creation() {
        let ctx = RequestContext::new("echo", 42);
        assert_eq!(ctx.route(), "echo");
        assert_eq!(ctx.correlation_id(), 42);
        assert_eq!(ctx.connection_id(), 0);
        assert!(ctx.attributes().is_empty());
    }

    #[test]
    fn test_detached_session_updates_are_dropped() {
        let ctx = RequestContext::new("echo", 1);
        assert!(!ctx.set_attribute("user", "anna"));
        assert!(!ctx.remove_attribute("user"));
    }

    #[tokio::test]
    async fn test_session_updates_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut snapshot = HashMap::new();
        snapshot.insert("lang".to_string(), "ca".to_string());

        let ctx = RequestContext::new("login", 7).with_connection(3, Arc::new(snapshot), tx);

        assert_eq!(ctx.attribute("lang"), Some("ca"));
        assert!(ctx.set_attribute("user", "anna"));
        assert!(ctx.remove_attribute("lang"));

        assert_eq!(
            rx.recv().await,
            Some(SessionUpdate::Set("user".to_string(), "anna".to_string()))
        );
        assert_eq!(rx.recv().await, Some(SessionUpdate::Remove("lang".to_string())));
        // Snapshot is unaffected until the connection applies the update.
        assert_eq!(ctx.attribute("lang"), Some("ca"));
    }

    #[test]
    fn test_session_update_apply() {
        let mut attributes = HashMap::new();
        SessionUpdate::Set("a".to_string(), "1".to_string()).apply(&mut attributes);
        SessionUpdate::Set("a".to_string(), "2".to_string()).apply(&mut attributes);
        assert_eq!(attributes.get("a").map(String::as_str), Some("2"));

        SessionUpdate::Remove("a".to_string()).apply(&mut attributes);
        assert!(attributes.is_empty());
    }

    #[test]
    fn test_update_after_connection_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let ctx = RequestContext::new("x", 1).with_connection(1, Arc::default(), tx);
        assert!(!ctx.set_attribute("k", "v"));
    }

    #[test]
    fn test_cancellation_shared_with_clones() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new("slow", 1).with_cancellation(token.clone());
        let clone = ctx.clone();

        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(clone.cancellation().is_cancelled());
    }

    #[test]
    fn test_missing_service_is_handler_failure() {
        #[derive(Debug)]
        struct Missing;
        let ctx = RequestContext::new("x", 1);
        let err = ctx.service::<Missing>().unwrap_err();
        assert_eq!(err.code(), crate::codec::ErrorCode::HandlerFailure);
    }
}
