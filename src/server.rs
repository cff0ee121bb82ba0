//! Server builder and lifecycle.
//!
//! [`ServerBuilder`] collects the route registry, the service container and
//! the runtime handlers run on. [`Server`] owns the bound listener:
//! 1. Bind the TCP listener
//! 2. Spawn the accept loop on the current (I/O) runtime
//! 3. Serve until a shutdown signal
//! 4. Drain connections within the grace period
//!
//! # Example
//!
//! ```ignore
//! use aonbas_server::{RegistryBuilder, RouteShape, Server, ServerSettings};
//!
//! let mut routes = RegistryBuilder::new();
//! routes.route("echo", RouteShape::any(), |req, _ctx| async move {
//!     Ok(Response::ok(req.body))
//! })?;
//!
//! let server = Server::builder()
//!     .settings(ServerSettings::default())
//!     .registry(routes.build())
//!     .bind()
//!     .await?;
//!
//! server.run_until(tokio::signal::ctrl_c()).await;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::handler::{RegistryBuilder, ServiceRegistry};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::services::ServiceContainer;
use crate::transport::{
    ConnectionManager, ConnectionSettings, ConnectionShared, ShutdownReport, WriterConfig,
    DEFAULT_MAX_IN_FLIGHT,
};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default shutdown grace period.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Settings the server needs at bind time.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Address to bind. Port 0 picks a free port.
    pub listen_addr: SocketAddr,
    /// Upper bound on a single handler invocation.
    pub request_timeout: Duration,
    /// Largest accepted frame payload.
    pub max_frame_bytes: u32,
    /// Write responses as they complete instead of in request order.
    pub pipelining: bool,
    /// Per-connection limit of requests awaiting a response.
    pub max_in_flight: usize,
    /// How long shutdown waits for in-flight work.
    pub shutdown_grace: Duration,
    /// Per-connection outbound queue.
    pub writer: WriterConfig,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_PAYLOAD_SIZE,
            pipelining: true,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            writer: WriterConfig::default(),
        }
    }
}

impl From<&ServerConfig> for ServerSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            listen_addr: config.listen_addr,
            request_timeout: config.request_timeout,
            max_frame_bytes: config.max_frame_bytes,
            pipelining: config.pipelining,
            max_in_flight: config.max_in_flight,
            shutdown_grace: config.shutdown_grace,
            writer: WriterConfig::default(),
        }
    }
}

/// Builder for a [`Server`].
pub struct ServerBuilder {
    settings: ServerSettings,
    registry: Option<ServiceRegistry>,
    services: ServiceContainer,
    workers: Option<Handle>,
}

impl ServerBuilder {
    /// Builder with default settings and no routes.
    pub fn new() -> Self {
        Self {
            settings: ServerSettings::default(),
            registry: None,
            services: ServiceContainer::default(),
            workers: None,
        }
    }

    /// Replace all settings.
    pub fn settings(mut self, settings: ServerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Routes to serve.
    pub fn registry(mut self, registry: ServiceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Services handed to every handler.
    pub fn services(mut self, services: ServiceContainer) -> Self {
        self.services = services;
        self
    }

    /// Runtime handlers run on.
    ///
    /// Default: the runtime that calls [`bind`](Self::bind).
    pub fn workers(mut self, workers: Handle) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.settings.request_timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.settings.shutdown_grace = grace;
        self
    }

    /// Choose completion-order (true) or request-order (false) responses.
    pub fn pipelining(mut self, enabled: bool) -> Self {
        self.settings.pipelining = enabled;
        self
    }

    /// Cap on requests per connection awaiting a response.
    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.settings.max_in_flight = limit;
        self
    }

    /// Bind the listener and start accepting on the current runtime.
    pub async fn bind(self) -> Result<Server> {
        let registry = self
            .registry
            .unwrap_or_else(|| RegistryBuilder::new().build());
        let workers = self.workers.unwrap_or_else(Handle::current);
        let settings = self.settings;

        let listener = TcpListener::bind(settings.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let manager = Arc::new(ConnectionManager::new(ConnectionShared {
            dispatcher: Dispatcher::new(registry, workers, settings.request_timeout),
            services: self.services,
            settings: ConnectionSettings {
                max_frame_bytes: settings.max_frame_bytes,
                pipelining: settings.pipelining,
                max_in_flight: settings.max_in_flight,
                writer: settings.writer.clone(),
            },
            draining: CancellationToken::new(),
        }));
        let accept_task = tokio::spawn(Arc::clone(&manager).run(listener));

        tracing::info!(
            addr = %local_addr,
            pipelining = settings.pipelining,
            "Server listening"
        );

        Ok(Server {
            local_addr,
            manager,
            accept_task,
            shutdown_grace: settings.shutdown_grace,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound, accepting server.
pub struct Server {
    local_addr: SocketAddr,
    manager: Arc<ConnectionManager>,
    accept_task: JoinHandle<()>,
    shutdown_grace: Duration,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently open.
    pub fn live_connections(&self) -> usize {
        self.manager.live_connections()
    }

    /// Serve until `signal` resolves, then shut down.
    pub async fn run_until<F>(self, signal: F) -> ShutdownReport
    where
        F: Future,
    {
        signal.await;
        tracing::info!("Shutdown signal received");
        self.shutdown().await
    }

    /// Stop accepting and drain connections within the grace period.
    pub async fn shutdown(self) -> ShutdownReport {
        let report = self.manager.shutdown(self.shutdown_grace).await;
        if let Err(e) = self.accept_task.await {
            tracing::warn!(error = %e, "Accept loop ended abnormally");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_bind_loopback() {
        let settings = ServerSettings::default();
        assert!(settings.listen_addr.ip().is_loopback());
        assert_eq!(settings.listen_addr.port(), 0);
        assert!(settings.pipelining);
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let server = Server::builder().bind().await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.live_connections(), 0);

        let report = server.shutdown().await;
        assert_eq!(report, ShutdownReport::default());
    }

    #[tokio::test]
    async fn test_run_until_returns_after_signal() {
        let server = Server::builder()
            .shutdown_grace(Duration::from_millis(100))
            .bind()
            .await
            .unwrap();
        let addr = server.local_addr();

        server.run_until(async {}).await;
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
