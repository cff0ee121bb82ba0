//! Accept loop and the set of live connections.
//!
//! The manager owns every connection task. Shutdown stops the accept loop,
//! tells connections to drain, waits up to a grace period for them to
//! finish and aborts whatever is left.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::{serve, ConnectionShared};

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Outcome of [`ConnectionManager::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connections that finished within the grace period.
    pub drained: usize,
    /// Connections aborted when the grace period ran out.
    pub forced: usize,
}

type LiveSet = Arc<Mutex<HashMap<u64, JoinHandle<()>>>>;

/// Accepts client connections and tracks them until they close.
pub struct ConnectionManager {
    shared: Arc<ConnectionShared>,
    accept: CancellationToken,
    next_id: AtomicU64,
    live: LiveSet,
}

impl ConnectionManager {
    pub(crate) fn new(shared: ConnectionShared) -> Self {
        Self {
            shared: Arc::new(shared),
            accept: CancellationToken::new(),
            next_id: AtomicU64::new(1),
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Accept connections until shutdown begins.
    ///
    /// Each connection runs as its own task on the current runtime.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.accept.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    if !self.track(id, stream) {
                        break;
                    }
                    tracing::debug!(connection_id = id, peer = %peer, "Connection accepted");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        tracing::info!("Accept loop stopped");
    }

    /// Spawn the connection task and record it. Returns false (dropping the
    /// stream) once shutdown has begun.
    fn track(&self, id: u64, stream: tokio::net::TcpStream) -> bool {
        let shared = Arc::clone(&self.shared);
        let live = Arc::clone(&self.live);

        // The lock is held across spawn so the task cannot remove itself
        // before it has been inserted.
        let mut set = self.live.lock();
        if self.accept.is_cancelled() {
            return false;
        }
        let task = tokio::spawn(async move {
            let reason = serve(id, stream, shared).await;
            tracing::debug!(connection_id = id, reason = ?reason, "Connection closed");
            live.lock().remove(&id);
        });
        set.insert(id, task);
        true
    }

    /// Connections currently open.
    pub fn live_connections(&self) -> usize {
        self.live.lock().len()
    }

    /// True once shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.accept.is_cancelled()
    }

    /// Orderly shutdown.
    ///
    /// Stops accepting, lets every connection answer its in-flight requests
    /// (new ones get 503) and close, and aborts connections still open after
    /// `grace`.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.accept.cancel();
        self.shared.draining.cancel();

        let mut handles: Vec<JoinHandle<()>> = {
            let mut set = self.live.lock();
            set.drain().map(|(_, handle)| handle).collect()
        };
        tracing::info!(
            connections = handles.len(),
            grace_ms = grace.as_millis() as u64,
            "Draining connections"
        );

        let drain = futures::future::join_all(handles.iter_mut());
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!(?grace, "Grace period elapsed, closing remaining connections");
        }

        let mut report = ShutdownReport::default();
        for handle in handles {
            if handle.is_finished() {
                report.drained += 1;
            } else {
                handle.abort();
                report.forced += 1;
            }
        }

        tracing::info!(drained = report.drained, forced = report.forced, "Shutdown complete");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Decoded, Request, Response, WireCodec};
    use crate::dispatch::Dispatcher;
    use crate::handler::RegistryBuilder;
    use crate::schema::RouteShape;
    use crate::services::ServiceContainer;
    use crate::transport::ConnectionSettings;
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::runtime::Handle;

    async fn start() -> (Arc<ConnectionManager>, SocketAddr, JoinHandle<()>) {
        let mut builder = RegistryBuilder::new();
        builder
            .route("sleep", RouteShape::any(), |request, _ctx| async move {
                let ms = request.body.as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Response::ok(json!(ms)))
            })
            .unwrap();

        let manager = Arc::new(ConnectionManager::new(ConnectionShared {
            dispatcher: Dispatcher::new(builder.build(), Handle::current(), Duration::from_secs(30)),
            services: ServiceContainer::default(),
            settings: ConnectionSettings::default(),
            draining: CancellationToken::new(),
        }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(Arc::clone(&manager).run(listener));
        (manager, addr, accept)
    }

    async fn wait_for_live(manager: &ConnectionManager, expected: usize) {
        for _ in 0..100 {
            if manager.live_connections() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {expected} live connections, got {}", manager.live_connections());
    }

    #[tokio::test]
    async fn test_tracks_and_forgets_connections() {
        let (manager, addr, _accept) = start().await;

        let first = TcpStream::connect(addr).await.unwrap();
        let _second = TcpStream::connect(addr).await.unwrap();
        wait_for_live(&manager, 2).await;

        drop(first);
        wait_for_live(&manager, 1).await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_idle_connections() {
        let (manager, addr, accept) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_for_live(&manager, 1).await;

        let report = manager.shutdown(Duration::from_secs(2)).await;
        assert_eq!(report, ShutdownReport { drained: 1, forced: 0 });
        accept.await.unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_request() {
        let (manager, addr, _accept) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let request = Request::new("sleep").with_body(json!(100));
        client
            .write_all(&WireCodec::encode_request(5, &request).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = manager.shutdown(Duration::from_secs(5)).await;
        assert_eq!(report.drained, 1);

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        let mut codec = WireCodec::new();
        match codec.decode_response(&buf).unwrap() {
            Decoded::Message(response) => {
                assert_eq!(response.status, 200);
                assert_eq!(response.correlation_id, 5);
            }
            Decoded::Incomplete => panic!("no response before close"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_forces_slow_connections() {
        let (manager, addr, _accept) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let request = Request::new("sleep").with_body(json!(10_000));
        client
            .write_all(&WireCodec::encode_request(1, &request).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = manager.shutdown(Duration::from_millis(50)).await;
        assert_eq!(report, ShutdownReport { drained: 0, forced: 1 });
        assert!(manager.is_shutting_down());
    }
}
