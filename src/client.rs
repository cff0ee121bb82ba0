//! Async client for the wire protocol.
//!
//! Assigns correlation IDs, writes request frames through a writer task and
//! matches response frames back to the waiting callers, so any number of
//! requests may be outstanding on one connection.
//!
//! ```ignore
//! let client = WireClient::connect(addr).await?;
//! let response = client.call("echo", json!("hi")).await?;
//! assert_eq!(response.status, 200);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec::{Decoded, Request, Response, WireCodec};
use crate::error::{Result, ServerError};
use crate::protocol::{DEFAULT_MAX_PAYLOAD_SIZE, UNCORRELATED};
use crate::transport::{spawn_writer, WriterConfig, WriterHandle};

/// Waiting callers by correlation ID. `None` once the reader has stopped.
type Pending = Arc<Mutex<Option<HashMap<u32, oneshot::Sender<Response>>>>>;

/// Removes a caller's entry when its `send` finishes or is dropped.
struct PendingEntry<'a> {
    pending: &'a Pending,
    id: u32,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if let Some(map) = self.pending.lock().as_mut() {
            map.remove(&self.id);
        }
    }
}

/// A connection to a wire-protocol server.
pub struct WireClient {
    writer: WriterHandle,
    pending: Pending,
    next_id: AtomicU32,
    reader_task: JoinHandle<()>,
}

impl WireClient {
    /// Connect to `addr`, accepting responses up to the default 1 MiB.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::connect_with_max_payload(addr, DEFAULT_MAX_PAYLOAD_SIZE).await
    }

    /// Connect to `addr`, accepting response payloads up to `max_payload` bytes.
    pub async fn connect_with_max_payload<A: ToSocketAddrs>(addr: A, max_payload: u32) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let (writer, _writer_task) = spawn_writer(write_half, WriterConfig::default());
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let codec = WireCodec::with_max_payload(max_payload);
        let reader_task = tokio::spawn(read_loop(read_half, codec, Arc::clone(&pending)));

        Ok(Self {
            writer,
            pending,
            next_id: AtomicU32::new(1),
            reader_task,
        })
    }

    /// Send `request` and wait for its response.
    ///
    /// # Errors
    ///
    /// [`ServerError::ConnectionClosed`] if the connection has ended or
    /// ends before the response arrives.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let id = self.next_correlation();
        let frame = WireCodec::encode_request(id, &request)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            let Some(map) = pending.as_mut() else {
                return Err(ServerError::ConnectionClosed);
            };
            map.insert(id, tx);
        }
        let _entry = PendingEntry {
            pending: &self.pending,
            id,
        };

        self.writer.send(frame).await?;
        rx.await.map_err(|_| ServerError::ConnectionClosed)
    }

    /// Shorthand for a request with only a route and a body.
    pub async fn call(&self, route: &str, body: Value) -> Result<Response> {
        self.send(Request::new(route).with_body(body)).await
    }

    /// Requests sent but not yet answered.
    pub fn outstanding(&self) -> usize {
        self.pending.lock().as_ref().map_or(0, HashMap::len)
    }

    /// False once the connection has ended.
    pub fn is_connected(&self) -> bool {
        self.pending.lock().is_some()
    }

    fn next_correlation(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != UNCORRELATED {
                return id;
            }
        }
    }
}

impl Drop for WireClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop(mut reader: OwnedReadHalf, mut codec: WireCodec, pending: Pending) {
    let mut buf = vec![0u8; 16 * 1024];

    'read: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "Client read failed");
                break;
            }
        };

        let mut decoded = codec.decode_response(&buf[..n]);
        loop {
            match decoded {
                Ok(Decoded::Message(response)) => deliver(&pending, response),
                Ok(Decoded::Incomplete) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Undecodable response, closing client");
                    break 'read;
                }
            }
            decoded = codec.next_response();
        }
    }

    // Dropping the senders wakes every waiter with ConnectionClosed, and
    // later sends fail fast.
    pending.lock().take();
}

fn deliver(pending: &Pending, response: Response) {
    let id = response.correlation_id;
    let waiter = pending.lock().as_mut().and_then(|map| map.remove(&id));
    match waiter {
        Some(tx) => {
            let _ = tx.send(response);
        }
        None => tracing::warn!(
            correlation_id = id,
            status = response.status,
            "Response for unknown request"
        ),
    }
}
