//! Per-connection decode, dispatch and encode cycle.
//!
//! Each connection is one task on the I/O runtime. It owns the read half,
//! the decode buffer and the session attributes. Requests are dispatched
//! as separate tasks that report back over a channel, so the loop keeps
//! reading while handlers run. Responses are written in completion order
//! when pipelining is on, and in request order otherwise.
//!
//! At most `max_in_flight` requests per connection are between decode and
//! write. At the limit the loop stops reading, so the peer sees TCP
//! backpressure. A read EOF only ends the inbound side: responses for
//! requests already received are still written before the connection closes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::writer::{spawn_writer, WriterConfig, WriterHandle};
use crate::codec::{DecodeError, Decoded, ErrorCode, Request, Response, WireCodec};
use crate::dispatch::Dispatcher;
use crate::handler::{RequestContext, SessionUpdate};
use crate::protocol::{DEFAULT_MAX_PAYLOAD_SIZE, UNCORRELATED};
use crate::services::ServiceContainer;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Default limit of requests per connection awaiting a written response.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 256;

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Largest accepted payload.
    pub max_frame_bytes: u32,
    /// Completion-order (true) or request-order (false) responses.
    pub pipelining: bool,
    /// Requests decoded but not yet answered before reading pauses.
    pub max_in_flight: usize,
    /// Outbound queue settings.
    pub writer: WriterConfig,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_PAYLOAD_SIZE,
            pipelining: true,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            writer: WriterConfig::default(),
        }
    }
}

/// State shared by every connection of a server.
pub(crate) struct ConnectionShared {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) services: ServiceContainer,
    pub(crate) settings: ConnectionSettings,
    /// Cancelled when orderly shutdown begins.
    pub(crate) draining: CancellationToken,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    PeerClosed,
    ReadError,
    WriteFailed,
    DecodeError,
    Drained,
}

struct Completed {
    seq: u64,
    response: Response,
}

/// Responses waiting for their turn when pipelining is off.
#[derive(Default)]
struct ResponseOrder {
    next: u64,
    parked: BTreeMap<u64, Response>,
}

impl ResponseOrder {
    /// Accept a completion and return every response now ready to send.
    fn complete(&mut self, seq: u64, response: Response) -> Vec<Response> {
        self.parked.insert(seq, response);
        let mut ready = Vec::new();
        while let Some(response) = self.parked.remove(&self.next) {
            ready.push(response);
            self.next += 1;
        }
        ready
    }
}

struct Connection {
    id: u64,
    shared: Arc<ConnectionShared>,
    writer: WriterHandle,
    attributes: HashMap<String, String>,
    snapshot: Arc<HashMap<String, String>>,
    session_tx: mpsc::UnboundedSender<SessionUpdate>,
    done_tx: mpsc::UnboundedSender<Completed>,
    requests: CancellationToken,
    order: ResponseOrder,
    next_seq: u64,
    /// Started requests whose response is not yet queued for writing.
    in_flight: usize,
    max_in_flight: usize,
}

/// Serve one connection until the peer leaves, a fatal error occurs, or
/// the server finishes draining.
pub(crate) async fn serve<S>(id: u64, stream: S, shared: Arc<ConnectionShared>) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, write_half) = tokio::io::split(stream);
    let (writer, writer_task) = spawn_writer(write_half, shared.settings.writer.clone());
    let (session_tx, mut session_rx) = mpsc::unbounded_channel();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    // Cancels every request context of this connection, including on abort.
    let requests = CancellationToken::new();
    let _requests_guard = requests.clone().drop_guard();

    let mut codec = WireCodec::with_max_payload(shared.settings.max_frame_bytes);
    let mut conn = Connection {
        id,
        shared: Arc::clone(&shared),
        writer,
        attributes: HashMap::new(),
        snapshot: Arc::new(HashMap::new()),
        session_tx,
        done_tx,
        requests,
        order: ResponseOrder::default(),
        next_seq: 0,
        in_flight: 0,
        max_in_flight: shared.settings.max_in_flight.max(1),
    };

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut draining = false;
    let mut read_closed = false;

    tracing::debug!(connection_id = id, "Connection opened");

    let reason = loop {
        if conn.in_flight == 0 {
            if read_closed {
                break CloseReason::PeerClosed;
            }
            if draining {
                break CloseReason::Drained;
            }
        }

        tokio::select! {
            biased;

            Some(update) = session_rx.recv() => conn.apply_session(update),

            Some(done) = done_rx.recv() => {
                if !conn.complete(done).await {
                    break CloseReason::WriteFailed;
                }
                // Frames held back at the limit.
                if let Err(reason) = conn.resume(&mut codec, draining).await {
                    break reason;
                }
            }

            _ = shared.draining.cancelled(), if !draining => {
                tracing::debug!(connection_id = id, in_flight = conn.in_flight, "Draining connection");
                draining = true;
            }

            read = reader.read(&mut buf), if !read_closed && conn.has_capacity() => {
                let n = match read {
                    Ok(0) => {
                        tracing::debug!(connection_id = id, in_flight = conn.in_flight, "Peer finished sending");
                        read_closed = true;
                        continue;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!(connection_id = id, error = %e, "Read failed");
                        break CloseReason::ReadError;
                    }
                };

                if let Err(reason) = conn.feed(&mut codec, &buf[..n], draining).await {
                    break reason;
                }
            }
        }
    };

    if conn.in_flight > 0 {
        tracing::debug!(
            connection_id = id,
            discarded = conn.in_flight,
            "Closing with requests in flight"
        );
    }

    // Dropping the last handle lets the writer flush and shut down.
    drop(conn);
    match reason {
        CloseReason::ReadError | CloseReason::WriteFailed => {
            writer_task.abort();
        }
        CloseReason::PeerClosed | CloseReason::DecodeError | CloseReason::Drained => {
            let _ = writer_task.await;
        }
    }

    tracing::debug!(connection_id = id, reason = ?reason, "Connection closed");
    reason
}

impl Connection {
    fn has_capacity(&self) -> bool {
        self.in_flight < self.max_in_flight
    }

    /// Buffer `bytes` and start requests until the buffer or the limit runs out.
    async fn feed(
        &mut self,
        codec: &mut WireCodec,
        bytes: &[u8],
        draining: bool,
    ) -> Result<(), CloseReason> {
        let step = codec.decode(bytes);
        self.start_decoded(codec, step, draining).await
    }

    /// Start requests already buffered, if a slot is free.
    async fn resume(&mut self, codec: &mut WireCodec, draining: bool) -> Result<(), CloseReason> {
        if !self.has_capacity() || codec.buffered() == 0 {
            return Ok(());
        }
        let step = codec.next_request();
        self.start_decoded(codec, step, draining).await
    }

    async fn start_decoded(
        &mut self,
        codec: &mut WireCodec,
        mut step: Result<Decoded<Request>, DecodeError>,
        draining: bool,
    ) -> Result<(), CloseReason> {
        loop {
            match step {
                Ok(Decoded::Message(request)) => self.start(request, draining),
                Ok(Decoded::Incomplete) => return Ok(()),
                Err(e) => {
                    tracing::warn!(connection_id = self.id, error = %e, "Malformed frame, closing connection");
                    let response = Response::error(ErrorCode::DecodeError, e.to_string())
                        .with_correlation(UNCORRELATED);
                    let _ = self.writer.send(WireCodec::encode_response(&response)).await;
                    return Err(CloseReason::DecodeError);
                }
            }
            if !self.has_capacity() {
                return Ok(());
            }
            step = codec.next_request();
        }
    }

    fn start(&mut self, request: Request, draining: bool) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight += 1;

        let correlation_id = request.correlation_id;

        if draining {
            let response = Response::error(ErrorCode::ShuttingDown, "server is shutting down")
                .with_correlation(correlation_id);
            let _ = self.done_tx.send(Completed { seq, response });
            return;
        }

        tracing::trace!(
            connection_id = self.id,
            route = %request.route,
            correlation_id,
            "Dispatching request"
        );

        let ctx = RequestContext::new(request.route.clone(), correlation_id)
            .with_connection(self.id, Arc::clone(&self.snapshot), self.session_tx.clone())
            .with_services(self.shared.services.clone())
            .with_cancellation(self.requests.child_token());

        let dispatcher = self.shared.dispatcher.clone();
        let done = self.done_tx.clone();

        tokio::spawn(async move {
            let response = dispatcher.dispatch(request, ctx).await;
            // The connection may be gone; the result is then dropped.
            let _ = done.send(Completed { seq, response });
        });
    }

    /// Handle one finished request. Returns false if the write side failed.
    async fn complete(&mut self, done: Completed) -> bool {
        let ready = if self.shared.settings.pipelining {
            vec![done.response]
        } else {
            self.order.complete(done.seq, done.response)
        };

        for response in ready {
            self.in_flight = self.in_flight.saturating_sub(1);
            tracing::debug!(
                connection_id = self.id,
                correlation_id = response.correlation_id,
                status = response.status,
                "Sending response"
            );
            if let Err(e) = self.writer.send(WireCodec::encode_response(&response)).await {
                tracing::debug!(connection_id = self.id, error = %e, "Failed to queue response");
                return false;
            }
        }
        true
    }

    fn apply_session(&mut self, update: SessionUpdate) {
        update.apply(&mut self.attributes);
        self.snapshot = Arc::new(self.attributes.clone());
    }
}
