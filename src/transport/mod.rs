//! Connection handling over TCP.
//!
//! - [`listener`]: accept loop, live-connection set, orderly shutdown
//! - [`connection`]: per-connection decode/dispatch/encode loop
//! - [`writer`]: per-connection outbound queue with batched writes
//! - [`backpressure`]: pending-frame accounting for the writer

pub mod backpressure;
pub(crate) mod connection;
pub mod listener;
pub mod writer;

pub use backpressure::Backpressure;
pub use connection::{ConnectionSettings, DEFAULT_MAX_IN_FLIGHT};
pub(crate) use connection::ConnectionShared;
pub use listener::{ConnectionManager, ShutdownReport};
pub use writer::{spawn_writer, WriterConfig, WriterHandle};
