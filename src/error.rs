//! Error types for aonbas-server.
//!
//! Each layer has its own error enum. [`ServerError`] covers startup and
//! transport failures; request-level failures are expressed as
//! [`HandlerError`](crate::handler::HandlerError) and converted to error
//! responses before they reach the wire.

use thiserror::Error;

use crate::codec::DecodeError;
use crate::config::ConfigError;
use crate::telemetry::TelemetryError;

/// Main error type for server startup and transport operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error on a socket or listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error while encoding an outbound frame.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed inbound frame.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Invalid or missing configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Logging could not be initialised.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// Two handlers were registered under the same route key.
    #[error("route '{0}' is already registered")]
    DuplicateRoute(String),

    /// Route keys must be non-empty.
    #[error("route key must not be empty")]
    EmptyRoute,

    /// Two instances were bound for the same service type.
    #[error("service '{0}' is already bound")]
    DuplicateService(&'static str),

    /// A required service was never bound.
    #[error("service '{0}' is not bound")]
    MissingService(&'static str),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using ServerError.
pub type Result<T> = std::result::Result<T, ServerError>;
