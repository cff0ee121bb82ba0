//! Codec module - request/response messages and their wire encoding.
//!
//! - [`Request`] / [`Response`] - immutable message values
//! - [`JsonCodec`] - JSON payload serialization via `serde_json`
//! - [`WireCodec`] - resumable frame decoder and deterministic encoder
//!
//! # Example
//!
//! ```
//! use aonbas_server::codec::{Decoded, Request, WireCodec};
//! use serde_json::json;
//!
//! let request = Request::new("echo").with_body(json!("hi"));
//! let bytes = WireCodec::encode_request(7, &request).unwrap();
//!
//! let mut codec = WireCodec::new();
//! match codec.decode(&bytes).unwrap() {
//!     Decoded::Message(decoded) => assert_eq!(decoded.route, "echo"),
//!     Decoded::Incomplete => unreachable!(),
//! }
//! ```

mod json;
mod message;
mod wire;

pub use json::JsonCodec;
pub use message::{ErrorCode, Request, Response};
pub use wire::{Decoded, WireCodec};

use thiserror::Error;

/// Malformed inbound data. Fatal to the connection that produced it.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Declared payload length exceeds the configured maximum.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Declared payload length.
        size: u32,
        /// Configured maximum.
        max: u32,
    },

    /// One of the reserved flag bits (2-7) is set.
    #[error("reserved flag bits set: {0:#04x}")]
    ReservedFlags(u8),

    /// A response frame arrived where a request was expected.
    #[error("unexpected response frame (correlation {0})")]
    UnexpectedResponse(u32),

    /// A request frame arrived where a response was expected.
    #[error("unexpected request frame (correlation {0})")]
    UnexpectedRequest(u32),

    /// Payload is not a valid JSON message document.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}
