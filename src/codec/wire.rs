//! Wire codec: frames plus JSON messages.
//!
//! Decoding is resumable. Bytes are appended to an internal
//! [`FrameBuffer`]; a call that cannot complete a frame returns
//! [`Decoded::Incomplete`] and keeps the bytes for the next call. Call
//! `decode(&[])` (or [`WireCodec::next_request`]) to drain further frames
//! that arrived in the same read.

use bytes::Bytes;

use super::{DecodeError, JsonCodec, Request, Response};
use crate::protocol::{build_frame, flags, Frame, FrameBuffer, Header, DEFAULT_MAX_PAYLOAD_SIZE};

/// Outcome of one decode step.
#[derive(Debug, PartialEq)]
pub enum Decoded<T> {
    /// A complete message.
    Message(T),
    /// Not enough bytes yet.
    Incomplete,
}

/// Payload sent when a response cannot be serialized.
const ENCODE_FAILURE_PAYLOAD: &[u8] =
    br#"{"status":500,"headers":{},"body":{"error":"HANDLER_FAILURE","message":"response could not be encoded"}}"#;

/// Resumable decoder and deterministic encoder for framed JSON messages.
pub struct WireCodec {
    frames: FrameBuffer,
}

impl WireCodec {
    /// Codec with the default 1 MiB payload limit.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Codec with a custom payload limit.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            frames: FrameBuffer::with_max_payload(max_payload_size),
        }
    }

    /// Feed bytes and try to decode one request.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Decoded<Request>, DecodeError> {
        self.frames.extend(bytes);
        self.next_request()
    }

    /// Decode one request from already buffered bytes.
    pub fn next_request(&mut self) -> Result<Decoded<Request>, DecodeError> {
        let Some(frame) = self.frames.next_frame()? else {
            return Ok(Decoded::Incomplete);
        };

        if frame.is_response() {
            return Err(DecodeError::UnexpectedResponse(frame.correlation_id()));
        }

        let request: Request = JsonCodec::decode(frame.payload())?;
        Ok(Decoded::Message(request.with_correlation(frame.correlation_id())))
    }

    /// Feed bytes and try to decode one response (client side).
    pub fn decode_response(&mut self, bytes: &[u8]) -> Result<Decoded<Response>, DecodeError> {
        self.frames.extend(bytes);
        self.next_response()
    }

    /// Decode one response from already buffered bytes.
    pub fn next_response(&mut self) -> Result<Decoded<Response>, DecodeError> {
        let Some(frame) = self.frames.next_frame()? else {
            return Ok(Decoded::Incomplete);
        };

        if !frame.is_response() {
            return Err(DecodeError::UnexpectedRequest(frame.correlation_id()));
        }

        let response: Response = JsonCodec::decode(frame.payload())?;
        Ok(Decoded::Message(response.with_correlation(frame.correlation_id())))
    }

    /// Encode a response into a complete frame.
    ///
    /// Identical responses always produce identical bytes. Error statuses
    /// (400 and above) set the `IS_ERROR` flag.
    pub fn encode_response(response: &Response) -> Bytes {
        let (flags, payload) = match JsonCodec::encode(response) {
            Ok(payload) => (response_flags(response), payload),
            Err(e) => {
                tracing::error!(
                    correlation_id = response.correlation_id,
                    error = %e,
                    "Failed to encode response"
                );
                (flags::ERROR_RESPONSE, ENCODE_FAILURE_PAYLOAD.to_vec())
            }
        };

        let header = Header::new(flags, response.correlation_id, payload.len() as u32);
        build_frame(&header, &payload)
    }

    /// Encode a request into a complete frame (client side).
    pub fn encode_request(correlation_id: u32, request: &Request) -> serde_json::Result<Bytes> {
        let payload = JsonCodec::encode(request)?;
        let header = Header::new(flags::REQUEST, correlation_id, payload.len() as u32);
        Ok(build_frame(&header, &payload))
    }

    /// Number of bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.frames.len()
    }

    /// Pop the next raw frame without interpreting its payload.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        self.frames.next_frame()
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn response_flags(response: &Response) -> u8 {
    if response.is_success() {
        flags::RESPONSE
    } else {
        flags::ERROR_RESPONSE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ErrorCode;
    use serde_json::json;

    fn sample_request() -> Request {
        Request::new("metro.stations")
            .with_header("session", "s-1")
            .with_body(json!({"line": "L3"}))
            .with_correlation(17)
    }

    #[test]
    fn test_request_roundtrip() {
        let request = sample_request();
        let bytes = WireCodec::encode_request(17, &request).unwrap();

        let mut codec = WireCodec::new();
        assert_eq!(codec.decode(&bytes).unwrap(), Decoded::Message(request));
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_split_at_every_boundary() {
        let request = sample_request();
        let bytes = WireCodec::encode_request(17, &request).unwrap();

        for split in 0..=bytes.len() {
            let mut codec = WireCodec::new();
            let mut decoded = Vec::new();

            for chunk in [&bytes[..split], &bytes[split..]] {
                if let Decoded::Message(r) = codec.decode(chunk).unwrap() {
                    decoded.push(r);
                }
            }

            assert_eq!(decoded, vec![request.clone()], "split at {split}");
            assert_eq!(codec.next_request().unwrap(), Decoded::Incomplete);
        }
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut bytes = WireCodec::encode_request(1, &Request::new("a")).unwrap().to_vec();
        bytes.extend_from_slice(&WireCodec::encode_request(2, &Request::new("b")).unwrap());

        let mut codec = WireCodec::new();
        let Decoded::Message(first) = codec.decode(&bytes).unwrap() else {
            panic!("expected first request");
        };
        let Decoded::Message(second) = codec.next_request().unwrap() else {
            panic!("expected second request");
        };

        assert_eq!((first.correlation_id, first.route.as_str()), (1, "a"));
        assert_eq!((second.correlation_id, second.route.as_str()), (2, "b"));
        assert_eq!(codec.next_request().unwrap(), Decoded::Incomplete);
    }

    #[test]
    fn test_response_flag_rejected_inbound() {
        let bytes = WireCodec::encode_response(&Response::ok(json!(1)).with_correlation(3));

        let mut codec = WireCodec::new();
        assert!(matches!(
            codec.decode(&bytes),
            Err(DecodeError::UnexpectedResponse(3))
        ));
    }

    #[test]
    fn test_invalid_json_rejected() {
        let payload = b"{\"route\":";
        let header = Header::new(flags::REQUEST, 1, payload.len() as u32);
        let bytes = build_frame(&header, payload);

        let mut codec = WireCodec::new();
        assert!(matches!(
            codec.decode(&bytes),
            Err(DecodeError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let request = Request::new("echo").with_body(json!("x".repeat(64)));
        let bytes = WireCodec::encode_request(1, &request).unwrap();

        let mut codec = WireCodec::with_max_payload(16);
        assert!(matches!(
            codec.decode(&bytes),
            Err(DecodeError::PayloadTooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn test_encode_response_deterministic() {
        let response = Response::ok(json!({"b": 2, "a": 1}))
            .with_header("y", "1")
            .with_header("x", "2")
            .with_correlation(5);

        let first = WireCodec::encode_response(&response);
        let second = WireCodec::encode_response(&response.clone());
        assert_eq!(first, second);
    }

    #[test]
    fn test_error_flag_set_for_error_status() {
        let ok = WireCodec::encode_response(&Response::ok(json!(null)));
        let err = WireCodec::encode_response(&Response::error(ErrorCode::Timeout, "slow"));

        assert_eq!(ok[0], flags::RESPONSE);
        assert_eq!(err[0], flags::ERROR_RESPONSE);
    }

    #[test]
    fn test_response_roundtrip() {
        let response = Response::error(ErrorCode::BadRequest, "missing line").with_correlation(9);
        let bytes = WireCodec::encode_response(&response);

        let mut codec = WireCodec::new();
        assert_eq!(
            codec.decode_response(&bytes).unwrap(),
            Decoded::Message(response)
        );
    }

    #[test]
    fn test_request_rejected_on_client_side() {
        let bytes = WireCodec::encode_request(4, &Request::new("echo")).unwrap();

        let mut codec = WireCodec::new();
        assert!(matches!(
            codec.decode_response(&bytes),
            Err(DecodeError::UnexpectedRequest(4))
        ));
    }
}
