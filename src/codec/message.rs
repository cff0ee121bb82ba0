//! Request and response messages.
//!
//! Payload layout on the wire:
//!
//! ```text
//! request:  {"route": "...", "headers": {...}, "body": <any>}
//! response: {"status": 200, "headers": {...}, "body": <any>}
//! ```
//!
//! The correlation ID travels in the frame header, not in the payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A request decoded from the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation ID from the frame header.
    #[serde(skip)]
    pub correlation_id: u32,
    /// Route key used to select the handler.
    pub route: String,
    /// String metadata, sorted by key.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body.
    #[serde(default)]
    pub body: Value,
}

impl Request {
    /// Create a request for `route` with an empty body.
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            correlation_id: 0,
            route: route.into(),
            headers: BTreeMap::new(),
            body: Value::Null,
        }
    }

    /// Set the body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the correlation ID.
    pub fn with_correlation(mut self, correlation_id: u32) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Look up a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// A response produced for exactly one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Correlation ID of the request this answers.
    #[serde(skip)]
    pub correlation_id: u32,
    /// Status code (see [`ErrorCode`] for the error statuses).
    pub status: u16,
    /// String metadata, sorted by key.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Response body.
    #[serde(default)]
    pub body: Value,
}

impl Response {
    /// Create a response with an explicit status.
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            correlation_id: 0,
            status,
            headers: BTreeMap::new(),
            body,
        }
    }

    /// A 200 response carrying `body`.
    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    /// A structured error response: `{"error": CODE, "message": text}`.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            code.status(),
            json!({ "error": code.as_str(), "message": message.into() }),
        )
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the correlation ID.
    pub fn with_correlation(mut self, correlation_id: u32) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Status below 400.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// The `error` code of an error body, if any.
    pub fn error_code(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }
}

/// Stable error codes and their statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed frame or payload.
    DecodeError,
    /// Handler rejected its input.
    BadRequest,
    /// No handler registered for the route.
    RouteNotFound,
    /// Handler could not find the requested resource.
    NotFound,
    /// Handler failed or panicked.
    HandlerFailure,
    /// An upstream call failed.
    UpstreamError,
    /// Server is draining connections.
    ShuttingDown,
    /// Per-request timeout elapsed.
    Timeout,
}

impl ErrorCode {
    /// Every code, in status order.
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::DecodeError,
        ErrorCode::BadRequest,
        ErrorCode::RouteNotFound,
        ErrorCode::NotFound,
        ErrorCode::HandlerFailure,
        ErrorCode::UpstreamError,
        ErrorCode::ShuttingDown,
        ErrorCode::Timeout,
    ];

    /// Status code carried by responses with this error.
    pub fn status(self) -> u16 {
        match self {
            ErrorCode::DecodeError | ErrorCode::BadRequest => 400,
            ErrorCode::RouteNotFound | ErrorCode::NotFound => 404,
            ErrorCode::HandlerFailure => 500,
            ErrorCode::UpstreamError => 502,
            ErrorCode::ShuttingDown => 503,
            ErrorCode::Timeout => 504,
        }
    }

    /// Code string placed in the `error` field of the body.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::DecodeError => "DECODE_ERROR",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::RouteNotFound => "ROUTE_NOT_FOUND",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::HandlerFailure => "HANDLER_FAILURE",
            ErrorCode::UpstreamError => "UPSTREAM_ERROR",
            ErrorCode::ShuttingDown => "SHUTTING_DOWN",
            ErrorCode::Timeout => "TIMEOUT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_on_decode() {
        let request: Request = serde_json::from_str(r#"{"route":"status"}"#).unwrap();

        assert_eq!(request.route, "status");
        assert!(request.headers.is_empty());
        assert_eq!(request.body, Value::Null);
    }

    #[test]
    fn test_request_requires_route() {
        let result: serde_json::Result<Request> = serde_json::from_str(r#"{"body":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_correlation_not_serialized() {
        let request = Request::new("echo").with_correlation(99);
        let text = serde_json::to_string(&request).unwrap();

        assert!(!text.contains("correlation"));
        assert_eq!(text, r#"{"route":"echo","headers":{},"body":null}"#);
    }

    #[test]
    fn test_headers_are_sorted() {
        let response = Response::ok(Value::Null)
            .with_header("zeta", "1")
            .with_header("alpha", "2");

        let text = serde_json::to_string(&response).unwrap();
        assert_eq!(
            text,
            r#"{"status":200,"headers":{"alpha":"2","zeta":"1"},"body":null}"#
        );
    }

    #[test]
    fn test_error_response_shape() {
        let response = Response::error(ErrorCode::RouteNotFound, "no handler for 'x'");

        assert_eq!(response.status, 404);
        assert!(!response.is_success());
        assert_eq!(response.error_code(), Some("ROUTE_NOT_FOUND"));
        assert_eq!(response.body["message"], "no handler for 'x'");
    }

    #[test]
    fn test_status_table() {
        let table: Vec<(u16, &str)> = ErrorCode::ALL
            .iter()
            .map(|code| (code.status(), code.as_str()))
            .collect();

        assert_eq!(
            table,
            vec![
                (400, "DECODE_ERROR"),
                (400, "BAD_REQUEST"),
                (404, "ROUTE_NOT_FOUND"),
                (404, "NOT_FOUND"),
                (500, "HANDLER_FAILURE"),
                (502, "UPSTREAM_ERROR"),
                (503, "SHUTTING_DOWN"),
                (504, "TIMEOUT"),
            ]
        );
    }

    #[test]
    fn test_request_header_lookup() {
        let request = Request::new("otp.get").with_header("session", "abc");
        assert_eq!(request.header("session"), Some("abc"));
        assert_eq!(request.header("missing"), None);
    }
}
