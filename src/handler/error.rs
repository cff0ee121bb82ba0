//! Handler-level failures.
//!
//! A handler returns `Err(HandlerError)`; the dispatcher turns it into a
//! structured error response. Nothing here ever closes a connection.

use thiserror::Error;

use crate::codec::{ErrorCode, Response};
use crate::error::ServerError;
use crate::upstream::UpstreamError;

/// Failure reported by a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request body was missing or malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An upstream call failed.
    #[error("upstream call failed: {0}")]
    Upstream(#[from] UpstreamError),

    /// A service the handler depends on is not available.
    #[error(transparent)]
    Service(#[from] ServerError),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    /// Error code this failure maps to.
    pub fn code(&self) -> ErrorCode {
        match self {
            HandlerError::BadRequest(_) => ErrorCode::BadRequest,
            HandlerError::NotFound(_) => ErrorCode::NotFound,
            HandlerError::Upstream(_) => ErrorCode::UpstreamError,
            HandlerError::Service(_) | HandlerError::Failed(_) => ErrorCode::HandlerFailure,
        }
    }

    /// Convert into the structured error response.
    pub fn into_response(self) -> Response {
        Response::error(self.code(), self.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::Failed(format!("serialization failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(HandlerError::BadRequest("x".into()).into_response().status, 400);
        assert_eq!(HandlerError::NotFound("x".into()).into_response().status, 404);
        assert_eq!(
            HandlerError::Upstream(UpstreamError::Timeout).into_response().status,
            502
        );
        assert_eq!(HandlerError::failed("boom").into_response().status, 500);
    }

    #[test]
    fn test_error_body() {
        let response = HandlerError::NotFound("otp 'abc'".into()).into_response();
        assert_eq!(response.error_code(), Some("NOT_FOUND"));
        assert_eq!(response.body["message"], "not found: otp 'abc'");
    }
}
