//! Outbound client for upstream HTTP services.
//!
//! - [`UpstreamClient`] - pooled `reqwest` client with per-target limits
//! - [`RetryPolicy`] - exponential backoff for idempotent calls
//! - [`UpstreamError`] - failure kinds surfaced to handlers

mod client;
mod retry;

pub use client::{UpstreamClient, UpstreamConfig};
pub use retry::RetryPolicy;

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure of an outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// No response within the call timeout.
    #[error("upstream call timed out")]
    Timeout,

    /// Connection could not be established or was reset.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Upstream answered with a non-2xx status.
    #[error("upstream returned status {0}")]
    NonSuccessStatus(u16),

    /// Response body could not be decoded.
    #[error("failed to decode upstream response: {0}")]
    DecodeFailed(String),

    /// The calling request was cancelled.
    #[error("upstream call cancelled")]
    Cancelled,

    /// Target name not known to the server.
    #[error("unknown upstream target '{0}'")]
    UnknownTarget(String),
}

impl UpstreamError {
    /// Failures worth retrying on an idempotent call.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Timeout | UpstreamError::ConnectionFailed(_) => true,
            UpstreamError::NonSuccessStatus(status) => matches!(status, 502..=504),
            _ => false,
        }
    }
}

/// A named upstream base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    name: String,
    base_url: Url,
}

impl Target {
    /// Parse a target. The base URL must be absolute http(s).
    pub fn new(name: impl Into<String>, base_url: &str) -> Result<Self, String> {
        let base_url = Url::parse(base_url).map_err(|e| format!("{base_url}: {e}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(format!("{base_url}: scheme must be http or https"));
        }
        Ok(Self {
            name: name.into(),
            base_url,
        })
    }

    /// Target name (pool key).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for `path` below the base URL.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// One outbound HTTP request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// HTTP method.
    pub method: Method,
    /// Path below the target base URL.
    pub path: String,
    /// Query parameters, in order.
    pub query: Vec<(String, String)>,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
    /// Safe to retry.
    pub idempotent: bool,
}

impl UpstreamRequest {
    /// Idempotent GET.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
            idempotent: true,
        }
    }

    /// Non-idempotent POST with a JSON body.
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            idempotent: false,
            ..Self::get(path)
        }
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Override idempotency.
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }
}

/// Per-call settings. Built fresh for every call.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Timeout of a single attempt.
    pub timeout: Duration,
    /// Retries allowed after the first attempt (idempotent calls only).
    pub retry_budget: u32,
    /// Cancelled when the calling request is abandoned.
    pub cancel: CancellationToken,
}

impl CallContext {
    /// Context with a fresh cancellation token.
    pub fn new(timeout: Duration, retry_budget: u32) -> Self {
        Self {
            timeout,
            retry_budget,
            cancel: CancellationToken::new(),
        }
    }

    /// Tie the call to an existing cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the retry budget.
    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }
}

/// Successful upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status.
    pub status: u16,
    /// Response headers (lower-case names).
    pub headers: BTreeMap<String, String>,
    /// Raw body.
    pub body: Bytes,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

impl UpstreamResponse {
    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, UpstreamError> {
        serde_json::from_slice(&self.body).map_err(|e| UpstreamError::DecodeFailed(e.to_string()))
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<&str, UpstreamError> {
        std::str::from_utf8(&self.body).map_err(|e| UpstreamError::DecodeFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(UpstreamError::Timeout.is_transient());
        assert!(UpstreamError::ConnectionFailed("reset".into()).is_transient());
        assert!(UpstreamError::NonSuccessStatus(503).is_transient());
        assert!(!UpstreamError::NonSuccessStatus(404).is_transient());
        assert!(!UpstreamError::NonSuccessStatus(500).is_transient());
        assert!(!UpstreamError::DecodeFailed("x".into()).is_transient());
        assert!(!UpstreamError::Cancelled.is_transient());
    }

    #[test]
    fn test_target_url_join() {
        let target = Target::new("tmb", "https://api.tmb.cat/v1/").unwrap();
        assert_eq!(target.name(), "tmb");
        assert_eq!(
            target.url_for("/transit/linies/metro"),
            "https://api.tmb.cat/v1/transit/linies/metro"
        );
    }

    #[test]
    fn test_target_rejects_bad_urls() {
        assert!(Target::new("x", "not a url").is_err());
        assert!(Target::new("x", "ftp://example.com").is_err());
    }

    #[test]
    fn test_request_builders() {
        let get = UpstreamRequest::get("a").query("k", "v");
        assert!(get.idempotent);
        assert_eq!(get.query, vec![("k".to_string(), "v".to_string())]);

        let post = UpstreamRequest::post("b", serde_json::json!({"x": 1}));
        assert_eq!(post.method, Method::POST);
        assert!(!post.idempotent);
        assert!(post.idempotent(true).idempotent);
    }

    #[test]
    fn test_response_json() {
        let response = UpstreamResponse {
            status: 200,
            headers: BTreeMap::new(),
            body: Bytes::from_static(br#"{"ok":true}"#),
            attempts: 1,
        };
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["ok"], true);

        let bad = UpstreamResponse {
            body: Bytes::from_static(b"<html>"),
            ..response
        };
        assert!(matches!(
            bad.json::<serde_json::Value>(),
            Err(UpstreamError::DecodeFailed(_))
        ));
    }
}
