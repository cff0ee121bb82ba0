//! Tram lines and stops from the TRAM open-data API.
//!
//! [`TramClient`] issues the calls through the shared [`UpstreamClient`] to
//! the `tram` target. [`TramService`] adds cache-aside and merges the stops
//! of both tram networks into one list.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::cache::{CacheService, DEFAULT_TTL};
use super::stop::Stop;
use crate::upstream::{Target, UpstreamClient, UpstreamError, UpstreamRequest};

/// Upstream target name the client calls.
pub const TRAM_TARGET: &str = "tram";

/// Page size requested from paged endpoints.
pub const PAGE_SIZE: usize = 100;

/// Network ids: Trambesòs and Trambaix.
pub const NETWORKS: [&str; 2] = ["1", "2"];

/// Safety stop for a paged listing that never ends.
const MAX_PAGES: usize = 100;

const KEY_ACCESS_TOKEN: &str = "tram_access_token";
const KEY_LINES: &str = "lines:all";
const KEY_STOPS_PREFIX: &str = "stops:line:";

/// Keys tried, in order, for the array inside an object response.
const ARRAY_KEYS: [&str; 5] = ["data", "stops", "items", "results", "features"];

/// Tram API endpoints.
pub struct TramClient {
    upstream: UpstreamClient,
    target: Target,
    cache: Arc<CacheService>,
    configured_token: Option<String>,
}

impl TramClient {
    /// Client for the `tram` target of `upstream`.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::UnknownTarget`] if no `tram` target is configured.
    pub fn new(upstream: UpstreamClient, cache: Arc<CacheService>) -> Result<Self, UpstreamError> {
        let target = upstream.target(TRAM_TARGET)?.clone();
        Ok(Self {
            upstream,
            target,
            cache,
            configured_token: None,
        })
    }

    /// Use `token` as the bearer token, and restore it whenever the cached
    /// copy is evicted.
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        if token.is_some() {
            self.set_access_token(token.clone());
        }
        self.configured_token = token;
        self
    }

    /// Store or clear the cached bearer token.
    pub fn set_access_token(&self, token: Option<String>) {
        match token {
            Some(_) => tracing::debug!("Tram access token stored in cache"),
            None => tracing::debug!("Tram access token removed from cache"),
        }
        self.cache.put(KEY_ACCESS_TOKEN, token);
    }

    /// Current bearer token, if any.
    pub fn access_token(&self) -> Option<String> {
        if let Some(token) = self.cache.get(KEY_ACCESS_TOKEN) {
            return Some(token);
        }
        let token = self.configured_token.clone()?;
        self.cache.put(KEY_ACCESS_TOKEN, Some(token.clone()));
        Some(token)
    }

    /// All tram lines.
    pub async fn lines(&self, cancel: CancellationToken) -> Result<Value, UpstreamError> {
        let request = UpstreamRequest::get("lines")
            .query("page", "0")
            .query("pageSize", PAGE_SIZE.to_string());
        self.fetch(request, cancel).await
    }

    /// One page of the stops of `line` on `network`, as an array.
    pub async fn stops_page(
        &self,
        line: &str,
        network: &str,
        page: usize,
        cancel: CancellationToken,
    ) -> Result<Vec<Value>, UpstreamError> {
        let request = UpstreamRequest::get(format!("lines/{line}/stops"))
            .query("page", page.to_string())
            .query("pageSize", PAGE_SIZE.to_string())
            .query("networkId", network);
        Ok(normalize_to_array(self.fetch(request, cancel).await?))
    }

    async fn fetch(
        &self,
        request: UpstreamRequest,
        cancel: CancellationToken,
    ) -> Result<Value, UpstreamError> {
        let request = match self.access_token() {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        };

        tracing::debug!(target_name = TRAM_TARGET, path = %request.path, "Calling tram API");
        let ctx = self.upstream.context().with_cancellation(cancel);
        let response = self.upstream.call(&self.target, &request, &ctx).await?;
        response.json()
    }
}

/// The list inside a response: the array itself, a well-known array field,
/// the first array field, or the value wrapped as a single element.
fn normalize_to_array(root: Value) -> Vec<Value> {
    match root {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::Object(mut obj) => {
            let key = ARRAY_KEYS
                .iter()
                .map(|k| k.to_string())
                .find(|k| obj.get(k).is_some_and(Value::is_array))
                .or_else(|| obj.iter().find(|(_, v)| v.is_array()).map(|(k, _)| k.clone()));
            match key.and_then(|k| obj.remove(&k)) {
                Some(Value::Array(items)) => items,
                _ => vec![Value::Object(obj)],
            }
        }
        other => vec![other],
    }
}

/// Tram network queries with cache-aside.
pub struct TramService {
    client: Arc<TramClient>,
    cache: Arc<CacheService>,
}

impl TramService {
    pub fn new(client: Arc<TramClient>, cache: Arc<CacheService>) -> Self {
        Self { client, cache }
    }

    /// All tram lines, as returned upstream.
    pub async fn lines(&self, cancel: CancellationToken) -> Result<Value, UpstreamError> {
        if let Some(cached) = self.cache.get_json(KEY_LINES) {
            return Ok(cached);
        }
        let lines = self.client.lines(cancel).await?;
        self.cache.put_json(KEY_LINES, &lines, DEFAULT_TTL);
        Ok(lines)
    }

    /// Stops of `line` across both networks, first occurrence wins.
    pub async fn stops(&self, line: &str, cancel: CancellationToken) -> Result<Value, UpstreamError> {
        let key = format!("{KEY_STOPS_PREFIX}{line}");
        if let Some(cached) = self.cache.get_json(&key) {
            return Ok(cached);
        }

        let mut stops = Vec::new();
        let mut seen = HashSet::new();
        for network in NETWORKS {
            for element in self.all_pages(line, network, &cancel).await? {
                let Some(stop) = Stop::from_value(&element) else {
                    continue;
                };
                if let Some(key) = stop.dedup_key() {
                    if !seen.insert(key) {
                        continue;
                    }
                }
                stops.push(stop);
            }
        }
        tracing::debug!(line, stops = stops.len(), "Fetched tram stops");

        let stops = serde_json::to_value(&stops).map_err(|e| UpstreamError::DecodeFailed(e.to_string()))?;
        self.cache.put_json(&key, &stops, DEFAULT_TTL);
        Ok(stops)
    }

    async fn all_pages(
        &self,
        line: &str,
        network: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, UpstreamError> {
        let mut elements = Vec::new();
        for page in 0..MAX_PAGES {
            let batch = self.client.stops_page(line, network, page, cancel.clone()).await?;
            let last = batch.len() < PAGE_SIZE;
            elements.extend(batch);
            if last {
                return Ok(elements);
            }
        }
        tracing::warn!(line, network, pages = MAX_PAGES, "Stopped paging tram stops");
        Ok(elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_shapes() {
        assert_eq!(normalize_to_array(json!([1, 2])), vec![json!(1), json!(2)]);
        assert_eq!(normalize_to_array(json!({ "stops": [1], "other": [2] })), vec![json!(1)]);
        assert_eq!(normalize_to_array(json!({ "page": 0, "rows": [3] })), vec![json!(3)]);
        assert_eq!(normalize_to_array(json!({ "id": 4 })), vec![json!({ "id": 4 })]);
        assert!(normalize_to_array(Value::Null).is_empty());
    }
}
