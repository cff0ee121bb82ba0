//! Pooled upstream client.
//!
//! One `reqwest::Client` holds the connection pool (idle connections per
//! host, idle eviction). On top of it each target gets a semaphore so no
//! more than `pool_size` calls to one target are in flight at once.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{CallContext, RetryPolicy, Target, UpstreamError, UpstreamRequest, UpstreamResponse};

/// Pool and retry settings.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Max concurrent calls and idle connections per target.
    pub pool_size: usize,
    /// Idle connections are closed after this long.
    pub pool_idle: Duration,
    /// Default per-attempt timeout.
    pub timeout: Duration,
    /// Default retry budget.
    pub retry_budget: u32,
    /// Backoff schedule.
    pub retry: RetryPolicy,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            pool_idle: Duration::from_secs(90),
            timeout: Duration::from_secs(5),
            retry_budget: 2,
            retry: RetryPolicy::default(),
        }
    }
}

/// Shared outbound HTTP client.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    config: UpstreamConfig,
    targets: Arc<HashMap<String, Target>>,
    permits: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl UpstreamClient {
    /// Build the client and its pool.
    pub fn new(config: UpstreamConfig, targets: Vec<Target>) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_size)
            .pool_idle_timeout(config.pool_idle)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| UpstreamError::ConnectionFailed(e.to_string()))?;

        let targets = targets
            .into_iter()
            .map(|target| (target.name().to_string(), target))
            .collect();

        Ok(Self {
            http,
            config,
            targets: Arc::new(targets),
            permits: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Configured target by name.
    pub fn target(&self, name: &str) -> Result<&Target, UpstreamError> {
        self.targets
            .get(name)
            .ok_or_else(|| UpstreamError::UnknownTarget(name.to_string()))
    }

    /// A fresh call context with the configured defaults.
    pub fn context(&self) -> CallContext {
        CallContext::new(self.config.timeout, self.config.retry_budget)
    }

    /// Client settings.
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Perform a call, retrying idempotent requests on transient failures.
    ///
    /// Cancellation of `ctx.cancel` drops the in-flight HTTP request and
    /// returns [`UpstreamError::Cancelled`].
    pub async fn call(
        &self,
        target: &Target,
        request: &UpstreamRequest,
        ctx: &CallContext,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let max_attempts = if request.idempotent {
            ctx.retry_budget.saturating_add(1)
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => Err(UpstreamError::Cancelled),
                result = self.attempt(target, request, ctx.timeout) => result,
            };

            match result {
                Ok(mut response) => {
                    response.attempts = attempt;
                    tracing::debug!(
                        target_name = target.name(),
                        path = %request.path,
                        status = response.status,
                        attempt,
                        "Upstream call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let backoff = self.config.retry.backoff(attempt);
                    tracing::warn!(
                        target_name = target.name(),
                        path = %request.path,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Upstream call failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => return Err(UpstreamError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        target_name = target.name(),
                        path = %request.path,
                        attempt,
                        error = %e,
                        "Upstream call failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Shorthand: call a configured target by name with default settings
    /// and the given cancellation token.
    pub async fn call_named(
        &self,
        target: &str,
        request: &UpstreamRequest,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let target = self.target(target)?;
        let ctx = self.context().with_cancellation(cancel);
        self.call(target, request, &ctx).await
    }

    async fn attempt(
        &self,
        target: &Target,
        request: &UpstreamRequest,
        timeout: Duration,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let _permit = self.acquire(target).await?;

        let mut builder = self
            .http
            .request(request.method.clone(), target.url_for(&request.path))
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let exchange = async {
            let response = builder.send().await.map_err(map_reqwest_error)?;
            let status = response.status();
            if !status.is_success() {
                return Err(UpstreamError::NonSuccessStatus(status.as_u16()));
            }

            let headers: BTreeMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response.bytes().await.map_err(map_reqwest_error)?;

            Ok(UpstreamResponse {
                status: status.as_u16(),
                headers,
                body,
                attempts: 0,
            })
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| UpstreamError::Timeout)?
    }

    async fn acquire(&self, target: &Target) -> Result<OwnedSemaphorePermit, UpstreamError> {
        let semaphore = {
            let mut permits = self.permits.lock();
            Arc::clone(
                permits
                    .entry(target.name().to_string())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.config.pool_size.max(1)))),
            )
        };

        semaphore
            .acquire_owned()
            .await
            .map_err(|_| UpstreamError::ConnectionFailed("target pool closed".to_string()))
    }

    /// Calls to `target` currently allowed to start without waiting.
    pub fn available_permits(&self, target: &Target) -> usize {
        self.permits
            .lock()
            .get(target.name())
            .map_or(self.config.pool_size, |s| s.available_permits())
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("config", &self.config)
            .field("targets", &self.targets.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn map_reqwest_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout
    } else if e.is_decode() {
        UpstreamError::DecodeFailed(e.to_string())
    } else {
        UpstreamError::ConnectionFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> UpstreamClient {
        let targets = vec![Target::new("tmb", "http://127.0.0.1:9").unwrap()];
        UpstreamClient::new(UpstreamConfig::default(), targets).unwrap()
    }

    #[test]
    fn test_target_lookup() {
        let client = client();
        assert!(client.target("tmb").is_ok());
        assert_eq!(
            client.target("bus").unwrap_err(),
            UpstreamError::UnknownTarget("bus".to_string())
        );
    }

    #[test]
    fn test_context_defaults() {
        let ctx = client().context();
        assert_eq!(ctx.timeout, Duration::from_secs(5));
        assert_eq!(ctx.retry_budget, 2);
        assert!(!ctx.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let client = client();
        let ctx = client.context();
        ctx.cancel.cancel();

        let target = client.target("tmb").unwrap().clone();
        let result = client.call(&target, &UpstreamRequest::get("x"), &ctx).await;
        assert_eq!(result.unwrap_err(), UpstreamError::Cancelled);
    }

    #[tokio::test]
    async fn test_permits_released_after_call() {
        let client = client();
        let ctx = client.context().with_retry_budget(0);
        ctx.cancel.cancel();
        let target = client.target("tmb").unwrap().clone();

        let _ = client.call(&target, &UpstreamRequest::get("x"), &ctx).await;
        assert_eq!(client.available_permits(&target), 16);
    }
}
