//! Client for the TMB transit API.
//!
//! Every call goes through the shared [`UpstreamClient`] to the `tmb`
//! target with the application credentials appended as query parameters.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::TmbCredentials;
use crate::upstream::{Target, UpstreamClient, UpstreamError, UpstreamRequest};

/// Upstream target name the client calls.
pub const TMB_TARGET: &str = "tmb";

/// TMB API endpoints used by the metro routes.
pub struct TmbClient {
    upstream: UpstreamClient,
    target: Target,
    credentials: TmbCredentials,
}

impl TmbClient {
    /// Client for the `tmb` target of `upstream`.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::UnknownTarget`] if no `tmb` target is configured.
    pub fn new(upstream: UpstreamClient, credentials: TmbCredentials) -> Result<Self, UpstreamError> {
        let target = upstream.target(TMB_TARGET)?.clone();
        Ok(Self {
            upstream,
            target,
            credentials,
        })
    }

    /// All metro lines.
    pub async fn metro_lines(&self, cancel: CancellationToken) -> Result<Value, UpstreamError> {
        self.fetch(UpstreamRequest::get("transit/linies/metro"), cancel)
            .await
    }

    /// Stations of one metro line.
    pub async fn stations_for_line(
        &self,
        line: &str,
        cancel: CancellationToken,
    ) -> Result<Value, UpstreamError> {
        let path = format!("transit/linies/metro/{line}/estacions");
        self.fetch(UpstreamRequest::get(path), cancel).await
    }

    /// Interchanges available at a station of a line.
    pub async fn interchanges(
        &self,
        line: &str,
        station: &str,
        cancel: CancellationToken,
    ) -> Result<Value, UpstreamError> {
        let path = format!("transit/linies/metro/{line}/estacions/{station}/corresp");
        self.fetch(UpstreamRequest::get(path), cancel).await
    }

    /// Real-time train arrivals at a station.
    pub async fn trains_for_station(
        &self,
        station: &str,
        cancel: CancellationToken,
    ) -> Result<Value, UpstreamError> {
        let request = UpstreamRequest::get("itransit/metro/estacions").query("estacions", station);
        self.fetch(request, cancel).await
    }

    async fn fetch(
        &self,
        request: UpstreamRequest,
        cancel: CancellationToken,
    ) -> Result<Value, UpstreamError> {
        let request = request
            .query("app_id", self.credentials.app_id.as_str())
            .query("app_key", self.credentials.app_key.as_str());

        tracing::debug!(target_name = TMB_TARGET, path = %request.path, "Calling TMB API");
        let ctx = self.upstream.context().with_cancellation(cancel);
        let response = self.upstream.call(&self.target, &request, &ctx).await?;
        response.json()
    }
}
