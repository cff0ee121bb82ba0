//! Metro lookups with cache-aside.
//!
//! Lines, stations and interchanges change rarely and are kept for the
//! cache's default TTL. Train arrivals are kept for [`TRAIN_TTL`] only.
//! Entries are raw upstream JSON under `lines`, `stations:{line}`,
//! `interchanges:{line}:{station}` and `trains:{station}`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::cache::{CacheService, DEFAULT_TTL};
use super::tmb::TmbClient;
use crate::upstream::UpstreamError;

/// How long real-time train arrivals are served from the cache.
pub const TRAIN_TTL: Duration = Duration::from_secs(10);

const KEY_LINES: &str = "lines";
const KEY_STATIONS_PREFIX: &str = "stations:";
const KEY_INTERCHANGES_PREFIX: &str = "interchanges:";
const KEY_TRAINS_PREFIX: &str = "trains:";

/// Metro network queries.
pub struct MetroService {
    tmb: Arc<TmbClient>,
    cache: Arc<CacheService>,
    train_ttl: Duration,
}

impl MetroService {
    pub fn new(tmb: Arc<TmbClient>, cache: Arc<CacheService>) -> Self {
        Self {
            tmb,
            cache,
            train_ttl: TRAIN_TTL,
        }
    }

    /// Override how long train arrivals stay cached.
    pub fn with_train_ttl(mut self, ttl: Duration) -> Self {
        self.train_ttl = ttl;
        self
    }

    /// All metro lines.
    pub async fn lines(&self, cancel: CancellationToken) -> Result<Value, UpstreamError> {
        if let Some(cached) = self.cache.get_json(KEY_LINES) {
            return Ok(cached);
        }
        let lines = self.tmb.metro_lines(cancel).await?;
        self.cache.put_json(KEY_LINES, &lines, DEFAULT_TTL);
        Ok(lines)
    }

    /// Stations of `line`.
    pub async fn stations(&self, line: &str, cancel: CancellationToken) -> Result<Value, UpstreamError> {
        let key = format!("{KEY_STATIONS_PREFIX}{line}");
        if let Some(cached) = self.cache.get_json(&key) {
            return Ok(cached);
        }
        let stations = self.tmb.stations_for_line(line, cancel).await?;
        self.cache.put_json(&key, &stations, DEFAULT_TTL);
        Ok(stations)
    }

    /// Upcoming trains at `station`.
    pub async fn trains(&self, station: &str, cancel: CancellationToken) -> Result<Value, UpstreamError> {
        let key = format!("{KEY_TRAINS_PREFIX}{station}");
        if let Some(cached) = self.cache.get_json(&key) {
            return Ok(cached);
        }
        let trains = self.tmb.trains_for_station(station, cancel).await?;
        self.cache.put_json(&key, &trains, self.train_ttl);
        Ok(trains)
    }

    /// Interchanges at `station` on `line`.
    pub async fn interchanges(
        &self,
        line: &str,
        station: &str,
        cancel: CancellationToken,
    ) -> Result<Value, UpstreamError> {
        let key = format!("{KEY_INTERCHANGES_PREFIX}{line}:{station}");
        if let Some(cached) = self.cache.get_json(&key) {
            return Ok(cached);
        }
        let interchanges = self.tmb.interchanges(line, station, cancel).await?;
        self.cache.put_json(&key, &interchanges, DEFAULT_TTL);
        Ok(interchanges)
    }
}
