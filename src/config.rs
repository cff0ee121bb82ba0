//! Process-wide configuration loaded once from the environment.
//!
//! A `.env` file in the working directory is honoured. Values are read
//! through a lookup function so tests can supply their own variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::telemetry::LogFormat;
use crate::upstream::{RetryPolicy, Target, UpstreamConfig};

/// Invalid or missing configuration. Fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but unusable.
    #[error("invalid value for {key} ({value:?}): {reason}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Outcome of looking for a `.env` file.
///
/// Configuration is loaded before logging exists, so the caller reports
/// this once the subscriber is installed.
#[derive(Debug)]
pub enum EnvFile {
    /// Variables were read from this file.
    Loaded(PathBuf),
    /// No file was used.
    Skipped(String),
}

impl EnvFile {
    /// Log where variables came from.
    pub fn log(&self) {
        match self {
            Self::Loaded(path) => tracing::info!(path = %path.display(), "Loaded .env file"),
            Self::Skipped(reason) => tracing::debug!("No .env file loaded: {}", reason),
        }
    }
}

impl From<Result<PathBuf, dotenvy::Error>> for EnvFile {
    fn from(result: Result<PathBuf, dotenvy::Error>) -> Self {
        match result {
            Ok(path) => Self::Loaded(path),
            Err(e) => Self::Skipped(e.to_string()),
        }
    }
}

/// Credentials for the transit upstream.
#[derive(Clone, PartialEq, Eq)]
pub struct TmbCredentials {
    /// `app_id` query parameter.
    pub app_id: String,
    /// `app_key` query parameter.
    pub app_key: String,
}

impl std::fmt::Debug for TmbCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmbCredentials")
            .field("app_id", &self.app_id)
            .field("app_key", &"<redacted>")
            .finish()
    }
}

/// Optional bearer token for the tram upstream.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TramCredentials {
    /// `Authorization: Bearer` value, if the API requires one.
    pub access_token: Option<String>,
}

impl std::fmt::Debug for TramCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TramCredentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub listen_addr: SocketAddr,
    /// Named upstream targets.
    pub upstreams: Vec<Target>,
    /// Per-request handler timeout.
    pub request_timeout: Duration,
    /// Per-attempt upstream timeout.
    pub upstream_timeout: Duration,
    /// Retries allowed for idempotent upstream calls.
    pub retry_budget: u32,
    /// Connections per upstream target.
    pub pool_size: usize,
    /// Idle upstream connection lifetime.
    pub pool_idle: Duration,
    /// How long in-flight requests may run after shutdown starts.
    pub shutdown_grace: Duration,
    /// Threads of the I/O runtime.
    pub io_threads: usize,
    /// Threads of the handler runtime.
    pub worker_threads: usize,
    /// Largest accepted frame payload.
    pub max_frame_bytes: u32,
    /// Write responses in completion order (true) or request order (false).
    pub pipelining: bool,
    /// Per-connection limit of requests awaiting a response.
    pub max_in_flight: usize,
    /// Entries kept by the transit cache.
    pub cache_capacity: usize,
    /// Log output format.
    pub log_format: LogFormat,
    /// `tracing` filter directives.
    pub log_filter: String,
    /// Transit upstream credentials.
    pub tmb: TmbCredentials,
    /// Tram upstream credentials.
    pub tram: TramCredentials,
}

/// Variable names.
pub mod keys {
    pub const LISTEN_ADDR: &str = "AONBAS_LISTEN_ADDR";
    pub const UPSTREAMS: &str = "AONBAS_UPSTREAMS";
    pub const REQUEST_TIMEOUT_MS: &str = "AONBAS_REQUEST_TIMEOUT_MS";
    pub const UPSTREAM_TIMEOUT_MS: &str = "AONBAS_UPSTREAM_TIMEOUT_MS";
    pub const RETRY_BUDGET: &str = "AONBAS_RETRY_BUDGET";
    pub const POOL_SIZE: &str = "AONBAS_POOL_SIZE";
    pub const POOL_IDLE_SECS: &str = "AONBAS_POOL_IDLE_SECS";
    pub const SHUTDOWN_GRACE_SECS: &str = "AONBAS_SHUTDOWN_GRACE_SECS";
    pub const IO_THREADS: &str = "AONBAS_IO_THREADS";
    pub const WORKER_THREADS: &str = "AONBAS_WORKER_THREADS";
    pub const MAX_FRAME_BYTES: &str = "AONBAS_MAX_FRAME_BYTES";
    pub const PIPELINING: &str = "AONBAS_PIPELINING";
    pub const MAX_IN_FLIGHT: &str = "AONBAS_MAX_IN_FLIGHT";
    pub const CACHE_CAPACITY: &str = "AONBAS_CACHE_CAPACITY";
    pub const LOG_FORMAT: &str = "AONBAS_LOG_FORMAT";
    pub const LOG_FILTER: &str = "RUST_LOG";
    pub const TMB_APP_ID: &str = "TMB_APP_ID";
    pub const TMB_APP_KEY: &str = "TMB_APP_KEY";
    pub const TRAM_ACCESS_TOKEN: &str = "TRAM_ACCESS_TOKEN";
}

const DEFAULT_UPSTREAMS: &str = "tmb=https://api.tmb.cat/v1,tram=https://opendata.tram.cat/api/v1";

impl ServerConfig {
    /// Load from the process environment (plus `.env`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for any missing or invalid variable.
    pub fn from_env() -> Result<(Self, EnvFile), ConfigError> {
        let env_file = EnvFile::from(dotenvy::dotenv());
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        Ok((config, env_file))
    }

    /// Load through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let listen_addr = env.parsed(keys::LISTEN_ADDR, "0.0.0.0:8080")?;
        let upstreams = parse_upstreams(&env.or(keys::UPSTREAMS, DEFAULT_UPSTREAMS))?;

        let log_format = match env.or(keys::LOG_FORMAT, "text").as_str() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::Invalid {
                    key: keys::LOG_FORMAT,
                    value: other.to_string(),
                    reason: "expected 'text' or 'json'".to_string(),
                })
            }
        };

        Ok(Self {
            listen_addr,
            upstreams,
            request_timeout: Duration::from_millis(env.positive(keys::REQUEST_TIMEOUT_MS, 10_000)?),
            upstream_timeout: Duration::from_millis(env.positive(keys::UPSTREAM_TIMEOUT_MS, 5_000)?),
            retry_budget: env.parsed(keys::RETRY_BUDGET, "2")?,
            pool_size: env.positive(keys::POOL_SIZE, 16)? as usize,
            pool_idle: Duration::from_secs(env.positive(keys::POOL_IDLE_SECS, 90)?),
            shutdown_grace: Duration::from_secs(env.parsed(keys::SHUTDOWN_GRACE_SECS, "10")?),
            io_threads: env.positive(keys::IO_THREADS, 2)? as usize,
            worker_threads: env.positive(keys::WORKER_THREADS, 4)? as usize,
            max_frame_bytes: env.positive(keys::MAX_FRAME_BYTES, 1024 * 1024)? as u32,
            pipelining: env.parsed(keys::PIPELINING, "true")?,
            max_in_flight: env.positive(keys::MAX_IN_FLIGHT, 256)? as usize,
            cache_capacity: env.positive(keys::CACHE_CAPACITY, 10)? as usize,
            log_format,
            log_filter: env.or(keys::LOG_FILTER, "info"),
            tmb: TmbCredentials {
                app_id: env.required(keys::TMB_APP_ID)?,
                app_key: env.required(keys::TMB_APP_KEY)?,
            },
            tram: TramCredentials {
                access_token: env.get(keys::TRAM_ACCESS_TOKEN),
            },
        })
    }

    /// Upstream client settings derived from this config.
    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            pool_size: self.pool_size,
            pool_idle: self.pool_idle,
            timeout: self.upstream_timeout,
            retry_budget: self.retry_budget,
            retry: RetryPolicy::default(),
        }
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T>(&self, key: &'static str, default: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.or(key, default);
        value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        })
    }

    fn positive(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        let value: u64 = self.parsed(key, &default.to_string())?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                key,
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if key == keys::MAX_FRAME_BYTES && value > u64::from(u32::MAX) {
            return Err(ConfigError::Invalid {
                key,
                value: value.to_string(),
                reason: "must fit in 32 bits".to_string(),
            });
        }
        Ok(value)
    }
}

fn parse_upstreams(raw: &str) -> Result<Vec<Target>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: keys::UPSTREAMS,
        value: raw.to_string(),
        reason,
    };

    let mut targets: Vec<Target> = Vec::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, url) = pair
            .split_once('=')
            .ok_or_else(|| invalid(format!("'{pair}' is not name=url")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid(format!("'{pair}' has an empty name")));
        }
        if targets.iter().any(|t| t.name() == name) {
            return Err(invalid(format!("target '{name}' listed twice")));
        }
        targets.push(Target::new(name, url.trim()).map_err(invalid)?);
    }

    Ok(targets)
}
