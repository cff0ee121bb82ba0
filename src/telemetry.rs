//! Logging setup.
//!
//! Installs a global `tracing` subscriber with an [`EnvFilter`] and either
//! human-readable or JSON output. Only the first call succeeds.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging could not be initialised.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// `init` was already called in this process.
    #[error("telemetry already initialised")]
    AlreadyInitialised,

    /// The filter directives did not parse.
    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter {
        /// Directives as given.
        filter: String,
        /// Parser message.
        reason: String,
    },

    /// Another global subscriber is installed.
    #[error("failed to install subscriber: {0}")]
    Install(String),
}

static INITIALISED: AtomicBool = AtomicBool::new(false);

/// Install the global subscriber.
///
/// `filter` uses `RUST_LOG` syntax, e.g. `info,aonbas_server=debug`.
pub fn init(format: LogFormat, filter: &str) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_new(filter).map_err(|e| TelemetryError::InvalidFilter {
        filter: filter.to_string(),
        reason: e.to_string(),
    })?;

    if INITIALISED.swap(true, Ordering::SeqCst) {
        return Err(TelemetryError::AlreadyInitialised);
    }

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    };

    result.map_err(|e| TelemetryError::Install(e.to_string()))
}
