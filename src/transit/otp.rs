//! One-time payloads kept in the shared cache.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cache::CacheService;

const OTP_KEY_PREFIX: &str = "otp:";

/// A stored one-time payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Otp {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub ts: u64,
}

/// Creates, reads and removes one-time payloads.
pub struct OtpService {
    cache: Arc<CacheService>,
}

impl OtpService {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }

    /// Store a new payload under a random id.
    pub fn create(&self, kind: &str, payload: &str) -> serde_json::Result<Otp> {
        let otp = Otp {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            payload: payload.to_string(),
            ts: now_millis(),
        };
        let key = key_for(&otp.id);
        self.cache.put(&key, Some(serde_json::to_string(&otp)?));
        tracing::debug!(key = %key, "OTP created");
        Ok(otp)
    }

    /// Payload stored under `id`. A corrupt entry reads as missing.
    pub fn get(&self, id: &str) -> Option<Otp> {
        let key = key_for(id);
        let raw = self.cache.get(&key)?;
        match serde_json::from_str(&raw) {
            Ok(otp) => Some(otp),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Invalid OTP entry");
                None
            }
        }
    }

    /// Remove `id`. Returns false if it was not present.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.cache.remove(&key_for(id));
        if removed {
            tracing::debug!(id, "OTP removed");
        }
        removed
    }
}

fn key_for(id: &str) -> String {
    format!("{OTP_KEY_PREFIX}{id}")
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
