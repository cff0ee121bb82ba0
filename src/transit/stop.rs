//! Tram stop as returned by the tram routes.
//!
//! The open-data API is loose about field names and types, so stops are
//! read field by field from the raw JSON with a list of accepted keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Language keys tried, in order, when a description is localised.
const DESCRIPTION_LANGUAGES: [&str; 5] = ["ca", "es", "en", "text", "value"];

/// One tram stop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stop {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gtfs_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl Stop {
    /// Read a stop from an upstream element. Strings holding a JSON object
    /// are parsed first. Anything else that is not an object yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let parsed;
        let obj = match value {
            Value::Object(obj) => obj,
            Value::String(raw) => {
                parsed = serde_json::from_str::<Value>(raw).ok()?;
                parsed.as_object()?
            }
            _ => return None,
        };

        Some(Self {
            name: string(obj, &["name"]),
            description: description(obj),
            latitude: float(obj, &["latitude", "lat"]),
            longitude: float(obj, &["longitude", "lon", "lng"]),
            outbound_code: int(obj, &["outboundCode", "outbound_code"]),
            return_code: int(obj, &["returnCode", "return_code"]),
            gtfs_code: string(obj, &["gtfsCode", "gtfs_id", "gtfsId", "code"]),
            order: int(obj, &["order"]),
            image: string(obj, &["image", "img"]),
            id: int(obj, &["id", "stopId"]),
        })
    }

    /// Identity used to merge the same stop seen on both networks: the
    /// upper-cased GTFS code, else the numeric id. `None` means the stop
    /// cannot be matched and is always kept.
    pub fn dedup_key(&self) -> Option<String> {
        match (&self.gtfs_code, self.id) {
            (Some(code), _) if !code.is_empty() => Some(code.to_uppercase()),
            (_, Some(id)) if id != 0 => Some(id.to_string()),
            _ => None,
        }
    }
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    field(obj, keys).and_then(scalar_text)
}

fn int(obj: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    match field(obj, keys)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float(obj: &Map<String, Value>, keys: &[&str]) -> f64 {
    match field(obj, keys) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn description(obj: &Map<String, Value>) -> Option<String> {
    let value = field(obj, &["description"])?;
    if let Some(text) = scalar_text(value) {
        return Some(text);
    }
    if let Value::Object(localised) = value {
        if let Some(text) = field(localised, &DESCRIPTION_LANGUAGES).and_then(scalar_text) {
            return Some(text);
        }
        if let Some(text) = localised.values().find_map(scalar_text) {
            return Some(text);
        }
    }
    Some(value.to_string())
}
