//! Compact metro documents for the mobile app.
//!
//! Requests carrying `x-client-type: app` get the upstream document
//! reduced to the fields below. Everything else is dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::upstream::UpstreamError;

/// Lines, stations, interchanges (`features`) or arrivals (`linies`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetroDto {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<Feature>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linies: Option<Vec<Linia>>,
}

impl MetroDto {
    /// Reduce an upstream document.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::DecodeFailed`] if a kept field has the wrong type.
    pub fn project(document: Value) -> Result<Value, UpstreamError> {
        let dto: MetroDto =
            serde_json::from_value(document).map_err(|e| UpstreamError::DecodeFailed(e.to_string()))?;
        serde_json::to_value(dto).map_err(|e| UpstreamError::DecodeFailed(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Feature {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Geometry {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Nested coordinate arrays of any depth.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub coordinates: Value,
}

/// Line and station attributes, keyed as TMB sends them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Properties {
    // Lines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_linia: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codi_linia: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nom_linia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc_linia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origen_linia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desti_linia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_paquets: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_operador: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nom_operador: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nom_tipus_transport: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codi_familia: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nom_familia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordre_familia: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordre_linia: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codi_tipus_calendari: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nom_tipus_calendari: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_linia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_aux_linia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_text_linia: Option<String>,
    // Stations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_estacio_linia: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codi_estacio_linia: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_estacio: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nom_estacio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordre_estacio: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc_servei: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origen_servei: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desti_servei: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nom_tipus_accessibilitat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nom_tipus_estat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_inauguracio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picto: Option<String>,
}

/// A line in the real-time arrivals document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Linia {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codi_linia: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nom_linia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nom_familia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codi_familia: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_linia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estacions: Option<Vec<Estacio>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Estacio {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codi_via: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_sentit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codi_estacio: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linies_trajectes: Option<Vec<LiniaTrajecte>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiniaTrajecte {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codi_linia: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nom_linia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_linia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codi_trajecte: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desti_trajecte: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propers_trens: Option<Vec<ProximTren>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximTren {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codi_servei: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temps_arribada: Option<i64>,
}
