//! JSON codec using `serde_json`.
//!
//! Map keys inside messages are kept in `BTreeMap`s, so encoding the same
//! value twice always yields the same bytes.
//!
//! # Example
//!
//! ```
//! use aonbas_server::codec::JsonCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Station {
//!     code: u32,
//!     name: String,
//! }
//!
//! let station = Station { code: 118, name: "Sants Estació".to_string() };
//! let encoded = JsonCodec::encode(&station).unwrap();
//! let decoded: Station = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, station);
//! ```

/// JSON codec for frame payloads.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to compact JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(value)
    }

    /// Decode JSON bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not valid JSON for type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> serde_json::Result<T> {
        serde_json::from_slice(bytes)
    }

    /// Convert a JSON value into a typed value.
    #[inline]
    pub fn from_value<T: serde::de::DeserializeOwned>(
        value: serde_json::Value,
    ) -> serde_json::Result<T> {
        serde_json::from_value(value)
    }

    /// Convert a typed value into a JSON value.
    #[inline]
    pub fn to_value<T: serde::Serialize>(value: &T) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(value)
    }
}
