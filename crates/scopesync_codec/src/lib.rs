//! # ScopeSync Codec
//!
//! Value model and pluggable codecs for ScopeSync batch files.
//!
//! Rows travel between participants as maps of column name to [`Value`]. The
//! byte encoding of a spooled batch part is chosen per session through
//! [`CodecKind`]; the engine only relies on a codec round-tripping values,
//! never on a particular wire layout.
//!
//! ## Usage
//!
//! ```
//! use scopesync_codec::{Codec, CodecKind, Value};
//!
//! let codec = CodecKind::Cbor.codec();
//! let value = Value::text_map(vec![("id", Value::Integer(42))]);
//! let bytes = codec.encode(&value).unwrap();
//! assert_eq!(codec.decode(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod json;
mod value;

pub use cbor::CborCodec;
pub use error::{CodecError, CodecResult};
pub use json::JsonCodec;
pub use value::Value;

use serde::{Deserialize, Serialize};
use std::fmt;

/// A byte encoding for [`Value`]s.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Returns which codec this is.
    fn kind(&self) -> CodecKind;

    /// Encodes a value to bytes.
    fn encode(&self, value: &Value) -> CodecResult<Vec<u8>>;

    /// Decodes bytes produced by [`Codec::encode`].
    fn decode(&self, bytes: &[u8]) -> CodecResult<Value>;
}

/// Identifies one of the built-in codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// CBOR via `ciborium`.
    #[default]
    Cbor,
    /// JSON via `serde_json`.
    Json,
}

impl CodecKind {
    /// Stable name, as written into batch manifests.
    pub fn name(&self) -> &'static str {
        match self {
            CodecKind::Cbor => "cbor",
            CodecKind::Json => "json",
        }
    }

    /// File extension for batch part files.
    pub fn extension(&self) -> &'static str {
        self.name()
    }

    /// Parses a codec name.
    pub fn from_name(name: &str) -> CodecResult<Self> {
        match name {
            "cbor" => Ok(CodecKind::Cbor),
            "json" => Ok(CodecKind::Json),
            other => Err(CodecError::UnknownCodec {
                name: other.to_string(),
            }),
        }
    }

    /// Returns an instance of the codec.
    pub fn codec(&self) -> Box<dyn Codec> {
        match self {
            CodecKind::Cbor => Box::new(CborCodec),
            CodecKind::Json => Box::new(JsonCodec),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Types that convert themselves into a [`Value`] tree.
pub trait ToValue {
    /// Converts to a value.
    fn to_value(&self) -> Value;
}

/// Types that can be rebuilt from a [`Value`] tree.
pub trait FromValue: Sized {
    /// Converts from a value.
    fn from_value(value: &Value) -> CodecResult<Self>;
}

/// Reads a required field from a map value.
pub fn required_field<'a>(map: &'a Value, name: &str) -> CodecResult<&'a Value> {
    map.get(name).ok_or_else(|| CodecError::missing_field(name))
}

/// Reads a required integer field from a map value.
pub fn required_integer(map: &Value, name: &str) -> CodecResult<i64> {
    required_field(map, name)?
        .as_integer()
        .ok_or_else(|| CodecError::invalid_structure(format!("field `{name}` must be an integer")))
}

/// Reads a required text field from a map value.
pub fn required_text<'a>(map: &'a Value, name: &str) -> CodecResult<&'a str> {
    required_field(map, name)?
        .as_text()
        .ok_or_else(|| CodecError::invalid_structure(format!("field `{name}` must be text")))
}
