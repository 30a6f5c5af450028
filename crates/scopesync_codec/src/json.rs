//! JSON codec backed by `serde_json`.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use crate::{Codec, CodecKind};

/// Encodes values as JSON.
///
/// Human readable, which makes it handy when inspecting a spooled session
/// directory by hand. JSON has no representation for `NaN` or infinities, so
/// such values are rejected at encode time instead of being silently nulled.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Json
    }

    fn encode(&self, value: &Value) -> CodecResult<Vec<u8>> {
        if !value.is_finite() {
            return Err(CodecError::NonFiniteFloat { codec: "json" });
        }
        serde_json::to_vec(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Value> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}
