//! CBOR codec backed by `ciborium`.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use crate::{Codec, CodecKind};

/// Encodes values as CBOR.
///
/// This is the default codec for spooled batch parts: it is compact and
/// round-trips every [`Value`], including non-finite floats.
#[derive(Debug, Default, Clone, Copy)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Cbor
    }

    fn encode(&self, value: &Value) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(value, &mut buf)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Value> {
        ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}
