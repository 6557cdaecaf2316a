//! Row encoding.
//!
//! Rows are JSON objects stored as CBOR. CBOR keeps integers and floats
//! distinct, so a row decodes to exactly the document that was written.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// A stored row: attribute name to value.
pub type Record = Map<String, Value>;

/// Encodes any serde value as CBOR.
///
/// # Errors
///
/// Returns `EncodingFailed` if serialization fails.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes CBOR produced by [`encode`].
///
/// # Errors
///
/// Returns `DecodingFailed` if the bytes are not valid CBOR for `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Encodes a row.
///
/// # Errors
///
/// Returns `EncodingFailed` if serialization fails.
pub fn encode_row(row: &Record) -> CodecResult<Vec<u8>> {
    encode(row)
}

/// Decodes a row.
///
/// # Errors
///
/// Returns `DecodingFailed` if the bytes are not a CBOR map.
pub fn decode_row(bytes: &[u8]) -> CodecResult<Record> {
    match decode::<Value>(bytes)? {
        Value::Object(map) => Ok(map),
        other => Err(CodecError::decoding_failed(format!(
            "expected a row object, found {other}"
        ))),
    }
}
