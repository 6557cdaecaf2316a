//! Order-preserving index keys.
//!
//! ## Key Format
//!
//! ```text
//! | tag (1) | body |
//!   0x00 null     (no body)
//!   0x01 bool     (1 byte: 0 or 1)
//!   0x02 number   (8 bytes: IEEE-754 bits, sign-flipped, big-endian)
//!   0x03 text     (UTF-8 bytes, no terminator)
//! ```
//!
//! Comparing two encoded keys bytewise gives the same answer as comparing
//! the values they encode, within and across types.

use crate::error::{CodecError, CodecResult};
use serde_json::{Number, Value};

/// Largest encoded key accepted by an index.
pub const MAX_KEY_SIZE: usize = 1978;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_NUMBER: u8 = 0x02;
const TAG_TEXT: u8 = 0x03;

const SIGN_BIT: u64 = 1 << 63;

/// Largest integer an f64 holds exactly; larger integral values render as
/// floats.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A scalar value as stored in an index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    /// JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any finite number. Integers and floats share one ordering.
    Number(f64),
    /// UTF-8 string.
    Text(String),
}

/// The type bracket a key falls into. Brackets occupy disjoint, ordered
/// byte ranges of a mixed index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyBracket {
    /// `null`
    Null,
    /// `false`, `true`
    Bool,
    /// numbers
    Number,
    /// strings
    Text,
}

impl KeyBracket {
    const fn tag(self) -> u8 {
        match self {
            Self::Null => TAG_NULL,
            Self::Bool => TAG_BOOL,
            Self::Number => TAG_NUMBER,
            Self::Text => TAG_TEXT,
        }
    }

    /// Smallest encoded key in this bracket (inclusive).
    #[must_use]
    pub fn lower_bound(self) -> Vec<u8> {
        vec![self.tag()]
    }

    /// First encoded key past this bracket (exclusive).
    #[must_use]
    pub fn upper_bound(self) -> Vec<u8> {
        vec![self.tag() + 1]
    }

    /// Bracket of an encoded key, if the tag is known.
    #[must_use]
    pub fn of_encoded(bytes: &[u8]) -> Option<Self> {
        match bytes.first()? {
            &TAG_NULL => Some(Self::Null),
            &TAG_BOOL => Some(Self::Bool),
            &TAG_NUMBER => Some(Self::Number),
            &TAG_TEXT => Some(Self::Text),
            _ => None,
        }
    }
}

impl IndexKey {
    /// Converts a JSON value into a key. Arrays and objects are not
    /// indexable and yield `None`.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Converts the key back into JSON. Integral numbers inside the exact
    /// f64 range come back as integers.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => number_to_value(*n),
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    /// The bracket this key sorts in.
    #[must_use]
    pub fn bracket(&self) -> KeyBracket {
        match self {
            Self::Null => KeyBracket::Null,
            Self::Bool(_) => KeyBracket::Bool,
            Self::Number(_) => KeyBracket::Number,
            Self::Text(_) => KeyBracket::Text,
        }
    }

    /// Returns the number, if this is a numeric key.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String form used by prefix, suffix and substring matching.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => render_number(*n),
            Self::Text(s) => s.clone(),
        }
    }

    /// Encodes the key.
    ///
    /// # Errors
    ///
    /// Returns `NaNForbidden` for NaN and `KeyTooLarge` when the encoding
    /// exceeds [`MAX_KEY_SIZE`].
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let bytes = match self {
            Self::Null => vec![TAG_NULL],
            Self::Bool(b) => vec![TAG_BOOL, u8::from(*b)],
            Self::Number(n) => {
                if n.is_nan() {
                    return Err(CodecError::NaNForbidden);
                }
                let mut buf = Vec::with_capacity(9);
                buf.push(TAG_NUMBER);
                buf.extend_from_slice(&order_f64(*n));
                buf
            }
            Self::Text(s) => {
                let mut buf = Vec::with_capacity(s.len() + 1);
                buf.push(TAG_TEXT);
                buf.extend_from_slice(s.as_bytes());
                buf
            }
        };
        if bytes.len() > MAX_KEY_SIZE {
            return Err(CodecError::KeyTooLarge {
                size: bytes.len(),
                max: MAX_KEY_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Decodes a key produced by [`Self::encode`].
    ///
    /// # Errors
    ///
    /// Returns an error for an empty buffer, an unknown tag, a wrong body
    /// length or invalid UTF-8.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let (&tag, body) = bytes
            .split_first()
            .ok_or_else(|| CodecError::decoding_failed("empty key"))?;
        match tag {
            TAG_NULL if body.is_empty() => Ok(Self::Null),
            TAG_BOOL if body.len() == 1 => Ok(Self::Bool(body[0] != 0)),
            TAG_NUMBER => {
                let arr: [u8; 8] = body
                    .try_into()
                    .map_err(|_| CodecError::decoding_failed("number key must be 8 bytes"))?;
                Ok(Self::Number(unorder_f64(arr)))
            }
            TAG_TEXT => String::from_utf8(body.to_vec())
                .map(Self::Text)
                .map_err(|_| CodecError::InvalidUtf8),
            TAG_NULL | TAG_BOOL => Err(CodecError::decoding_failed("malformed key body")),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

impl From<&str> for IndexKey {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<f64> for IndexKey {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for IndexKey {
    fn from(n: i64) -> Self {
        // Precision loss past 2^53 is accepted for keys.
        #[allow(clippy::cast_precision_loss)]
        Self::Number(n as f64)
    }
}

fn order_f64(n: f64) -> [u8; 8] {
    // -0.0 and 0.0 must share one key.
    let n = if n == 0.0 { 0.0 } else { n };
    let bits = n.to_bits();
    let ordered = if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits | SIGN_BIT
    };
    ordered.to_be_bytes()
}

fn unorder_f64(bytes: [u8; 8]) -> f64 {
    let ordered = u64::from_be_bytes(bytes);
    let bits = if ordered & SIGN_BIT != 0 {
        ordered & !SIGN_BIT
    } else {
        !ordered
    };
    f64::from_bits(bits)
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn number_to_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        (n as i64).to_string()
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn enc(key: IndexKey) -> Vec<u8> {
        key.encode().unwrap()
    }

    #[test]
    fn cross_type_ordering() {
        let keys = [
            enc(IndexKey::Null),
            enc(IndexKey::Bool(false)),
            enc(IndexKey::Bool(true)),
            enc(IndexKey::Number(-5.5)),
            enc(IndexKey::Number(0.0)),
            enc(IndexKey::Number(42.0)),
            enc(IndexKey::Text(String::new())),
            enc(IndexKey::Text("a".into())),
            enc(IndexKey::Text("ab".into())),
        ];
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn negative_zero_folds() {
        assert_eq!(enc(IndexKey::Number(-0.0)), enc(IndexKey::Number(0.0)));
    }

    #[test]
    fn nan_rejected() {
        assert_eq!(
            IndexKey::Number(f64::NAN).encode(),
            Err(CodecError::NaNForbidden)
        );
    }

    #[test]
    fn oversized_text_rejected() {
        let key = IndexKey::Text("x".repeat(MAX_KEY_SIZE));
        assert!(matches!(key.encode(), Err(CodecError::KeyTooLarge { .. })));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(IndexKey::decode(&[]).is_err());
        assert_eq!(IndexKey::decode(&[0x7f]), Err(CodecError::UnknownTag(0x7f)));
        assert!(IndexKey::decode(&[TAG_NUMBER, 1, 2]).is_err());
        assert_eq!(
            IndexKey::decode(&[TAG_TEXT, 0xff]),
            Err(CodecError::InvalidUtf8)
        );
    }

    #[test]
    fn integers_come_back_as_integers() {
        let key = IndexKey::from_value(&json!(7)).unwrap();
        assert_eq!(key.to_value(), json!(7));
        assert_eq!(IndexKey::Number(1.5).to_value(), json!(1.5));
    }

    #[test]
    fn containers_are_not_keys() {
        assert!(IndexKey::from_value(&json!([1, 2])).is_none());
        assert!(IndexKey::from_value(&json!({"a": 1})).is_none());
    }

    #[test]
    fn render_forms() {
        assert_eq!(IndexKey::Number(120.0).render(), "120");
        assert_eq!(IndexKey::Number(1.25).render(), "1.25");
        assert_eq!(IndexKey::Bool(true).render(), "true");
        assert_eq!(IndexKey::Null.render(), "null");
    }

    #[test]
    fn brackets_partition_encoded_space() {
        let n = enc(IndexKey::Number(f64::MAX));
        assert!(n >= KeyBracket::Number.lower_bound());
        assert!(n < KeyBracket::Number.upper_bound());
        assert_eq!(KeyBracket::of_encoded(&n), Some(KeyBracket::Number));
        assert_eq!(KeyBracket::Number.upper_bound(), KeyBracket::Text.lower_bound());
    }

    proptest! {
        #[test]
        fn number_order_is_byte_order(a in prop::num::f64::NORMAL | prop::num::f64::ZERO,
                                      b in prop::num::f64::NORMAL | prop::num::f64::ZERO) {
            let ea = enc(IndexKey::Number(a));
            let eb = enc(IndexKey::Number(b));
            prop_assert_eq!(a.partial_cmp(&b).unwrap(), ea.cmp(&eb));
        }

        #[test]
        fn text_order_is_byte_order(a in ".{0,24}", b in ".{0,24}") {
            let ea = enc(IndexKey::Text(a.clone()));
            let eb = enc(IndexKey::Text(b.clone()));
            prop_assert_eq!(a.as_bytes().cmp(b.as_bytes()), ea.cmp(&eb));
        }

        #[test]
        fn decode_inverts_encode(n in prop::num::f64::NORMAL) {
            let key = IndexKey::Number(n);
            prop_assert_eq!(IndexKey::decode(&enc(key.clone())).unwrap(), key);
        }
    }
}
