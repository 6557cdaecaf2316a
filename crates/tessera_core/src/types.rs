//! Core type definitions for tessera.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tessera_codec::{auto_cast_hash, CodecError, IndexKey};
use std::time::{SystemTime, UNIX_EPOCH};

/// Schema that holds the catalog tables. Its tables get no timestamp
/// attributes.
pub const SYSTEM_SCHEMA: &str = "system";

/// Attribute stamped with the time a row was first written.
pub const CREATED_TIME: &str = "__createdtime__";

/// Attribute stamped with the time a row was last written.
pub const UPDATED_TIME: &str = "__updatedtime__";

/// Names one table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
}

impl TableRef {
    /// Creates a table reference.
    #[must_use]
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Whether this is a catalog table.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.schema == SYSTEM_SCHEMA
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// A validated primary-key value and its encoded key.
#[derive(Debug, Clone, PartialEq)]
pub struct HashValue {
    /// Cast value, as stored in the row.
    pub value: Value,
    /// Encoded primary-index key.
    pub key: Vec<u8>,
}

impl HashValue {
    /// Casts and validates a hash value.
    ///
    /// A string holding a canonical integer becomes that number. The result
    /// must be a non-empty string without `/`, or a number, and must encode
    /// to a key of acceptable size.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the value cannot be a hash.
    pub fn parse(value: &Value) -> CoreResult<Self> {
        let value = auto_cast_hash(value);
        match &value {
            Value::String(s) if s.is_empty() => {
                return Err(CoreError::validation("hash value cannot be empty"));
            }
            Value::String(s) if s.contains('/') => {
                return Err(CoreError::validation(format!(
                    "hash value '{s}' cannot contain '/'"
                )));
            }
            Value::String(_) | Value::Number(_) => {}
            other => {
                return Err(CoreError::validation(format!(
                    "hash value {other} must be a string or number"
                )));
            }
        }
        let key = IndexKey::from_value(&value)
            .ok_or_else(|| CoreError::validation(format!("invalid hash value {value}")))?
            .encode()
            .map_err(|e| match e {
                CodecError::KeyTooLarge { size, max } => CoreError::validation(format!(
                    "hash value of {size} bytes exceeds the maximum of {max}"
                )),
                other => other.into(),
            })?;
        Ok(Self { value, key })
    }

    /// Rebuilds a hash value from its encoded key.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the key is malformed.
    pub fn from_key(key: &[u8]) -> CoreResult<Self> {
        Ok(Self {
            value: IndexKey::decode(key)?.to_value(),
            key: key.to_vec(),
        })
    }

    /// String form, used as a map key and in log lines.
    #[must_use]
    pub fn render(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Kind of write recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Rows inserted.
    Insert,
    /// Existing rows changed.
    Update,
    /// Rows inserted or changed.
    Upsert,
    /// Rows removed.
    Delete,
}

impl OperationKind {
    /// Lowercase name, as used in result messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }

    /// Past-tense verb for result messages.
    #[must_use]
    pub const fn past_tense(self) -> &'static str {
        match self {
            Self::Insert => "inserted",
            Self::Update => "updated",
            Self::Upsert => "upserted",
            Self::Delete => "deleted",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strictly increasing transaction timestamps in epoch milliseconds.
///
/// Two calls in the same millisecond, or a wall clock stepping backwards,
/// still yield increasing values: the second is bumped a microsecond past
/// the first.
#[derive(Debug, Default)]
pub struct TxnClock {
    last: Mutex<f64>,
}

impl TxnClock {
    /// Creates a clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp.
    pub fn now(&self) -> f64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_secs_f64() * 1000.0)
            .floor();
        let mut last = self.last.lock();
        let next = if wall > *last { wall } else { *last + 0.001 };
        *last = next;
        next
    }
}
