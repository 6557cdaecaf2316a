//! Request and result objects exchanged with the protocol layer.
//!
//! Requests arrive already authorized; the bridge still validates every
//! field it relies on before touching storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_codec::Record;

/// Who issued a write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// User name recorded in the audit log.
    #[serde(default)]
    pub user: Option<String>,
    /// Node or client the request came from.
    #[serde(default)]
    pub source: Option<String>,
}

impl Origin {
    /// Origin naming only a user.
    #[must_use]
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            user: Some(name.into()),
            source: None,
        }
    }
}

/// Insert, update or upsert request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertObject {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Primary-key attribute; defaults to the table's.
    #[serde(default)]
    pub hash_attribute: Option<String>,
    /// Records to write.
    pub records: Vec<Record>,
    /// Issuer.
    #[serde(default)]
    pub origin: Option<Origin>,
}

impl InsertObject {
    /// Creates a request.
    #[must_use]
    pub fn new(schema: &str, table: &str, records: Vec<Record>) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            hash_attribute: None,
            records,
            origin: None,
        }
    }

    /// Sets the issuer.
    #[must_use]
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Delete request. When `hash_values` is empty the hashes are read from
/// `records` (deletes planned by a SQL front end).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteObject {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Hash values to delete.
    #[serde(default)]
    pub hash_values: Vec<Value>,
    /// Full records whose hashes to delete.
    #[serde(default)]
    pub records: Vec<Record>,
    /// Issuer.
    #[serde(default)]
    pub origin: Option<Origin>,
}

impl DeleteObject {
    /// Creates a request deleting `hash_values`.
    #[must_use]
    pub fn new(schema: &str, table: &str, hash_values: Vec<Value>) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            hash_values,
            records: Vec::new(),
            origin: None,
        }
    }
}

/// Explicit comparison, overriding inference from the search value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    /// `value <= x <= end_value`
    Between,
    /// `x > value`
    Greater,
    /// `x >= value`
    GreaterOrEq,
    /// `x < value`
    Less,
    /// `x <= value`
    LessOrEq,
}

/// Single-attribute search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchObject {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Attribute whose index is searched.
    pub search_attribute: String,
    /// Value, pattern (`*`/`%` wildcards) or range start.
    pub search_value: Value,
    /// Range end for `between`.
    #[serde(default)]
    pub end_value: Option<Value>,
    /// Explicit comparison.
    #[serde(default)]
    pub comparator: Option<Comparator>,
    /// Attributes to return; `*` returns whole rows.
    #[serde(default = "all_attributes")]
    pub get_attributes: Vec<String>,
    /// Iterate the index backwards.
    #[serde(default)]
    pub reverse: bool,
    /// Maximum rows returned.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Rows skipped before the first returned.
    #[serde(default)]
    pub offset: Option<usize>,
}

impl SearchObject {
    /// Creates a search for `attribute` against `value`, returning whole
    /// rows.
    #[must_use]
    pub fn new(schema: &str, table: &str, attribute: &str, value: Value) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            search_attribute: attribute.to_string(),
            search_value: value,
            end_value: None,
            comparator: None,
            get_attributes: all_attributes(),
            reverse: false,
            limit: None,
            offset: None,
        }
    }

    /// Sets an explicit comparator.
    #[must_use]
    pub fn comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Sets the range end.
    #[must_use]
    pub fn end_value(mut self, end: Value) -> Self {
        self.end_value = Some(end);
        self
    }

    /// Sets the projected attributes.
    #[must_use]
    pub fn get_attributes(mut self, attributes: &[&str]) -> Self {
        self.get_attributes = attributes.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Iterates backwards.
    #[must_use]
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Sets the limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the offset.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Lookup by primary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchByHashObject {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Ids to fetch, in the order results are returned.
    pub hash_values: Vec<Value>,
    /// Attributes to return; `*` returns whole rows.
    #[serde(default = "all_attributes")]
    pub get_attributes: Vec<String>,
}

impl SearchByHashObject {
    /// Creates a lookup returning whole rows.
    #[must_use]
    pub fn new(schema: &str, table: &str, hash_values: Vec<Value>) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            hash_values,
            get_attributes: all_attributes(),
        }
    }
}

/// One condition of a multi-condition search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCondition {
    /// Attribute compared.
    #[serde(alias = "attribute")]
    pub search_attribute: String,
    /// Value or pattern.
    #[serde(alias = "value")]
    pub search_value: Value,
    /// Range end for `between`.
    #[serde(default)]
    pub end_value: Option<Value>,
    /// Explicit comparison.
    #[serde(default)]
    pub comparator: Option<Comparator>,
}

impl SearchCondition {
    /// Condition inferring its comparison from `value`.
    #[must_use]
    pub fn new(attribute: &str, value: Value) -> Self {
        Self {
            search_attribute: attribute.to_string(),
            search_value: value,
            end_value: None,
            comparator: None,
        }
    }

    /// Sets an explicit comparator.
    #[must_use]
    pub fn comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Sets the range end.
    #[must_use]
    pub fn end_value(mut self, end: Value) -> Self {
        self.end_value = Some(end);
        self
    }
}

/// How conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    /// Every condition must hold.
    #[default]
    And,
    /// Any condition may hold.
    Or,
}

/// Result ordering for multi-condition searches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Attribute to order by.
    pub attribute: String,
    /// Descending instead of ascending.
    #[serde(default)]
    pub descending: bool,
}

/// Multi-condition search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchByConditionsObject {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Conditions.
    pub conditions: Vec<SearchCondition>,
    /// Combination.
    #[serde(default)]
    pub operator: LogicalOperator,
    /// Rows skipped.
    #[serde(default)]
    pub offset: Option<usize>,
    /// Maximum rows.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Attributes to return.
    #[serde(default = "all_attributes")]
    pub get_attributes: Vec<String>,
    /// Optional ordering.
    #[serde(default)]
    pub sort: Option<SortSpec>,
}

impl SearchByConditionsObject {
    /// Creates a search returning whole rows.
    #[must_use]
    pub fn new(
        schema: &str,
        table: &str,
        operator: LogicalOperator,
        conditions: Vec<SearchCondition>,
    ) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            conditions,
            operator,
            offset: None,
            limit: None,
            get_attributes: all_attributes(),
            sort: None,
        }
    }
}

/// Audit retention request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteBeforeObject {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Entries strictly older than this (epoch milliseconds) are removed.
    pub timestamp: f64,
}

/// Which audit entries to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "search_type", content = "search_values", rename_all = "snake_case")]
pub enum AuditQuery {
    /// Entries in an inclusive timestamp range.
    Timestamp {
        /// Lower bound.
        #[serde(default)]
        from: Option<f64>,
        /// Upper bound.
        #[serde(default)]
        to: Option<f64>,
    },
    /// Entries by any of these users.
    Username(Vec<String>),
    /// Entries touching any of these hash values.
    HashValue(Vec<Value>),
}

/// Audit read request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadAuditLogObject {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Selection.
    pub query: AuditQuery,
}

/// Table creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTableObject {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Primary-key attribute.
    pub hash_attribute: String,
    /// Cluster nodes holding the table.
    #[serde(default)]
    pub residence: Vec<String>,
}

impl CreateTableObject {
    /// Creates a request.
    #[must_use]
    pub fn new(schema: &str, table: &str, hash_attribute: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            hash_attribute: hash_attribute.to_string(),
            residence: Vec::new(),
        }
    }
}

/// Result of an insert, update or upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    /// Human-readable summary.
    pub message: String,
    /// Hashes written.
    pub written_hashes: Vec<Value>,
    /// Hashes skipped (duplicates, existing rows on insert, missing rows
    /// on update).
    pub skipped_hashes: Vec<Value>,
    /// Transaction timestamp.
    pub txn_time: f64,
    /// Attributes created by this write.
    pub new_attributes: Vec<String>,
}

/// Result of a delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResult {
    /// Human-readable summary.
    pub message: String,
    /// Hashes removed.
    pub deleted_hashes: Vec<Value>,
    /// Hashes not found.
    pub skipped_hashes: Vec<Value>,
    /// Transaction timestamp; `None` when nothing was requested.
    pub txn_time: Option<f64>,
}

/// Result of audit retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteBeforeResult {
    /// Human-readable summary.
    pub message: String,
    /// Oldest timestamp removed.
    pub start_timestamp: Option<f64>,
    /// Newest timestamp removed.
    pub end_timestamp: Option<f64>,
    /// Entries removed.
    pub transactions_deleted: u64,
    /// Passes that removed at least one entry.
    pub passes: u32,
}

fn all_attributes() -> Vec<String> {
    vec!["*".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_object_defaults() {
        let search: SearchObject = serde_json::from_value(json!({
            "schema": "dev",
            "table": "dog",
            "search_attribute": "name",
            "search_value": "Penny"
        }))
        .unwrap();
        assert_eq!(search.get_attributes, vec!["*"]);
        assert!(!search.reverse);
        assert!(search.comparator.is_none());
    }

    #[test]
    fn conditions_accept_short_field_names() {
        let search: SearchByConditionsObject = serde_json::from_value(json!({
            "schema": "dev",
            "table": "orders",
            "operator": "or",
            "conditions": [
                {"attribute": "name", "value": "a"},
                {"search_attribute": "qty", "search_value": 3, "comparator": "greater_or_eq"}
            ]
        }))
        .unwrap();
        assert_eq!(search.operator, LogicalOperator::Or);
        assert_eq!(search.conditions[0].search_attribute, "name");
        assert_eq!(search.conditions[1].comparator, Some(Comparator::GreaterOrEq));
    }

    #[test]
    fn audit_query_shape() {
        let query: AuditQuery = serde_json::from_value(json!({
            "search_type": "username",
            "search_values": ["admin"]
        }))
        .unwrap();
        assert!(matches!(query, AuditQuery::Username(users) if users == ["admin"]));
    }
}
