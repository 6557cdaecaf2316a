//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records, hash values and search
//! values that the bridge accepts.

use proptest::prelude::*;
use serde_json::{json, Value};
use tessera_core::Record;

/// Strategy for schema, table and attribute names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for valid hash values: non-negative integers or strings
/// without `/` that do not look like integers.
pub fn hash_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0u32..1_000_000).prop_map(|n| json!(n)),
        prop::string::string_regex("[a-z][a-z0-9-]{0,20}")
            .expect("Invalid regex")
            .prop_map(Value::String),
    ]
}

/// Strategy for indexable scalars.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-10_000i64..10_000).prop_map(|n| json!(n)),
        (-1.0e6f64..1.0e6).prop_map(|f| json!(f)),
        prop::string::string_regex("[A-Za-z ]{0,12}")
            .expect("Invalid regex")
            .prop_map(Value::String),
    ]
}

/// Strategy for a record with the given hash attribute and up to four
/// other attributes drawn from a small fixed set, so records in one batch
/// overlap.
pub fn record_strategy(hash_attribute: &'static str) -> impl Strategy<Value = Record> {
    (
        hash_value_strategy(),
        prop::collection::btree_map(
            prop::sample::select(vec!["name", "age", "color", "owner"]),
            scalar_strategy(),
            0..4,
        ),
    )
        .prop_map(move |(hash, attributes)| {
            let mut record = Record::new();
            record.insert(hash_attribute.to_string(), hash);
            for (name, value) in attributes {
                record.insert(name.to_string(), value);
            }
            record
        })
}

/// Strategy for a batch of records with distinct hash values.
pub fn distinct_records_strategy(
    hash_attribute: &'static str,
    max: usize,
) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(record_strategy(hash_attribute), 1..max).prop_map(move |rows| {
        let mut seen = std::collections::HashSet::new();
        rows.into_iter()
            .filter(|r| seen.insert(r[hash_attribute].to_string()))
            .collect()
    })
}
