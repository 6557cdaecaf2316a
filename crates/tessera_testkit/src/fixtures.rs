//! Test fixtures and bridge helpers.
//!
//! Provides convenience functions for setting up test bridges
//! and common test scenarios.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tessera_core::{Config, CreateTableObject, InsertObject, Record, StorageBridge, WriteResult};

/// A test bridge with automatic cleanup.
pub struct TestBridge {
    /// The bridge instance.
    pub bridge: StorageBridge,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestBridge {
    /// Creates an in-memory bridge.
    pub fn memory() -> Self {
        Self::with_config(Config::in_memory())
    }

    /// Creates an in-memory bridge from a customized configuration.
    pub fn with_config(config: Config) -> Self {
        Self {
            bridge: StorageBridge::init(config).expect("Failed to init in-memory bridge"),
            temp_dir: None,
        }
    }

    /// Creates a bridge storing its files in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let bridge =
            StorageBridge::init(Config::at(temp_dir.path())).expect("Failed to init file bridge");
        Self {
            bridge,
            temp_dir: Some(temp_dir),
        }
    }

    /// Root directory if file-based, `None` if in memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Drops the bridge and initializes a new one over the same directory.
    ///
    /// # Panics
    ///
    /// Panics for an in-memory bridge.
    pub fn reopen(self) -> Self {
        let temp_dir = self.temp_dir.expect("Only file bridges can be reopened");
        self.bridge.flush().expect("Failed to flush bridge");
        drop(self.bridge);
        let bridge =
            StorageBridge::init(Config::at(temp_dir.path())).expect("Failed to reopen bridge");
        Self {
            bridge,
            temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestBridge {
    type Target = StorageBridge;

    fn deref(&self) -> &Self::Target {
        &self.bridge
    }
}

/// Runs a test with a temporary in-memory bridge.
pub fn with_temp_bridge<F, R>(f: F) -> R
where
    F: FnOnce(&StorageBridge) -> R,
{
    let test_bridge = TestBridge::memory();
    f(&test_bridge.bridge)
}

/// Runs a test with a bridge stored in a temporary directory.
pub fn with_file_bridge<F, R>(f: F) -> R
where
    F: FnOnce(&StorageBridge, &Path) -> R,
{
    let test_bridge = TestBridge::file();
    let path = test_bridge.path().expect("File bridge should have a path");
    f(&test_bridge.bridge, &path)
}

/// Converts a JSON array of objects into records.
///
/// # Panics
///
/// Panics if `values` is not an array of objects.
pub fn records(values: Value) -> Vec<Record> {
    values
        .as_array()
        .expect("records must be a JSON array")
        .iter()
        .map(|v| v.as_object().expect("each record must be an object").clone())
        .collect()
}

/// Converts one JSON object into a record.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn record(value: Value) -> Record {
    value.as_object().expect("record must be an object").clone()
}

/// Creates the schema if needed, then an empty table.
pub fn prepare_table(bridge: &StorageBridge, schema: &str, table: &str, hash_attribute: &str) {
    if !bridge.catalog().has_schema(schema) {
        bridge.create_schema(schema).expect("Failed to create schema");
    }
    bridge
        .create_table(&CreateTableObject::new(schema, table, hash_attribute))
        .expect("Failed to create table");
}

/// Prepares the table and inserts `rows`, which must not be empty.
pub fn seed_table(
    bridge: &StorageBridge,
    schema: &str,
    table: &str,
    hash_attribute: &str,
    rows: Vec<Record>,
) -> WriteResult {
    prepare_table(bridge, schema, table, hash_attribute);
    bridge
        .insert(&InsertObject::new(schema, table, rows))
        .expect("Failed to insert seed rows")
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use serde_json::json;

    /// A bridge with `dev.dog` holding `count` dogs: ids `1..=count`,
    /// names `dog-<id>`, ages `id % 10`.
    pub fn dogs(count: usize) -> TestBridge {
        let test_bridge = TestBridge::memory();
        let rows = (1..=count)
            .map(|i| record(json!({"id": i, "name": format!("dog-{i}"), "age": i % 10})))
            .collect();
        seed_table(&test_bridge, "dev", "dog", "id", rows);
        test_bridge
    }

    /// A bridge with `shop.orders` holding ids 1 to 3 named `a`, `b`, `c`.
    pub fn orders() -> TestBridge {
        let test_bridge = TestBridge::memory();
        seed_table(
            &test_bridge,
            "shop",
            "orders",
            "id",
            records(json!([
                {"id": 1, "name": "a"},
                {"id": 2, "name": "b"},
                {"id": 3, "name": "c"}
            ])),
        );
        test_bridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_core::SearchByHashObject;

    #[test]
    fn memory_bridge_seeds() {
        let test_bridge = scenarios::dogs(5);
        let description = test_bridge.describe_table("dev", "dog").unwrap();
        assert_eq!(description.record_count, 5);
    }

    #[test]
    fn file_bridge_reopens_with_data() {
        let test_bridge = scenarios::orders();
        assert!(test_bridge.path().is_none());

        let file = TestBridge::file();
        seed_table(&file, "dev", "dog", "id", records(json!([{"id": 7}])));
        let file = file.reopen();
        let rows = file
            .search_by_hash(&SearchByHashObject::new("dev", "dog", vec![json!(7)]))
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn with_temp_bridge_runs() {
        let schemas = with_temp_bridge(|bridge| {
            bridge.create_schema("dev").unwrap();
            bridge.catalog().schema_names()
        });
        assert!(schemas.contains(&"dev".to_string()));
    }
}
