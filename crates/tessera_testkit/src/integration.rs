//! Cross-component integration helpers.
//!
//! [`BridgeHarness`] mirrors every write it performs in a plain map so a
//! test can check the bridge's reads against what it should hold.
//! [`contend_row`] drives several writers at one row at once.

use crate::fixtures::{prepare_table, TestBridge};
use serde_json::Value;
use std::collections::BTreeMap;
use tessera_core::{
    DeleteObject, InsertObject, Record, SearchByHashObject, StorageBridge, TableRef,
    CREATED_TIME, UPDATED_TIME,
};

/// A test harness tracking the expected rows of one table.
pub struct BridgeHarness {
    /// The bridge under test.
    pub bridge: TestBridge,
    schema: String,
    table: String,
    hash_attribute: String,
    /// Expected rows without timestamp attributes, keyed by rendered hash.
    rows: BTreeMap<String, Record>,
}

impl BridgeHarness {
    /// Creates a harness over a fresh in-memory table.
    pub fn new(schema: &str, table: &str, hash_attribute: &str) -> Self {
        Self::over(TestBridge::memory(), schema, table, hash_attribute)
    }

    /// Creates the table on `bridge` and tracks it.
    pub fn over(bridge: TestBridge, schema: &str, table: &str, hash_attribute: &str) -> Self {
        prepare_table(&bridge, schema, table, hash_attribute);
        Self {
            bridge,
            schema: schema.to_string(),
            table: table.to_string(),
            hash_attribute: hash_attribute.to_string(),
            rows: BTreeMap::new(),
        }
    }

    /// The bridge.
    pub fn bridge(&self) -> &StorageBridge {
        &self.bridge
    }

    /// Inserts records and tracks the written ones.
    pub fn insert(&mut self, records: Vec<Record>) {
        let result = self
            .bridge
            .insert(&InsertObject::new(&self.schema, &self.table, records.clone()))
            .expect("Failed to insert");
        for record in records {
            let key = render(&record[&self.hash_attribute]);
            if result.written_hashes.iter().any(|h| render(h) == key) {
                self.rows.entry(key).or_insert(record);
            }
        }
    }

    /// Updates records and merges the written ones into the tracked rows.
    pub fn update(&mut self, records: Vec<Record>) {
        let result = self
            .bridge
            .update(&InsertObject::new(&self.schema, &self.table, records.clone()))
            .expect("Failed to update");
        for record in records {
            let key = render(&record[&self.hash_attribute]);
            if result.written_hashes.iter().any(|h| render(h) == key) {
                if let Some(row) = self.rows.get_mut(&key) {
                    row.extend(record);
                }
            }
        }
    }

    /// Deletes by hash value and stops tracking the deleted rows.
    pub fn delete(&mut self, hash_values: Vec<Value>) {
        let result = self
            .bridge
            .delete(&DeleteObject::new(&self.schema, &self.table, hash_values))
            .expect("Failed to delete");
        for hash in &result.deleted_hashes {
            self.rows.remove(&render(hash));
        }
    }

    /// Number of tracked rows.
    pub fn tracked_count(&self) -> usize {
        self.rows.len()
    }

    /// Checks every tracked row against the bridge, ignoring timestamps,
    /// and that the table holds nothing else.
    pub fn verify_all(&self) {
        let hashes: Vec<Value> = self
            .rows
            .values()
            .map(|r| r[&self.hash_attribute].clone())
            .collect();
        let found = self
            .bridge
            .get_data_by_hash(&SearchByHashObject::new(&self.schema, &self.table, hashes))
            .expect("Failed to read rows");

        assert_eq!(found.len(), self.rows.len(), "row count mismatch");
        for (key, expected) in &self.rows {
            let mut actual = found
                .get(key)
                .unwrap_or_else(|| panic!("row {key} is missing"))
                .clone();
            actual.remove(CREATED_TIME);
            actual.remove(UPDATED_TIME);
            assert_eq!(&actual, expected, "row {key} mismatch");
        }

        let description = self
            .bridge
            .describe_table(&self.schema, &self.table)
            .expect("Failed to describe table");
        assert_eq!(description.record_count, self.rows.len(), "table holds extra rows");
    }
}

/// Totals of a [`contend_row`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ContentionOutcome {
    /// Rows reported written across every update.
    pub written: usize,
    /// Rows reported skipped across every update.
    pub skipped: usize,
}

/// Runs `writers` threads that each update the row `hash` `rounds` times.
/// Writer `w` sets attribute `w<w>` to the round number, so after the run
/// the row should hold `w<w> = rounds - 1` for every writer.
///
/// # Panics
///
/// Panics if any update fails.
pub fn contend_row(
    bridge: &StorageBridge,
    schema: &str,
    table: &str,
    hash: &Value,
    writers: usize,
    rounds: usize,
) -> ContentionOutcome {
    let hash_attribute = bridge
        .catalog()
        .table(&TableRef::new(schema, table))
        .expect("Failed to resolve table")
        .hash_attribute()
        .to_string();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..writers)
            .map(|w| {
                let hash_attribute = &hash_attribute;
                scope.spawn(move || {
                    let mut outcome = ContentionOutcome::default();
                    for round in 0..rounds {
                        let mut record = Record::new();
                        record.insert(hash_attribute.clone(), hash.clone());
                        record.insert(format!("w{w}"), Value::from(round));
                        let result = bridge
                            .update(&InsertObject::new(schema, table, vec![record]))
                            .expect("Failed to update contended row");
                        outcome.written += result.written_hashes.len();
                        outcome.skipped += result.skipped_hashes.len();
                    }
                    outcome
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("writer thread panicked"))
            .fold(ContentionOutcome::default(), |total, o| ContentionOutcome {
                written: total.written + o.written,
                skipped: total.skipped + o.skipped,
            })
    })
}

fn render(value: &Value) -> String {
    match tessera_codec::auto_cast_hash(value) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
