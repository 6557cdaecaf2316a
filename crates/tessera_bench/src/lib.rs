//! Benchmark utilities.

use serde_json::json;
use tessera_core::{Config, InsertObject, Record, StorageBridge};
use tessera_testkit::{prepare_table, record};

/// A dog row with a payload of roughly `payload` bytes.
pub fn dog(id: usize, payload: usize) -> Record {
    record(json!({
        "id": id,
        "name": format!("dog-{id}"),
        "age": id % 20,
        "notes": "x".repeat(payload),
    }))
}

/// Rows `first..first + count`.
pub fn dogs(first: usize, count: usize, payload: usize) -> Vec<Record> {
    (first..first + count).map(|id| dog(id, payload)).collect()
}

/// An in-memory bridge with `dev.dog` holding `count` rows, inserted in
/// batches of 1000.
pub fn seeded_bridge(count: usize) -> StorageBridge {
    let bridge = StorageBridge::init(Config::in_memory().audit_enabled(false))
        .expect("Failed to init bridge");
    prepare_table(&bridge, "dev", "dog", "id");
    let mut first = 0;
    while first < count {
        let batch = (count - first).min(1000);
        bridge
            .insert(&InsertObject::new("dev", "dog", dogs(first, batch, 32)))
            .expect("Failed to seed rows");
        first += batch;
    }
    bridge
}
