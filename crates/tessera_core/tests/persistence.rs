//! On-disk persistence, reopen and backup scenarios.

use serde_json::json;
use tessera_codec::IndexKey;
use tessera_core::{
    read_archive, restore_archive, AuditQuery, Config, CoreError, DeleteObject, Environment,
    InsertObject, ReadAuditLogObject, SearchByHashObject, SearchObject,
};
use tessera_testkit::prelude::*;

fn dog(bridge: &TestBridge, id: u64) -> Vec<tessera_core::Record> {
    bridge
        .search_by_hash(&SearchByHashObject::new("dev", "dog", vec![json!(id)]))
        .unwrap()
}

#[test]
fn rows_indexes_and_catalog_survive_reopen() {
    init_tracing();
    let bridge = TestBridge::file();
    seed_table(
        &bridge,
        "dev",
        "dog",
        "id",
        records(json!([
            {"id": 1, "name": "Penny", "age": 5},
            {"id": 2, "name": "Rex", "age": 3},
            {"id": 3, "name": "Kaylee", "age": 5}
        ])),
    );
    bridge
        .update(&InsertObject::new("dev", "dog", records(json!([{"id": 2, "age": 4}]))))
        .unwrap();
    bridge
        .delete(&DeleteObject::new("dev", "dog", vec![json!(3)]))
        .unwrap();
    let before = dog(&bridge, 2);

    let bridge = bridge.reopen();

    assert_eq!(dog(&bridge, 2), before);
    assert!(dog(&bridge, 3).is_empty());
    let fives = bridge
        .search_by_value(&SearchObject::new("dev", "dog", "age", json!(5)))
        .unwrap();
    assert_eq!(fives.len(), 1);
    assert_eq!(fives[0]["name"], json!("Penny"));

    let description = bridge.describe_table("dev", "dog").unwrap();
    assert_eq!(description.record_count, 2);
    assert!(description.attributes.contains(&"age".to_string()));

    let entries = bridge
        .read_audit_log(&ReadAuditLogObject {
            schema: "dev".into(),
            table: "dog".into(),
            query: AuditQuery::Timestamp { from: None, to: None },
        })
        .unwrap();
    assert_eq!(entries.len(), 3);
}

#[test]
fn drops_survive_reopen() {
    let bridge = TestBridge::file();
    seed_table(&bridge, "dev", "dog", "id", records(json!([{"id": 1, "age": 2}])));
    seed_table(&bridge, "tmp", "cat", "id", records(json!([{"id": 1}])));
    bridge.drop_attribute("dev", "dog", "age").unwrap();
    bridge.drop_schema("tmp").unwrap();
    let root = bridge.path().unwrap();
    assert!(!root.join("tmp").exists());

    let bridge = bridge.reopen();
    assert!(!bridge.catalog().has_schema("tmp"));
    assert!(!dog(&bridge, 1)[0].contains_key("age"));
    let err = bridge
        .search_by_value(&SearchObject::new("dev", "dog", "age", json!(2)))
        .unwrap_err();
    assert!(matches!(err, CoreError::AttributeNotFound { .. }));
}

#[test]
fn stores_land_under_their_roots() {
    with_file_bridge(|bridge, root| {
        seed_table(bridge, "dev", "dog", "id", records(json!([{"id": 1}])));
        bridge.flush().unwrap();
        assert!(root.join("dev").join("dog.tdb").is_file());
        assert!(root
            .join("transactions")
            .join("dev")
            .join("dog.tdb")
            .is_file());
    });
}

#[test]
fn table_paths_override_the_schema_directory() {
    let dir = tempfile::tempdir().unwrap();
    let elsewhere = dir.path().join("fast-disk");
    let config = Config::at(dir.path().join("db")).table_path("dev", "dog", &elsewhere);
    let bridge = tessera_core::StorageBridge::init(config).unwrap();
    seed_table(&bridge, "dev", "dog", "id", records(json!([{"id": 1}])));
    seed_table(&bridge, "dev", "cat", "id", records(json!([{"id": 1}])));
    bridge.flush().unwrap();

    assert!(elsewhere.join("dog.tdb").is_file());
    assert!(dir.path().join("db").join("dev").join("cat.tdb").is_file());
}

#[test]
fn table_backup_restores_to_a_readable_store() {
    let bridge = scenarios::dogs(20);
    let mut archive = Vec::new();
    let metadata = bridge.backup_table("dev", "dog", true, &mut archive).unwrap();
    assert_eq!(metadata.entry_count, 2);
    assert_eq!(metadata.size, archive.len() as u64);

    let parsed = read_archive(&mut archive.as_slice()).unwrap();
    let names: Vec<&str> = parsed.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["data/dev/dog.tdb", "audit/dev/dog.tdb"]);

    let dir = tempfile::tempdir().unwrap();
    let paths = restore_archive(&mut archive.as_slice(), dir.path()).unwrap();
    assert_eq!(paths.len(), 2);

    let restored = Environment::open_file("restored", &paths[0], false).unwrap();
    let txn = restored.read_txn();
    assert_eq!(txn.entry_count("id").unwrap(), 20);
    assert_eq!(txn.count_dups("age", &IndexKey::Number(3.0).encode().unwrap()).unwrap(), 2);
}

#[test]
fn schema_backup_covers_every_table() {
    let bridge = scenarios::dogs(3);
    seed_table(&bridge, "dev", "cat", "id", records(json!([{"id": 1}])));
    let mut archive = Vec::new();
    let metadata = bridge.backup_schema("dev", &mut archive).unwrap();
    assert_eq!(metadata.entry_count, 4);

    let mut archive_without_audit = Vec::new();
    bridge
        .backup_table("dev", "cat", false, &mut archive_without_audit)
        .unwrap();
    let parsed = read_archive(&mut archive_without_audit.as_slice()).unwrap();
    assert_eq!(parsed.entries.len(), 1);

    assert!(bridge
        .backup_schema("missing", &mut Vec::new())
        .unwrap_err()
        .is_not_found());
}
