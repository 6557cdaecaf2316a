//! Schema, table and attribute lifecycle scenarios.

use serde_json::json;
use tessera_codec::IndexKey;
use tessera_core::{
    AuditQuery, CoreError, CreateTableObject, EnvKind, HashValue, InsertObject,
    ReadAuditLogObject, SearchByHashObject, SearchObject, TableRef, CREATED_TIME, UPDATED_TIME,
};
use tessera_testkit::prelude::*;

#[test]
fn dropping_a_table_twice_succeeds() {
    let bridge = scenarios::dogs(5);
    let table = TableRef::new("dev", "dog");
    assert!(bridge.registry().exists(&table, EnvKind::Data));
    assert!(bridge.registry().exists(&table, EnvKind::Audit));

    bridge.drop_table("dev", "dog").unwrap();
    bridge.drop_table("dev", "dog").unwrap();

    assert!(!bridge.registry().exists(&table, EnvKind::Data));
    assert!(!bridge.registry().exists(&table, EnvKind::Audit));
    assert!(bridge.describe_table("dev", "dog").unwrap_err().is_not_found());
}

#[test]
fn dropped_table_can_be_recreated_empty() {
    let bridge = scenarios::dogs(5);
    bridge.drop_table("dev", "dog").unwrap();
    let description = bridge
        .create_table(&CreateTableObject::new("dev", "dog", "id"))
        .unwrap();
    assert_eq!(description.record_count, 0);
    assert_eq!(description.attributes.len(), 3);
}

#[test]
fn dropping_an_attribute_removes_it_from_every_row() {
    let bridge = scenarios::dogs(50);
    bridge.drop_attribute("dev", "dog", "age").unwrap();

    let rows = bridge
        .search_by_value(&SearchObject::new("dev", "dog", "name", json!("*")))
        .unwrap();
    assert_eq!(rows.len(), 50);
    for row in &rows {
        assert!(!row.contains_key("age"));
        assert!(row.contains_key("name"));
        assert!(row.contains_key(CREATED_TIME));
    }

    let description = bridge.describe_table("dev", "dog").unwrap();
    assert!(!description.attributes.contains(&"age".to_string()));
    let err = bridge
        .search_by_value(&SearchObject::new("dev", "dog", "age", json!(1)))
        .unwrap_err();
    assert!(matches!(err, CoreError::AttributeNotFound { .. }));
}

#[test]
fn compaction_keeps_update_timestamps() {
    let bridge = scenarios::dogs(3);
    let before = bridge
        .search_by_hash(&SearchByHashObject::new("dev", "dog", vec![json!(2)]))
        .unwrap();
    bridge.drop_attribute("dev", "dog", "name").unwrap();
    let after = bridge
        .search_by_hash(&SearchByHashObject::new("dev", "dog", vec![json!(2)]))
        .unwrap();

    let mut expected = before[0].clone();
    expected.remove("name");
    assert_eq!(after[0], expected);
    assert_eq!(after[0][UPDATED_TIME], before[0][UPDATED_TIME]);
}

#[test]
fn dropped_attribute_comes_back_on_write() {
    let bridge = scenarios::dogs(3);
    bridge.drop_attribute("dev", "dog", "age").unwrap();
    let result = bridge
        .insert(&InsertObject::new(
            "dev",
            "dog",
            records(json!([{"id": 10, "age": 4}])),
        ))
        .unwrap();
    assert_eq!(result.new_attributes, vec!["age"]);

    let rows = bridge
        .search_by_value(&SearchObject::new("dev", "dog", "age", json!(4)))
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn hash_attribute_cannot_be_dropped() {
    let bridge = scenarios::dogs(1);
    let err = bridge.drop_attribute("dev", "dog", "id").unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
}

#[test]
fn dropping_a_schema_drops_its_tables() {
    let bridge = scenarios::dogs(3);
    seed_table(&bridge, "dev", "cat", "cat_id", records(json!([{"cat_id": "tom"}])));
    seed_table(&bridge, "other", "bird", "id", records(json!([{"id": 1}])));

    bridge.drop_schema("dev").unwrap();

    assert!(!bridge.catalog().has_schema("dev"));
    assert!(!bridge
        .registry()
        .exists(&TableRef::new("dev", "cat"), EnvKind::Data));
    assert!(bridge.drop_schema("dev").unwrap_err().is_not_found());

    let all = bridge.describe_all().unwrap();
    assert!(!all.contains_key("dev"));
    assert_eq!(all["other"]["bird"].record_count, 1);
}

#[test]
fn creating_twice_conflicts() {
    let bridge = scenarios::dogs(1);
    assert!(bridge.create_schema("dev").unwrap_err().is_already_exists());
    assert!(bridge
        .create_table(&CreateTableObject::new("dev", "dog", "id"))
        .unwrap_err()
        .is_already_exists());
    bridge.create_attribute("dev", "dog", "color").unwrap();
    assert!(bridge
        .create_attribute("dev", "dog", "color")
        .unwrap_err()
        .is_already_exists());
}

#[test]
fn tables_need_a_schema() {
    let bridge = TestBridge::memory();
    let err = bridge
        .create_table(&CreateTableObject::new("nowhere", "dog", "id"))
        .unwrap_err();
    assert!(matches!(err, CoreError::SchemaNotFound { .. }));
}

#[test]
fn schema_cannot_shadow_the_audit_root() {
    with_file_bridge(|bridge, root| {
        seed_table(bridge, "dev", "dog", "id", records(json!([{"id": 1}])));
        bridge.flush().unwrap();
        let audit = root.join("transactions").join("dev").join("dog.tdb");
        assert!(audit.is_file());

        let err = bridge.create_schema("transactions").unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert!(!bridge.catalog().has_schema("transactions"));
        assert!(bridge.drop_schema("transactions").is_err());

        assert!(audit.is_file());
        let entries = bridge
            .read_audit_log(&ReadAuditLogObject {
                schema: "dev".into(),
                table: "dog".into(),
                query: AuditQuery::HashValue(vec![json!(1)]),
            })
            .unwrap();
        assert_eq!(entries.len(), 1);
    });
}

#[test]
fn concurrent_updates_to_one_row_are_never_skipped() {
    let bridge = scenarios::dogs(1);
    let outcome = contend_row(&bridge, "dev", "dog", &json!(1), 8, 50);
    assert_eq!(outcome.skipped, 0);
    assert_eq!(outcome.written, 400);

    let row = &bridge
        .search_by_hash(&SearchByHashObject::new("dev", "dog", vec![json!(1)]))
        .unwrap()[0];
    assert_eq!(row["name"], json!("dog-1"));
    for w in 0..8 {
        assert_eq!(row[&format!("w{w}")], json!(49));
        let found = bridge
            .search_by_value(&SearchObject::new("dev", "dog", &format!("w{w}"), json!(49)))
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}

#[test]
fn snapshot_outlives_a_dropped_attribute() {
    let bridge = scenarios::dogs(5);
    let env = bridge
        .registry()
        .open(&TableRef::new("dev", "dog"), EnvKind::Data)
        .unwrap();
    let txn = env.read_txn();

    bridge.drop_attribute("dev", "dog", "age").unwrap();

    let age = IndexKey::Number(5.0).encode().unwrap();
    let hash = HashValue::parse(&json!(5)).unwrap();
    assert!(txn.has_dbi("age"));
    assert_eq!(txn.get_dups("age", &age).unwrap(), vec![hash.key.clone()]);
    let old = tessera_codec::decode_row(&txn.get("id", &hash.key).unwrap().unwrap()).unwrap();
    assert_eq!(old["age"], json!(5));
    drop(txn);

    let fresh = env.read_txn();
    assert!(!fresh.has_dbi("age"));
    let row = tessera_codec::decode_row(&fresh.get("id", &hash.key).unwrap().unwrap()).unwrap();
    assert!(!row.contains_key("age"));
}
