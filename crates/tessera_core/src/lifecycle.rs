//! Schema, table and attribute lifecycle.
//!
//! Creation writes the catalog row first and then the physical DBI or
//! environment; drops remove the catalog row first. Cascading drops treat
//! anything already gone as done, so a drop interrupted halfway can simply
//! be repeated.

use crate::audit::AuditLog;
use crate::catalog::{validate_name, SchemaCatalog, TableMeta};
use crate::config::Config;
use crate::env::{BatchOutcome, DbiFlags, Environment, WriteBatch};
use crate::error::{CoreError, CoreResult};
use crate::registry::{EnvKind, EnvironmentRegistry};
use crate::request::CreateTableObject;
use crate::stats::BridgeStats;
use crate::types::{HashValue, TableRef, CREATED_TIME, SYSTEM_SCHEMA, UPDATED_TIME};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use tessera_codec::{decode_row, encode_row};
use tracing::{debug, info, warn};

/// DBI flags for an attribute's index.
#[must_use]
pub fn attribute_flags(attribute: &str) -> DbiFlags {
    if attribute == CREATED_TIME || attribute == UPDATED_TIME {
        DbiFlags::NUMERIC_INDEX
    } else {
        DbiFlags::INDEX
    }
}

/// Table summary returned by the describe operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescription {
    /// Catalog id.
    pub id: String,
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub name: String,
    /// Primary-key attribute.
    pub hash_attribute: String,
    /// Cluster nodes holding the table.
    pub residence: Vec<String>,
    /// Attribute names in order.
    pub attributes: Vec<String>,
    /// Rows currently stored.
    pub record_count: usize,
    /// Creation time.
    pub created_time: f64,
}

/// A row read for attribute compaction.
#[derive(Debug, Clone)]
pub(crate) struct RowVersion {
    key: Vec<u8>,
    version: u64,
    row: tessera_codec::Record,
}

/// Catalog and physical lifecycle operations.
pub struct Lifecycle<'a> {
    config: &'a Config,
    catalog: &'a SchemaCatalog,
    registry: &'a EnvironmentRegistry,
    stats: &'a BridgeStats,
}

impl<'a> Lifecycle<'a> {
    /// Creates a lifecycle view.
    #[must_use]
    pub fn new(
        config: &'a Config,
        catalog: &'a SchemaCatalog,
        registry: &'a EnvironmentRegistry,
        stats: &'a BridgeStats,
    ) -> Self {
        Self {
            config,
            catalog,
            registry,
            stats,
        }
    }

    fn audit(&self) -> AuditLog<'a> {
        AuditLog::new(self.config, self.catalog, self.registry, self.stats)
    }

    /// Creates a schema.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a bad name or one whose directories would
    /// hold a configured root, `Conflict` if it exists.
    pub fn create_schema(&self, schema: &str) -> CoreResult<()> {
        validate_name("schema", schema)?;
        self.registry.check_schema_dirs(schema)?;
        self.catalog.create_schema(schema)?;
        Ok(())
    }

    /// Creates a table with its primary index, timestamp indexes and, when
    /// auditing is on, its audit environment.
    ///
    /// # Errors
    ///
    /// Returns `SchemaNotFound`, `Conflict`, or `Validation`.
    pub fn create_table(&self, request: &CreateTableObject) -> CoreResult<TableDescription> {
        let table = TableRef::new(&request.schema, &request.table);
        let hash = request.hash_attribute.as_str();
        let mut attributes = vec![hash];
        if !table.is_system() {
            for stamp in [CREATED_TIME, UPDATED_TIME] {
                if stamp != hash {
                    attributes.push(stamp);
                }
            }
        }
        let meta = self
            .catalog
            .create_table(&table, hash, request.residence.clone(), &attributes)?;

        let env = self.registry.open(&table, EnvKind::Data)?;
        let mut batch = WriteBatch::new();
        batch.create_dbi(hash, DbiFlags::PRIMARY);
        for attribute in attributes.iter().filter(|a| **a != hash) {
            batch.create_dbi(attribute, attribute_flags(attribute));
        }
        env.write(batch)?;

        if self.config.audit_enabled {
            self.audit().ensure(&table)?;
        }
        self.describe(&meta)
    }

    /// Creates an attribute and its index.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound`, or `Conflict` if the attribute exists.
    pub fn create_attribute(&self, schema: &str, table: &str, attribute: &str) -> CoreResult<()> {
        let table = TableRef::new(schema, table);
        self.catalog.create_attribute(&table, attribute)?;
        self.create_index(&table, attribute)?;
        self.stats.record_attributes_created(1);
        Ok(())
    }

    /// Creates an attribute unless it exists. Returns whether this call
    /// created it; losing a creation race counts as existing.
    pub(crate) fn ensure_attribute(&self, table: &TableRef, attribute: &str) -> CoreResult<bool> {
        let created = match self.catalog.create_attribute(table, attribute) {
            Ok(_) => true,
            Err(e) if e.is_already_exists() => {
                debug!(table = %table, attribute, "attribute already created");
                false
            }
            Err(e) => return Err(e),
        };
        self.create_index(table, attribute)?;
        if created {
            self.stats.record_attributes_created(1);
        }
        Ok(created)
    }

    fn create_index(&self, table: &TableRef, attribute: &str) -> CoreResult<()> {
        let env = self.registry.open(table, EnvKind::Data)?;
        if !env.has_dbi(attribute) {
            let mut batch = WriteBatch::new();
            batch.create_dbi(attribute, attribute_flags(attribute));
            env.write(batch)?;
        }
        Ok(())
    }

    /// Drops an attribute: catalog row, then the attribute in every row,
    /// then its index.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for the hash attribute, `AttributeNotFound`,
    /// or `VersionConflict` if a row kept changing during compaction.
    pub fn drop_attribute(&self, schema: &str, table: &str, attribute: &str) -> CoreResult<()> {
        let table = TableRef::new(schema, table);
        let meta = self.catalog.table(&table)?;
        if attribute == meta.hash_attribute() {
            return Err(CoreError::validation(format!(
                "cannot drop hash attribute '{attribute}' of '{table}'"
            )));
        }
        self.catalog.delete_attribute(&table, attribute)?;

        let env = self.registry.open(&table, EnvKind::Data)?;
        let rows = rows_with_attribute(&env, &meta, attribute)?;
        let compacted = rows.len();
        self.compact(&env, &meta, attribute, rows)?;

        if env.has_dbi(attribute) {
            let mut batch = WriteBatch::new();
            batch.drop_dbi(attribute);
            env.write(batch)?;
        }
        info!(table = %table, attribute, rows = compacted, "attribute dropped");
        Ok(())
    }

    /// Removes `attribute` from `rows` with version-checked rewrites. Each
    /// row keeps its version stamp, so a writer that read the row before
    /// the rewrite still commits against it.
    ///
    /// A row whose version moved is re-read and retried, up to
    /// `compaction_retries` times.
    pub(crate) fn compact(
        &self,
        env: &Environment,
        meta: &TableMeta,
        attribute: &str,
        mut rows: Vec<RowVersion>,
    ) -> CoreResult<()> {
        let hash_dbi = meta.hash_attribute();
        let mut attempt = 0;
        while !rows.is_empty() {
            let mut tickets = Vec::with_capacity(rows.len());
            for mut row in rows {
                row.row.remove(attribute);
                let mut batch = WriteBatch::new().if_version(hash_dbi, row.key.clone(), row.version);
                batch.rewrite(hash_dbi, row.key.clone(), encode_row(&row.row)?);
                tickets.push((row.key, env.submit(batch)));
            }
            if let Some((_, last)) = tickets.last() {
                env.wait(last)?;
            }

            let conflicted: Vec<Vec<u8>> = tickets
                .into_iter()
                .filter(|(_, ticket)| ticket.outcome() == Some(&BatchOutcome::ConditionFailed))
                .map(|(key, _)| key)
                .collect();
            if conflicted.is_empty() {
                break;
            }
            if attempt >= self.config.compaction_retries {
                let hash = HashValue::from_key(&conflicted[0])
                    .map(|h| h.render())
                    .unwrap_or_default();
                warn!(table = %meta.table_ref(), attribute, hash, "compaction gave up");
                return Err(CoreError::VersionConflict {
                    table: meta.table_ref().to_string(),
                    hash,
                });
            }
            attempt += 1;
            debug!(
                table = %meta.table_ref(),
                attribute,
                conflicts = conflicted.len(),
                attempt,
                "retrying compaction"
            );

            let txn = env.read_txn();
            rows = Vec::with_capacity(conflicted.len());
            for key in conflicted {
                if let Some((version, bytes)) = txn.get_versioned(hash_dbi, &key)? {
                    let row = decode_row(&bytes)?;
                    if row.contains_key(attribute) {
                        rows.push(RowVersion { key, version, row });
                    }
                }
            }
        }
        Ok(())
    }

    /// Drops a table: catalog rows, then the data and audit environments.
    /// Anything already gone is skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures other than not-found.
    pub fn drop_table(&self, schema: &str, table: &str) -> CoreResult<()> {
        let table = TableRef::new(schema, table);
        tolerate(self.catalog.delete_table(&table), &table, "catalog row")?;
        tolerate(
            self.registry.remove(&table, EnvKind::Data),
            &table,
            "data environment",
        )?;
        tolerate(
            self.registry.remove(&table, EnvKind::Audit),
            &table,
            "audit environment",
        )?;
        info!(table = %table, "table dropped");
        Ok(())
    }

    /// Drops a schema with all its tables and directories.
    ///
    /// # Errors
    ///
    /// Returns `SchemaNotFound` if the schema is unknown, `Validation` for
    /// the system schema.
    pub fn drop_schema(&self, schema: &str) -> CoreResult<()> {
        if schema == SYSTEM_SCHEMA {
            return Err(CoreError::validation("the system schema cannot be dropped"));
        }
        self.registry.check_schema_dirs(schema)?;
        for meta in self.catalog.tables(schema)? {
            self.drop_table(schema, &meta.row.name)?;
        }
        tolerate(
            self.catalog.delete_schema(schema),
            &schema,
            "schema row",
        )?;
        self.registry.remove_schema(schema)?;
        info!(schema, "schema dropped");
        Ok(())
    }

    /// Describes one table.
    ///
    /// # Errors
    ///
    /// Returns `SchemaNotFound` or `TableNotFound`.
    pub fn describe_table(&self, schema: &str, table: &str) -> CoreResult<TableDescription> {
        let meta = self.catalog.table(&TableRef::new(schema, table))?;
        self.describe(&meta)
    }

    /// Describes every table of a schema, by table name.
    ///
    /// # Errors
    ///
    /// Returns `SchemaNotFound`.
    pub fn describe_schema(&self, schema: &str) -> CoreResult<BTreeMap<String, TableDescription>> {
        self.catalog
            .tables(schema)?
            .iter()
            .map(|meta| Ok((meta.row.name.clone(), self.describe(meta)?)))
            .collect()
    }

    /// Describes every schema.
    ///
    /// # Errors
    ///
    /// Returns an error if a table's environment cannot be read.
    pub fn describe_all(
        &self,
    ) -> CoreResult<BTreeMap<String, BTreeMap<String, TableDescription>>> {
        let mut all = BTreeMap::new();
        for schema in self.catalog.schema_names() {
            match self.describe_schema(&schema) {
                Ok(tables) => {
                    all.insert(schema, tables);
                }
                // Dropped while iterating.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(all)
    }

    fn describe(&self, meta: &TableMeta) -> CoreResult<TableDescription> {
        let table = meta.table_ref();
        let record_count = if self.registry.exists(&table, EnvKind::Data) {
            let env = self.registry.open(&table, EnvKind::Data)?;
            if env.has_dbi(meta.hash_attribute()) {
                env.read_txn().entry_count(meta.hash_attribute())?
            } else {
                0
            }
        } else {
            0
        };
        Ok(TableDescription {
            id: meta.row.id.clone(),
            schema: meta.row.schema.clone(),
            name: meta.row.name.clone(),
            hash_attribute: meta.row.hash_attribute.clone(),
            residence: meta.row.residence.clone(),
            attributes: meta.attribute_names().map(str::to_string).collect(),
            record_count,
            created_time: meta.row.created_time,
        })
    }
}

/// Rows of the primary index that carry `attribute`.
pub(crate) fn rows_with_attribute(
    env: &Arc<Environment>,
    meta: &TableMeta,
    attribute: &str,
) -> CoreResult<Vec<RowVersion>> {
    let txn = env.read_txn();
    let mut raw = Vec::new();
    txn.cursor(meta.hash_attribute()).for_each(|key, value, version| {
        raw.push((key.to_vec(), value.to_vec(), version));
        ControlFlow::Continue(())
    })?;
    let mut rows = Vec::new();
    for (key, bytes, version) in raw {
        let row = decode_row(&bytes)?;
        if row.contains_key(attribute) {
            rows.push(RowVersion { key, version, row });
        }
    }
    Ok(rows)
}

fn tolerate(result: CoreResult<()>, object: &dyn fmt::Display, what: &str) -> CoreResult<()> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!(object = %object, what, "already removed");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxnClock;
    use serde_json::json;
    use tessera_codec::IndexKey;

    struct Fixture {
        config: Config,
        catalog: SchemaCatalog,
        registry: EnvironmentRegistry,
        stats: BridgeStats,
    }

    impl Fixture {
        fn new() -> Self {
            let config = Config::in_memory();
            let stats = BridgeStats::new();
            let registry = EnvironmentRegistry::new(config.clone(), Arc::new(BridgeStats::new()));
            let catalog = SchemaCatalog::open(
                Arc::new(Environment::in_memory("system.catalog")),
                Arc::new(TxnClock::new()),
            )
            .unwrap();
            Self {
                config,
                catalog,
                registry,
                stats,
            }
        }

        fn lifecycle(&self) -> Lifecycle<'_> {
            Lifecycle::new(&self.config, &self.catalog, &self.registry, &self.stats)
        }

        fn dog(&self) -> (Arc<TableMeta>, Arc<Environment>) {
            let table = TableRef::new("dev", "dog");
            (
                self.catalog.table(&table).unwrap(),
                self.registry.open(&table, EnvKind::Data).unwrap(),
            )
        }
    }

    fn key(id: i64) -> Vec<u8> {
        IndexKey::Number(id as f64).encode().unwrap()
    }

    fn put_row(env: &Environment, id: i64, row: serde_json::Value) {
        let mut batch = WriteBatch::new();
        batch.put(
            "id",
            key(id),
            encode_row(row.as_object().unwrap()).unwrap(),
        );
        env.write(batch).unwrap();
    }

    fn row(env: &Environment, id: i64) -> serde_json::Value {
        let bytes = env.read_txn().get("id", &key(id)).unwrap().unwrap();
        serde_json::Value::Object(decode_row(&bytes).unwrap())
    }

    fn setup() -> Fixture {
        let fx = Fixture::new();
        let lc = fx.lifecycle();
        lc.create_schema("dev").unwrap();
        lc.create_table(&CreateTableObject::new("dev", "dog", "id"))
            .unwrap();
        lc.create_attribute("dev", "dog", "name").unwrap();
        fx
    }

    #[test]
    fn create_table_builds_indexes() {
        let fx = setup();
        let (meta, env) = fx.dog();
        assert_eq!(
            meta.attribute_names().collect::<Vec<_>>(),
            vec![CREATED_TIME, UPDATED_TIME, "id", "name"]
        );
        assert!(env.has_dbi("id"));
        assert_eq!(env.read_txn().dbi_flags(CREATED_TIME).unwrap(), DbiFlags::NUMERIC_INDEX);
        assert!(fx
            .registry
            .exists(&TableRef::new("dev", "dog"), EnvKind::Audit));

        let err = fx.lifecycle().create_attribute("dev", "dog", "name").unwrap_err();
        assert!(err.is_already_exists());
        assert!(!fx.lifecycle().ensure_attribute(&meta.table_ref(), "name").unwrap());
    }

    #[test]
    fn drop_attribute_compacts_rows() {
        let fx = setup();
        let (_, env) = fx.dog();
        put_row(&env, 1, json!({"id": 1, "name": "Penny", "age": 5}));
        put_row(&env, 2, json!({"id": 2, "age": 7}));
        let untouched_version = env
            .read_txn()
            .get_versioned("id", &key(2))
            .unwrap()
            .unwrap()
            .0;

        fx.lifecycle().drop_attribute("dev", "dog", "name").unwrap();

        assert_eq!(row(&env, 1), json!({"id": 1, "age": 5}));
        assert_eq!(
            env.read_txn().get_versioned("id", &key(2)).unwrap().unwrap().0,
            untouched_version
        );
        assert!(!env.has_dbi("name"));
        assert!(!fx.dog().0.has_attribute("name"));
    }

    #[test]
    fn compacted_rows_keep_their_version() {
        let fx = setup();
        let (_, env) = fx.dog();
        put_row(&env, 1, json!({"id": 1, "name": "Penny", "age": 5}));
        let (version, _) = env.read_txn().get_versioned("id", &key(1)).unwrap().unwrap();

        fx.lifecycle().drop_attribute("dev", "dog", "name").unwrap();

        let (after, _) = env.read_txn().get_versioned("id", &key(1)).unwrap().unwrap();
        assert_eq!(after, version);
    }

    #[test]
    fn update_read_before_drop_still_commits() {
        let fx = setup();
        let (_, env) = fx.dog();
        put_row(&env, 1, json!({"id": 1, "name": "Penny", "age": 5}));
        let (version, _) = env.read_txn().get_versioned("id", &key(1)).unwrap().unwrap();

        fx.lifecycle().drop_attribute("dev", "dog", "name").unwrap();

        let mut update = WriteBatch::new().if_version("id", key(1), version);
        update.put(
            "id",
            key(1),
            encode_row(json!({"id": 1, "age": 6}).as_object().unwrap()).unwrap(),
        );
        assert!(env.write(update).unwrap().is_committed());
        assert_eq!(row(&env, 1), json!({"id": 1, "age": 6}));
    }

    #[test]
    fn snapshot_reads_index_across_drop() {
        let fx = setup();
        let (_, env) = fx.dog();
        let mut batch = WriteBatch::new();
        batch.put_dup("name", IndexKey::from("Penny").encode().unwrap(), key(1));
        env.write(batch).unwrap();
        put_row(&env, 1, json!({"id": 1, "name": "Penny"}));

        let txn = env.read_txn();
        fx.lifecycle().drop_attribute("dev", "dog", "name").unwrap();

        assert!(txn.has_dbi("name"));
        assert_eq!(
            txn.get_dups("name", &IndexKey::from("Penny").encode().unwrap())
                .unwrap(),
            vec![key(1)]
        );
        let bytes = txn.get("id", &key(1)).unwrap().unwrap();
        assert_eq!(decode_row(&bytes).unwrap()["name"], json!("Penny"));
        assert!(!env.read_txn().has_dbi("name"));
    }

    #[test]
    fn hash_attribute_cannot_be_dropped() {
        let fx = setup();
        let err = fx.lifecycle().drop_attribute("dev", "dog", "id").unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn compaction_retries_after_concurrent_update() {
        let fx = setup();
        let (meta, env) = fx.dog();
        put_row(&env, 1, json!({"id": 1, "name": "Penny"}));
        let stale = rows_with_attribute(&env, &meta, "name").unwrap();

        // Lands between the read and the rewrite.
        put_row(&env, 1, json!({"id": 1, "name": "Penny", "age": 9}));

        fx.lifecycle().compact(&env, &meta, "name", stale).unwrap();
        assert_eq!(row(&env, 1), json!({"id": 1, "age": 9}));
    }

    #[test]
    fn compaction_surfaces_conflict_without_retries() {
        let mut fx = setup();
        fx.config.compaction_retries = 0;
        let (meta, env) = fx.dog();
        put_row(&env, 1, json!({"id": 1, "name": "Penny"}));
        let stale = rows_with_attribute(&env, &meta, "name").unwrap();
        put_row(&env, 1, json!({"id": 1, "name": "Rex"}));

        let err = fx.lifecycle().compact(&env, &meta, "name", stale).unwrap_err();
        assert!(matches!(err, CoreError::VersionConflict { .. }));
        assert_eq!(row(&env, 1), json!({"id": 1, "name": "Rex"}));
    }

    #[test]
    fn drop_table_twice_is_fine() {
        let fx = setup();
        let lc = fx.lifecycle();
        lc.drop_table("dev", "dog").unwrap();
        lc.drop_table("dev", "dog").unwrap();
        assert!(!fx.registry.exists(&TableRef::new("dev", "dog"), EnvKind::Data));
        assert!(fx.catalog.tables("dev").unwrap().is_empty());
    }

    #[test]
    fn drop_schema_cascades() {
        let fx = setup();
        let lc = fx.lifecycle();
        lc.create_table(&CreateTableObject::new("dev", "cat", "id"))
            .unwrap();
        lc.drop_schema("dev").unwrap();

        assert!(!fx.catalog.has_schema("dev"));
        assert!(!fx.registry.exists(&TableRef::new("dev", "cat"), EnvKind::Data));
        assert!(lc.drop_schema("dev").unwrap_err().is_not_found());
    }

    #[test]
    fn describe_counts_rows() {
        let fx = setup();
        let (_, env) = fx.dog();
        put_row(&env, 1, json!({"id": 1}));
        put_row(&env, 2, json!({"id": 2}));

        let lc = fx.lifecycle();
        let described = lc.describe_table("dev", "dog").unwrap();
        assert_eq!(described.record_count, 2);
        assert_eq!(described.hash_attribute, "id");
        assert_eq!(lc.describe_all().unwrap()["dev"].len(), 1);
    }
}
