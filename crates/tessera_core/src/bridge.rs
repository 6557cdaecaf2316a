//! Storage bridge facade.

use crate::audit::{AuditEntry, AuditLog, PruneControl};
use crate::backup::{ArchiveMetadata, BackupWriter};
use crate::catalog::SchemaCatalog;
use crate::config::Config;
use crate::error::CoreResult;
use crate::lifecycle::{Lifecycle, TableDescription};
use crate::registry::{EnvKind, EnvironmentRegistry};
use crate::request::{
    CreateTableObject, DeleteBeforeObject, DeleteBeforeResult, DeleteObject, DeleteResult,
    InsertObject, ReadAuditLogObject, SearchByConditionsObject, SearchByHashObject, SearchObject,
    WriteResult,
};
use crate::search::{ProbeTrace, SearchEngine};
use crate::stats::{BridgeStats, StatsSnapshot};
use crate::types::{TableRef, TxnClock, SYSTEM_SCHEMA};
use crate::write::WritePath;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::sync::Arc;
use tessera_codec::Record;
use tracing::info;

/// Store holding the catalog rows, inside the system schema directory.
/// Table names cannot contain `.`, so no user table can collide with it.
const CATALOG_STORE: &str = ".catalog";

/// The storage bridge.
///
/// `StorageBridge` is the entry point used by the protocol layer. It owns
/// the configuration, the environment registry, the schema catalog, the
/// transaction clock and the statistics, and hands out the components
/// that operate on them:
///
/// - [`StorageBridge::search`] for reads
/// - [`StorageBridge::writer`] for insert, update, upsert and delete
/// - [`StorageBridge::audit`] for the audit log
/// - [`StorageBridge::lifecycle`] for schemas, tables and attributes
/// - [`StorageBridge::backup`] for archives
///
/// The common operations are also available directly on the bridge.
///
/// # Initialization
///
/// Nothing happens before [`StorageBridge::init`]: it creates the storage
/// roots, opens the catalog store and loads the catalog.
///
/// ```rust,ignore
/// use tessera_core::{Config, StorageBridge};
///
/// let bridge = StorageBridge::init(Config::at("/srv/tessera"))?;
/// bridge.create_schema("dev")?;
/// ```
pub struct StorageBridge {
    config: Config,
    registry: EnvironmentRegistry,
    catalog: SchemaCatalog,
    clock: Arc<TxnClock>,
    stats: Arc<BridgeStats>,
}

impl StorageBridge {
    /// Initializes the bridge.
    ///
    /// # Errors
    ///
    /// Returns an error if a root directory cannot be created or the
    /// catalog store cannot be opened or replayed.
    pub fn init(config: Config) -> CoreResult<Self> {
        if !config.is_in_memory() {
            fs::create_dir_all(&config.root)?;
            fs::create_dir_all(&config.audit_root)?;
        }
        let stats = Arc::new(BridgeStats::new());
        let clock = Arc::new(TxnClock::new());
        let registry = EnvironmentRegistry::new(config.clone(), Arc::clone(&stats));
        let catalog_env =
            registry.open(&TableRef::new(SYSTEM_SCHEMA, CATALOG_STORE), EnvKind::Data)?;
        let catalog = SchemaCatalog::open(catalog_env, Arc::clone(&clock))?;

        info!(
            root = %config.root.display(),
            in_memory = config.is_in_memory(),
            schemas = catalog.schema_names().len(),
            "storage bridge initialized"
        );
        Ok(Self {
            config,
            registry,
            catalog,
            clock,
            stats,
        })
    }

    /// Initializes an in-memory bridge.
    ///
    /// # Errors
    ///
    /// See [`StorageBridge::init`].
    pub fn in_memory() -> CoreResult<Self> {
        Self::init(Config::in_memory())
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Schema catalog.
    #[must_use]
    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Environment registry.
    #[must_use]
    pub fn registry(&self) -> &EnvironmentRegistry {
        &self.registry
    }

    /// Search engine.
    #[must_use]
    pub fn search(&self) -> SearchEngine<'_> {
        SearchEngine::new(&self.catalog, &self.registry, &self.stats)
    }

    /// Write path.
    #[must_use]
    pub fn writer(&self) -> WritePath<'_> {
        WritePath::new(
            &self.config,
            &self.catalog,
            &self.registry,
            &self.clock,
            &self.stats,
        )
    }

    /// Audit log.
    #[must_use]
    pub fn audit(&self) -> AuditLog<'_> {
        AuditLog::new(&self.config, &self.catalog, &self.registry, &self.stats)
    }

    /// Lifecycle manager.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle<'_> {
        Lifecycle::new(&self.config, &self.catalog, &self.registry, &self.stats)
    }

    /// Backup writer.
    #[must_use]
    pub fn backup(&self) -> BackupWriter<'_> {
        BackupWriter::new(&self.catalog, &self.registry)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// See [`Lifecycle::create_schema`].
    ///
    /// # Errors
    ///
    /// `Validation` for a bad name, `Conflict` if the schema exists.
    pub fn create_schema(&self, schema: &str) -> CoreResult<()> {
        self.lifecycle().create_schema(schema)
    }

    /// See [`Lifecycle::create_table`].
    ///
    /// # Errors
    ///
    /// `SchemaNotFound`, `Validation` or `Conflict`.
    pub fn create_table(&self, request: &CreateTableObject) -> CoreResult<TableDescription> {
        self.lifecycle().create_table(request)
    }

    /// See [`Lifecycle::create_attribute`].
    ///
    /// # Errors
    ///
    /// `TableNotFound` or `Conflict`.
    pub fn create_attribute(&self, schema: &str, table: &str, attribute: &str) -> CoreResult<()> {
        self.lifecycle().create_attribute(schema, table, attribute)
    }

    /// See [`Lifecycle::drop_attribute`].
    ///
    /// # Errors
    ///
    /// `AttributeNotFound`, `Validation` or `VersionConflict`.
    pub fn drop_attribute(&self, schema: &str, table: &str, attribute: &str) -> CoreResult<()> {
        self.lifecycle().drop_attribute(schema, table, attribute)
    }

    /// See [`Lifecycle::drop_table`].
    ///
    /// # Errors
    ///
    /// Failures other than not-found.
    pub fn drop_table(&self, schema: &str, table: &str) -> CoreResult<()> {
        self.lifecycle().drop_table(schema, table)
    }

    /// See [`Lifecycle::drop_schema`].
    ///
    /// # Errors
    ///
    /// `SchemaNotFound`, or `Validation` for the system schema.
    pub fn drop_schema(&self, schema: &str) -> CoreResult<()> {
        self.lifecycle().drop_schema(schema)
    }

    /// See [`Lifecycle::describe_table`].
    ///
    /// # Errors
    ///
    /// `SchemaNotFound` or `TableNotFound`.
    pub fn describe_table(&self, schema: &str, table: &str) -> CoreResult<TableDescription> {
        self.lifecycle().describe_table(schema, table)
    }

    /// See [`Lifecycle::describe_all`].
    ///
    /// # Errors
    ///
    /// Returns an error if a table's environment cannot be read.
    pub fn describe_all(&self) -> CoreResult<BTreeMap<String, BTreeMap<String, TableDescription>>> {
        self.lifecycle().describe_all()
    }

    /// Rebuilds the catalog from its stored rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog store cannot be read.
    pub fn reload_catalog(&self) -> CoreResult<()> {
        self.catalog.reload()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// See [`WritePath::insert`].
    ///
    /// # Errors
    ///
    /// `Validation`, `SchemaNotFound`/`TableNotFound` or an engine error.
    pub fn insert(&self, request: &InsertObject) -> CoreResult<WriteResult> {
        self.writer().insert(request)
    }

    /// See [`WritePath::update`].
    ///
    /// # Errors
    ///
    /// As [`StorageBridge::insert`].
    pub fn update(&self, request: &InsertObject) -> CoreResult<WriteResult> {
        self.writer().update(request)
    }

    /// See [`WritePath::upsert`].
    ///
    /// # Errors
    ///
    /// As [`StorageBridge::insert`].
    pub fn upsert(&self, request: &InsertObject) -> CoreResult<WriteResult> {
        self.writer().upsert(request)
    }

    /// See [`WritePath::delete`].
    ///
    /// # Errors
    ///
    /// As [`StorageBridge::insert`].
    pub fn delete(&self, request: &DeleteObject) -> CoreResult<DeleteResult> {
        self.writer().delete(request)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// See [`SearchEngine::search_by_hash`].
    ///
    /// # Errors
    ///
    /// `Validation` or `SchemaNotFound`/`TableNotFound`.
    pub fn search_by_hash(&self, request: &SearchByHashObject) -> CoreResult<Vec<Record>> {
        self.search().search_by_hash(request)
    }

    /// See [`SearchEngine::get_data_by_hash`].
    ///
    /// # Errors
    ///
    /// As [`StorageBridge::search_by_hash`].
    pub fn get_data_by_hash(
        &self,
        request: &SearchByHashObject,
    ) -> CoreResult<BTreeMap<String, Record>> {
        self.search().get_data_by_hash(request)
    }

    /// See [`SearchEngine::search_by_value`].
    ///
    /// # Errors
    ///
    /// `Validation`, `AttributeNotFound`, `ComparisonType` or
    /// `UnknownSearchType`.
    pub fn search_by_value(&self, request: &SearchObject) -> CoreResult<Vec<Record>> {
        self.search().search_by_value(request)
    }

    /// See [`SearchEngine::search_by_conditions`].
    ///
    /// # Errors
    ///
    /// As [`StorageBridge::search_by_value`].
    pub fn search_by_conditions(
        &self,
        request: &SearchByConditionsObject,
    ) -> CoreResult<Vec<Record>> {
        self.search().search_by_conditions(request)
    }

    /// See [`SearchEngine::search_by_conditions_traced`].
    ///
    /// # Errors
    ///
    /// As [`StorageBridge::search_by_value`].
    pub fn search_by_conditions_traced(
        &self,
        request: &SearchByConditionsObject,
    ) -> CoreResult<(Vec<Record>, ProbeTrace)> {
        self.search().search_by_conditions_traced(request)
    }

    // ========================================================================
    // Audit
    // ========================================================================

    /// See [`AuditLog::read_audit_log`].
    ///
    /// # Errors
    ///
    /// `SchemaNotFound`/`TableNotFound` or an engine error.
    pub fn read_audit_log(&self, request: &ReadAuditLogObject) -> CoreResult<Vec<AuditEntry>> {
        self.audit().read_audit_log(request)
    }

    /// See [`AuditLog::delete_before`]; runs to completion.
    ///
    /// # Errors
    ///
    /// `Validation`, `SchemaNotFound`/`TableNotFound` or an engine error.
    pub fn delete_audit_logs_before(
        &self,
        request: &DeleteBeforeObject,
    ) -> CoreResult<DeleteBeforeResult> {
        self.audit().delete_before(request, &PruneControl::new())
    }

    // ========================================================================
    // Backup
    // ========================================================================

    /// See [`BackupWriter::backup_table`].
    ///
    /// # Errors
    ///
    /// `SchemaNotFound`/`TableNotFound` or an I/O error.
    pub fn backup_table(
        &self,
        schema: &str,
        table: &str,
        include_audit: bool,
        out: &mut dyn Write,
    ) -> CoreResult<ArchiveMetadata> {
        self.backup().backup_table(schema, table, include_audit, out)
    }

    /// See [`BackupWriter::backup_schema`].
    ///
    /// # Errors
    ///
    /// `SchemaNotFound` or an I/O error.
    pub fn backup_schema(&self, schema: &str, out: &mut dyn Write) -> CoreResult<ArchiveMetadata> {
        self.backup().backup_schema(schema, out)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Commits anything queued and syncs every open store.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub fn flush(&self) -> CoreResult<()> {
        self.catalog.environment().flush()?;
        self.registry.flush_all()
    }

    /// Counters since initialization.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for StorageBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBridge")
            .field("root", &self.config.root)
            .field("in_memory", &self.config.is_in_memory())
            .field("open_environments", &self.registry.open_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn init_on_disk_creates_roots_and_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::at(dir.path());
        let bridge = StorageBridge::init(config.clone()).unwrap();
        bridge.create_schema("dev").unwrap();

        assert!(config.root.is_dir());
        assert!(config.audit_root.is_dir());
        assert!(bridge
            .registry()
            .exists(&TableRef::new(SYSTEM_SCHEMA, CATALOG_STORE), EnvKind::Data));
    }

    #[test]
    fn catalog_survives_reinit() {
        let dir = tempfile::tempdir().unwrap();
        {
            let bridge = StorageBridge::init(Config::at(dir.path())).unwrap();
            bridge.create_schema("dev").unwrap();
            bridge
                .create_table(&CreateTableObject::new("dev", "dog", "id"))
                .unwrap();
            bridge.flush().unwrap();
        }
        let bridge = StorageBridge::init(Config::at(dir.path())).unwrap();
        let description = bridge.describe_table("dev", "dog").unwrap();
        assert_eq!(description.hash_attribute, "id");
    }

    #[test]
    fn system_schema_cannot_be_dropped() {
        let bridge = StorageBridge::in_memory().unwrap();
        assert!(bridge.drop_schema(SYSTEM_SCHEMA).is_err());
    }

    #[test]
    fn stats_follow_operations() {
        let bridge = StorageBridge::in_memory().unwrap();
        bridge.create_schema("dev").unwrap();
        bridge
            .create_table(&CreateTableObject::new("dev", "dog", "id"))
            .unwrap();
        let records = vec![json!({"id": 1, "name": "Penny"}).as_object().unwrap().clone()];
        bridge
            .insert(&InsertObject::new("dev", "dog", records))
            .unwrap();
        bridge
            .search_by_hash(&SearchByHashObject::new("dev", "dog", vec![json!(1)]))
            .unwrap();

        let stats = bridge.stats();
        assert_eq!(stats.rows_written, 1);
        assert_eq!(stats.searches, 1);
        assert!(stats.audit_entries >= 1);
    }
}
