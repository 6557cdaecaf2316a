//! Environment registry.
//!
//! Resolves where each table's environments live, opens them on first use
//! and shares the handles process-wide. Path resolution, most specific
//! first:
//!
//! 1. per-table override directory (`schema.table`)
//! 2. per-schema override directory
//! 3. `<root>/<schema>/`
//!
//! The store file is `<table>.tdb` inside the resolved directory. Audit
//! environments resolve the same way against the audit overrides and root.

use crate::config::Config;
use crate::env::Environment;
use crate::error::{CoreError, CoreResult};
use crate::stats::BridgeStats;
use crate::types::{TableRef, SYSTEM_SCHEMA};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_storage::InMemoryBackend;
use tracing::{debug, info};

/// Store file extension.
pub const STORE_EXTENSION: &str = "tdb";

/// Which of a table's environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvKind {
    /// Rows and attribute indexes.
    Data,
    /// Audit log.
    Audit,
}

type EnvKey = (TableRef, EnvKind);

/// Shared cache of open environments.
pub struct EnvironmentRegistry {
    config: Config,
    open: RwLock<HashMap<EnvKey, Arc<Environment>>>,
    /// Backing buffers in memory mode, so a closed environment reopens
    /// with its contents.
    memory: Mutex<HashMap<PathBuf, InMemoryBackend>>,
    stats: Arc<BridgeStats>,
}

impl EnvironmentRegistry {
    /// Creates a registry for `config`.
    #[must_use]
    pub fn new(config: Config, stats: Arc<BridgeStats>) -> Self {
        Self {
            config,
            open: RwLock::new(HashMap::new()),
            memory: Mutex::new(HashMap::new()),
            stats,
        }
    }

    /// Directory holding a schema's data environments.
    #[must_use]
    pub fn schema_dir(&self, schema: &str, kind: EnvKind) -> PathBuf {
        let (overrides, root) = match kind {
            EnvKind::Data => (&self.config.schema_paths, &self.config.root),
            EnvKind::Audit => (&self.config.audit_schema_paths, &self.config.audit_root),
        };
        overrides
            .get(schema)
            .cloned()
            .unwrap_or_else(|| root.join(schema))
    }

    /// Store file of one environment.
    #[must_use]
    pub fn env_path(&self, table: &TableRef, kind: EnvKind) -> PathBuf {
        let overrides = match kind {
            EnvKind::Data => &self.config.table_paths,
            EnvKind::Audit => &self.config.audit_table_paths,
        };
        let dir = overrides
            .get(&table.to_string())
            .cloned()
            .unwrap_or_else(|| self.schema_dir(&table.schema, kind));
        dir.join(format!("{}.{STORE_EXTENSION}", table.table))
    }

    fn label(table: &TableRef, kind: EnvKind) -> String {
        match kind {
            EnvKind::Data => table.to_string(),
            EnvKind::Audit => format!("{table}#audit"),
        }
    }

    /// Returns the open handle, opening (and creating) the store if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be created or replayed.
    pub fn open(&self, table: &TableRef, kind: EnvKind) -> CoreResult<Arc<Environment>> {
        let key = (table.clone(), kind);
        if let Some(env) = self.open.read().get(&key) {
            return Ok(Arc::clone(env));
        }

        let mut open = self.open.write();
        if let Some(env) = open.get(&key) {
            return Ok(Arc::clone(env));
        }
        let env = Arc::new(self.open_store(table, kind)?);
        open.insert(key, Arc::clone(&env));
        self.stats.record_environment_opened();
        Ok(env)
    }

    /// Returns the handle of an existing store without creating one.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentNotFound` if no store exists.
    pub fn get(&self, table: &TableRef, kind: EnvKind) -> CoreResult<Arc<Environment>> {
        if let Some(env) = self.open.read().get(&(table.clone(), kind)) {
            return Ok(Arc::clone(env));
        }
        if !self.exists(table, kind) {
            return Err(CoreError::EnvironmentNotFound {
                location: self.env_path(table, kind).display().to_string(),
            });
        }
        self.open(table, kind)
    }

    /// Whether the store exists.
    #[must_use]
    pub fn exists(&self, table: &TableRef, kind: EnvKind) -> bool {
        let path = self.env_path(table, kind);
        if self.config.is_in_memory() {
            self.memory.lock().contains_key(&path)
        } else {
            path.exists()
        }
    }

    fn open_store(&self, table: &TableRef, kind: EnvKind) -> CoreResult<Environment> {
        let path = self.env_path(table, kind);
        let label = Self::label(table, kind);
        if self.config.is_in_memory() {
            let backend = self
                .memory
                .lock()
                .entry(path)
                .or_insert_with(InMemoryBackend::new)
                .clone();
            return Environment::open(label, Box::new(backend), false);
        }
        debug!(path = %path.display(), "opening environment");
        Environment::open_file(label, &path, self.config.sync_on_commit)
    }

    /// Drops the cached handle. Other holders keep theirs.
    pub fn close(&self, table: &TableRef, kind: EnvKind) {
        self.open.write().remove(&(table.clone(), kind));
    }

    /// Closes and deletes a store.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentNotFound` if there was nothing to delete.
    pub fn remove(&self, table: &TableRef, kind: EnvKind) -> CoreResult<()> {
        self.close(table, kind);
        let path = self.env_path(table, kind);
        let not_found = || CoreError::EnvironmentNotFound {
            location: path.display().to_string(),
        };

        if self.config.is_in_memory() {
            return self.memory.lock().remove(&path).map(|_| ()).ok_or_else(not_found);
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "removed environment");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// Checks that neither of a schema's directories is, or contains, a
    /// configured root, another schema's override directory, or the system
    /// schema's directory. With the default layout this rejects a schema
    /// named like the audit root's last component.
    ///
    /// # Errors
    ///
    /// Returns `Validation` naming the location the schema would swallow.
    pub fn check_schema_dirs(&self, schema: &str) -> CoreResult<()> {
        let owned = |key: &str| {
            key == schema
                || key
                    .strip_prefix(schema)
                    .is_some_and(|rest| rest.starts_with('.'))
        };
        let system = self.schema_dir(SYSTEM_SCHEMA, EnvKind::Data);
        let mut reserved: Vec<&Path> = vec![&self.config.root, &self.config.audit_root];
        if schema != SYSTEM_SCHEMA {
            reserved.push(&system);
        }
        for overrides in [
            &self.config.schema_paths,
            &self.config.table_paths,
            &self.config.audit_schema_paths,
            &self.config.audit_table_paths,
        ] {
            reserved.extend(
                overrides
                    .iter()
                    .filter(|(key, _)| !owned(key))
                    .map(|(_, path)| path.as_path()),
            );
        }

        for (kind, label) in [(EnvKind::Data, "data"), (EnvKind::Audit, "audit")] {
            let dir = self.schema_dir(schema, kind);
            if let Some(location) = reserved.iter().find(|r| r.starts_with(&dir)) {
                return Err(CoreError::validation(format!(
                    "{label} directory '{}' of schema '{schema}' would contain '{}'",
                    dir.display(),
                    location.display()
                )));
            }
        }
        Ok(())
    }

    /// Removes a schema's data and audit directories. Missing directories
    /// are fine.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if a directory would take a configured root or
    /// another schema's stores with it (see [`Self::check_schema_dirs`]),
    /// or an I/O error if an existing directory cannot be removed.
    pub fn remove_schema(&self, schema: &str) -> CoreResult<()> {
        self.check_schema_dirs(schema)?;
        let dirs = [
            self.schema_dir(schema, EnvKind::Data),
            self.schema_dir(schema, EnvKind::Audit),
        ];
        self.open.write().retain(|(table, _), _| table.schema != schema);

        if self.config.is_in_memory() {
            self.memory
                .lock()
                .retain(|path, _| !dirs.iter().any(|dir| path.starts_with(dir)));
            return Ok(());
        }
        for dir in &dirs {
            remove_dir_tolerant(dir)?;
        }
        Ok(())
    }

    /// Catches a cached environment up with commits from other handles.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment cannot be opened or read.
    pub fn reset_read_txn(&self, table: &TableRef, kind: EnvKind) -> CoreResult<()> {
        self.open(table, kind)?.reset_read_txn()
    }

    /// Commits queued writes and syncs every open environment.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub fn flush_all(&self) -> CoreResult<()> {
        let envs: Vec<_> = self.open.read().values().cloned().collect();
        for env in envs {
            env.flush()?;
        }
        Ok(())
    }

    /// Number of cached handles.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }
}

fn remove_dir_tolerant(dir: &Path) -> CoreResult<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            info!(path = %dir.display(), "removed schema directory");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
