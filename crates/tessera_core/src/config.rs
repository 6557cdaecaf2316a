//! Bridge configuration.
//!
//! The configuration loader above this crate resolves every path before
//! handing a `Config` to [`crate::StorageBridge::init`]. `Config` derives
//! `Deserialize` so a loader can produce it straight from a settings file.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where environments keep their bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// One log file per environment under the configured roots.
    #[default]
    Disk,
    /// Process-local buffers. Nothing survives the process.
    Memory,
}

/// Configuration for the storage bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for table environments (`<root>/<schema>/<table>.tdb`).
    pub root: PathBuf,

    /// Root directory for audit environments.
    pub audit_root: PathBuf,

    /// Per-schema data directory overrides, keyed by schema name.
    pub schema_paths: HashMap<String, PathBuf>,

    /// Per-table data directory overrides, keyed by `schema.table`.
    pub table_paths: HashMap<String, PathBuf>,

    /// Per-schema audit directory overrides.
    pub audit_schema_paths: HashMap<String, PathBuf>,

    /// Per-table audit directory overrides, keyed by `schema.table`.
    pub audit_table_paths: HashMap<String, PathBuf>,

    /// Disk or memory.
    pub storage: StorageMode,

    /// Whether writes append audit entries.
    pub audit_enabled: bool,

    /// Maximum audit entries removed per prune pass.
    pub prune_batch_size: usize,

    /// Pause between prune passes.
    pub prune_pause: Duration,

    /// Whether every commit is synced to disk.
    pub sync_on_commit: bool,

    /// Attempts made to rewrite a row whose version moved during an
    /// attribute drop before giving up.
    pub compaction_retries: u32,

    /// Times a write re-reads and resubmits a row that changed between
    /// its read and its commit.
    pub write_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("database"),
            audit_root: PathBuf::from("database/transactions"),
            schema_paths: HashMap::new(),
            table_paths: HashMap::new(),
            audit_schema_paths: HashMap::new(),
            audit_table_paths: HashMap::new(),
            storage: StorageMode::Disk,
            audit_enabled: true,
            prune_batch_size: 10_000,
            prune_pause: Duration::from_millis(10),
            sync_on_commit: false,
            compaction_retries: 3,
            write_retries: 10,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration rooted at `dir`, with audit data under
    /// `dir/transactions`.
    #[must_use]
    pub fn at(dir: impl AsRef<Path>) -> Self {
        let root = dir.as_ref().to_path_buf();
        Self {
            audit_root: root.join("transactions"),
            root,
            ..Self::default()
        }
    }

    /// In-memory configuration, mainly for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            storage: StorageMode::Memory,
            prune_pause: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Sets the data root.
    #[must_use]
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.root = path.into();
        self
    }

    /// Sets the audit root.
    #[must_use]
    pub fn audit_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_root = path.into();
        self
    }

    /// Overrides the data directory of one schema.
    #[must_use]
    pub fn schema_path(mut self, schema: &str, path: impl Into<PathBuf>) -> Self {
        self.schema_paths.insert(schema.to_string(), path.into());
        self
    }

    /// Overrides the data directory of one table.
    #[must_use]
    pub fn table_path(mut self, schema: &str, table: &str, path: impl Into<PathBuf>) -> Self {
        self.table_paths
            .insert(format!("{schema}.{table}"), path.into());
        self
    }

    /// Overrides the audit directory of one schema.
    #[must_use]
    pub fn audit_schema_path(mut self, schema: &str, path: impl Into<PathBuf>) -> Self {
        self.audit_schema_paths
            .insert(schema.to_string(), path.into());
        self
    }

    /// Overrides the audit directory of one table.
    #[must_use]
    pub fn audit_table_path(mut self, schema: &str, table: &str, path: impl Into<PathBuf>) -> Self {
        self.audit_table_paths
            .insert(format!("{schema}.{table}"), path.into());
        self
    }

    /// Sets the storage mode.
    #[must_use]
    pub const fn storage(mut self, mode: StorageMode) -> Self {
        self.storage = mode;
        self
    }

    /// Enables or disables the audit log.
    #[must_use]
    pub const fn audit_enabled(mut self, value: bool) -> Self {
        self.audit_enabled = value;
        self
    }

    /// Sets the prune pass size.
    #[must_use]
    pub const fn prune_batch_size(mut self, size: usize) -> Self {
        self.prune_batch_size = size;
        self
    }

    /// Sets the pause between prune passes.
    #[must_use]
    pub const fn prune_pause(mut self, pause: Duration) -> Self {
        self.prune_pause = pause;
        self
    }

    /// Sets whether every commit is synced.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the compaction retry budget.
    #[must_use]
    pub const fn compaction_retries(mut self, retries: u32) -> Self {
        self.compaction_retries = retries;
        self
    }

    /// Sets the write retry budget.
    #[must_use]
    pub const fn write_retries(mut self, retries: u32) -> Self {
        self.write_retries = retries;
        self
    }

    /// Whether environments live in memory.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.storage == StorageMode::Memory
    }
}
