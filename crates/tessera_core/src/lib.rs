//! # tessera core
//!
//! The storage bridge between a request layer and tessera stores.
//!
//! Every table lives in its own [`Environment`]: a primary index keyed by
//! the table's hash attribute plus one duplicate-sorted index per
//! attribute. A parallel audit environment per table records every write.
//! Schema knowledge lives in an explicit [`SchemaCatalog`].
//!
//! This crate provides:
//! - The environment engine: ordered DBIs, MVCC snapshots, cursors, a
//!   per-environment write queue with group commit, and a commit log
//! - Search by hash, by value and by combined conditions, with a
//!   cost-based planner
//! - Insert, update, upsert and delete with automatic attribute creation
//! - The audit log and its retention pruning
//! - Schema, table and attribute lifecycle
//! - Table and schema backups
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_core::{Config, CreateTableObject, InsertObject, SearchObject, StorageBridge};
//!
//! let bridge = StorageBridge::init(Config::at("/srv/tessera"))?;
//! bridge.create_schema("dev")?;
//! bridge.create_table(&CreateTableObject::new("dev", "dog", "id"))?;
//! bridge.insert(&InsertObject::new("dev", "dog", records))?;
//! let rows = bridge.search_by_value(&SearchObject::new("dev", "dog", "name", "Pen*".into()))?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod audit;
mod backup;
mod bridge;
mod catalog;
mod config;
pub mod env;
mod error;
mod lifecycle;
mod registry;
mod request;
pub mod search;
mod stats;
mod types;
mod write;

pub use audit::{AuditEntry, AuditLog, PruneControl};
pub use backup::{read_archive, restore_archive, Archive, ArchiveEntry, ArchiveMetadata, BackupWriter};
pub use bridge::StorageBridge;
pub use catalog::{AttributeRow, SchemaCatalog, SchemaRow, TableMeta, TableRow};
pub use config::{Config, StorageMode};
pub use env::Environment;
pub use error::{CoreError, CoreResult};
pub use lifecycle::{attribute_flags, Lifecycle, TableDescription};
pub use registry::{EnvKind, EnvironmentRegistry, STORE_EXTENSION};
pub use request::{
    AuditQuery, Comparator, CreateTableObject, DeleteBeforeObject, DeleteBeforeResult,
    DeleteObject, DeleteResult, InsertObject, LogicalOperator, Origin, ReadAuditLogObject,
    SearchByConditionsObject, SearchByHashObject, SearchCondition, SearchObject, SortSpec,
    WriteResult,
};
pub use search::{ProbeTrace, SearchEngine, SearchType};
pub use stats::{BridgeStats, StatsSnapshot};
pub use types::{HashValue, OperationKind, TableRef, TxnClock, CREATED_TIME, SYSTEM_SCHEMA, UPDATED_TIME};
pub use write::WritePath;
pub use tessera_codec::Record;
