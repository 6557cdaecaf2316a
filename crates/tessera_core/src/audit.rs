//! Audit log.
//!
//! Each table may have an audit environment beside its data environment.
//! It holds three DBIs:
//!
//! | DBI             | key              | values                 |
//! |-----------------|------------------|------------------------|
//! | `txn_timestamp` | timestamp        | CBOR [`AuditEntry`]    |
//! | `user_name`     | user             | timestamps (dup)       |
//! | `hash_value`    | touched hash     | timestamps (dup)       |
//!
//! Entries are only ever appended; retention removes the oldest ones in
//! bounded passes.

use crate::catalog::SchemaCatalog;
use crate::config::Config;
use crate::env::{BatchOutcome, DbiFlags, Environment, KeyKind, WriteBatch};
use crate::error::{CoreError, CoreResult};
use crate::registry::{EnvKind, EnvironmentRegistry};
use crate::request::{AuditQuery, DeleteBeforeObject, DeleteBeforeResult, ReadAuditLogObject};
use crate::stats::BridgeStats;
use crate::types::{HashValue, OperationKind, TableRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::ops::{Bound, ControlFlow};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tessera_codec::{decode, encode, IndexKey, KeyBracket, Record};
use tracing::{debug, info};

/// Entries by timestamp.
pub const TIMESTAMP_DBI: &str = "txn_timestamp";
/// Timestamps by user.
pub const USER_DBI: &str = "user_name";
/// Timestamps by touched hash.
pub const HASH_DBI: &str = "hash_value";

const TIMESTAMP_FLAGS: DbiFlags = DbiFlags::new(false, KeyKind::Numeric);
const USER_FLAGS: DbiFlags = DbiFlags::new(true, KeyKind::Text);

/// One audited write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Transaction time, unique within the table.
    pub timestamp: f64,
    /// Kind of write.
    pub operation: OperationKind,
    /// Issuing user.
    #[serde(default)]
    pub user_name: Option<String>,
    /// Hashes the write touched.
    pub hash_values: Vec<Value>,
    /// Rows after the write.
    #[serde(default)]
    pub records: Vec<Record>,
    /// Rows before the write.
    #[serde(default)]
    pub original_records: Vec<Record>,
}

/// Cancels a running retention prune between passes.
#[derive(Debug, Default)]
pub struct PruneControl {
    cancelled: AtomicBool,
}

impl PruneControl {
    /// A control that never cancels unless asked.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop before the next pass.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Audit log operations.
pub struct AuditLog<'a> {
    config: &'a Config,
    catalog: &'a SchemaCatalog,
    registry: &'a EnvironmentRegistry,
    stats: &'a BridgeStats,
}

impl<'a> AuditLog<'a> {
    /// Creates an audit log view.
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

    /// Opens (creating if needed) a table's audit environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment cannot be opened or its DBIs
    /// created.
    pub fn ensure(&self, table: &TableRef) -> CoreResult<Arc<Environment>> {
        let env = self.registry.open(table, EnvKind::Audit)?;
        if ![TIMESTAMP_DBI, USER_DBI, HASH_DBI]
            .iter()
            .all(|name| env.has_dbi(name))
        {
            let mut batch = WriteBatch::new();
            batch
                .create_dbi(TIMESTAMP_DBI, TIMESTAMP_FLAGS)
                .create_dbi(USER_DBI, USER_FLAGS)
                .create_dbi(HASH_DBI, DbiFlags::INDEX);
            env.write(batch)?;
        }
        Ok(env)
    }

    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if an entry with the same timestamp exists, or an
    /// engine error.
    pub fn append(&self, table: &TableRef, entry: &AuditEntry) -> CoreResult<()> {
        let env = self.ensure(table)?;
        let ts_key = IndexKey::Number(entry.timestamp).encode()?;

        let mut batch = WriteBatch::new().if_absent(TIMESTAMP_DBI, ts_key.clone());
        batch.put(TIMESTAMP_DBI, ts_key.clone(), encode(entry)?);
        for (dbi, key) in cross_keys(entry) {
            batch.put_dup(dbi, key, ts_key.clone());
        }
        if env.write(batch)? == BatchOutcome::ConditionFailed {
            return Err(CoreError::conflict(format!(
                "audit entry {} on '{table}'",
                entry.timestamp
            )));
        }
        self.stats.record_audit_entry();
        debug!(
            table = %table,
            operation = %entry.operation,
            hashes = entry.hash_values.len(),
            "audit entry appended"
        );
        Ok(())
    }

    /// Reads entries, oldest first.
    ///
    /// A table that never had an audit environment has no entries.
    ///
    /// # Errors
    ///
    /// Returns `SchemaNotFound`/`TableNotFound`, or an engine error.
    pub fn read_audit_log(&self, request: &ReadAuditLogObject) -> CoreResult<Vec<AuditEntry>> {
        let table = TableRef::new(&request.schema, &request.table);
        self.catalog.table(&table)?;
        let env = match self.registry.get(&table, EnvKind::Audit) {
            Ok(env) => env,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        env.reset_read_txn()?;
        if !env.has_dbi(TIMESTAMP_DBI) {
            return Ok(Vec::new());
        }
        let txn = env.read_txn();

        let timestamps: BTreeSet<Vec<u8>> = match &request.query {
            AuditQuery::Timestamp { from, to } => {
                let lower = match from {
                    Some(from) => Bound::Included(IndexKey::Number(*from).encode()?),
                    None => Bound::Unbounded,
                };
                let upper = match to {
                    Some(to) => Bound::Included(IndexKey::Number(*to).encode()?),
                    None => Bound::Unbounded,
                };
                return txn
                    .cursor(TIMESTAMP_DBI)
                    .range(lower, upper)
                    .collect_entries()?
                    .iter()
                    .map(|entry| decode(&entry.value).map_err(CoreError::from))
                    .collect();
            }
            AuditQuery::Username(users) => {
                let mut found = BTreeSet::new();
                for user in users {
                    let key = IndexKey::Text(user.clone()).encode()?;
                    found.extend(txn.get_dups(USER_DBI, &key)?);
                }
                found
            }
            AuditQuery::HashValue(values) => {
                let mut found = BTreeSet::new();
                for value in values {
                    let Ok(hash) = HashValue::parse(value) else {
                        continue;
                    };
                    found.extend(txn.get_dups(HASH_DBI, &hash.key)?);
                }
                found
            }
        };

        let mut entries = Vec::with_capacity(timestamps.len());
        for ts_key in timestamps {
            if let Some(bytes) = txn.get(TIMESTAMP_DBI, &ts_key)? {
                entries.push(decode(&bytes)?);
            }
        }
        Ok(entries)
    }

    /// Removes entries strictly older than `request.timestamp`.
    ///
    /// Works in passes of at most `prune_batch_size` entries, pausing
    /// `prune_pause` after each pass that removed something, until a pass
    /// finds nothing or `control` is cancelled. Nothing to remove is a
    /// success with a zero count.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a non-finite timestamp,
    /// `SchemaNotFound`/`TableNotFound`, or an engine error. Passes that
    /// completed before an error stay applied.
    pub fn delete_before(
        &self,
        request: &DeleteBeforeObject,
        control: &PruneControl,
    ) -> CoreResult<DeleteBeforeResult> {
        if !request.timestamp.is_finite() {
            return Err(CoreError::validation("timestamp must be a finite number"));
        }
        let table = TableRef::new(&request.schema, &request.table);
        self.catalog.table(&table)?;

        let mut result = DeleteBeforeResult {
            message: String::new(),
            start_timestamp: None,
            end_timestamp: None,
            transactions_deleted: 0,
            passes: 0,
        };
        let env = match self.registry.get(&table, EnvKind::Audit) {
            Ok(env) if env.has_dbi(TIMESTAMP_DBI) => Some(env),
            Ok(_) => None,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if let Some(env) = env {
            let cutoff = IndexKey::Number(request.timestamp).encode()?;
            let batch_size = self.config.prune_batch_size.max(1);
            loop {
                if control.is_cancelled() {
                    info!(table = %table, passes = result.passes, "audit prune cancelled");
                    break;
                }
                let removed = Self::prune_pass(&env, &cutoff, batch_size)?;
                let (Some(first), Some(last)) = (removed.first(), removed.last()) else {
                    break;
                };
                result.start_timestamp = Some(result.start_timestamp.unwrap_or(*first));
                result.end_timestamp = Some(*last);
                result.transactions_deleted += removed.len() as u64;
                result.passes += 1;
                self.stats.record_audit_pruned(removed.len() as u64);
                self.stats.record_prune_pass();
                debug!(
                    table = %table,
                    pass = result.passes,
                    removed = removed.len(),
                    "audit prune pass"
                );
                self.stats.record_prune_pause();
                thread::sleep(self.config.prune_pause);
            }
        }

        result.message = if result.transactions_deleted == 0 {
            format!("no transactions found before {}", request.timestamp)
        } else {
            format!(
                "{} transactions deleted before {}",
                result.transactions_deleted, request.timestamp
            )
        };
        info!(
            table = %table,
            deleted = result.transactions_deleted,
            passes = result.passes,
            "audit prune finished"
        );
        Ok(result)
    }

    /// Removes up to `limit` of the oldest entries below `cutoff`, with
    /// their cross-index entries. Returns the removed timestamps in order.
    fn prune_pass(env: &Environment, cutoff: &[u8], limit: usize) -> CoreResult<Vec<f64>> {
        let txn = env.read_txn();
        let mut found: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        txn.cursor(TIMESTAMP_DBI)
            .range(
                Bound::Included(KeyBracket::Number.lower_bound()),
                Bound::Excluded(cutoff.to_vec()),
            )
            .for_each(|key, value, _| {
                found.push((key.to_vec(), value.to_vec()));
                if found.len() >= limit {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })?;
        drop(txn);
        if found.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch = WriteBatch::new();
        let mut removed = Vec::with_capacity(found.len());
        for (ts_key, bytes) in found {
            let entry: AuditEntry = decode(&bytes)?;
            for (dbi, key) in cross_keys(&entry) {
                batch.delete_dup(dbi, key, ts_key.clone());
            }
            batch.delete(TIMESTAMP_DBI, ts_key);
            removed.push(entry.timestamp);
        }
        env.write(batch)?;
        Ok(removed)
    }
}

/// Cross-index `(dbi, key)` pairs of an entry.
fn cross_keys(entry: &AuditEntry) -> Vec<(&'static str, Vec<u8>)> {
    let mut keys = Vec::with_capacity(entry.hash_values.len() + 1);
    if let Some(user) = &entry.user_name {
        if let Ok(key) = IndexKey::Text(user.clone()).encode() {
            keys.push((USER_DBI, key));
        }
    }
    let mut seen = BTreeSet::new();
    for value in &entry.hash_values {
        if let Some(key) = IndexKey::from_value(value).and_then(|k| k.encode().ok()) {
            if seen.insert(key.clone()) {
                keys.push((HASH_DBI, key));
            }
        }
    }
    keys
}
