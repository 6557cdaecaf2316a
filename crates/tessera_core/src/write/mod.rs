//! Write path.
//!
//! Insert, update, upsert and delete. A write validates the request,
//! creates any attribute it has not seen before, then turns every record
//! into one conditional [`WriteBatch`] (row plus index entries) submitted
//! to the table's write queue. Batches commit in submission order, so only
//! the last ticket is waited on. A row that changed between its read and
//! its commit is read again and resubmitted, up to `write_retries` times.
//! The audit entry is appended afterwards; its failure is logged and never
//! undoes the write.

mod delete;

use crate::audit::{AuditEntry, AuditLog};
use crate::catalog::{SchemaCatalog, TableMeta};
use crate::config::Config;
use crate::env::{BatchOutcome, Environment, KeyKind, WriteBatch, WriteTicket};
use crate::error::{CoreError, CoreResult};
use crate::lifecycle::{attribute_flags, Lifecycle};
use crate::registry::{EnvKind, EnvironmentRegistry};
use crate::request::{InsertObject, Origin, WriteResult};
use crate::stats::BridgeStats;
use crate::types::{HashValue, OperationKind, TableRef, TxnClock, CREATED_TIME, UPDATED_TIME};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tessera_codec::{decode_row, encode_row, CodecError, IndexKey, Record};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs writes against one catalog and registry.
pub struct WritePath<'a> {
    config: &'a Config,
    catalog: &'a SchemaCatalog,
    registry: &'a EnvironmentRegistry,
    clock: &'a TxnClock,
    stats: &'a BridgeStats,
}

/// A request record with its cast hash, before merging with any stored
/// row.
struct Prepared {
    hash: HashValue,
    record: Record,
}

impl<'a> WritePath<'a> {
    /// Creates a write path.
    #[must_use]
    pub fn new(
        config: &'a Config,
        catalog: &'a SchemaCatalog,
        registry: &'a EnvironmentRegistry,
        clock: &'a TxnClock,
        stats: &'a BridgeStats,
    ) -> Self {
        Self {
            config,
            catalog,
            registry,
            clock,
            stats,
        }
    }

    /// Inserts records. Records whose hash exists are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a malformed request or hash value,
    /// `SchemaNotFound`/`TableNotFound`, an engine error, or
    /// `VersionConflict` when a row kept changing through every retry. Rows
    /// committed before the conflict stay written and audited.
    pub fn insert(&self, request: &InsertObject) -> CoreResult<WriteResult> {
        self.write(request, OperationKind::Insert)
    }

    /// Updates existing records, merging the given attributes into them.
    /// Records whose hash does not exist are skipped.
    ///
    /// # Errors
    ///
    /// Same as [`WritePath::insert`]; a record without a valid hash fails
    /// the whole request.
    pub fn update(&self, request: &InsertObject) -> CoreResult<WriteResult> {
        self.write(request, OperationKind::Update)
    }

    /// Updates records that exist and inserts the rest.
    ///
    /// # Errors
    ///
    /// Same as [`WritePath::insert`].
    pub fn upsert(&self, request: &InsertObject) -> CoreResult<WriteResult> {
        self.write(request, OperationKind::Upsert)
    }

    fn lifecycle(&self) -> Lifecycle<'a> {
        Lifecycle::new(self.config, self.catalog, self.registry, self.stats)
    }

    fn audit(&self) -> AuditLog<'a> {
        AuditLog::new(self.config, self.catalog, self.registry, self.stats)
    }

    fn resolve(&self, schema: &str, table: &str) -> CoreResult<(TableRef, Arc<TableMeta>)> {
        if schema.is_empty() || table.is_empty() {
            return Err(CoreError::validation("schema and table are required"));
        }
        let table = TableRef::new(schema, table);
        let meta = self.catalog.table(&table)?;
        Ok((table, meta))
    }

    fn write(&self, request: &InsertObject, operation: OperationKind) -> CoreResult<WriteResult> {
        let (table, meta) = self.resolve(&request.schema, &request.table)?;
        let hash_attribute = meta.hash_attribute().to_string();
        if let Some(requested) = &request.hash_attribute {
            if *requested != hash_attribute {
                return Err(CoreError::validation(format!(
                    "hash_attribute '{requested}' does not match '{hash_attribute}' of '{table}'"
                )));
            }
        }
        if request.records.is_empty() {
            return Err(CoreError::validation("records cannot be empty"));
        }

        // Cast and de-duplicate hashes; later duplicates are skipped but
        // still contribute their attributes.
        let mut prepared = Vec::with_capacity(request.records.len());
        let mut skipped = Vec::new();
        let mut seen = HashSet::new();
        let mut attributes = BTreeSet::new();
        for record in &request.records {
            let hash = match record.get(&hash_attribute).filter(|v| !v.is_null()) {
                Some(value) => HashValue::parse(value)?,
                None if operation == OperationKind::Update => {
                    return Err(CoreError::validation(format!(
                        "every record of an update needs a valid '{hash_attribute}'"
                    )));
                }
                None => HashValue::parse(&Value::String(Uuid::new_v4().to_string()))?,
            };
            for name in record.keys() {
                if name.is_empty() {
                    return Err(CoreError::validation("attribute names cannot be empty"));
                }
                attributes.insert(name.clone());
            }
            if !seen.insert(hash.key.clone()) {
                skipped.push(hash.value);
                continue;
            }
            let mut record = record.clone();
            record.insert(hash_attribute.clone(), hash.value.clone());
            prepared.push(Prepared { hash, record });
        }
        attributes.insert(hash_attribute.clone());
        if !table.is_system() {
            attributes.insert(CREATED_TIME.to_string());
            attributes.insert(UPDATED_TIME.to_string());
        }

        let new_attributes = self.create_missing(&table, &meta, &attributes)?;
        let env = self.registry.open(&table, EnvKind::Data)?;
        let txn_time = self.clock.now();

        // One conditional batch per record. A batch whose row changed
        // between the read and the commit is planned again from a fresh
        // snapshot.
        let mut written = Vec::new();
        let mut after = Vec::new();
        let mut before = Vec::new();
        let mut pending = prepared;
        let mut attempt = 0;
        let mut conflict = None;
        while !pending.is_empty() {
            let mut submitted: Vec<(Prepared, Record, Option<Record>, WriteTicket)> = Vec::new();
            {
                let txn = env.read_txn();
                for item in pending {
                    let existing = match txn.get_versioned(&hash_attribute, &item.hash.key)? {
                        Some((version, bytes)) => Some((version, decode_row(&bytes)?)),
                        None => None,
                    };
                    let (batch, row, original) = match (operation, existing) {
                        (OperationKind::Insert, Some(_)) | (OperationKind::Update, None) => {
                            skipped.push(item.hash.value);
                            continue;
                        }
                        (_, None) => {
                            let mut row = item.record.clone();
                            stamp(&table, &mut row, txn_time, None);
                            let mut batch =
                                WriteBatch::new().if_absent(&hash_attribute, item.hash.key.clone());
                            self.row_ops(&env, &mut batch, &hash_attribute, &item.hash, &row, None)?;
                            (batch, row, None)
                        }
                        (_, Some((version, old))) => {
                            let mut row = old.clone();
                            row.extend(item.record.clone());
                            stamp(&table, &mut row, txn_time, old.get(CREATED_TIME));
                            let mut batch = WriteBatch::new().if_version(
                                &hash_attribute,
                                item.hash.key.clone(),
                                version,
                            );
                            self.row_ops(
                                &env,
                                &mut batch,
                                &hash_attribute,
                                &item.hash,
                                &row,
                                Some(&old),
                            )?;
                            (batch, row, Some(old))
                        }
                    };
                    let ticket = env.submit(batch);
                    submitted.push((item, row, original, ticket));
                }
            }

            if let Some((_, _, _, last)) = submitted.last() {
                env.wait(last)?;
            }
            let mut changed = Vec::new();
            for (item, row, original, ticket) in submitted {
                match ticket.outcome() {
                    Some(BatchOutcome::Committed { .. }) => {
                        written.push(item.hash.value);
                        after.push(row);
                        if let Some(original) = original {
                            before.push(original);
                        }
                    }
                    Some(BatchOutcome::ConditionFailed) => changed.push(item),
                    Some(BatchOutcome::Rejected { reason } | BatchOutcome::Failed { reason }) => {
                        return Err(CoreError::engine(reason.clone()));
                    }
                    None => return Err(CoreError::engine("write ticket was never resolved")),
                }
            }
            if changed.is_empty() {
                break;
            }
            if attempt >= self.config.write_retries {
                warn!(table = %table, rows = changed.len(), attempt, "write gave up on changing rows");
                conflict = Some(changed[0].hash.render());
                break;
            }
            attempt += 1;
            self.stats.record_write_retries(changed.len() as u64);
            debug!(table = %table, rows = changed.len(), attempt, "rows changed concurrently, retrying");
            pending = changed;
        }

        self.stats
            .record_write(written.len() as u64, skipped.len() as u64);
        if !written.is_empty() {
            self.append_audit(
                &table,
                AuditEntry {
                    timestamp: txn_time,
                    operation,
                    user_name: request.origin.as_ref().and_then(|o: &Origin| o.user.clone()),
                    hash_values: written.clone(),
                    records: after,
                    original_records: before,
                },
            );
        }

        if let Some(hash) = conflict {
            return Err(CoreError::VersionConflict {
                table: table.to_string(),
                hash,
            });
        }

        info!(
            table = %table,
            operation = %operation,
            written = written.len(),
            skipped = skipped.len(),
            "write finished"
        );
        Ok(WriteResult {
            message: format!(
                "{} {} of {} records",
                operation.past_tense(),
                written.len(),
                request.records.len()
            ),
            written_hashes: written,
            skipped_hashes: skipped,
            txn_time,
            new_attributes,
        })
    }

    /// Creates every attribute in `attributes` the table lacks. Returns the
    /// ones this call created.
    fn create_missing(
        &self,
        table: &TableRef,
        meta: &TableMeta,
        attributes: &BTreeSet<String>,
    ) -> CoreResult<Vec<String>> {
        let lifecycle = self.lifecycle();
        let mut created = Vec::new();
        for attribute in attributes.iter().filter(|a| !meta.has_attribute(a)) {
            if lifecycle.ensure_attribute(table, attribute)? {
                created.push(attribute.clone());
            }
        }
        if !created.is_empty() {
            debug!(table = %table, attributes = ?created, "attributes created");
        }
        Ok(created)
    }

    /// Adds the row put and the index changes for one record.
    fn row_ops(
        &self,
        env: &Environment,
        batch: &mut WriteBatch,
        hash_attribute: &str,
        hash: &HashValue,
        row: &Record,
        old: Option<&Record>,
    ) -> CoreResult<()> {
        batch.put(hash_attribute, hash.key.clone(), encode_row(row)?);

        let attributes: BTreeSet<&String> = row
            .keys()
            .chain(old.into_iter().flat_map(|o| o.keys()))
            .filter(|a| *a != hash_attribute)
            .collect();
        for attribute in attributes {
            if !env.has_dbi(attribute) {
                continue;
            }
            let kind = attribute_flags(attribute).key_kind;
            let before = old.and_then(|o| o.get(attribute));
            let after = row.get(attribute);
            if before == after {
                continue;
            }
            if let Some(key) = before.and_then(|v| index_key(kind, v)) {
                batch.delete_dup(attribute, key, hash.key.clone());
            }
            if let Some(key) = after.and_then(|v| index_key(kind, v)) {
                batch.put_dup(attribute, key, hash.key.clone());
            }
        }
        Ok(())
    }

    fn append_audit(&self, table: &TableRef, entry: AuditEntry) {
        if !self.config.audit_enabled {
            return;
        }
        if let Err(e) = self.audit().append(table, &entry) {
            self.stats.record_audit_failure();
            warn!(table = %table, operation = %entry.operation, error = %e, "audit append failed");
        }
    }
}

/// Encoded index key of a row value, or `None` when the value is not
/// indexed: arrays, objects, over-long strings, and non-numbers in a
/// numeric index.
pub(crate) fn index_key(kind: KeyKind, value: &Value) -> Option<Vec<u8>> {
    let key = IndexKey::from_value(value)?;
    if kind == KeyKind::Numeric && key.as_number().is_none() {
        return None;
    }
    match key.encode() {
        Ok(encoded) => Some(encoded),
        Err(CodecError::KeyTooLarge { size, .. }) => {
            debug!(size, "value too large to index");
            None
        }
        Err(_) => None,
    }
}

/// Sets the timestamp attributes of a non-system row.
fn stamp(table: &TableRef, record: &mut Record, txn_time: f64, created: Option<&Value>) {
    if table.is_system() {
        return;
    }
    let created = created
        .filter(|v| v.is_number())
        .cloned()
        .unwrap_or_else(|| time_value(txn_time));
    record.insert(CREATED_TIME.to_string(), created);
    record.insert(UPDATED_TIME.to_string(), time_value(txn_time));
}

fn time_value(time: f64) -> Value {
    IndexKey::Number(time).to_value()
}
