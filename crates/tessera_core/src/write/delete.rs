//! Deletes by hash value.

use super::{index_key, WritePath};
use crate::audit::AuditEntry;
use crate::env::{BatchOutcome, WriteBatch};
use crate::error::{CoreError, CoreResult};
use crate::lifecycle::attribute_flags;
use crate::registry::EnvKind;
use crate::request::{DeleteObject, DeleteResult};
use crate::types::{HashValue, OperationKind};
use std::collections::HashSet;
use tessera_codec::decode_row;
use tracing::{debug, info, warn};

impl WritePath<'_> {
    /// Deletes rows and their index entries.
    ///
    /// Hashes come from `hash_values`, or from the hash attribute of
    /// `records` when no hash values are given. Hashes that do not exist
    /// are reported as skipped. A request naming nothing succeeds without
    /// touching storage.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a malformed hash, `SchemaNotFound`/
    /// `TableNotFound`, an engine error, or `VersionConflict` when a row
    /// kept changing through every retry.
    pub fn delete(&self, request: &DeleteObject) -> CoreResult<DeleteResult> {
        let (table, meta) = self.resolve(&request.schema, &request.table)?;
        let hash_attribute = meta.hash_attribute();

        let requested: Vec<&serde_json::Value> = if request.hash_values.is_empty() {
            request
                .records
                .iter()
                .filter_map(|r| r.get(hash_attribute))
                .collect()
        } else {
            request.hash_values.iter().collect()
        };
        if requested.is_empty() {
            return Ok(DeleteResult {
                message: "0 of 0 records successfully deleted".to_string(),
                deleted_hashes: Vec::new(),
                skipped_hashes: Vec::new(),
                txn_time: None,
            });
        }

        let mut hashes = Vec::with_capacity(requested.len());
        let mut seen = HashSet::new();
        for value in requested {
            let hash = HashValue::parse(value)?;
            if seen.insert(hash.key.clone()) {
                hashes.push(hash);
            }
        }

        let env = self.registry.open(&table, EnvKind::Data)?;
        let txn_time = self.clock.now();
        let mut skipped = Vec::new();
        let mut deleted = Vec::new();
        let mut originals = Vec::new();
        let mut pending = hashes;
        let mut attempt = 0;
        let mut conflict = None;
        while !pending.is_empty() {
            let mut submitted = Vec::new();
            {
                let txn = env.read_txn();
                for hash in pending {
                    let Some((version, bytes)) = txn.get_versioned(hash_attribute, &hash.key)?
                    else {
                        skipped.push(hash.value);
                        continue;
                    };
                    let row = decode_row(&bytes)?;
                    let mut batch =
                        WriteBatch::new().if_version(hash_attribute, hash.key.clone(), version);
                    batch.delete(hash_attribute, hash.key.clone());
                    for (attribute, value) in row.iter().filter(|(a, _)| *a != hash_attribute) {
                        if !env.has_dbi(attribute) {
                            continue;
                        }
                        if let Some(key) = index_key(attribute_flags(attribute).key_kind, value) {
                            batch.delete_dup(attribute, key, hash.key.clone());
                        }
                    }
                    let ticket = env.submit(batch);
                    submitted.push((hash, row, ticket));
                }
            }

            if let Some((_, _, last)) = submitted.last() {
                env.wait(last)?;
            }
            let mut changed = Vec::new();
            for (hash, row, ticket) in submitted {
                match ticket.outcome() {
                    Some(BatchOutcome::Committed { .. }) => {
                        deleted.push(hash.value);
                        originals.push(row);
                    }
                    Some(BatchOutcome::ConditionFailed) => changed.push(hash),
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
                warn!(table = %table, rows = changed.len(), attempt, "delete gave up on changing rows");
                conflict = Some(changed[0].render());
                break;
            }
            attempt += 1;
            self.stats.record_write_retries(changed.len() as u64);
            debug!(table = %table, rows = changed.len(), attempt, "rows changed concurrently, retrying");
            pending = changed;
        }

        self.stats.record_delete(deleted.len() as u64);
        if !deleted.is_empty() {
            self.append_audit(
                &table,
                AuditEntry {
                    timestamp: txn_time,
                    operation: OperationKind::Delete,
                    user_name: request.origin.as_ref().and_then(|o| o.user.clone()),
                    hash_values: deleted.clone(),
                    records: Vec::new(),
                    original_records: originals,
                },
            );
        }

        if let Some(hash) = conflict {
            return Err(CoreError::VersionConflict {
                table: table.to_string(),
                hash,
            });
        }

        info!(table = %table, deleted = deleted.len(), skipped = skipped.len(), "delete finished");
        Ok(DeleteResult {
            message: format!(
                "{} of {} records successfully deleted",
                deleted.len(),
                deleted.len() + skipped.len()
            ),
            deleted_hashes: deleted,
            skipped_hashes: skipped,
            txn_time: Some(txn_time),
        })
    }
}
