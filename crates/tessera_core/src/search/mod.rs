//! Search engine.
//!
//! Three entry points:
//!
//! - by hash: primary-index point lookups in caller order
//! - by value: one attribute, classified into a [`SearchType`] and run as a
//!   single index probe
//! - by conditions: several conditions combined with AND/OR, planned by
//!   estimated cost over one pinned snapshot
//!
//! Rows are projected last. When the requested attributes are all known
//! from the index entry (the searched attribute and the hash attribute),
//! rows are built from the entries without touching the primary index.

mod classify;
mod probe;
mod project;

pub use classify::{classify, compare_in_bracket, Classified, SearchType, WILDCARDS};
pub use project::Projection;

use crate::catalog::{SchemaCatalog, TableMeta};
use crate::env::{Environment, ReadTxn};
use crate::error::{CoreError, CoreResult};
use crate::registry::{EnvKind, EnvironmentRegistry};
use crate::request::{
    LogicalOperator, SearchByConditionsObject, SearchByHashObject, SearchObject, SortSpec,
};
use crate::stats::BridgeStats;
use crate::types::{HashValue, TableRef};
use probe::{probe, IndexHit, ProbeTarget};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tessera_codec::{decode_row, IndexKey, Record};
use tracing::debug;

/// Planner cost of a range, prefix or full-index condition.
pub const MID_COST: usize = usize::MAX / 2;

/// Planner cost of a suffix or substring condition.
pub const UNBOUNDED_COST: usize = usize::MAX;

/// How a multi-condition search was planned and run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeTrace {
    /// Conditions with their estimated cost, cheapest first.
    pub plan: Vec<(String, usize)>,
    /// Attributes whose index was probed, in probe order.
    pub probed: Vec<String>,
}

/// Runs searches against one catalog and registry.
pub struct SearchEngine<'a> {
    catalog: &'a SchemaCatalog,
    registry: &'a EnvironmentRegistry,
    stats: &'a BridgeStats,
}

struct Planned {
    attribute: String,
    search: Classified,
    cost: usize,
}

impl<'a> SearchEngine<'a> {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        catalog: &'a SchemaCatalog,
        registry: &'a EnvironmentRegistry,
        stats: &'a BridgeStats,
    ) -> Self {
        Self {
            catalog,
            registry,
            stats,
        }
    }

    fn table(&self, schema: &str, table: &str) -> CoreResult<(Arc<TableMeta>, Arc<Environment>)> {
        if schema.is_empty() || table.is_empty() {
            return Err(CoreError::validation("schema and table are required"));
        }
        let table = TableRef::new(schema, table);
        let meta = self.catalog.table(&table)?;
        let env = self.registry.open(&table, EnvKind::Data)?;
        Ok((meta, env))
    }

    fn require_attribute(meta: &TableMeta, attribute: &str) -> CoreResult<()> {
        if attribute.is_empty() {
            return Err(CoreError::validation("search_attribute is required"));
        }
        if meta.has_attribute(attribute) {
            Ok(())
        } else {
            Err(CoreError::AttributeNotFound {
                schema: meta.row.schema.clone(),
                table: meta.row.name.clone(),
                attribute: attribute.to_string(),
            })
        }
    }

    /// Fetches rows by hash in the given order. Unknown or invalid hashes
    /// are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `SchemaNotFound`/`TableNotFound`, or an engine error.
    pub fn search_by_hash(&self, request: &SearchByHashObject) -> CoreResult<Vec<Record>> {
        Ok(self
            .lookup(request)?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    /// Like [`SearchEngine::search_by_hash`], keyed by the rendered hash.
    ///
    /// # Errors
    ///
    /// Same as [`SearchEngine::search_by_hash`].
    pub fn get_data_by_hash(
        &self,
        request: &SearchByHashObject,
    ) -> CoreResult<BTreeMap<String, Record>> {
        Ok(self
            .lookup(request)?
            .into_iter()
            .map(|(hash, row)| (hash.render(), row))
            .collect())
    }

    fn lookup(&self, request: &SearchByHashObject) -> CoreResult<Vec<(HashValue, Record)>> {
        let (meta, env) = self.table(&request.schema, &request.table)?;
        let projection = Projection::parse(&request.get_attributes)?;
        self.stats.record_search();

        let mut hashes = Vec::with_capacity(request.hash_values.len());
        for value in &request.hash_values {
            match HashValue::parse(value) {
                Ok(hash) => hashes.push(hash),
                Err(e) => debug!(table = %meta.table_ref(), %value, error = %e, "skipping invalid hash"),
            }
        }

        let txn = env.read_txn();
        let keys: Vec<Vec<u8>> = hashes.iter().map(|h| h.key.clone()).collect();
        let rows = self.fetch(&txn, &meta, &keys)?;
        Ok(rows
            .into_iter()
            .map(|(key, row)| {
                let hash = hashes
                    .iter()
                    .find(|h| h.key == key)
                    .cloned()
                    .unwrap_or_else(|| HashValue {
                        value: serde_json::Value::Null,
                        key,
                    });
                (hash, projection.apply(row))
            })
            .collect())
    }

    /// Reads rows for hash keys, skipping (and logging) missing ones.
    fn fetch(
        &self,
        txn: &ReadTxn<'_>,
        meta: &TableMeta,
        keys: &[Vec<u8>],
    ) -> CoreResult<Vec<(Vec<u8>, Record)>> {
        self.stats.record_hash_lookups(keys.len() as u64);
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            match txn.get(meta.hash_attribute(), key)? {
                Some(bytes) => rows.push((key.clone(), decode_row(&bytes)?)),
                None => debug!(
                    table = %meta.table_ref(),
                    hash = %IndexKey::decode(key).map(|k| k.render()).unwrap_or_default(),
                    "hash not found"
                ),
            }
        }
        Ok(rows)
    }

    /// Searches one attribute.
    ///
    /// # Errors
    ///
    /// Returns `AttributeNotFound` for an unknown attribute,
    /// `UnknownSearchType` for an unclassifiable value, `ComparisonType` for
    /// a range of the wrong type against a typed index.
    pub fn search_by_value(&self, request: &SearchObject) -> CoreResult<Vec<Record>> {
        let (meta, env) = self.table(&request.schema, &request.table)?;
        let attribute = request.search_attribute.as_str();
        Self::require_attribute(&meta, attribute)?;
        let projection = Projection::parse(&request.get_attributes)?;
        let search = classify(
            &request.search_value,
            request.end_value.as_ref(),
            request.comparator,
        )?;
        self.stats.record_search();

        let hash_attribute = meta.hash_attribute();
        let offset = request.offset.unwrap_or(0);
        let txn = env.read_txn();

        if attribute == hash_attribute && search.kind == SearchType::Equals {
            let mut keys = Vec::new();
            for key in &search.keys {
                if let Ok(hash) = HashValue::parse(&key.to_value()) {
                    if !keys.contains(&hash.key) {
                        keys.push(hash.key);
                    }
                }
            }
            let rows = self.fetch(&txn, &meta, &keys)?;
            return Ok(window(rows, offset, request.limit)
                .map(|(_, row)| projection.apply(row))
                .collect());
        }

        let target = ProbeTarget {
            dbi: attribute,
            primary: attribute == hash_attribute,
        };
        let cap = request.limit.map(|limit| limit.saturating_add(offset));
        let hits = probe(&txn, target, &search, request.reverse, cap, self.stats)?;
        debug!(
            table = %meta.table_ref(),
            attribute,
            search_type = ?search.kind,
            hits = hits.len(),
            "index probe"
        );
        let hits: Vec<IndexHit> = window(hits, offset, request.limit).collect();

        if projection.covered_by(attribute, hash_attribute) {
            return hits
                .into_iter()
                .map(|hit| -> CoreResult<Record> {
                    Ok(projection.synthesize(
                        attribute,
                        IndexKey::decode(&hit.key)?.to_value(),
                        hash_attribute,
                        IndexKey::decode(&hit.hash)?.to_value(),
                    ))
                })
                .collect();
        }

        let keys: Vec<Vec<u8>> = hits.into_iter().map(|hit| hit.hash).collect();
        Ok(self
            .fetch(&txn, &meta, &keys)?
            .into_iter()
            .map(|(_, row)| projection.apply(row))
            .collect())
    }

    /// Searches with several conditions.
    ///
    /// # Errors
    ///
    /// Same as [`SearchEngine::search_by_value`], plus `Validation` for an
    /// empty condition list.
    pub fn search_by_conditions(
        &self,
        request: &SearchByConditionsObject,
    ) -> CoreResult<Vec<Record>> {
        self.search_by_conditions_traced(request)
            .map(|(rows, _)| rows)
    }

    /// Like [`SearchEngine::search_by_conditions`], also returning the plan
    /// and the indexes probed.
    ///
    /// # Errors
    ///
    /// Same as [`SearchEngine::search_by_conditions`].
    pub fn search_by_conditions_traced(
        &self,
        request: &SearchByConditionsObject,
    ) -> CoreResult<(Vec<Record>, ProbeTrace)> {
        let (meta, env) = self.table(&request.schema, &request.table)?;
        if request.conditions.is_empty() {
            return Err(CoreError::validation("conditions cannot be empty"));
        }
        let projection = Projection::parse(&request.get_attributes)?;
        if let Some(sort) = &request.sort {
            Self::require_attribute(&meta, &sort.attribute)?;
        }
        let mut conditions = Vec::with_capacity(request.conditions.len());
        for condition in &request.conditions {
            Self::require_attribute(&meta, &condition.search_attribute)?;
            conditions.push(Planned {
                attribute: condition.search_attribute.clone(),
                search: classify(
                    &condition.search_value,
                    condition.end_value.as_ref(),
                    condition.comparator,
                )?,
                cost: 0,
            });
        }
        self.stats.record_search();

        env.reset_read_txn()?;
        let txn = env.read_txn();
        for condition in &mut conditions {
            condition.cost = estimate(&txn, &meta, condition)?;
        }
        conditions.sort_by_key(|c| c.cost);

        let mut trace = ProbeTrace {
            plan: conditions
                .iter()
                .map(|c| (c.attribute.clone(), c.cost))
                .collect(),
            probed: Vec::new(),
        };

        let offset = request.offset.unwrap_or(0);
        let rows = match request.operator {
            LogicalOperator::And => {
                let (first, rest) = conditions.split_first().ok_or_else(|| {
                    CoreError::validation("conditions cannot be empty")
                })?;
                let ids = self.probe_ids(&txn, &meta, first, &mut trace)?;
                let mut rows: Vec<Record> = self
                    .fetch(&txn, &meta, &ids)?
                    .into_iter()
                    .map(|(_, row)| row)
                    .filter(|row| {
                        rest.iter()
                            .all(|c| c.search.matches(row.get(&c.attribute)))
                    })
                    .collect();
                if let Some(sort) = &request.sort {
                    sort_rows(&mut rows, sort);
                }
                window(rows, offset, request.limit).collect::<Vec<_>>()
            }
            LogicalOperator::Or => {
                let mut seen = HashSet::new();
                let mut ids = Vec::new();
                for condition in &conditions {
                    for id in self.probe_ids(&txn, &meta, condition, &mut trace)? {
                        if seen.insert(id.clone()) {
                            ids.push(id);
                        }
                    }
                }
                if let Some(sort) = &request.sort {
                    let mut rows: Vec<Record> = self
                        .fetch(&txn, &meta, &ids)?
                        .into_iter()
                        .map(|(_, row)| row)
                        .collect();
                    sort_rows(&mut rows, sort);
                    window(rows, offset, request.limit).collect()
                } else {
                    let ids: Vec<Vec<u8>> = window(ids, offset, request.limit).collect();
                    self.fetch(&txn, &meta, &ids)?
                        .into_iter()
                        .map(|(_, row)| row)
                        .collect()
                }
            }
        };

        debug!(
            table = %meta.table_ref(),
            operator = ?request.operator,
            probed = ?trace.probed,
            rows = rows.len(),
            "condition search"
        );
        Ok((
            rows.into_iter().map(|row| projection.apply(row)).collect(),
            trace,
        ))
    }

    /// Hash keys matching one condition, first-seen order, no repeats.
    fn probe_ids(
        &self,
        txn: &ReadTxn<'_>,
        meta: &TableMeta,
        condition: &Planned,
        trace: &mut ProbeTrace,
    ) -> CoreResult<Vec<Vec<u8>>> {
        let target = ProbeTarget {
            dbi: &condition.attribute,
            primary: condition.attribute == meta.hash_attribute(),
        };
        trace.probed.push(condition.attribute.clone());
        let hits = probe(txn, target, &condition.search, false, None, self.stats)?;
        let mut seen = HashSet::with_capacity(hits.len());
        Ok(hits
            .into_iter()
            .map(|hit| hit.hash)
            .filter(|hash| seen.insert(hash.clone()))
            .collect())
    }
}

/// Estimated rows a condition matches.
fn estimate(txn: &ReadTxn<'_>, meta: &TableMeta, condition: &Planned) -> CoreResult<usize> {
    Ok(match condition.search.kind {
        SearchType::Equals => {
            let primary = condition.attribute == meta.hash_attribute();
            let mut count = 0usize;
            for key in &condition.search.keys {
                let Ok(encoded) = key.encode() else {
                    continue;
                };
                count += if primary {
                    usize::from(txn.get(&condition.attribute, &encoded)?.is_some())
                } else {
                    txn.count_dups(&condition.attribute, &encoded)?
                };
            }
            count
        }
        SearchType::EndsWith | SearchType::Contains => UNBOUNDED_COST,
        SearchType::All
        | SearchType::StartsWith
        | SearchType::GreaterThan
        | SearchType::GreaterThanEqual
        | SearchType::LessThan
        | SearchType::LessThanEqual
        | SearchType::Between => MID_COST,
    })
}

fn window<T>(items: Vec<T>, offset: usize, limit: Option<usize>) -> impl Iterator<Item = T> {
    items
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
}

/// Orders rows by one attribute. Rows lacking a sortable value go last.
fn sort_rows(rows: &mut [Record], sort: &SortSpec) {
    let sort_key = |row: &Record| {
        row.get(&sort.attribute)
            .and_then(IndexKey::from_value)
            .and_then(|key| key.encode().ok())
    };
    rows.sort_by(|a, b| match (sort_key(a), sort_key(b)) {
        (Some(a), Some(b)) if sort.descending => b.cmp(&a),
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
