//! Schema catalog.
//!
//! The catalog is an explicit object handed to every component that needs
//! schema knowledge. Its rows live in three DBIs of the system environment:
//!
//! | DBI             | key                        | row              |
//! |-----------------|----------------------------|------------------|
//! | `hdb_schema`    | `schema`                   | [`SchemaRow`]    |
//! | `hdb_table`     | `schema.table`             | [`TableRow`]     |
//! | `hdb_attribute` | `schema.table.attribute`   | [`AttributeRow`] |
//!
//! The in-memory map mirrors the rows and is rebuilt by [`SchemaCatalog::reload`].
//! Every mutation writes the row first and updates the map only after the
//! commit, so the map never shows something the store does not hold.

use crate::env::{BatchOutcome, DbiFlags, Environment, KeyKind, WriteBatch};
use crate::error::{CoreError, CoreResult};
use crate::types::{TableRef, TxnClock};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Bound, ControlFlow};
use std::sync::Arc;
use tessera_codec::{decode, encode, IndexKey, KeyBracket};
use tracing::{debug, info};
use uuid::Uuid;

/// Schema rows.
pub const SCHEMA_DBI: &str = "hdb_schema";
/// Table rows.
pub const TABLE_DBI: &str = "hdb_table";
/// Attribute rows.
pub const ATTRIBUTE_DBI: &str = "hdb_attribute";

const CATALOG_FLAGS: DbiFlags = DbiFlags::new(false, KeyKind::Text);

/// Persisted schema row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRow {
    /// Schema name.
    pub name: String,
    /// Creation time.
    pub created_time: f64,
}

/// Persisted table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
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
    /// Creation time.
    pub created_time: f64,
}

/// Persisted attribute row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRow {
    /// Catalog id.
    pub id: String,
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Attribute name.
    pub attribute: String,
}

/// Cached table metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    /// Table row.
    pub row: TableRow,
    /// Attributes by name, in name order.
    pub attributes: BTreeMap<String, AttributeRow>,
}

impl TableMeta {
    /// Reference to this table.
    #[must_use]
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.row.schema, &self.row.name)
    }

    /// Primary-key attribute.
    #[must_use]
    pub fn hash_attribute(&self) -> &str {
        &self.row.hash_attribute
    }

    /// Whether the attribute exists.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Attribute names in order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}

/// Tables of one schema, by name.
type SchemaTables = BTreeMap<String, Arc<TableMeta>>;

/// The schema catalog.
pub struct SchemaCatalog {
    env: Arc<Environment>,
    clock: Arc<TxnClock>,
    schemas: RwLock<BTreeMap<String, SchemaTables>>,
}

impl SchemaCatalog {
    /// Opens the catalog over the system environment, creating its DBIs if
    /// needed, and loads it.
    ///
    /// # Errors
    ///
    /// Returns an error if the DBIs cannot be created or rows are
    /// unreadable.
    pub fn open(env: Arc<Environment>, clock: Arc<TxnClock>) -> CoreResult<Self> {
        if [SCHEMA_DBI, TABLE_DBI, ATTRIBUTE_DBI]
            .iter()
            .any(|name| !env.has_dbi(name))
        {
            let mut batch = WriteBatch::new();
            batch
                .create_dbi(SCHEMA_DBI, CATALOG_FLAGS)
                .create_dbi(TABLE_DBI, CATALOG_FLAGS)
                .create_dbi(ATTRIBUTE_DBI, CATALOG_FLAGS);
            env.write(batch)?;
        }
        let catalog = Self {
            env,
            clock,
            schemas: RwLock::new(BTreeMap::new()),
        };
        catalog.reload()?;
        Ok(catalog)
    }

    /// Rebuilds the in-memory map from the persisted rows, picking up
    /// changes made through other handles of the system store.
    ///
    /// # Errors
    ///
    /// Returns an error if rows cannot be read or decoded.
    pub fn reload(&self) -> CoreResult<()> {
        self.env.reset_read_txn()?;
        let txn = self.env.read_txn();

        let schema_rows: Vec<SchemaRow> = read_rows(&txn, SCHEMA_DBI)?;
        let table_rows: Vec<TableRow> = read_rows(&txn, TABLE_DBI)?;
        let attribute_rows: Vec<AttributeRow> = read_rows(&txn, ATTRIBUTE_DBI)?;

        let mut schemas: BTreeMap<String, SchemaTables> = schema_rows
            .into_iter()
            .map(|row| (row.name, BTreeMap::new()))
            .collect();

        let mut tables: BTreeMap<(String, String), TableMeta> = table_rows
            .into_iter()
            .map(|row| {
                (
                    (row.schema.clone(), row.name.clone()),
                    TableMeta {
                        row,
                        attributes: BTreeMap::new(),
                    },
                )
            })
            .collect();
        for attr in attribute_rows {
            if let Some(meta) = tables.get_mut(&(attr.schema.clone(), attr.table.clone())) {
                meta.attributes.insert(attr.attribute.clone(), attr);
            }
        }
        for ((schema, table), meta) in tables {
            if let Some(tables) = schemas.get_mut(&schema) {
                tables.insert(table, Arc::new(meta));
            }
        }

        debug!(schemas = schemas.len(), "catalog loaded");
        *self.schemas.write() = schemas;
        Ok(())
    }

    /// The system environment holding the rows.
    #[must_use]
    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    /// Whether a schema exists.
    #[must_use]
    pub fn has_schema(&self, schema: &str) -> bool {
        self.schemas.read().contains_key(schema)
    }

    /// Schema names in order.
    #[must_use]
    pub fn schema_names(&self) -> Vec<String> {
        self.schemas.read().keys().cloned().collect()
    }

    /// Tables of a schema.
    ///
    /// # Errors
    ///
    /// Returns `SchemaNotFound` if the schema does not exist.
    pub fn tables(&self, schema: &str) -> CoreResult<Vec<Arc<TableMeta>>> {
        self.schemas
            .read()
            .get(schema)
            .map(|tables| tables.values().cloned().collect())
            .ok_or_else(|| CoreError::SchemaNotFound {
                schema: schema.to_string(),
            })
    }

    /// Metadata of one table.
    ///
    /// # Errors
    ///
    /// Returns `SchemaNotFound` or `TableNotFound`.
    pub fn table(&self, table: &TableRef) -> CoreResult<Arc<TableMeta>> {
        let schemas = self.schemas.read();
        schemas
            .get(&table.schema)
            .ok_or_else(|| CoreError::SchemaNotFound {
                schema: table.schema.clone(),
            })?
            .get(&table.table)
            .cloned()
            .ok_or_else(|| CoreError::table_not_found(&table.schema, &table.table))
    }

    /// Persists a new schema.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if it already exists.
    pub fn create_schema(&self, schema: &str) -> CoreResult<SchemaRow> {
        validate_name("schema", schema)?;
        let row = SchemaRow {
            name: schema.to_string(),
            created_time: self.clock.now(),
        };
        let key = text_key(schema)?;
        let mut batch = WriteBatch::new().if_absent(SCHEMA_DBI, key.clone());
        batch.put(SCHEMA_DBI, key, encode(&row)?);
        if self.env.write(batch)? == BatchOutcome::ConditionFailed {
            return Err(CoreError::conflict(format!("schema '{schema}'")));
        }

        self.schemas
            .write()
            .insert(schema.to_string(), BTreeMap::new());
        info!(schema, "schema created");
        Ok(row)
    }

    /// Deletes a schema row. Its tables must already be gone.
    ///
    /// # Errors
    ///
    /// Returns `SchemaNotFound` if there was no row.
    pub fn delete_schema(&self, schema: &str) -> CoreResult<()> {
        let key = text_key(schema)?;
        let txn = self.env.read_txn();
        let Some((version, _)) = txn.get_versioned(SCHEMA_DBI, &key)? else {
            return Err(CoreError::SchemaNotFound {
                schema: schema.to_string(),
            });
        };
        drop(txn);

        let mut batch = WriteBatch::new().if_version(SCHEMA_DBI, key.clone(), version);
        batch.delete(SCHEMA_DBI, key);
        if self.env.write(batch)? == BatchOutcome::ConditionFailed {
            return Err(CoreError::SchemaNotFound {
                schema: schema.to_string(),
            });
        }
        self.schemas.write().remove(schema);
        Ok(())
    }

    /// Persists a new table together with its initial attributes.
    ///
    /// # Errors
    ///
    /// Returns `SchemaNotFound`, or `Conflict` if the table exists.
    pub fn create_table(
        &self,
        table: &TableRef,
        hash_attribute: &str,
        residence: Vec<String>,
        attributes: &[&str],
    ) -> CoreResult<Arc<TableMeta>> {
        validate_name("table", &table.table)?;
        if hash_attribute.is_empty() {
            return Err(CoreError::validation("hash_attribute is required"));
        }
        if !self.has_schema(&table.schema) {
            return Err(CoreError::SchemaNotFound {
                schema: table.schema.clone(),
            });
        }

        let row = TableRow {
            id: Uuid::new_v4().to_string(),
            schema: table.schema.clone(),
            name: table.table.clone(),
            hash_attribute: hash_attribute.to_string(),
            residence,
            created_time: self.clock.now(),
        };
        let key = text_key(&table.to_string())?;
        let mut batch = WriteBatch::new().if_absent(TABLE_DBI, key.clone());
        batch.put(TABLE_DBI, key, encode(&row)?);

        let mut attrs = BTreeMap::new();
        for name in attributes {
            let attr = AttributeRow {
                id: Uuid::new_v4().to_string(),
                schema: table.schema.clone(),
                table: table.table.clone(),
                attribute: (*name).to_string(),
            };
            batch.put(ATTRIBUTE_DBI, attribute_key(table, name)?, encode(&attr)?);
            attrs.insert((*name).to_string(), attr);
        }
        if self.env.write(batch)? == BatchOutcome::ConditionFailed {
            return Err(CoreError::conflict(format!("table '{table}'")));
        }

        let meta = Arc::new(TableMeta {
            row,
            attributes: attrs,
        });
        if let Some(tables) = self.schemas.write().get_mut(&table.schema) {
            tables.insert(table.table.clone(), Arc::clone(&meta));
        }
        info!(table = %table, hash_attribute, "table created");
        Ok(meta)
    }

    /// Deletes a table row and every attribute row of the table.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if there was no table row.
    pub fn delete_table(&self, table: &TableRef) -> CoreResult<()> {
        let key = text_key(&table.to_string())?;
        let txn = self.env.read_txn();
        let Some((version, _)) = txn.get_versioned(TABLE_DBI, &key)? else {
            return Err(CoreError::table_not_found(&table.schema, &table.table));
        };
        let attribute_keys = prefixed_keys(&txn, ATTRIBUTE_DBI, &format!("{table}."))?;
        drop(txn);

        let mut batch = WriteBatch::new().if_version(TABLE_DBI, key.clone(), version);
        for attr_key in attribute_keys {
            batch.delete(ATTRIBUTE_DBI, attr_key);
        }
        batch.delete(TABLE_DBI, key);
        if self.env.write(batch)? == BatchOutcome::ConditionFailed {
            return Err(CoreError::table_not_found(&table.schema, &table.table));
        }

        if let Some(tables) = self.schemas.write().get_mut(&table.schema) {
            tables.remove(&table.table);
        }
        Ok(())
    }

    /// Persists a new attribute.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound`, or `Conflict` if the attribute exists.
    pub fn create_attribute(&self, table: &TableRef, attribute: &str) -> CoreResult<AttributeRow> {
        if attribute.is_empty() {
            return Err(CoreError::validation("attribute name cannot be empty"));
        }
        self.table(table)?;

        let row = AttributeRow {
            id: Uuid::new_v4().to_string(),
            schema: table.schema.clone(),
            table: table.table.clone(),
            attribute: attribute.to_string(),
        };
        let key = attribute_key(table, attribute)?;
        let mut batch = WriteBatch::new().if_absent(ATTRIBUTE_DBI, key.clone());
        batch.put(ATTRIBUTE_DBI, key, encode(&row)?);
        if self.env.write(batch)? == BatchOutcome::ConditionFailed {
            // Another handle won the race; adopt its row.
            self.refresh_table(table)?;
            return Err(CoreError::conflict(format!("attribute '{table}.{attribute}'")));
        }

        self.update_table(table, |meta| {
            meta.attributes.insert(attribute.to_string(), row.clone());
        });
        Ok(row)
    }

    /// Deletes an attribute row.
    ///
    /// # Errors
    ///
    /// Returns `AttributeNotFound` if there was no row.
    pub fn delete_attribute(&self, table: &TableRef, attribute: &str) -> CoreResult<()> {
        let not_found = || CoreError::AttributeNotFound {
            schema: table.schema.clone(),
            table: table.table.clone(),
            attribute: attribute.to_string(),
        };
        let key = attribute_key(table, attribute)?;
        let txn = self.env.read_txn();
        let Some((version, _)) = txn.get_versioned(ATTRIBUTE_DBI, &key)? else {
            return Err(not_found());
        };
        drop(txn);

        let mut batch = WriteBatch::new().if_version(ATTRIBUTE_DBI, key.clone(), version);
        batch.delete(ATTRIBUTE_DBI, key);
        if self.env.write(batch)? == BatchOutcome::ConditionFailed {
            return Err(not_found());
        }
        self.update_table(table, |meta| {
            meta.attributes.remove(attribute);
        });
        Ok(())
    }

    /// Re-reads one table's attribute rows into the map.
    fn refresh_table(&self, table: &TableRef) -> CoreResult<()> {
        let txn = self.env.read_txn();
        let mut attributes = BTreeMap::new();
        let prefix = format!("{table}.");
        for key in prefixed_keys(&txn, ATTRIBUTE_DBI, &prefix)? {
            if let Some(bytes) = txn.get(ATTRIBUTE_DBI, &key)? {
                let row: AttributeRow = decode(&bytes)?;
                attributes.insert(row.attribute.clone(), row);
            }
        }
        drop(txn);
        self.update_table(table, |meta| meta.attributes = attributes);
        Ok(())
    }

    fn update_table(&self, table: &TableRef, f: impl FnOnce(&mut TableMeta)) {
        let mut schemas = self.schemas.write();
        if let Some(meta) = schemas
            .get_mut(&table.schema)
            .and_then(|tables| tables.get_mut(&table.table))
        {
            f(Arc::make_mut(meta));
        }
    }
}

pub(crate) fn validate_name(what: &str, name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::validation(format!("{what} name cannot be empty")));
    }
    if name.contains('/') || name.contains('.') {
        return Err(CoreError::validation(format!(
            "{what} name '{name}' cannot contain '/' or '.'"
        )));
    }
    Ok(())
}

fn text_key(s: &str) -> CoreResult<Vec<u8>> {
    Ok(IndexKey::from(s).encode()?)
}

fn attribute_key(table: &TableRef, attribute: &str) -> CoreResult<Vec<u8>> {
    text_key(&format!("{table}.{attribute}"))
}

fn read_rows<T: serde::de::DeserializeOwned>(
    txn: &crate::env::ReadTxn<'_>,
    dbi: &str,
) -> CoreResult<Vec<T>> {
    let entries = txn.cursor(dbi).collect_entries()?;
    entries
        .iter()
        .map(|entry| decode(&entry.value).map_err(CoreError::from))
        .collect()
}

fn prefixed_keys(
    txn: &crate::env::ReadTxn<'_>,
    dbi: &str,
    prefix: &str,
) -> CoreResult<Vec<Vec<u8>>> {
    let start = text_key(prefix)?;
    let mut keys = Vec::new();
    txn.cursor(dbi)
        .range(
            Bound::Included(start.clone()),
            Bound::Excluded(KeyBracket::Text.upper_bound()),
        )
        .for_each(|key, _, _| {
            if key.starts_with(&start) {
                keys.push(key.to_vec());
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(())
            }
        })?;
    Ok(keys)
}
