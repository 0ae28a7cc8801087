//! Record store contract.
//!
//! The engine never issues DDL; it reads and writes rows by column name
//! through this trait.

use crate::error::Error;
use crate::record::{Record, SearchFilter, TableSchema};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Authoritative storage of one record type.
pub trait RecordStore: Send + Sync {
    /// Physical columns of the table.
    fn schema(&self) -> &TableSchema;

    /// Up to `limit` records ordered by id, strictly after `after_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn fetch_batch(&self, after_id: Option<&str>, limit: usize) -> Result<Vec<Record>, Error>;

    /// Inserts or replaces a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write is rejected.
    fn save(&self, record: &Record) -> Result<(), Error>;

    /// Records matching `filter`. `Ids` filters keep the order of the id list.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn select(&self, filter: &SearchFilter) -> Result<Vec<Record>, Error>;
}

/// In-memory store keyed by id.
#[derive(Debug)]
pub struct MemoryStore {
    schema: TableSchema,
    rows: RwLock<BTreeMap<String, Record>>,
}

impl MemoryStore {
    /// Creates an empty store with the given schema.
    #[must_use]
    pub fn new(schema: TableSchema) -> Self {
        Self { schema, rows: RwLock::new(BTreeMap::new()) }
    }

    /// Fetches one record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Record> {
        self.rows.read().get(id).cloned()
    }

    /// Removes a record, returning it.
    pub fn remove(&self, id: &str) -> Option<Record> {
        self.rows.write().remove(id)
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// True if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl RecordStore for MemoryStore {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn fetch_batch(&self, after_id: Option<&str>, limit: usize) -> Result<Vec<Record>, Error> {
        let rows = self.rows.read();
        let batch = rows
            .iter()
            .filter(|(id, _)| after_id.map_or(true, |after| id.as_str() > after))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect();
        Ok(batch)
    }

    fn save(&self, record: &Record) -> Result<(), Error> {
        if let Some(column) = record.attributes.keys().find(|c| !self.schema.has_column(c)) {
            return Err(Error::Configuration(format!(
                "table `{}` has no column `{column}`",
                self.schema.table()
            )));
        }
        self.rows.write().insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn select(&self, filter: &SearchFilter) -> Result<Vec<Record>, Error> {
        let rows = self.rows.read();
        let selected = match filter {
            SearchFilter::Ids(ids) => ids.iter().filter_map(|id| rows.get(id).cloned()).collect(),
            SearchFilter::AnyOf(_) => {
                rows.values().filter(|record| filter.matches(record)).cloned().collect()
            }
        };
        Ok(selected)
    }
}
