//! In-process store with the same upsert/count semantics as the SQLite store

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{validate_table_name, CountFilter, StoreClient, StoreError, UpsertCounts};
use crate::NormalizedRecord;

/// Store keeping every table in memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, BTreeMap<String, NormalizedRecord>>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of one record, if present.
    pub fn get(&self, table: &str, key: &str) -> Option<NormalizedRecord> {
        let tables = self.tables.lock().ok()?;
        tables.get(table)?.get(key).cloned()
    }

    /// Number of rows in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.tables
            .lock()
            .map(|t| t.get(table).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Names of the tables written so far.
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .lock()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Database("memory store lock poisoned".to_string())
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn upsert_batch(
        &self,
        table: &str,
        records: &[NormalizedRecord],
    ) -> Result<UpsertCounts, StoreError> {
        validate_table_name(table)?;
        let mut tables = self.tables.lock().map_err(poisoned)?;
        let rows = tables.entry(table.to_string()).or_default();

        let mut counts = UpsertCounts::default();
        for record in records {
            if rows.insert(record.key.clone(), record.clone()).is_some() {
                counts.updated += 1;
            } else {
                counts.inserted += 1;
            }
        }
        Ok(counts)
    }

    async fn count(&self, table: &str, filter: &CountFilter) -> Result<u64, StoreError> {
        validate_table_name(table)?;
        let tables = self.tables.lock().map_err(poisoned)?;
        Ok(tables.get(table).map_or(0, |rows| {
            rows.values()
                .filter(|r| filter.matches(r.record_date))
                .count() as u64
        }))
    }
}
