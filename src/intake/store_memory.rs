use std::collections::HashMap;
use std::sync::Mutex;

use crate::intake::gateway::*;

/// Tables held in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryWorkbook {
    tables: Mutex<HashMap<String, Vec<Vec<String>>>>,
}

impl MemoryWorkbook {
    pub fn new() -> MemoryWorkbook {
        MemoryWorkbook::default()
    }

    fn with_tables<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut HashMap<String, Vec<Vec<String>>>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tables = self.tables.lock().map_err(|_| StoreError::Poisoned {
            table: table.to_string(),
        })?;
        f(&mut tables)
    }
}

fn missing(table: &str) -> StoreError {
    StoreError::MissingTable {
        table: table.to_string(),
    }
}

impl TableBackend for MemoryWorkbook {
    fn reference(&self) -> String {
        "memory:".to_string()
    }

    fn has_table(&self, table: &str) -> Result<bool, StoreError> {
        self.with_tables(table, |tables| Ok(tables.contains_key(table)))
    }

    fn create_table(&self, table: &str, header: &[String]) -> Result<bool, StoreError> {
        self.with_tables(table, |tables| {
            if tables.contains_key(table) {
                return Ok(false);
            }
            tables.insert(table.to_string(), vec![header.to_vec()]);
            Ok(true)
        })
    }

    fn append_row(&self, table: &str, row: &[String]) -> Result<(), StoreError> {
        self.with_tables(table, |tables| {
            let rows = tables.get_mut(table).ok_or_else(|| missing(table))?;
            rows.push(row.to_vec());
            Ok(())
        })
    }

    fn read_rows(&self, table: &str) -> Result<Vec<Vec<String>>, StoreError> {
        self.with_tables(table, |tables| {
            tables.get(table).cloned().ok_or_else(|| missing(table))
        })
    }

    fn truncate_data_rows(&self, table: &str) -> Result<usize, StoreError> {
        self.with_tables(table, |tables| {
            let rows = tables.get_mut(table).ok_or_else(|| missing(table))?;
            let removed = rows.len().saturating_sub(1);
            rows.truncate(1);
            Ok(removed)
        })
    }
}
