// The only place where the response sheet is read or written.

use log::{debug, info};
use snafu::{prelude::*, Snafu};

use std::path::PathBuf;
use std::sync::Arc;

use crate::intake::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("I/O error on {}: {source}", path.display()))]
    StoreIo {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Malformed CSV in {}: {source}", path.display()))]
    StoreCsv { path: PathBuf, source: csv::Error },
    #[snafu(display("Table {table} does not exist"))]
    MissingTable { table: String },
    #[snafu(display("Table {table} is unavailable after a failed writer"))]
    Poisoned { table: String },
    #[snafu(display("Table {table} rejected the operation: {reason}"))]
    Rejected { table: String, reason: String },
}

/// A store that keeps named tables of text cells.
///
/// Implementations must apply each call as a whole: a row is either fully appended or not
/// at all, and the rows of concurrent appends must not interleave.
pub trait TableBackend: Send + Sync {
    /// Where the tables live, for humans.
    fn reference(&self) -> String;

    fn has_table(&self, table: &str) -> Result<bool, StoreError>;

    /// Creates the table with its header row.
    /// Returns false if the table already existed, in which case nothing is written.
    fn create_table(&self, table: &str, header: &[String]) -> Result<bool, StoreError>;

    fn append_row(&self, table: &str, row: &[String]) -> Result<(), StoreError>;

    /// All the rows, header first.
    fn read_rows(&self, table: &str) -> Result<Vec<Vec<String>>, StoreError>;

    /// Removes every row but the first one. Returns the number of removed rows.
    fn truncate_data_rows(&self, table: &str) -> Result<usize, StoreError>;
}

/// Proof that the table exists with its header row.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct TableHandle {
    table: String,
}

impl TableHandle {
    pub fn table(&self) -> &str {
        &self.table
    }
}

/// The response sheet: one table of a store, laid out with `build_header`.
#[derive(Clone)]
pub struct SheetGateway {
    backend: Arc<dyn TableBackend>,
    table: String,
}

impl SheetGateway {
    pub fn new(backend: Arc<dyn TableBackend>, table: &str) -> SheetGateway {
        SheetGateway {
            backend,
            table: table.to_string(),
        }
    }

    pub fn reference(&self) -> String {
        self.backend.reference()
    }

    /// Opens the table, creating it with its header row the first time.
    ///
    /// Calling it again once the table exists changes nothing.
    pub fn open_or_create_table(&self) -> IntakeResult<TableHandle> {
        let table = self.table.clone();
        let exists = self
            .backend
            .has_table(&table)
            .context(StoreReadSnafu { table: &table })?;
        if !exists {
            info!("Table {} not found, creating it", table);
            let created = self
                .backend
                .create_table(&table, &build_header())
                .context(StoreWriteSnafu { table: &table })?;
            if created {
                info!("Table {} created with {} columns", table, COLUMN_COUNT);
            } else {
                debug!("open_or_create_table: table {} created concurrently", table);
            }
        }
        Ok(TableHandle { table })
    }

    /// Appends one row at the end of the table.
    pub fn append_row(&self, handle: &TableHandle, row: &[Cell]) -> IntakeResult<()> {
        let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
        debug!("append_row: {} cells to {}", cells.len(), handle.table);
        self.backend
            .append_row(&handle.table, &cells)
            .context(StoreWriteSnafu {
                table: &handle.table,
            })?;
        info!("Appended a row to table {}", handle.table);
        Ok(())
    }

    fn read_data_rows(
        &self,
        handle: &TableHandle,
    ) -> IntakeResult<(Vec<String>, Vec<Vec<String>>)> {
        let mut rows = self
            .backend
            .read_rows(&handle.table)
            .context(StoreReadSnafu {
                table: &handle.table,
            })?;
        if rows.is_empty() {
            return Ok((build_header(), Vec::new()));
        }
        let header = rows.remove(0);
        Ok((header, rows))
    }

    /// Every data row as a JSON object keyed by the header labels, whatever the header is.
    pub fn read_all_rows(
        &self,
        handle: &TableHandle,
    ) -> IntakeResult<Vec<JSMap<String, JSValue>>> {
        let (header, rows) = self.read_data_rows(handle)?;
        rows.iter()
            .map(|row| {
                row_to_json(&header, row).context(LayoutMismatchSnafu {
                    table: &handle.table,
                })
            })
            .collect()
    }

    /// Every data row, decoded.
    pub fn read_all_records(&self, handle: &TableHandle) -> IntakeResult<Vec<ResponseRecord>> {
        let (header, rows) = self.read_data_rows(handle)?;
        rows.iter()
            .map(|row| {
                decode_row(&header, row).context(LayoutMismatchSnafu {
                    table: &handle.table,
                })
            })
            .collect()
    }

    pub fn data_row_count(&self, handle: &TableHandle) -> IntakeResult<usize> {
        let (_, rows) = self.read_data_rows(handle)?;
        Ok(rows.len())
    }

    /// Deletes every response and keeps the header row.
    pub fn delete_data_rows(&self, handle: &TableHandle) -> IntakeResult<usize> {
        let removed = self
            .backend
            .truncate_data_rows(&handle.table)
            .context(StoreWriteSnafu {
                table: &handle.table,
            })?;
        if removed > 0 {
            info!("Cleared {} response rows from {}", removed, handle.table);
        } else {
            info!("No responses to clear in {}", handle.table);
        }
        Ok(removed)
    }
}
