// Tables stored as CSV files, one file per table inside the store directory.

use log::debug;
use snafu::prelude::*;

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::intake::gateway::*;

#[derive(Debug)]
pub struct CsvWorkbook {
    dir: PathBuf,
    // Serializes every write to the files of this workbook.
    lock: Mutex<()>,
}

impl CsvWorkbook {
    pub fn new(dir: PathBuf) -> CsvWorkbook {
        CsvWorkbook {
            dir,
            lock: Mutex::new(()),
        }
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", table))
    }

    fn locked<T>(
        &self,
        table: &str,
        f: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned {
            table: table.to_string(),
        })?;
        f()
    }
}

/// Encodes one record, line terminator included.
fn encode_record(path: &Path, record: &[String]) -> Result<Vec<u8>, StoreError> {
    let mut wtr = csv::WriterBuilder::new().from_writer(Vec::new());
    wtr.write_record(record).context(StoreCsvSnafu { path })?;
    wtr.into_inner()
        .map_err(|e| e.into_error())
        .context(StoreIoSnafu { path })
}

fn write_all_synced(mut file: File, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    file.write_all(bytes).context(StoreIoSnafu { path })?;
    file.sync_data().context(StoreIoSnafu { path })
}

/// Whether the file is empty or ends with a line terminator.
fn ends_with_newline(file: &mut File, path: &Path) -> Result<bool, StoreError> {
    let len = file.metadata().context(StoreIoSnafu { path })?.len();
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0_u8; 1];
    file.seek(SeekFrom::End(-1)).context(StoreIoSnafu { path })?;
    file.read_exact(&mut last).context(StoreIoSnafu { path })?;
    Ok(last[0] == b'\n' || last[0] == b'\r')
}

fn read_records(path: &Path) -> Result<Vec<Vec<String>>, StoreError> {
    let rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .context(StoreCsvSnafu { path })?;
    let mut res: Vec<Vec<String>> = Vec::new();
    for record in rdr.into_records() {
        let record = record.context(StoreCsvSnafu { path })?;
        res.push(record.iter().map(|s| s.to_string()).collect());
    }
    Ok(res)
}

impl TableBackend for CsvWorkbook {
    fn reference(&self) -> String {
        self.dir.display().to_string()
    }

    /// An empty file has no header and counts as missing.
    fn has_table(&self, table: &str) -> Result<bool, StoreError> {
        let path = self.table_path(table);
        match fs::metadata(&path) {
            Ok(m) => Ok(m.len() > 0),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context(StoreIoSnafu { path: &path }),
        }
    }

    fn create_table(&self, table: &str, header: &[String]) -> Result<bool, StoreError> {
        let path = self.table_path(table);
        self.locked(table, || {
            fs::create_dir_all(&self.dir).context(StoreIoSnafu { path: &self.dir })?;
            if self.has_table(table)? {
                return Ok(false);
            }
            // The header goes to a sibling file first: a failed write leaves no table behind.
            let tmp = path.with_extension("csv.tmp");
            let file = File::create(&tmp).context(StoreIoSnafu { path: &tmp })?;
            let written = encode_record(&tmp, header)
                .and_then(|bytes| write_all_synced(file, &tmp, &bytes));
            if let Err(e) = written {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
            let placed = if path.exists() {
                // An empty leftover file is replaced.
                fs::rename(&tmp, &path)
            } else {
                fs::hard_link(&tmp, &path)
            };
            let _ = fs::remove_file(&tmp);
            match placed {
                Ok(()) => {
                    debug!("create_table: wrote header to {:?}", path);
                    Ok(true)
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e).context(StoreIoSnafu { path: &path }),
            }
        })
    }

    fn append_row(&self, table: &str, row: &[String]) -> Result<(), StoreError> {
        let path = self.table_path(table);
        // Encoded up front so that the row reaches the file in a single write.
        let mut bytes = encode_record(&path, row)?;
        self.locked(table, || {
            let mut file = match OpenOptions::new().read(true).append(true).open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(StoreError::MissingTable {
                        table: table.to_string(),
                    })
                }
                Err(e) => return Err(e).context(StoreIoSnafu { path: &path }),
            };
            // A last line without terminator would otherwise absorb the new row.
            if !ends_with_newline(&mut file, &path)? {
                bytes.insert(0, b'\n');
            }
            write_all_synced(file, &path, &bytes)
        })
    }

    fn read_rows(&self, table: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let path = self.table_path(table);
        if !self.has_table(table)? {
            return Err(StoreError::MissingTable {
                table: table.to_string(),
            });
        }
        self.locked(table, || read_records(&path))
    }

    fn truncate_data_rows(&self, table: &str) -> Result<usize, StoreError> {
        let path = self.table_path(table);
        if !self.has_table(table)? {
            return Err(StoreError::MissingTable {
                table: table.to_string(),
            });
        }
        self.locked(table, || {
            let rows = read_records(&path)?;
            if rows.len() <= 1 {
                return Ok(0);
            }
            // Rewrite the header to a sibling file and swap it in.
            let tmp = path.with_extension("csv.tmp");
            let file = File::create(&tmp).context(StoreIoSnafu { path: &tmp })?;
            let bytes = encode_record(&tmp, &rows[0])?;
            write_all_synced(file, &tmp, &bytes)?;
            fs::rename(&tmp, &path).context(StoreIoSnafu { path: &path })?;
            Ok(rows.len() - 1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn create_append_read() {
        let dir = tempfile::tempdir().unwrap();
        let wb = CsvWorkbook::new(dir.path().join("store"));
        assert!(!wb.has_table("Responses").unwrap());
        assert!(wb.create_table("Responses", &cells(&["a", "b"])).unwrap());
        assert!(!wb.create_table("Responses", &cells(&["x"])).unwrap());
        wb.append_row("Responses", &cells(&["Smith, J.", "4"]))
            .unwrap();
        wb.append_row("Responses", &cells(&["line\nbreak", "\"q\""]))
            .unwrap();
        let rows = wb.read_rows("Responses").unwrap();
        assert_eq!(
            rows,
            vec![
                cells(&["a", "b"]),
                cells(&["Smith, J.", "4"]),
                cells(&["line\nbreak", "\"q\""])
            ]
        );
        let text = fs::read_to_string(wb.table_path("Responses")).unwrap();
        assert!(text.starts_with("a,b\n"));
    }

    #[test]
    fn append_requires_table() {
        let dir = tempfile::tempdir().unwrap();
        let wb = CsvWorkbook::new(dir.path().to_path_buf());
        assert!(matches!(
            wb.append_row("Responses", &cells(&["a"])),
            Err(StoreError::MissingTable { .. })
        ));
        assert!(!wb.table_path("Responses").exists());
        assert!(matches!(
            wb.read_rows("Responses"),
            Err(StoreError::MissingTable { .. })
        ));
    }

    #[test]
    fn truncate_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let wb = CsvWorkbook::new(dir.path().to_path_buf());
        wb.create_table("Responses", &cells(&["a", "b"])).unwrap();
        assert_eq!(wb.truncate_data_rows("Responses").unwrap(), 0);
        for i in 0..5 {
            wb.append_row("Responses", &cells(&[i.to_string().as_str(), "x"]))
                .unwrap();
        }
        assert_eq!(wb.truncate_data_rows("Responses").unwrap(), 5);
        assert_eq!(wb.read_rows("Responses").unwrap(), vec![cells(&["a", "b"])]);
        assert!(!wb.table_path("Responses").with_extension("csv.tmp").exists());
    }

    #[test]
    fn append_after_unterminated_line() {
        let dir = tempfile::tempdir().unwrap();
        let wb = CsvWorkbook::new(dir.path().to_path_buf());
        wb.create_table("Responses", &cells(&["a", "b"])).unwrap();
        wb.append_row("Responses", &cells(&["1", "2"])).unwrap();
        // As left by an editor that drops the final newline.
        fs::write(wb.table_path("Responses"), "a,b\n1,2").unwrap();
        wb.append_row("Responses", &cells(&["3", "4"])).unwrap();
        assert_eq!(
            wb.read_rows("Responses").unwrap(),
            vec![cells(&["a", "b"]), cells(&["1", "2"]), cells(&["3", "4"])]
        );
    }

    #[test]
    fn empty_file_gets_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let wb = std::sync::Arc::new(CsvWorkbook::new(dir.path().to_path_buf()));
        fs::write(wb.table_path("Responses"), "").unwrap();
        assert!(!wb.has_table("Responses").unwrap());

        let g = SheetGateway::new(wb.clone(), "Responses");
        let h = g.open_or_create_table().unwrap();
        let s = evaluation_sheet::EvaluationSubmission {
            reviewer_name: "A".to_string(),
            reviewer_role: "Radiology".to_string(),
            review_date: "2025-11-05".to_string(),
            ratings: serde_json::Map::new(),
        };
        let (row, _) = evaluation_sheet::build_row(&s, "2025-11-05T10:00:00.000Z");
        g.append_row(&h, &row).unwrap();

        let rows = wb.read_rows("Responses").unwrap();
        assert_eq!(rows[0], evaluation_sheet::build_header());
        let js = g.read_all_rows(&h).unwrap();
        assert_eq!(js.len(), 1);
        assert_eq!(js[0]["Reviewer Name"], serde_json::json!("A"));
        assert_eq!(g.data_row_count(&h).unwrap(), 1);
        assert!(!wb.table_path("Responses").with_extension("csv.tmp").exists());
    }

    #[test]
    fn concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let wb = std::sync::Arc::new(CsvWorkbook::new(dir.path().to_path_buf()));
        wb.create_table("Responses", &cells(&["who", "n"])).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let wb = wb.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let who = format!("writer-{}", t);
                        wb.append_row("Responses", &[who, i.to_string()]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let rows = wb.read_rows("Responses").unwrap();
        assert_eq!(rows.len(), 1 + 8 * 25);
        assert!(rows[1..]
            .iter()
            .all(|r| r.len() == 2 && r[0].starts_with("writer-")));
    }
}
