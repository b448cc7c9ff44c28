use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use tempfile::NamedTempFile;

use super::{LedgerError, LedgerRecord, DELIMITER, HEADERS};

/// Byte-order mark so spreadsheet tools pick UTF-8 for the export.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Outcome of the end-of-run deduplication pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalizeReport {
    pub rows: usize,
    pub duplicates_removed: usize,
    pub export_path: Option<PathBuf>,
}

/// Append-only writer for one day's ledger file.
///
/// The file is opened on the first append. Every append is flushed and
/// synced to disk before returning, so a crash never loses a row that was
/// reported as written.
pub struct LedgerWriter {
    path: PathBuf,
    file: Option<File>,
}

impl LedgerWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File, LedgerError> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .map_err(|e| LedgerError::io(&self.path, e))?;
                tracing::debug!(ledger = %self.path.display(), "Ledger opened for append");
                file
            }
        };
        Ok(self.file.insert(file))
    }

    pub fn append(&mut self, record: &LedgerRecord) -> Result<(), LedgerError> {
        let path = self.path.clone();
        let file = self.file()?;

        let mut writer = WriterBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(false)
            .from_writer(&mut *file);
        writer
            .write_record(record.to_row())
            .map_err(|e| LedgerError::csv(&path, e))?;
        writer.flush().map_err(|e| LedgerError::io(&path, e))?;
        drop(writer);

        file.sync_data().map_err(|e| LedgerError::io(&path, e))?;
        Ok(())
    }

    /// Close the file, collapse duplicate rows and write the export.
    pub fn finalize(mut self) -> Result<FinalizeReport, LedgerError> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|e| LedgerError::io(&self.path, e))?;
        }
        finalize_ledger(&self.path)
    }
}

/// Run `f` with a ledger for `path`, then always finalize it.
///
/// The closure's own result is handed back alongside the finalize report;
/// a failure inside the closure does not skip finalization.
pub fn with_ledger<T>(
    path: impl Into<PathBuf>,
    f: impl FnOnce(&mut LedgerWriter) -> T,
) -> Result<(T, FinalizeReport), LedgerError> {
    let mut writer = LedgerWriter::new(path);
    let output = f(&mut writer);
    let report = writer.finalize()?;
    Ok((output, report))
}

/// Export file next to a ledger: `DD-MM-YYYY.csv` → `DD-MM-YYYY.export.csv`.
pub fn export_path(ledger: &Path) -> PathBuf {
    ledger.with_extension("export.csv")
}

/// Read every row of a ledger file. Missing file reads as empty.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>, LedgerError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| LedgerError::csv(path, e))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| LedgerError::csv(path, e))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Deduplicate a ledger in place (first occurrence wins) and rewrite its export.
pub fn finalize_ledger(path: &Path) -> Result<FinalizeReport, LedgerError> {
    if !path.exists() {
        return Ok(FinalizeReport::default());
    }

    let rows = read_rows(path)?;
    let total = rows.len();
    let mut seen = std::collections::HashSet::new();
    let unique: Vec<Vec<String>> = rows
        .into_iter()
        .filter(|row| seen.insert(row.clone()))
        .collect();

    write_atomically(path, |out| write_rows(out, None, &unique))?;

    let export = export_path(path);
    write_atomically(&export, |out| {
        out.write_all(UTF8_BOM)?;
        write_rows(out, Some(&HEADERS), &unique)
    })?;

    let report = FinalizeReport {
        rows: unique.len(),
        duplicates_removed: total - unique.len(),
        export_path: Some(export),
    };
    tracing::info!(
        ledger = %path.display(),
        rows = report.rows,
        duplicates_removed = report.duplicates_removed,
        "Ledger finalized"
    );
    Ok(report)
}

fn write_rows(
    out: &mut File,
    headers: Option<&[&str]>,
    rows: &[Vec<String>],
) -> std::io::Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .from_writer(out);
    if let Some(headers) = headers {
        writer.write_record(headers)?;
    }
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()
}

/// Write through a temp file in the same directory, then rename over `path`.
fn write_atomically(
    path: &Path,
    fill: impl FnOnce(&mut File) -> std::io::Result<()>,
) -> Result<(), LedgerError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| LedgerError::io(path, e))?;
    fill(tmp.as_file_mut()).map_err(|e| LedgerError::io(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| LedgerError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| LedgerError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{COLUMN_COUNT, COL_FILED, YES};

    fn record(note: &str) -> LedgerRecord {
        let mut r = LedgerRecord::unmatched(Path::new("/in/10 Проект/a.pdf"), note);
        r.reference = "https://pyrus.com/t#id1".into();
        r
    }

    #[test]
    fn append_opens_lazily_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024-05").join("03-05-2024.csv");
        let mut writer = LedgerWriter::new(&path);
        assert!(!path.exists());

        writer.append(&record("Успех")).unwrap();
        assert!(path.exists());
        assert_eq!(read_rows(&path).unwrap().len(), 1);
    }

    #[test]
    fn rows_have_fixed_width_and_survive_delimiters_in_notes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l.csv");
        let mut writer = LedgerWriter::new(&path);
        writer.append(&record("ошибка; подробности \"в кавычках\"")).unwrap();
        drop(writer);

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), COLUMN_COUNT);
        assert_eq!(rows[0][15], "ошибка; подробности \"в кавычках\"");
    }

    #[test]
    fn identical_rows_collapse_on_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l.csv");
        let mut writer = LedgerWriter::new(&path);
        writer.append(&record("Успех")).unwrap();
        writer.append(&record("Успех")).unwrap();
        writer.append(&record("Другое")).unwrap();

        let report = writer.finalize().unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.duplicates_removed, 1);

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][15], "Успех");
        assert_eq!(rows[1][15], "Другое");
    }

    #[test]
    fn export_has_header_and_same_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("03-05-2024.csv");
        let ((), report) = with_ledger(&path, |ledger| {
            let mut r = record("Успех");
            r.filed = true;
            ledger.append(&r).unwrap();
            ledger.append(&r).unwrap();
        })
        .unwrap();

        let export = report.export_path.unwrap();
        assert_eq!(export, dir.path().join("03-05-2024.export.csv"));

        let bytes = std::fs::read(&export).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Ссылка;№ проекта;"));
        let cells: Vec<&str> = lines[1].split(';').collect();
        assert_eq!(cells.len(), COLUMN_COUNT);
        assert_eq!(cells[COL_FILED], YES);
    }

    #[test]
    fn finalize_without_any_append_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let ((), report) = with_ledger(&path, |_| {}).unwrap();
        assert_eq!(report, FinalizeReport::default());
        assert!(!path.exists());
        assert!(!export_path(&path).exists());
    }

    #[test]
    fn finalize_runs_even_when_closure_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l.csv");
        let (result, report) = with_ledger(&path, |ledger| -> Result<(), String> {
            ledger.append(&record("Успех")).map_err(|e| e.to_string())?;
            Err("document loop aborted".to_string())
        })
        .unwrap();
        assert!(result.is_err());
        assert_eq!(report.rows, 1);
        assert!(export_path(&path).exists());
    }
}
