use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};

use super::writer::read_rows;
use super::{is_yes, LedgerError, COL_FILED, COL_FOUND, COL_REFERENCE, COL_UPLOADED};

/// Task references handled by earlier runs.
///
/// `completed` tasks were found, uploaded and filed; they are skipped
/// entirely. `uploaded` tasks got their attachment but not their filing;
/// they are filed again without a second upload.
#[derive(Debug, Clone, Default)]
pub struct IdempotencySet {
    completed: HashSet<String>,
    uploaded: HashSet<String>,
}

impl IdempotencySet {
    /// Build the set from every daily ledger under `logs_dir` dated within
    /// `lookback_days` before `today` (today included).
    pub fn load(
        logs_dir: &Path,
        today: NaiveDate,
        lookback_days: u32,
    ) -> Result<Self, LedgerError> {
        let mut set = Self::default();
        let earliest = today - Duration::days(i64::from(lookback_days));

        for ledger in ledger_files(logs_dir)? {
            let Some(date) = ledger_date(&ledger) else {
                continue;
            };
            if date < earliest || date > today {
                continue;
            }
            let rows = read_rows(&ledger)?;
            tracing::debug!(ledger = %ledger.display(), rows = rows.len(), "Loading prior ledger");
            set.absorb_rows(&rows);
        }

        tracing::info!(
            completed = set.completed.len(),
            uploaded_only = set.uploaded.difference(&set.completed).count(),
            "Idempotency set loaded"
        );
        Ok(set)
    }

    pub fn absorb_rows(&mut self, rows: &[Vec<String>]) {
        for row in rows {
            let cell = |idx: usize| row.get(idx).map(String::as_str).unwrap_or_default();
            let reference = cell(COL_REFERENCE).trim();
            if reference.is_empty() || !is_yes(cell(COL_FOUND)) {
                continue;
            }
            if is_yes(cell(COL_UPLOADED)) {
                self.uploaded.insert(reference.to_string());
                if is_yes(cell(COL_FILED)) {
                    self.completed.insert(reference.to_string());
                }
            }
        }
    }

    pub fn is_completed(&self, reference: &str) -> bool {
        self.completed.contains(reference)
    }

    pub fn is_uploaded(&self, reference: &str) -> bool {
        self.uploaded.contains(reference)
    }

    pub fn mark_uploaded(&mut self, reference: &str) {
        self.uploaded.insert(reference.to_string());
    }

    pub fn mark_completed(&mut self, reference: &str) {
        self.uploaded.insert(reference.to_string());
        self.completed.insert(reference.to_string());
    }
}

/// `<logs_dir>/<YYYY-MM>/<file>.csv`, sorted for stable logging.
fn ledger_files(logs_dir: &Path) -> Result<Vec<PathBuf>, LedgerError> {
    let mut files = Vec::new();
    if !logs_dir.is_dir() {
        return Ok(files);
    }
    for month in std::fs::read_dir(logs_dir).map_err(|e| LedgerError::io(logs_dir, e))? {
        let month = month.map_err(|e| LedgerError::io(logs_dir, e))?.path();
        if !month.is_dir() {
            continue;
        }
        for file in std::fs::read_dir(&month).map_err(|e| LedgerError::io(&month, e))? {
            let path = file.map_err(|e| LedgerError::io(&month, e))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("csv") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Date encoded in a ledger file name; exports (`*.export.csv`) yield `None`.
fn ledger_date(path: &Path) -> Option<NaiveDate> {
    let stem = path.file_stem()?.to_str()?;
    NaiveDate::parse_from_str(stem, "%d-%m-%Y").ok()
}
