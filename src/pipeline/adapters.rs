//! Process- and file-backed implementations of the collaborator traits.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::traits::{DocumentExtractor, RegistryError, TaskRegistry, UploadError, Uploader};
use crate::models::{Entry, PayerCatalog, PaymentOrder, TaxpayerId};

/// An external program plus its leading arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandLine {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.program.trim().is_empty()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

// ═══════════════════════════════════════════════════════════
// Task snapshot
// ═══════════════════════════════════════════════════════════

/// Reads the pre-fetched task snapshot: a JSON array of entries.
pub struct SnapshotRegistry {
    path: PathBuf,
}

impl SnapshotRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TaskRegistry for SnapshotRegistry {
    fn fetch_active_entries(&self) -> Result<Vec<Entry>, RegistryError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| RegistryError::Unavailable {
            path: self.path.display().to_string(),
            source: e,
        })?;
        let entries: Vec<Entry> = serde_json::from_str(&raw)?;

        let mut seen = HashSet::new();
        if let Some(dup) = entries.iter().find(|e| !seen.insert(e.task_id)) {
            return Err(RegistryError::DuplicateTask(dup.task_id));
        }

        tracing::info!(snapshot = %self.path.display(), entries = entries.len(), "Task snapshot loaded");
        Ok(entries)
    }
}

/// Keep a copy of the run's snapshot as `entries_<unix ts>.json`.
pub fn archive_snapshot(
    entries: &[Entry],
    entries_dir: &Path,
    now: DateTime<Local>,
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(entries_dir)?;
    let path = entries_dir.join(format!("entries_{}.json", now.timestamp()));
    let json = serde_json::to_vec_pretty(entries)?;
    std::fs::write(&path, json)?;
    tracing::debug!(archive = %path.display(), "Task snapshot archived");
    Ok(path)
}

// ═══════════════════════════════════════════════════════════
// Extraction
// ═══════════════════════════════════════════════════════════

/// Fields the extraction tool prints on stdout, before normalization.
#[derive(Debug, Deserialize)]
struct RawOrder {
    payer: String,
    beneficiary: String,
    amount: Decimal,
    value_date: NaiveDate,
    taxpayer_id: String,
    #[serde(default)]
    payment_purpose: String,
}

/// Runs `<program> <args..> <document>` and reads one JSON order from stdout.
pub struct CommandExtractor {
    command: CommandLine,
    catalog: Arc<PayerCatalog>,
}

impl CommandExtractor {
    pub fn new(command: CommandLine, catalog: Arc<PayerCatalog>) -> Self {
        Self { command, catalog }
    }

    fn normalize(
        &self,
        raw: RawOrder,
        document: &Path,
        reference: DateTime<Local>,
    ) -> Option<PaymentOrder> {
        let Some(payer) = self.catalog.resolve_name(&raw.payer) else {
            tracing::warn!(document = %document.display(), payer = %raw.payer, "Payer not in catalog");
            return None;
        };
        let taxpayer_id = match TaxpayerId::parse(&raw.taxpayer_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(document = %document.display(), error = %e, "Bad taxpayer id");
                return None;
            }
        };
        let days_old = std::fs::metadata(document)
            .and_then(|m| m.modified())
            .map(|t| (reference - DateTime::<Local>::from(t)).num_days())
            .unwrap_or(0);

        let order = PaymentOrder {
            payer: payer.to_string(),
            beneficiary: raw.beneficiary.trim().to_string(),
            amount: raw.amount,
            value_date: raw.value_date,
            taxpayer_id,
            payment_purpose: raw.payment_purpose.trim().to_string(),
            days_old,
        };
        if let Err(e) = order.validate(&self.catalog) {
            tracing::warn!(document = %document.display(), error = %e, "Extracted order rejected");
            return None;
        }
        Some(order)
    }
}

impl DocumentExtractor for CommandExtractor {
    fn extract(&self, document: &Path, reference: DateTime<Local>) -> Option<PaymentOrder> {
        let output = match self.command.command().arg(document).output() {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(program = %self.command.program, error = %e, "Extractor failed to start");
                return None;
            }
        };
        if !output.status.success() {
            tracing::warn!(
                document = %document.display(),
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Extractor rejected document"
            );
            return None;
        }

        let raw: RawOrder = match serde_json::from_slice(&output.stdout) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(document = %document.display(), error = %e, "Extractor output unreadable");
                return None;
            }
        };
        let order = self.normalize(raw, document, reference)?;
        tracing::debug!(
            document = %document.display(),
            payer = %order.payer,
            amount = %order.amount,
            "Payment order extracted"
        );
        Some(order)
    }
}

// ═══════════════════════════════════════════════════════════
// Upload
// ═══════════════════════════════════════════════════════════

/// Runs `<program> <args..> <task id> <document>` per upload.
///
/// Exit 0 with empty stdout is a clean upload. Anything printed on stdout
/// with exit 0 is a partial-failure note. A failed launch or non-zero exit
/// means nothing was attached.
pub struct CommandUploader {
    command: CommandLine,
    attempts: usize,
    clean: usize,
}

impl CommandUploader {
    pub fn new(command: CommandLine) -> Self {
        Self {
            command,
            attempts: 0,
            clean: 0,
        }
    }
}

impl Uploader for CommandUploader {
    fn upload(&mut self, task_id: u64, document: &Path) -> Result<Option<String>, UploadError> {
        self.attempts += 1;
        let output = match self
            .command
            .command()
            .arg(task_id.to_string())
            .arg(document)
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(task_id, error = %e, "Uploader failed to start");
                return Err(UploadError::Launch(e));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::warn!(task_id, status = %output.status, stderr = %stderr, "Upload failed");
            let detail = if stdout.is_empty() { stderr } else { stdout };
            return Err(UploadError::Rejected {
                status: output.status.to_string(),
                detail,
            });
        }
        if !stdout.is_empty() {
            tracing::warn!(task_id, note = %stdout, "Upload partially failed");
            return Ok(Some(stdout));
        }

        self.clean += 1;
        tracing::info!(task_id, "Document uploaded and approved");
        Ok(None)
    }

    fn finish(&mut self) {
        tracing::info!(attempts = self.attempts, clean = self.clean, "Upload session closed");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::PayerProfile;

    fn catalog() -> Arc<PayerCatalog> {
        let mut c = PayerCatalog::default();
        c.insert("ТОО \"Альфа\"", PayerProfile::new(1, "/repo/alpha"));
        Arc::new(c)
    }

    fn entry_json(id: u64) -> String {
        format!(r#"{{"task_id": {id}, "payer": "ТОО \"Альфа\"", "counterparty_tax_id": "123456789012", "amount": "10.00"}}"#)
    }

    #[test]
    fn snapshot_loads_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, format!("[{}, {}]", entry_json(1), entry_json(2))).unwrap();

        let entries = SnapshotRegistry::new(&path).fetch_active_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].task_id, 2);
        assert_eq!(entries[0].amount, Some(Decimal::new(1000, 2)));
    }

    #[test]
    fn snapshot_rejects_duplicates_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, format!("[{}, {}]", entry_json(7), entry_json(7))).unwrap();
        assert!(matches!(
            SnapshotRegistry::new(&path).fetch_active_entries(),
            Err(RegistryError::DuplicateTask(7))
        ));
        assert!(matches!(
            SnapshotRegistry::new(dir.path().join("none.json")).fetch_active_entries(),
            Err(RegistryError::Unavailable { .. })
        ));
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            SnapshotRegistry::new(&path).fetch_active_entries(),
            Err(RegistryError::Malformed(_))
        ));
    }

    #[test]
    fn archive_writes_timestamped_copy() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("tasks.json");
        std::fs::write(&snapshot, format!("[{}]", entry_json(3))).unwrap();
        let entries = SnapshotRegistry::new(&snapshot).fetch_active_entries().unwrap();

        let now = Local::now();
        let archived = archive_snapshot(&entries, &dir.path().join("entries"), now).unwrap();
        assert_eq!(
            archived.file_name().unwrap().to_string_lossy(),
            format!("entries_{}.json", now.timestamp())
        );
        let back: Vec<Entry> =
            serde_json::from_slice(&std::fs::read(&archived).unwrap()).unwrap();
        assert_eq!(back, entries);
    }

    fn document_with(dir: &Path, json: &str) -> PathBuf {
        let path = dir.join("order.pdf");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn extractor_normalizes_payer_and_fields() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document_with(
            dir.path(),
            r#"{"payer": "ТОО  «АЛЬФА»", "beneficiary": " Бета ", "amount": "1500.50",
                "value_date": "2024-05-02", "taxpayer_id": " 123456789012 ",
                "payment_purpose": "Оплата по счету 77 "}"#,
        );
        // `cat` prints the document itself, which holds the JSON.
        let extractor = CommandExtractor::new(CommandLine::new("cat", &[]), catalog());

        let order = extractor.extract(&doc, Local::now()).unwrap();
        assert_eq!(order.payer, "ТОО \"Альфа\"");
        assert_eq!(order.beneficiary, "Бета");
        assert_eq!(order.amount, Decimal::new(150050, 2));
        assert_eq!(order.taxpayer_id.as_str(), "123456789012");
        assert_eq!(order.payment_purpose, "Оплата по счету 77");
        assert_eq!(order.days_old, 0);
    }

    #[test]
    fn extractor_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let c = catalog();

        let unknown_payer = document_with(
            dir.path(),
            r#"{"payer": "Совсем другой", "beneficiary": "Б", "amount": 1,
                "value_date": "2024-05-02", "taxpayer_id": "123456789012"}"#,
        );
        let cat = CommandExtractor::new(CommandLine::new("cat", &[]), c.clone());
        assert!(cat.extract(&unknown_payer, Local::now()).is_none());

        let zero = document_with(
            dir.path(),
            r#"{"payer": "Альфа", "beneficiary": "Б", "amount": 0,
                "value_date": "2024-05-02", "taxpayer_id": "123456789012"}"#,
        );
        assert!(cat.extract(&zero, Local::now()).is_none());

        let garbage = document_with(dir.path(), "%PDF-1.4 binary");
        assert!(cat.extract(&garbage, Local::now()).is_none());

        let failing = CommandExtractor::new(CommandLine::new("false", &[]), c.clone());
        assert!(failing.extract(&garbage, Local::now()).is_none());

        let missing = CommandExtractor::new(CommandLine::new("/nonexistent/extractor", &[]), c);
        assert!(missing.extract(&garbage, Local::now()).is_none());
    }

    #[test]
    fn uploader_maps_output_to_notes() {
        let doc = Path::new("/tmp/order.pdf");

        let mut clean = CommandUploader::new(CommandLine::new("true", &[]));
        assert_eq!(clean.upload(42, doc).unwrap(), None);

        let mut partial =
            CommandUploader::new(CommandLine::new("sh", &["-c", "echo \"не согласовано $0\""]));
        assert_eq!(
            partial.upload(42, doc).unwrap(),
            Some("не согласовано 42".to_string())
        );
    }

    #[test]
    fn uploader_failures_are_errors_not_notes() {
        let doc = Path::new("/tmp/order.pdf");

        let mut failing = CommandUploader::new(CommandLine::new("sh", &["-c", "echo boom >&2; exit 3"]));
        match failing.upload(42, doc) {
            Err(UploadError::Rejected { detail, .. }) => assert_eq!(detail, "boom"),
            other => panic!("expected rejection, got {other:?}"),
        }

        let mut missing = CommandUploader::new(CommandLine::new("/nonexistent/uploader", &[]));
        assert!(matches!(missing.upload(42, doc), Err(UploadError::Launch(_))));
        failing.finish();
    }
}
