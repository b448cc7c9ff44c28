//! Reconciliation orchestrator.
//!
//! Drives one run over the document source:
//! discover → stage → extract → match → upload → resolve filing → move → ledger.
//!
//! Documents are handled strictly one after another. A failure at any step
//! stops only that document and becomes a ledger note; only problems found
//! before the first document (config, source, registry, prior ledgers) and a
//! failed ledger finalization abort the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use thiserror::Error;
use uuid::Uuid;

use super::adapters::archive_snapshot;
use super::discovery::{DiscoveryError, DocumentSource, SourceDocument, Staging};
use super::filing::{FilingError, FilingRequest, FilingResolver};
use super::matcher::{EntryMatcher, MatchOutcome};
use super::traits::{DocumentExtractor, RegistryError, TaskRegistry, UploadError, Uploader};
use crate::config::{render_task_reference, ConfigError, DataLayout, RunConfig};
use crate::ledger::{
    ledger_path, with_ledger, FinalizeReport, IdempotencySet, LedgerError, LedgerRecord,
    LedgerWriter,
};
use crate::models::{Entry, PayerCatalog, PaymentOrder};

pub const SUCCESS_NOTE: &str = "Успех";
pub const UPLOAD_REPLAY_NOTE: &str = "Документ уже загружен в задачу ранее";
pub const ALREADY_COMPLETED_NOTE: &str = "Задача уже обработана ранее";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why one document did not reach its filing folder.
#[derive(Error, Debug)]
pub enum DocumentFailure {
    #[error("Staging failed: {0}")]
    Staging(#[source] DiscoveryError),

    #[error("Payment order could not be extracted")]
    Extraction,

    #[error("No task matches the payment order")]
    MatchNotFound,

    #[error("{} tasks match the payment order", .candidates.len())]
    MatchAmbiguous { candidates: Vec<u64> },

    #[error("Upload failed: {0}")]
    Upload(#[source] UploadError),

    #[error("Task {task_id} has no project id")]
    MissingProjectReference { task_id: u64 },

    #[error("Filing failed: {0}")]
    Filing(#[source] FilingError),

    #[error("Transfer failed: {0}")]
    Transfer(#[source] FilingError),
}

impl DocumentFailure {
    /// Note written to the ledger for the accountants reviewing the run.
    pub fn ledger_note(&self) -> String {
        match self {
            Self::Staging(e) => format!("Не удалось скопировать файл: {e}"),
            Self::Extraction => "Не удалось извлечь данные из платежного поручения".into(),
            Self::MatchNotFound => "Не удалось найти задачу для платежного поручения".into(),
            Self::MatchAmbiguous { candidates } => {
                let ids: Vec<String> = candidates.iter().map(u64::to_string).collect();
                format!("Найдено несколько задач: {}", ids.join(", "))
            }
            Self::Upload(e) => format!("Не удалось загрузить документ в задачу: {e}"),
            Self::MissingProjectReference { .. } => {
                "Задача без № проекта. Конечный путь для переноса файла неизвестен".into()
            }
            Self::Filing(e) => filing_note(e),
            Self::Transfer(e) => format!("Не удалось перенести файл: {e}"),
        }
    }
}

fn filing_note(error: &FilingError) -> String {
    match error {
        FilingError::PayerRootMissing { payer } => {
            format!("Не найдена папка для плательщика {payer:?}")
        }
        FilingError::PayerRootUnreachable { root } => {
            format!("Папка плательщика недоступна: {}", root.display())
        }
        FilingError::FiscalYearFolderMissing { year, root } => {
            format!("Не найдена папка {year} года в {}", root.display())
        }
        FilingError::ProjectFolderMissing {
            project_id,
            searched,
        } => format!(
            "Не найдена папка проекта {project_id} в {}",
            searched.display()
        ),
        FilingError::SupplierFolderMissing { project_folder } => format!(
            "Не найдена папка поставщика в {}",
            project_folder.display()
        ),
        FilingError::DestinationConflict { path } => {
            format!("В папке назначения уже есть другой файл: {}", path.display())
        }
        FilingError::Io { path, source } => {
            format!("Ошибка доступа к {}: {source}", path.display())
        }
    }
}

/// Conditions that stop the whole run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Document source error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Task registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOutcome {
    Filed { task_id: u64, destination: PathBuf },
    /// Task already completed by an earlier document or run.
    Skipped { task_id: u64 },
    Failed { note: String },
}

/// What happened to one document, plus the ledger row it produced.
#[derive(Debug, Clone)]
pub struct Processed {
    pub outcome: DocumentOutcome,
    pub record: LedgerRecord,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub discovered: usize,
    pub filed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Rows that could not be appended to the ledger.
    pub unrecorded: Vec<LedgerRecord>,
    pub ledger: FinalizeReport,
}

impl RunSummary {
    fn new(run_id: Uuid, discovered: usize) -> Self {
        Self {
            run_id,
            discovered,
            filed: 0,
            skipped: 0,
            failed: 0,
            unrecorded: Vec::new(),
            ledger: FinalizeReport::default(),
        }
    }

    fn count(&mut self, outcome: &DocumentOutcome) {
        match outcome {
            DocumentOutcome::Filed { .. } => self.filed += 1,
            DocumentOutcome::Skipped { .. } => self.skipped += 1,
            DocumentOutcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Every produced row made it into the ledger.
    pub fn is_clean(&self) -> bool {
        self.unrecorded.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Reconciler {
    catalog: Arc<PayerCatalog>,
    matcher: EntryMatcher,
    resolver: FilingResolver,
    extractor: Box<dyn DocumentExtractor>,
    task_url_template: String,
    layout: DataLayout,
    source_root: PathBuf,
    max_age_days: Option<u32>,
    lookback_days: u32,
}

impl Reconciler {
    pub fn new(config: &RunConfig, extractor: Box<dyn DocumentExtractor>) -> Self {
        let catalog = Arc::new(config.payers.clone());
        Self {
            matcher: EntryMatcher::new(catalog.clone()).with_amount_scale(config.amount_scale),
            resolver: FilingResolver::new(catalog.clone(), config.filing.clone()),
            catalog,
            extractor,
            task_url_template: config.task_url_template.clone(),
            layout: config.layout(),
            source_root: config.source_root.clone(),
            max_age_days: config.max_age_days,
            lookback_days: config.idempotency_lookback_days,
        }
    }

    /// Run once over the document source. The uploader is finished on every
    /// path, fatal errors included.
    pub fn run(
        &self,
        registry: &dyn TaskRegistry,
        uploader: &mut dyn Uploader,
        now: DateTime<Local>,
    ) -> Result<RunSummary, RunError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", run_id = %run_id);
        let _guard = span.enter();

        let result = self.run_documents(run_id, registry, uploader, now);
        uploader.finish();

        match &result {
            Ok(summary) => tracing::info!(
                discovered = summary.discovered,
                filed = summary.filed,
                skipped = summary.skipped,
                failed = summary.failed,
                unrecorded = summary.unrecorded.len(),
                "Reconciliation run complete"
            ),
            Err(e) => tracing::error!(error = %e, "Reconciliation run aborted"),
        }
        result
    }

    fn run_documents(
        &self,
        run_id: Uuid,
        registry: &dyn TaskRegistry,
        uploader: &mut dyn Uploader,
        now: DateTime<Local>,
    ) -> Result<RunSummary, RunError> {
        let logs_dir = self.layout.logs_dir();
        let mut idempotency =
            IdempotencySet::load(&logs_dir, now.date_naive(), self.lookback_days)?;
        let source = DocumentSource::open(&self.source_root, self.max_age_days)?;
        let documents = source.discover(now)?;
        let entries = registry.fetch_active_entries()?;

        if let Err(e) = archive_snapshot(&entries, &self.layout.entries_dir(), now) {
            tracing::warn!(error = %e, "Could not archive task snapshot");
        }

        let staging = Staging::new(self.layout.files_dir());
        let mut summary = RunSummary::new(run_id, documents.len());

        let ((), report) = with_ledger(ledger_path(&logs_dir, now), |ledger| {
            for document in &documents {
                let processed = self.process_document(
                    document,
                    &staging,
                    &entries,
                    &mut idempotency,
                    uploader,
                    now,
                );
                summary.count(&processed.outcome);
                record_outcome(ledger, processed.record, &mut summary);
            }
        })?;
        summary.ledger = report;
        Ok(summary)
    }

    /// Take one document as far through the pipeline as it will go.
    pub fn process_document(
        &self,
        document: &SourceDocument,
        staging: &Staging,
        entries: &[Entry],
        idempotency: &mut IdempotencySet,
        uploader: &mut dyn Uploader,
        now: DateTime<Local>,
    ) -> Processed {
        let source = document.source_path.as_path();
        tracing::debug!(document = %source.display(), "Processing document");

        let staged = match staging.stage(document, now) {
            Ok(staged) => staged,
            Err(e) => return unmatched(source, DocumentFailure::Staging(e)),
        };

        let Some(order) = self.extractor.extract(&staged, now) else {
            return unmatched(source, DocumentFailure::Extraction);
        };

        let entry = match self.matcher.find(&order, entries) {
            MatchOutcome::Matched(entry) => entry,
            MatchOutcome::NotFound => return unmatched(source, DocumentFailure::MatchNotFound),
            MatchOutcome::Ambiguous(candidates) => {
                let candidates = candidates.iter().map(|e| e.task_id).collect();
                return unmatched(source, DocumentFailure::MatchAmbiguous { candidates });
            }
        };
        let task_id = entry.task_id;
        let reference = render_task_reference(&self.task_url_template, task_id);
        tracing::info!(task_id, reference = %reference, "Task matched");

        if idempotency.is_completed(&reference) {
            tracing::info!(task_id, document = %source.display(), "Task already completed, skipping");
            return Processed {
                outcome: DocumentOutcome::Skipped { task_id },
                record: LedgerRecord::matched(source, entry, reference, ALREADY_COMPLETED_NOTE),
            };
        }

        let mut notes = Vec::new();
        if idempotency.is_uploaded(&reference) {
            tracing::info!(task_id, "Already uploaded, retrying filing only");
            notes.push(UPLOAD_REPLAY_NOTE.to_string());
        } else {
            match uploader.upload(task_id, &staged) {
                Ok(None) => {}
                // Attached but not approved: never attach it a second time.
                Ok(Some(note)) => notes.push(note),
                Err(e) => {
                    let failure = DocumentFailure::Upload(e);
                    self.flag_for_review(task_id, source, &order.payer, &failure);
                    let note = failure.ledger_note();
                    return Processed {
                        outcome: DocumentOutcome::Failed { note: note.clone() },
                        record: LedgerRecord::matched(source, entry, reference, note),
                    };
                }
            }
            idempotency.mark_uploaded(&reference);
        }

        let mut record = LedgerRecord::matched(source, entry, reference.clone(), String::new());
        record.uploaded = true;

        match self.file(&order, entry, source) {
            Ok(destination) => {
                idempotency.mark_completed(&reference);
                notes.insert(0, SUCCESS_NOTE.to_string());
                record.filed = true;
                record.document_path = destination.clone();
                record.note = notes.join("; ");
                Processed {
                    outcome: DocumentOutcome::Filed {
                        task_id,
                        destination,
                    },
                    record,
                }
            }
            Err(failure) => {
                self.flag_for_review(task_id, source, &order.payer, &failure);
                notes.insert(0, failure.ledger_note());
                record.note = notes.join("; ");
                Processed {
                    outcome: DocumentOutcome::Failed {
                        note: record.note.clone(),
                    },
                    record,
                }
            }
        }
    }

    /// Log a failure after matching, naming the payer's curator if known.
    fn flag_for_review(&self, task_id: u64, source: &Path, payer: &str, failure: &DocumentFailure) {
        tracing::warn!(task_id, document = %source.display(), error = %failure, "Document not filed");
        if let Some(curator) = self.catalog.curator(payer) {
            tracing::warn!(task_id, curator, payer, "Manual review needed");
        }
    }

    /// Resolve the filing folder and move the source document into it.
    fn file(
        &self,
        order: &PaymentOrder,
        entry: &Entry,
        source: &Path,
    ) -> Result<PathBuf, DocumentFailure> {
        let project_id = entry
            .project_id()
            .ok_or(DocumentFailure::MissingProjectReference {
                task_id: entry.task_id,
            })?;
        let counterparty = entry
            .counterparty
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&order.beneficiary);

        let request = FilingRequest {
            payer: &order.payer,
            project_id: &project_id,
            counterparty,
            taxpayer_id: &order.taxpayer_id,
        };
        let location = self
            .resolver
            .resolve(&request)
            .map_err(DocumentFailure::Filing)?;
        let placement = self
            .resolver
            .place(source, &location)
            .map_err(|e| match e {
                FilingError::DestinationConflict { .. } => DocumentFailure::Filing(e),
                other => DocumentFailure::Transfer(other),
            })?;
        Ok(placement.path)
    }
}

fn unmatched(source: &Path, failure: DocumentFailure) -> Processed {
    tracing::warn!(document = %source.display(), error = %failure, "Document not matched");
    let note = failure.ledger_note();
    Processed {
        outcome: DocumentOutcome::Failed { note: note.clone() },
        record: LedgerRecord::unmatched(source, note),
    }
}

/// Append one row; a failed append is reported and kept in the summary.
fn record_outcome(ledger: &mut LedgerWriter, record: LedgerRecord, summary: &mut RunSummary) {
    if let Err(e) = ledger.append(&record) {
        tracing::error!(
            ledger = %ledger.path().display(),
            document = %record.document_path.display(),
            error = %e,
            "Ledger row not recorded"
        );
        summary.unrecorded.push(record);
    }
}
