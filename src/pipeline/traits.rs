//! Seams to the external collaborators of the reconciliation pipeline.
//!
//! - TaskRegistry: one bulk snapshot of pending approval tasks per run
//! - DocumentExtractor: bank document → structured payment order
//! - Uploader: attach-and-approve inside the workflow tool
//!
//! The orchestrator only ever talks to these traits, so every step can be
//! driven by mocks in tests.

use std::path::Path;

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::models::{Entry, PaymentOrder};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Task snapshot unavailable at {path}: {source}")]
    Unavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Task snapshot is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Task snapshot contains duplicate task id {0}")]
    DuplicateTask(u64),
}

/// Supplies the candidate tasks for one run.
pub trait TaskRegistry {
    /// One bulk read; the result is treated as immutable for the whole run.
    fn fetch_active_entries(&self) -> Result<Vec<Entry>, RegistryError>;
}

/// Turns one source document into a payment order.
pub trait DocumentExtractor {
    /// Fails closed: unrecognized layouts and missing fields yield `None`
    /// after logging a diagnostic.
    fn extract(&self, document: &Path, reference: DateTime<Local>) -> Option<PaymentOrder>;
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload tool could not be started: {0}")]
    Launch(#[source] std::io::Error),

    #[error("Upload rejected ({status}): {detail}")]
    Rejected { status: String, detail: String },
}

/// Drives the single, stateful upload session.
///
/// Taken as `&mut` everywhere so the session can never be shared between
/// callers.
pub trait Uploader {
    /// `Ok(None)` means attached and approved. `Ok(Some(note))` is a partial
    /// failure: the attachment is in place even though approval was not, and
    /// the note goes verbatim into the ledger. `Err` means nothing was
    /// attached.
    fn upload(&mut self, task_id: u64, document: &Path) -> Result<Option<String>, UploadError>;

    /// Release the session. Called once after the last document, on every path.
    fn finish(&mut self) {}
}
