//! Run ledger: the per-day audit log of processed documents.
//!
//! Persisted as `;`-delimited rows without a header, one row per document,
//! 16 fixed columns. A spreadsheet-friendly export with header labels is
//! re-materialized from the deduplicated log at the end of every run.

pub mod idempotency;
pub mod writer;

pub use idempotency::*;
pub use writer::*;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};
use thiserror::Error;

use crate::models::Entry;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("I/O error on ledger {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed ledger {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl LedgerError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub const DELIMITER: u8 = b';';
pub const COLUMN_COUNT: usize = 16;

pub const COL_REFERENCE: usize = 0;
pub const COL_FOUND: usize = 12;
pub const COL_UPLOADED: usize = 13;
pub const COL_FILED: usize = 14;

/// Header labels of the export, in persisted column order.
pub const HEADERS: [&str; COLUMN_COUNT] = [
    "Ссылка",
    "№ проекта",
    "Инициатор",
    "Контрагент",
    "БИН/ИИН контрагента",
    "Плательщик",
    "Банк",
    "Сумма",
    "Валюта",
    "Дата счета на оплату",
    "Желаемая дата оплаты",
    "Путь",
    "Найдено в Pyrus",
    "Загружено в Pyrus",
    "Перенесено в сетевую папку",
    "Заметки",
];

pub const YES: &str = "Да";
pub const NO: &str = "Нет";

pub fn flag_token(flag: bool) -> &'static str {
    if flag {
        YES
    } else {
        NO
    }
}

pub fn is_yes(token: &str) -> bool {
    token.trim() == YES
}

/// Ledger location for a run date: `<logs_dir>/YYYY-MM/DD-MM-YYYY.csv`.
pub fn ledger_path(logs_dir: &Path, now: DateTime<Local>) -> PathBuf {
    logs_dir
        .join(now.format("%Y-%m").to_string())
        .join(format!("{}.csv", now.format("%d-%m-%Y")))
}

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRecord {
    pub reference: String,
    pub project_id: String,
    pub initiator: String,
    pub counterparty: String,
    pub counterparty_tax_id: String,
    pub payer: String,
    pub bank: String,
    pub amount: String,
    pub currency: String,
    pub invoice_date: String,
    pub desired_date: String,
    pub document_path: PathBuf,
    pub found: bool,
    pub uploaded: bool,
    pub filed: bool,
    pub note: String,
}

impl LedgerRecord {
    /// A record for a document that never got as far as a matched task.
    pub fn unmatched(document_path: &Path, note: impl Into<String>) -> Self {
        Self {
            reference: String::new(),
            project_id: String::new(),
            initiator: String::new(),
            counterparty: String::new(),
            counterparty_tax_id: String::new(),
            payer: String::new(),
            bank: String::new(),
            amount: String::new(),
            currency: String::new(),
            invoice_date: String::new(),
            desired_date: String::new(),
            document_path: document_path.to_path_buf(),
            found: false,
            uploaded: false,
            filed: false,
            note: note.into(),
        }
    }

    /// A record carrying the matched task's fields.
    pub fn matched(
        document_path: &Path,
        entry: &Entry,
        reference: String,
        note: impl Into<String>,
    ) -> Self {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        let date = |d: &Option<NaiveDate>| {
            d.map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default()
        };
        Self {
            reference,
            project_id: text(&entry.project_id),
            initiator: text(&entry.initiator),
            counterparty: text(&entry.counterparty),
            counterparty_tax_id: text(&entry.counterparty_tax_id),
            payer: entry.payer.clone(),
            bank: text(&entry.bank),
            amount: entry.amount.map(|a| a.to_string()).unwrap_or_default(),
            currency: text(&entry.currency),
            invoice_date: date(&entry.invoice_date),
            desired_date: date(&entry.desired_date),
            document_path: document_path.to_path_buf(),
            found: true,
            uploaded: false,
            filed: false,
            note: note.into(),
        }
    }

    pub fn to_row(&self) -> [String; COLUMN_COUNT] {
        [
            self.reference.clone(),
            self.project_id.clone(),
            self.initiator.clone(),
            self.counterparty.clone(),
            self.counterparty_tax_id.clone(),
            self.payer.clone(),
            self.bank.clone(),
            self.amount.clone(),
            self.currency.clone(),
            self.invoice_date.clone(),
            self.desired_date.clone(),
            self.document_path.display().to_string(),
            flag_token(self.found).to_string(),
            flag_token(self.uploaded).to_string(),
            flag_token(self.filed).to_string(),
            self.note.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    #[test]
    fn ledger_path_is_partitioned_by_month_and_day() {
        let now = Local.with_ymd_and_hms(2024, 5, 3, 10, 0, 0).unwrap();
        let path = ledger_path(Path::new("/data/logs"), now);
        assert_eq!(path, Path::new("/data/logs/2024-05/03-05-2024.csv"));
    }

    #[test]
    fn headers_match_column_count() {
        assert_eq!(HEADERS.len(), COLUMN_COUNT);
        assert_eq!(HEADERS[COL_FOUND], "Найдено в Pyrus");
        assert_eq!(HEADERS[COL_FILED], "Перенесено в сетевую папку");
    }

    #[test]
    fn unmatched_row_has_empty_entry_columns_and_no_flags() {
        let row = LedgerRecord::unmatched(Path::new("/in/1/a.pdf"), "Не удалось").to_row();
        assert!(row[COL_REFERENCE].is_empty());
        assert_eq!(row[11], "/in/1/a.pdf");
        assert_eq!(row[COL_FOUND], NO);
        assert_eq!(row[COL_UPLOADED], NO);
        assert_eq!(row[COL_FILED], NO);
        assert_eq!(row[15], "Не удалось");
    }

    #[test]
    fn matched_row_renders_entry_fields() {
        let entry = Entry {
            task_id: 42,
            stage: "5".into(),
            project_id: Some("24-077".into()),
            initiator: Some("Иван Петров".into()),
            counterparty: Some("ТОО \"Бета\"".into()),
            counterparty_tax_id: Some("123456789012".into()),
            secondary_counterparty_tax_id: None,
            payer: "ТОО \"Альфа\"".into(),
            bank: Some("Halyk".into()),
            amount: Some(Decimal::new(15_000_000, 2)),
            currency: Some("KZT".into()),
            invoice_date: NaiveDate::from_ymd_opt(2024, 4, 30),
            desired_date: None,
            account_reference: None,
            description: None,
        };
        let mut record = LedgerRecord::matched(
            Path::new("/out/a.pdf"),
            &entry,
            "https://pyrus.com/t#id42".into(),
            "Успех",
        );
        record.uploaded = true;
        let row = record.to_row();
        assert_eq!(row[1], "24-077");
        assert_eq!(row[7], "150000.00");
        assert_eq!(row[9], "2024-04-30");
        assert_eq!(row[10], "");
        assert_eq!(row[COL_FOUND], YES);
        assert_eq!(row[COL_UPLOADED], YES);
        assert_eq!(row[COL_FILED], NO);
    }
}
