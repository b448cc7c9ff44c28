use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ModelError, TaxpayerId};

/// Snapshot of one pending approval task in the workflow tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub task_id: u64,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub initiator: Option<String>,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub counterparty_tax_id: Option<String>,
    /// Second counterparty block on the task form, filled for intermediary payments.
    #[serde(default)]
    pub secondary_counterparty_tax_id: Option<String>,
    pub payer: String,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub invoice_date: Option<NaiveDate>,
    #[serde(default)]
    pub desired_date: Option<NaiveDate>,
    /// Invoice / account number the payment purpose text usually quotes.
    #[serde(default)]
    pub account_reference: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Entry {
    pub fn has_counterparty_tax_id(&self, id: &TaxpayerId) -> bool {
        [&self.counterparty_tax_id, &self.secondary_counterparty_tax_id]
            .into_iter()
            .flatten()
            .any(|candidate| candidate.trim() == id.as_str())
    }

    pub fn account_reference(&self) -> Option<&str> {
        self.account_reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// The task's project id, if present and carrying a usable year segment.
    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
            .as_deref()
            .and_then(|raw| ProjectId::parse(raw).ok())
    }
}

/// Project number of the form `YY-NNN` (e.g. `24-077`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectId {
    raw: String,
    fiscal_year: i32,
}

impl ProjectId {
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let trimmed = raw.trim();
        let year_segment: &str = trimmed
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .unwrap_or_default();

        if year_segment.len() < 2 || trimmed.len() == year_segment.len() {
            return Err(ModelError::InvalidProjectId(raw.to_string()));
        }

        let yy: i32 = year_segment[year_segment.len() - 2..]
            .parse()
            .map_err(|_| ModelError::InvalidProjectId(raw.to_string()))?;

        Ok(Self {
            raw: trimmed.to_string(),
            fiscal_year: 2000 + yy,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn fiscal_year(&self) -> i32 {
        self.fiscal_year
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Entry {
        Entry {
            task_id: 42,
            stage: "5".into(),
            project_id: Some("24-077".into()),
            initiator: None,
            counterparty: Some("ТОО \"Бета\"".into()),
            counterparty_tax_id: Some("123456789012".into()),
            secondary_counterparty_tax_id: Some(" 999999999999 ".into()),
            payer: "ТОО \"Альфа\"".into(),
            bank: None,
            amount: Some(Decimal::new(15_000_000, 2)),
            currency: Some("KZT".into()),
            invoice_date: None,
            desired_date: None,
            account_reference: Some("  ".into()),
            description: None,
        }
    }

    #[test]
    fn project_id_year_from_leading_segment() {
        let id = ProjectId::parse("24-077").unwrap();
        assert_eq!(id.fiscal_year(), 2024);
        assert_eq!(id.as_str(), "24-077");
    }

    #[test]
    fn project_id_uses_last_two_digits_of_long_segment() {
        assert_eq!(ProjectId::parse("2023-5").unwrap().fiscal_year(), 2023);
    }

    #[test]
    fn project_id_rejects_unusable_values() {
        assert!(ProjectId::parse("").is_err());
        assert!(ProjectId::parse("ABC").is_err());
        assert!(ProjectId::parse("7-001").is_err());
        assert!(ProjectId::parse("24077").is_err());
    }

    #[test]
    fn matches_primary_and_secondary_tax_ids() {
        let e = entry();
        assert!(e.has_counterparty_tax_id(&TaxpayerId::parse("123456789012").unwrap()));
        assert!(e.has_counterparty_tax_id(&TaxpayerId::parse("999999999999").unwrap()));
        assert!(!e.has_counterparty_tax_id(&TaxpayerId::parse("000000000000").unwrap()));
    }

    #[test]
    fn blank_account_reference_is_none() {
        assert_eq!(entry().account_reference(), None);
    }

    #[test]
    fn deserializes_snapshot_with_numeric_amount() {
        let json = r#"{"task_id": 7, "payer": "X", "amount": 150000.0, "invoice_date": "2024-05-01"}"#;
        let e: Entry = serde_json::from_str(json).unwrap();
        assert_eq!(e.amount, Some(Decimal::new(150_000, 0)));
        assert_eq!(e.invoice_date, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert!(e.project_id.is_none());
    }
}
