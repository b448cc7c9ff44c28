use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ModelError, PayerCatalog};

static TAXPAYER_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{12}$").unwrap());

/// 12-digit business/individual identification number (БИН/ИИН).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxpayerId(String);

impl TaxpayerId {
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let trimmed = raw.trim();
        if TAXPAYER_ID.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ModelError::InvalidTaxpayerId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaxpayerId {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaxpayerId> for String {
    fn from(id: TaxpayerId) -> Self {
        id.0
    }
}

impl fmt::Display for TaxpayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized record extracted from one bank payment confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOrder {
    /// Canonical payer name, as keyed in the payer catalog.
    pub payer: String,
    pub beneficiary: String,
    pub amount: Decimal,
    pub value_date: NaiveDate,
    /// Beneficiary taxpayer id.
    pub taxpayer_id: TaxpayerId,
    pub payment_purpose: String,
    /// Whole days between the document's modification time and the run instant.
    pub days_old: i64,
}

impl PaymentOrder {
    /// Check the invariants the type system does not carry.
    pub fn validate(&self, catalog: &PayerCatalog) -> Result<(), ModelError> {
        if self.amount <= Decimal::ZERO {
            return Err(ModelError::NonPositiveAmount(self.amount));
        }
        if !catalog.contains(&self.payer) {
            return Err(ModelError::UnknownPayer(self.payer.clone()));
        }
        Ok(())
    }
}
