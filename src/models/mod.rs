pub mod catalog;
pub mod entry;
pub mod payment_order;

pub use catalog::*;
pub use entry::*;
pub use payment_order::*;

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ModelError {
    #[error("Taxpayer id must be exactly 12 digits, got {0:?}")]
    InvalidTaxpayerId(String),

    #[error("Payment amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("Payer {0:?} is not in the payer catalog")]
    UnknownPayer(String),

    #[error("Project id {0:?} has no two-digit year segment")]
    InvalidProjectId(String),
}
