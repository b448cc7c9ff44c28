//! Entry Matcher: payment order → unique workflow task.
//!
//! Primary filter on payer, counterparty taxpayer id and amount; when several
//! tasks survive, narrow by the account reference quoted in the payment
//! purpose. Anything that is not a single survivor is reported, never picked.

use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::{Entry, PayerCatalog, PaymentOrder};

/// Default number of decimal places amounts are compared at.
pub const DEFAULT_AMOUNT_SCALE: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome<'a> {
    Matched(&'a Entry),
    NotFound,
    /// Every candidate that passed the primary filter, before narrowing.
    Ambiguous(Vec<&'a Entry>),
}

pub struct EntryMatcher {
    catalog: Arc<PayerCatalog>,
    amount_scale: u32,
}

impl EntryMatcher {
    pub fn new(catalog: Arc<PayerCatalog>) -> Self {
        Self {
            catalog,
            amount_scale: DEFAULT_AMOUNT_SCALE,
        }
    }

    pub fn with_amount_scale(mut self, scale: u32) -> Self {
        self.amount_scale = scale;
        self
    }

    pub fn find<'a>(&self, order: &PaymentOrder, entries: &'a [Entry]) -> MatchOutcome<'a> {
        if !self.catalog.contains(&order.payer) {
            tracing::warn!(payer = %order.payer, "Order payer is not in the catalog");
            return MatchOutcome::NotFound;
        }

        let wanted = self.round(order.amount);
        let candidates: Vec<&Entry> = entries
            .iter()
            .filter(|e| e.payer == order.payer)
            .filter(|e| e.has_counterparty_tax_id(&order.taxpayer_id))
            .filter(|e| e.amount.map(|a| self.round(a)) == Some(wanted))
            .collect();

        tracing::debug!(candidates = candidates.len(), "Primary filter applied");

        match candidates.len() {
            0 => MatchOutcome::NotFound,
            1 => MatchOutcome::Matched(candidates[0]),
            _ => {
                let narrowed: Vec<&Entry> = candidates
                    .iter()
                    .copied()
                    .filter(|e| {
                        e.account_reference()
                            .is_some_and(|r| order.payment_purpose.contains(r))
                    })
                    .collect();

                tracing::info!(
                    candidates = candidates.len(),
                    narrowed = narrowed.len(),
                    "Narrowed candidates by account reference"
                );

                match narrowed.as_slice() {
                    [single] => MatchOutcome::Matched(*single),
                    _ => MatchOutcome::Ambiguous(candidates),
                }
            }
        }
    }

    fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.amount_scale, RoundingStrategy::MidpointAwayFromZero)
    }
}
