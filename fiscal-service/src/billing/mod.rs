//! Fiscal invoicing core: numbering, invoice building and the payment ledger.

mod allocator;
mod builder;
mod error;
mod ledger;
mod totals;

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::services::{Clock, FiscalStore};

pub use allocator::{
    format_fiscal_number, is_fiscal_code, select_sequence, validate_document_type,
    SequenceAllocator, MAX_DOCUMENT_TYPE_LEN, MAX_NUMBER_WIDTH, MAX_SERIES_LEN,
};
pub use builder::{InvoiceBuilder, InvoiceDocument};
pub use error::{ErrorKind, FiscalError};
pub use ledger::{settlement_status, InvoiceDetail, PaymentLedger};
pub use totals::{
    compute_totals, ensure_storable, has_currency_precision, price_line, round_currency,
    InvoiceTotals, CURRENCY_SCALE, LINE_PRICE_SCALE, MAX_AMOUNT, SETTLEMENT_TOLERANCE,
};

/// Business parameters of the fiscal core.
#[derive(Debug, Clone)]
pub struct FiscalSettings {
    /// ITBIS rate applied when a request does not carry its own.
    pub itbis_rate: Decimal,
    pub default_document_type: String,
    /// Zero-padded digits of the numeric part of a fiscal number.
    pub number_width: usize,
    pub payment_terms_days: i64,
    /// Remaining-numbers level below which allocation logs a warning.
    pub low_sequence_threshold: i64,
}

impl Default for FiscalSettings {
    fn default() -> Self {
        Self {
            itbis_rate: Decimal::new(18, 2),
            default_document_type: "B02".to_string(),
            number_width: 10,
            payment_terms_days: 30,
            low_sequence_threshold: 100,
        }
    }
}

/// The three cooperating components over one store and clock.
#[derive(Clone)]
pub struct FiscalCore {
    pub allocator: SequenceAllocator,
    pub builder: InvoiceBuilder,
    pub ledger: PaymentLedger,
}

impl FiscalCore {
    pub fn new(
        store: Arc<dyn FiscalStore>,
        clock: Arc<dyn Clock>,
        settings: FiscalSettings,
    ) -> Self {
        let allocator = SequenceAllocator::new(store.clone(), settings.clone());
        let builder = InvoiceBuilder::new(store.clone(), allocator.clone(), clock.clone(), settings);
        let ledger = PaymentLedger::new(store, clock);

        Self {
            allocator,
            builder,
            ledger,
        }
    }
}
