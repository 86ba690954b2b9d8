//! Persistence boundary for the fiscal core.
//!
//! Every core operation runs inside one [`FiscalTx`]. Dropping a transaction
//! without calling [`FiscalTx::commit`] discards all of its writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::billing::FiscalError;
use crate::models::{
    CreateSequence, FiscalSequence, FiscalStamp, Invoice, InvoiceLineItem, InvoiceStatus,
    NewInvoice, NewPayment, Payment, PricedLine,
};

/// Source of transactions.
#[async_trait]
pub trait FiscalStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn FiscalTx>, FiscalError>;

    async fn health_check(&self) -> Result<(), FiscalError>;
}

/// One atomic unit of work.
#[async_trait]
pub trait FiscalTx: Send {
    // Sequences

    /// Serialize range registration for one document type and series until
    /// the transaction ends. Allocation is not blocked.
    async fn lock_sequence_pool(&mut self, document_type: &str, series: &str)
        -> Result<(), FiscalError>;

    async fn insert_sequence(&mut self, input: &CreateSequence)
        -> Result<FiscalSequence, FiscalError>;

    async fn list_sequences(
        &mut self,
        document_type: Option<&str>,
    ) -> Result<Vec<FiscalSequence>, FiscalError>;

    /// Lock and return every active sequence of `document_type`, ordered by
    /// `range_start` then `sequence_id`. Locks are held until the transaction ends.
    async fn lock_active_sequences(
        &mut self,
        document_type: &str,
    ) -> Result<Vec<FiscalSequence>, FiscalError>;

    /// Increment the cursor of a locked sequence and return the updated row.
    async fn advance_cursor(&mut self, sequence_id: i64) -> Result<FiscalSequence, FiscalError>;

    async fn set_sequence_active(
        &mut self,
        sequence_id: i64,
        active: bool,
    ) -> Result<Option<FiscalSequence>, FiscalError>;

    // Invoices

    /// Insert a `pending` invoice. The store assigns the internal invoice number.
    async fn insert_invoice(&mut self, input: &NewInvoice) -> Result<Invoice, FiscalError>;

    async fn insert_line_items(
        &mut self,
        invoice_id: Uuid,
        lines: &[PricedLine],
    ) -> Result<Vec<InvoiceLineItem>, FiscalError>;

    async fn get_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, FiscalError>;

    /// Read an invoice and lock it until the transaction ends.
    async fn lock_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, FiscalError>;

    /// Non-voided invoice already derived from `order_id`, if any.
    async fn find_open_invoice_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<Invoice>, FiscalError>;

    async fn line_items(&mut self, invoice_id: Uuid) -> Result<Vec<InvoiceLineItem>, FiscalError>;

    /// Attach a fiscal number and move the invoice to `issued`.
    async fn stamp_invoice(
        &mut self,
        invoice_id: Uuid,
        stamp: &FiscalStamp,
    ) -> Result<Invoice, FiscalError>;

    async fn update_settlement(
        &mut self,
        invoice_id: Uuid,
        status: InvoiceStatus,
        amount_paid: Decimal,
    ) -> Result<Invoice, FiscalError>;

    async fn mark_voided(
        &mut self,
        invoice_id: Uuid,
        reason: Option<&str>,
        voided_utc: DateTime<Utc>,
    ) -> Result<Invoice, FiscalError>;

    // Payments

    /// Sum of all recorded payments for the invoice.
    async fn paid_total(&mut self, invoice_id: Uuid) -> Result<Decimal, FiscalError>;

    async fn insert_payment(&mut self, input: &NewPayment) -> Result<Payment, FiscalError>;

    async fn payments(&mut self, invoice_id: Uuid) -> Result<Vec<Payment>, FiscalError>;

    async fn commit(self: Box<Self>) -> Result<(), FiscalError>;
}
