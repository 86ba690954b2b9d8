//! Typed failures of the fiscal core.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Broad class of a [`FiscalError`], used for HTTP mapping and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Numbering resources are used up or out of date. Needs an administrator.
    ResourceExhaustion,
    /// Bad input, rejected before anything was written.
    Validation,
    /// Rejected by a state check inside a transaction.
    Consistency,
    NotFound,
    Storage,
}

#[derive(Debug, Error)]
pub enum FiscalError {
    #[error("No active fiscal sequence for document type {document_type}")]
    NoActiveSequence { document_type: String },

    #[error("Fiscal sequence {sequence_id} for document type {document_type} is exhausted")]
    Exhausted {
        document_type: String,
        sequence_id: i64,
    },

    #[error(
        "Fiscal sequence {sequence_id} for document type {document_type} expired on {expired_on}"
    )]
    Expired {
        document_type: String,
        sequence_id: i64,
        expired_on: NaiveDate,
    },

    #[error("Invoice has no line items")]
    EmptyInvoice,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("Invalid document type: {0}")]
    InvalidDocumentType(String),

    #[error("Payment of {attempted} exceeds outstanding balance {outstanding} on invoice {invoice_id}")]
    Overpayment {
        invoice_id: Uuid,
        outstanding: Decimal,
        attempted: Decimal,
    },

    #[error("Invoice {invoice_id} has no fiscal number yet")]
    InvoiceNotIssued { invoice_id: Uuid },

    #[error("Invoice {invoice_id} already has payments totalling {paid}")]
    HasPayments { invoice_id: Uuid, paid: Decimal },

    #[error("Invoice {invoice_id} is voided")]
    InvoiceVoided { invoice_id: Uuid },

    #[error("Invoice {invoice_id} is already stamped")]
    AlreadyIssued { invoice_id: Uuid },

    #[error("Order {order_id} is already invoiced")]
    OrderAlreadyInvoiced { order_id: Uuid },

    #[error("Invoice {0} not found")]
    InvoiceNotFound(Uuid),

    #[error("Fiscal sequence {0} not found")]
    SequenceNotFound(i64),

    #[error("Storage error: {0}")]
    Storage(anyhow::Error),
}

impl FiscalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FiscalError::NoActiveSequence { .. }
            | FiscalError::Exhausted { .. }
            | FiscalError::Expired { .. } => ErrorKind::ResourceExhaustion,
            FiscalError::EmptyInvoice
            | FiscalError::InvalidAmount(_)
            | FiscalError::InvalidSequence(_)
            | FiscalError::InvalidDocumentType(_) => ErrorKind::Validation,
            FiscalError::Overpayment { .. }
            | FiscalError::InvoiceNotIssued { .. }
            | FiscalError::HasPayments { .. }
            | FiscalError::InvoiceVoided { .. }
            | FiscalError::AlreadyIssued { .. }
            | FiscalError::OrderAlreadyInvoiced { .. } => ErrorKind::Consistency,
            FiscalError::InvoiceNotFound(_) | FiscalError::SequenceNotFound(_) => {
                ErrorKind::NotFound
            }
            FiscalError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            FiscalError::NoActiveSequence { .. } => "no_active_sequence",
            FiscalError::Exhausted { .. } => "exhausted",
            FiscalError::Expired { .. } => "expired",
            FiscalError::EmptyInvoice => "empty_invoice",
            FiscalError::InvalidAmount(_) => "invalid_amount",
            FiscalError::InvalidSequence(_) => "invalid_sequence",
            FiscalError::InvalidDocumentType(_) => "invalid_document_type",
            FiscalError::Overpayment { .. } => "overpayment",
            FiscalError::InvoiceNotIssued { .. } => "invoice_not_issued",
            FiscalError::HasPayments { .. } => "has_payments",
            FiscalError::InvoiceVoided { .. } => "invoice_voided",
            FiscalError::AlreadyIssued { .. } => "already_issued",
            FiscalError::OrderAlreadyInvoiced { .. } => "order_already_invoiced",
            FiscalError::InvoiceNotFound(_) => "invoice_not_found",
            FiscalError::SequenceNotFound(_) => "sequence_not_found",
            FiscalError::Storage(_) => "storage_error",
        }
    }

    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        FiscalError::Storage(anyhow::anyhow!("{}: {}", context, err))
    }
}
