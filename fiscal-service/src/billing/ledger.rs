//! Payments and voids against issued invoices.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::error::FiscalError;
use super::totals::{has_currency_precision, SETTLEMENT_TOLERANCE};
use crate::models::{Invoice, InvoiceLineItem, InvoiceStatus, NewPayment, Payment, PaymentRequest};
use crate::services::metrics::{record_invoice_status, record_payment};
use crate::services::{Clock, FiscalStore};

/// Settlement state implied by the amount paid so far.
pub fn settlement_status(total: Decimal, paid: Decimal) -> InvoiceStatus {
    if (total - paid).abs() <= SETTLEMENT_TOLERANCE {
        InvoiceStatus::Paid
    } else if paid > Decimal::ZERO {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Issued
    }
}

/// Full view of an invoice: lines, payments and what is still owed.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub line_items: Vec<InvoiceLineItem>,
    pub payments: Vec<Payment>,
    pub outstanding: Decimal,
}

#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn FiscalStore>,
    clock: Arc<dyn Clock>,
}

impl PaymentLedger {
    pub fn new(store: Arc<dyn FiscalStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record a payment and move the invoice to `partially_paid` or `paid`.
    ///
    /// The paid total is re-read under the invoice lock, so concurrent
    /// payments can never jointly exceed the invoice total.
    #[instrument(skip(self, request), fields(invoice_id = %request.invoice_id, amount = %request.amount))]
    pub async fn apply_payment(&self, request: &PaymentRequest) -> Result<Payment, FiscalError> {
        if request.amount <= Decimal::ZERO {
            return Err(FiscalError::InvalidAmount(format!(
                "payment amount {} must be positive",
                request.amount
            )));
        }
        if !has_currency_precision(request.amount) {
            return Err(FiscalError::InvalidAmount(format!(
                "payment amount {} has more than two decimals",
                request.amount
            )));
        }

        let invoice_id = request.invoice_id;
        let mut tx = self.store.begin().await?;

        let invoice = tx
            .lock_invoice(invoice_id)
            .await?
            .ok_or(FiscalError::InvoiceNotFound(invoice_id))?;

        if invoice.status() == InvoiceStatus::Voided {
            return Err(FiscalError::InvoiceVoided { invoice_id });
        }
        if invoice.fiscal_number.is_none() {
            return Err(FiscalError::InvoiceNotIssued { invoice_id });
        }

        let paid = tx.paid_total(invoice_id).await?;
        let outstanding = invoice.total - paid;
        if request.amount > outstanding {
            warn!(
                invoice_id = %invoice_id,
                outstanding = %outstanding,
                attempted = %request.amount,
                "Payment rejected: exceeds outstanding balance"
            );
            return Err(FiscalError::Overpayment {
                invoice_id,
                outstanding,
                attempted: request.amount,
            });
        }

        let payment = tx
            .insert_payment(&NewPayment {
                invoice_id,
                amount: request.amount,
                payment_method: request.method.as_str().to_string(),
                reference: request.reference.clone(),
                bank: request.bank.clone(),
                notes: request.notes.clone(),
                received_by: request.received_by,
                paid_utc: self.clock.now(),
            })
            .await?;

        let amount_paid = paid + request.amount;
        let status = settlement_status(invoice.total, amount_paid);
        tx.update_settlement(invoice_id, status, amount_paid).await?;
        tx.commit().await?;

        record_payment(
            &payment.payment_method,
            payment.amount.to_f64().unwrap_or_default(),
        );
        record_invoice_status(status.as_str());
        info!(
            invoice_id = %invoice_id,
            payment_id = %payment.payment_id,
            amount_paid = %amount_paid,
            status = status.as_str(),
            "Payment applied"
        );

        Ok(payment)
    }

    /// Void an invoice that has no payments. The fiscal number stays
    /// consumed and attached to the voided invoice.
    #[instrument(skip(self, reason))]
    pub async fn void_invoice(
        &self,
        invoice_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Invoice, FiscalError> {
        let mut tx = self.store.begin().await?;

        let invoice = tx
            .lock_invoice(invoice_id)
            .await?
            .ok_or(FiscalError::InvoiceNotFound(invoice_id))?;

        if invoice.status() == InvoiceStatus::Voided {
            return Err(FiscalError::InvoiceVoided { invoice_id });
        }

        let paid = tx.paid_total(invoice_id).await?;
        if paid > Decimal::ZERO {
            return Err(FiscalError::HasPayments { invoice_id, paid });
        }

        let voided = tx.mark_voided(invoice_id, reason, self.clock.now()).await?;
        tx.commit().await?;

        record_invoice_status(InvoiceStatus::Voided.as_str());
        info!(
            invoice_id = %invoice_id,
            fiscal_number = ?voided.fiscal_number,
            "Invoice voided"
        );

        Ok(voided)
    }

    pub async fn invoice_detail(&self, invoice_id: Uuid) -> Result<InvoiceDetail, FiscalError> {
        let mut tx = self.store.begin().await?;

        let invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or(FiscalError::InvoiceNotFound(invoice_id))?;
        let line_items = tx.line_items(invoice_id).await?;
        let payments = tx.payments(invoice_id).await?;

        let paid: Decimal = payments.iter().map(|p| p.amount).sum();
        let outstanding = if invoice.status() == InvoiceStatus::Voided {
            Decimal::ZERO
        } else {
            invoice.total - paid
        };

        Ok(InvoiceDetail {
            invoice,
            line_items,
            payments,
            outstanding,
        })
    }
}
