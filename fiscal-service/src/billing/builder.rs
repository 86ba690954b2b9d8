//! Invoice construction and fiscal stamping.

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use super::allocator::{validate_document_type, SequenceAllocator};
use super::error::FiscalError;
use super::totals::{compute_totals, InvoiceTotals};
use super::FiscalSettings;
use crate::models::{
    Allocation, FiscalStamp, Invoice, InvoiceLineItem, InvoiceRequest, InvoiceStatus,
    LineItemInput, NewInvoice, Order,
};
use crate::services::metrics::{record_allocation, record_invoice_status};
use crate::services::{Clock, FiscalStore, FiscalTx};

/// An invoice together with its persisted lines.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDocument {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub line_items: Vec<InvoiceLineItem>,
}

#[derive(Clone)]
pub struct InvoiceBuilder {
    store: Arc<dyn FiscalStore>,
    allocator: SequenceAllocator,
    clock: Arc<dyn Clock>,
    settings: FiscalSettings,
}

impl InvoiceBuilder {
    pub fn new(
        store: Arc<dyn FiscalStore>,
        allocator: SequenceAllocator,
        clock: Arc<dyn Clock>,
        settings: FiscalSettings,
    ) -> Self {
        Self {
            store,
            allocator,
            clock,
            settings,
        }
    }

    /// Price, persist and stamp an invoice in one transaction.
    ///
    /// When no fiscal number can be allocated nothing is kept: no pending
    /// invoice, no lines, no cursor movement.
    #[instrument(skip(self, request), fields(patient_id = %request.patient_id, order_id = ?request.order_id))]
    pub async fn build_invoice(
        &self,
        request: &InvoiceRequest,
    ) -> Result<InvoiceDocument, FiscalError> {
        let (new_invoice, totals) = self.prepare(request)?;

        let mut tx = self.store.begin().await?;
        let (invoice, line_items) = insert_pending(tx.as_mut(), &new_invoice, &totals).await?;
        let (invoice, allocation) = self.stamp_in(tx.as_mut(), invoice).await?;
        tx.commit().await?;

        self.record_issued(&invoice, &allocation);

        Ok(InvoiceDocument {
            invoice,
            line_items,
        })
    }

    /// Build and stamp the invoice for a lab order. At most one non-voided
    /// invoice may exist per order.
    #[instrument(skip(self, order), fields(order_id = %order.order_id, order_number = %order.order_number))]
    pub async fn build_invoice_from_order(
        &self,
        order: &Order,
    ) -> Result<InvoiceDocument, FiscalError> {
        let request = InvoiceRequest {
            patient_id: order.patient_id,
            order_id: Some(order.order_id),
            lines: order
                .lines
                .iter()
                .map(|line| LineItemInput {
                    description: line.description.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    discount: line.discount,
                    tax: Decimal::ZERO,
                    order_line_id: Some(line.order_line_id),
                })
                .collect(),
            discount: Default::default(),
            tax_rate: None,
            document_type: order.document_type.clone(),
            other_taxes: Decimal::ZERO,
            payment_method: None,
            notes: Some(format!("Order {}", order.order_number)),
            issued_by: order.registered_by,
        };

        self.build_invoice(&request).await
    }

    /// Persist a `pending` invoice without a fiscal number.
    #[instrument(skip(self, request), fields(patient_id = %request.patient_id))]
    pub async fn draft_invoice(
        &self,
        request: &InvoiceRequest,
    ) -> Result<InvoiceDocument, FiscalError> {
        let (new_invoice, totals) = self.prepare(request)?;

        let mut tx = self.store.begin().await?;
        let (invoice, line_items) = insert_pending(tx.as_mut(), &new_invoice, &totals).await?;
        tx.commit().await?;

        record_invoice_status(InvoiceStatus::Pending.as_str());
        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            total = %invoice.total,
            "Draft invoice created"
        );

        Ok(InvoiceDocument {
            invoice,
            line_items,
        })
    }

    /// Allocate a fiscal number for a pending invoice.
    #[instrument(skip(self))]
    pub async fn stamp_invoice(&self, invoice_id: Uuid) -> Result<InvoiceDocument, FiscalError> {
        let mut tx = self.store.begin().await?;

        let invoice = tx
            .lock_invoice(invoice_id)
            .await?
            .ok_or(FiscalError::InvoiceNotFound(invoice_id))?;

        if invoice.status() == InvoiceStatus::Voided {
            return Err(FiscalError::InvoiceVoided { invoice_id });
        }
        if invoice.fiscal_number.is_some() {
            return Err(FiscalError::AlreadyIssued { invoice_id });
        }

        let (invoice, allocation) = self.stamp_in(tx.as_mut(), invoice).await?;
        let line_items = tx.line_items(invoice_id).await?;
        tx.commit().await?;

        self.record_issued(&invoice, &allocation);

        Ok(InvoiceDocument {
            invoice,
            line_items,
        })
    }

    fn prepare(&self, request: &InvoiceRequest) -> Result<(NewInvoice, InvoiceTotals), FiscalError> {
        let tax_rate = request.tax_rate.unwrap_or(self.settings.itbis_rate);
        let totals = compute_totals(&request.lines, request.discount, tax_rate, request.other_taxes)?;

        let document_type = request
            .document_type
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.settings.default_document_type.clone());
        validate_document_type(&document_type)?;

        let new_invoice = NewInvoice {
            patient_id: request.patient_id,
            order_id: request.order_id,
            document_type,
            subtotal: totals.subtotal,
            discount: totals.discount,
            tax: totals.tax,
            other_taxes: totals.other_taxes,
            total: totals.total,
            payment_method: request.payment_method.clone(),
            notes: request.notes.clone(),
            issued_by: request.issued_by,
        };

        Ok((new_invoice, totals))
    }

    async fn stamp_in(
        &self,
        tx: &mut dyn FiscalTx,
        invoice: Invoice,
    ) -> Result<(Invoice, Allocation), FiscalError> {
        let issue_date = self.clock.today();
        let allocation = self
            .allocator
            .allocate_in(tx, &invoice.document_type, issue_date)
            .await?;

        let stamp = FiscalStamp {
            fiscal_number: allocation.fiscal_number.clone(),
            sequence_id: allocation.sequence_id,
            issue_date,
            due_date: issue_date + Duration::days(self.settings.payment_terms_days),
            issued_utc: self.clock.now(),
        };

        let stamped = tx.stamp_invoice(invoice.invoice_id, &stamp).await?;
        Ok((stamped, allocation))
    }

    fn record_issued(&self, invoice: &Invoice, allocation: &Allocation) {
        record_allocation(&invoice.document_type, allocation.sequence_id, allocation.remaining);
        record_invoice_status(InvoiceStatus::Issued.as_str());

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            fiscal_number = %allocation.fiscal_number,
            total = %invoice.total,
            "Invoice issued"
        );
    }
}

async fn insert_pending(
    tx: &mut dyn FiscalTx,
    new_invoice: &NewInvoice,
    totals: &InvoiceTotals,
) -> Result<(Invoice, Vec<InvoiceLineItem>), FiscalError> {
    if let Some(order_id) = new_invoice.order_id {
        if tx.find_open_invoice_for_order(order_id).await?.is_some() {
            return Err(FiscalError::OrderAlreadyInvoiced { order_id });
        }
    }

    let invoice = tx.insert_invoice(new_invoice).await?;
    let line_items = tx.insert_line_items(invoice.invoice_id, &totals.lines).await?;
    Ok((invoice, line_items))
}
