//! In-memory [`FiscalStore`].
//!
//! For tests and local development only. Each transaction holds the
//! store-wide lock from `begin` until it is committed or dropped. Reads go
//! straight to the locked state; the first write takes a private copy, which
//! `commit` publishes. Transactions are fully serialized and uncommitted
//! writes are never visible.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::store::{FiscalStore, FiscalTx};
use crate::billing::FiscalError;
use crate::models::{
    CreateSequence, FiscalSequence, FiscalStamp, Invoice, InvoiceLineItem, InvoiceStatus,
    NewInvoice, NewPayment, Payment, PricedLine,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    sequences: BTreeMap<i64, FiscalSequence>,
    last_sequence_id: i64,
    invoices: HashMap<Uuid, Invoice>,
    last_invoice_number: u64,
    line_items: HashMap<Uuid, Vec<InvoiceLineItem>>,
    payments: HashMap<Uuid, Vec<Payment>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FiscalStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn FiscalTx>, FiscalError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTx {
            guard,
            working: None,
        }))
    }

    async fn health_check(&self) -> Result<(), FiscalError> {
        Ok(())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    /// Copy-on-write state; `None` until the transaction first writes.
    working: Option<MemoryState>,
}

impl MemoryTx {
    fn state(&self) -> &MemoryState {
        self.working.as_ref().unwrap_or(&*self.guard)
    }

    fn state_mut(&mut self) -> &mut MemoryState {
        let committed = &self.guard;
        self.working.get_or_insert_with(|| (**committed).clone())
    }

    fn invoice_mut(&mut self, invoice_id: Uuid) -> Result<&mut Invoice, FiscalError> {
        self.state_mut()
            .invoices
            .get_mut(&invoice_id)
            .ok_or(FiscalError::InvoiceNotFound(invoice_id))
    }
}

#[async_trait]
impl FiscalTx for MemoryTx {
    async fn lock_sequence_pool(
        &mut self,
        _document_type: &str,
        _series: &str,
    ) -> Result<(), FiscalError> {
        // Covered by the store-wide lock.
        Ok(())
    }

    async fn insert_sequence(
        &mut self,
        input: &CreateSequence,
    ) -> Result<FiscalSequence, FiscalError> {
        let state = self.state_mut();
        state.last_sequence_id += 1;
        let sequence = FiscalSequence {
            sequence_id: state.last_sequence_id,
            document_type: input.document_type.clone(),
            series: input.series.clone(),
            range_start: input.range_start,
            range_end: input.range_end,
            current_cursor: input.range_start,
            expiration_date: input.expiration_date,
            active: true,
            created_utc: Utc::now(),
        };
        state
            .sequences
            .insert(sequence.sequence_id, sequence.clone());
        Ok(sequence)
    }

    async fn list_sequences(
        &mut self,
        document_type: Option<&str>,
    ) -> Result<Vec<FiscalSequence>, FiscalError> {
        let mut sequences: Vec<FiscalSequence> = self
            .state()
            .sequences
            .values()
            .filter(|s| document_type.map_or(true, |t| s.document_type == t))
            .cloned()
            .collect();
        sequences.sort_by_key(|s| (s.document_type.clone(), s.range_start, s.sequence_id));
        Ok(sequences)
    }

    async fn lock_active_sequences(
        &mut self,
        document_type: &str,
    ) -> Result<Vec<FiscalSequence>, FiscalError> {
        let mut sequences: Vec<FiscalSequence> = self
            .state()
            .sequences
            .values()
            .filter(|s| s.active && s.document_type == document_type)
            .cloned()
            .collect();
        sequences.sort_by_key(|s| (s.range_start, s.sequence_id));
        Ok(sequences)
    }

    async fn advance_cursor(&mut self, sequence_id: i64) -> Result<FiscalSequence, FiscalError> {
        let sequence = self
            .state_mut()
            .sequences
            .get_mut(&sequence_id)
            .ok_or(FiscalError::SequenceNotFound(sequence_id))?;
        if sequence.current_cursor > sequence.range_end {
            return Err(FiscalError::Exhausted {
                document_type: sequence.document_type.clone(),
                sequence_id,
            });
        }
        sequence.current_cursor += 1;
        Ok(sequence.clone())
    }

    async fn set_sequence_active(
        &mut self,
        sequence_id: i64,
        active: bool,
    ) -> Result<Option<FiscalSequence>, FiscalError> {
        Ok(self.state_mut().sequences.get_mut(&sequence_id).map(|s| {
            s.active = active;
            s.clone()
        }))
    }

    async fn insert_invoice(&mut self, input: &NewInvoice) -> Result<Invoice, FiscalError> {
        if let Some(order_id) = input.order_id {
            let taken = self.state().invoices.values().any(|i| {
                i.order_id == Some(order_id) && i.status() != InvoiceStatus::Voided
            });
            if taken {
                return Err(FiscalError::OrderAlreadyInvoiced { order_id });
            }
        }

        let state = self.state_mut();
        state.last_invoice_number += 1;
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: format!("FAC-{:08}", state.last_invoice_number),
            fiscal_number: None,
            sequence_id: None,
            document_type: input.document_type.clone(),
            order_id: input.order_id,
            patient_id: input.patient_id,
            issue_date: None,
            due_date: None,
            subtotal: input.subtotal,
            discount: input.discount,
            tax: input.tax,
            other_taxes: input.other_taxes,
            total: input.total,
            amount_paid: Decimal::ZERO,
            status: InvoiceStatus::Pending.as_str().to_string(),
            payment_method: input.payment_method.clone(),
            notes: input.notes.clone(),
            issued_by: input.issued_by,
            void_reason: None,
            created_utc: Utc::now(),
            issued_utc: None,
            voided_utc: None,
        };
        state
            .invoices
            .insert(invoice.invoice_id, invoice.clone());
        Ok(invoice)
    }

    async fn insert_line_items(
        &mut self,
        invoice_id: Uuid,
        lines: &[PricedLine],
    ) -> Result<Vec<InvoiceLineItem>, FiscalError> {
        let items: Vec<InvoiceLineItem> = lines
            .iter()
            .enumerate()
            .map(|(i, line)| InvoiceLineItem {
                line_item_id: Uuid::new_v4(),
                invoice_id,
                order_line_id: line.input.order_line_id,
                description: line.input.description.clone(),
                quantity: line.input.quantity,
                unit_price: line.input.unit_price,
                discount: line.input.discount,
                tax: line.input.tax,
                line_total: line.line_total,
                sort_order: i as i32,
            })
            .collect();
        self.state_mut()
            .line_items
            .entry(invoice_id)
            .or_default()
            .extend(items.iter().cloned());
        Ok(items)
    }

    async fn get_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, FiscalError> {
        Ok(self.state().invoices.get(&invoice_id).cloned())
    }

    async fn lock_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, FiscalError> {
        // The transaction already holds the store-wide lock.
        self.get_invoice(invoice_id).await
    }

    async fn find_open_invoice_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<Invoice>, FiscalError> {
        Ok(self
            .state()
            .invoices
            .values()
            .find(|i| i.order_id == Some(order_id) && i.status() != InvoiceStatus::Voided)
            .cloned())
    }

    async fn line_items(&mut self, invoice_id: Uuid) -> Result<Vec<InvoiceLineItem>, FiscalError> {
        Ok(self
            .state()
            .line_items
            .get(&invoice_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn stamp_invoice(
        &mut self,
        invoice_id: Uuid,
        stamp: &FiscalStamp,
    ) -> Result<Invoice, FiscalError> {
        let duplicate = self
            .state()
            .invoices
            .values()
            .any(|i| i.fiscal_number.as_deref() == Some(stamp.fiscal_number.as_str()));
        if duplicate {
            return Err(FiscalError::storage(
                "Failed to stamp invoice",
                format!("fiscal number {} already used", stamp.fiscal_number),
            ));
        }

        let invoice = self.invoice_mut(invoice_id)?;
        if invoice.fiscal_number.is_some() {
            return Err(FiscalError::AlreadyIssued { invoice_id });
        }
        invoice.fiscal_number = Some(stamp.fiscal_number.clone());
        invoice.sequence_id = Some(stamp.sequence_id);
        invoice.issue_date = Some(stamp.issue_date);
        invoice.due_date = Some(stamp.due_date);
        invoice.issued_utc = Some(stamp.issued_utc);
        invoice.status = InvoiceStatus::Issued.as_str().to_string();
        Ok(invoice.clone())
    }

    async fn update_settlement(
        &mut self,
        invoice_id: Uuid,
        status: InvoiceStatus,
        amount_paid: Decimal,
    ) -> Result<Invoice, FiscalError> {
        let invoice = self.invoice_mut(invoice_id)?;
        invoice.status = status.as_str().to_string();
        invoice.amount_paid = amount_paid;
        Ok(invoice.clone())
    }

    async fn mark_voided(
        &mut self,
        invoice_id: Uuid,
        reason: Option<&str>,
        voided_utc: DateTime<Utc>,
    ) -> Result<Invoice, FiscalError> {
        let invoice = self.invoice_mut(invoice_id)?;
        invoice.status = InvoiceStatus::Voided.as_str().to_string();
        invoice.void_reason = reason.map(str::to_string);
        invoice.voided_utc = Some(voided_utc);
        Ok(invoice.clone())
    }

    async fn paid_total(&mut self, invoice_id: Uuid) -> Result<Decimal, FiscalError> {
        Ok(self
            .state()
            .payments
            .get(&invoice_id)
            .map(|p| p.iter().map(|p| p.amount).sum())
            .unwrap_or(Decimal::ZERO))
    }

    async fn insert_payment(&mut self, input: &NewPayment) -> Result<Payment, FiscalError> {
        let payment = Payment {
            payment_id: Uuid::new_v4(),
            invoice_id: input.invoice_id,
            amount: input.amount,
            payment_method: input.payment_method.clone(),
            reference: input.reference.clone(),
            bank: input.bank.clone(),
            notes: input.notes.clone(),
            received_by: input.received_by,
            paid_utc: input.paid_utc,
        };
        self.state_mut()
            .payments
            .entry(input.invoice_id)
            .or_default()
            .push(payment.clone());
        Ok(payment)
    }

    async fn payments(&mut self, invoice_id: Uuid) -> Result<Vec<Payment>, FiscalError> {
        Ok(self
            .state()
            .payments
            .get(&invoice_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit(self: Box<Self>) -> Result<(), FiscalError> {
        let MemoryTx { mut guard, working } = *self;
        if let Some(working) = working {
            *guard = working;
        }
        Ok(())
    }
}
