//! PostgreSQL [`FiscalStore`] for fiscal-service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::metrics::DB_QUERY_DURATION;
use super::store::{FiscalStore, FiscalTx};
use crate::billing::FiscalError;
use crate::models::{
    CreateSequence, FiscalSequence, FiscalStamp, Invoice, InvoiceLineItem, InvoiceStatus,
    NewInvoice, NewPayment, Payment, PricedLine,
};

macro_rules! sequence_columns {
    () => {
        "sequence_id, document_type, series, range_start, range_end, current_cursor, \
         expiration_date, active, created_utc"
    };
}

macro_rules! invoice_columns {
    () => {
        "invoice_id, invoice_number, fiscal_number, sequence_id, document_type, order_id, \
         patient_id, issue_date, due_date, subtotal, discount, tax, other_taxes, total, \
         amount_paid, status, payment_method, notes, issued_by, void_reason, created_utc, \
         issued_utc, voided_utc"
    };
}

macro_rules! line_item_columns {
    () => {
        "line_item_id, invoice_id, order_line_id, description, quantity, unit_price, discount, \
         tax, line_total, sort_order"
    };
}

macro_rules! payment_columns {
    () => {
        "payment_id, invoice_id, amount, payment_method, reference, bank, notes, received_by, \
         paid_utc"
    };
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "fiscal-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl FiscalStore for Database {
    async fn begin(&self) -> Result<Box<dyn FiscalTx>, FiscalError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| FiscalError::storage("Failed to begin transaction", e))?;
        Ok(Box::new(PgFiscalTx { tx }))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), FiscalError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| FiscalError::storage("Health check failed", e))?;
        Ok(())
    }
}

/// Open PostgreSQL transaction. Rolled back on drop unless committed.
pub struct PgFiscalTx {
    tx: Transaction<'static, Postgres>,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl FiscalTx for PgFiscalTx {
    async fn lock_sequence_pool(
        &mut self,
        document_type: &str,
        series: &str,
    ) -> Result<(), FiscalError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_sequence_pool"])
            .start_timer();

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('fiscal_sequences:' || $1 || ':' || $2))")
            .bind(document_type)
            .bind(series)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| FiscalError::storage("Failed to lock sequence pool", e))?;

        timer.observe_duration();
        Ok(())
    }

    async fn insert_sequence(
        &mut self,
        input: &CreateSequence,
    ) -> Result<FiscalSequence, FiscalError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_sequence"])
            .start_timer();

        let sequence = sqlx::query_as::<_, FiscalSequence>(concat!(
            "INSERT INTO fiscal_sequences ",
            "(document_type, series, range_start, range_end, current_cursor, expiration_date, active) ",
            "VALUES ($1, $2, $3, $4, $3, $5, TRUE) ",
            "RETURNING ",
            sequence_columns!()
        ))
        .bind(&input.document_type)
        .bind(&input.series)
        .bind(input.range_start)
        .bind(input.range_end)
        .bind(input.expiration_date)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to create sequence", e))?;

        timer.observe_duration();
        Ok(sequence)
    }

    async fn list_sequences(
        &mut self,
        document_type: Option<&str>,
    ) -> Result<Vec<FiscalSequence>, FiscalError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_sequences"])
            .start_timer();

        let sequences = sqlx::query_as::<_, FiscalSequence>(concat!(
            "SELECT ",
            sequence_columns!(),
            " FROM fiscal_sequences ",
            "WHERE ($1::varchar IS NULL OR document_type = $1) ",
            "ORDER BY document_type, range_start, sequence_id"
        ))
        .bind(document_type)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to list sequences", e))?;

        timer.observe_duration();
        Ok(sequences)
    }

    async fn lock_active_sequences(
        &mut self,
        document_type: &str,
    ) -> Result<Vec<FiscalSequence>, FiscalError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_active_sequences"])
            .start_timer();

        let sequences = sqlx::query_as::<_, FiscalSequence>(concat!(
            "SELECT ",
            sequence_columns!(),
            " FROM fiscal_sequences ",
            "WHERE document_type = $1 AND active = TRUE ",
            "ORDER BY range_start, sequence_id ",
            "FOR UPDATE"
        ))
        .bind(document_type)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to lock sequences", e))?;

        timer.observe_duration();
        Ok(sequences)
    }

    async fn advance_cursor(&mut self, sequence_id: i64) -> Result<FiscalSequence, FiscalError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["advance_cursor"])
            .start_timer();

        let updated = sqlx::query_as::<_, FiscalSequence>(concat!(
            "UPDATE fiscal_sequences ",
            "SET current_cursor = current_cursor + 1 ",
            "WHERE sequence_id = $1 AND current_cursor <= range_end ",
            "RETURNING ",
            sequence_columns!()
        ))
        .bind(sequence_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to advance cursor", e))?;

        timer.observe_duration();

        match updated {
            Some(sequence) => Ok(sequence),
            None => {
                let document_type = sqlx::query_scalar::<_, String>(
                    "SELECT document_type FROM fiscal_sequences WHERE sequence_id = $1",
                )
                .bind(sequence_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| FiscalError::storage("Failed to read sequence", e))?
                .ok_or(FiscalError::SequenceNotFound(sequence_id))?;
                Err(FiscalError::Exhausted {
                    document_type,
                    sequence_id,
                })
            }
        }
    }

    async fn set_sequence_active(
        &mut self,
        sequence_id: i64,
        active: bool,
    ) -> Result<Option<FiscalSequence>, FiscalError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_sequence_active"])
            .start_timer();

        let sequence = sqlx::query_as::<_, FiscalSequence>(concat!(
            "UPDATE fiscal_sequences SET active = $2 WHERE sequence_id = $1 RETURNING ",
            sequence_columns!()
        ))
        .bind(sequence_id)
        .bind(active)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to update sequence", e))?;

        timer.observe_duration();
        Ok(sequence)
    }

    async fn insert_invoice(&mut self, input: &NewInvoice) -> Result<Invoice, FiscalError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(concat!(
            "INSERT INTO invoices (",
            "invoice_id, document_type, order_id, patient_id, subtotal, discount, tax, ",
            "other_taxes, total, status, payment_method, notes, issued_by) ",
            "VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10, $11, $12) ",
            "RETURNING ",
            invoice_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(&input.document_type)
        .bind(input.order_id)
        .bind(input.patient_id)
        .bind(input.subtotal)
        .bind(input.discount)
        .bind(input.tax)
        .bind(input.other_taxes)
        .bind(input.total)
        .bind(&input.payment_method)
        .bind(&input.notes)
        .bind(input.issued_by)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match (is_unique_violation(&e), input.order_id) {
            (true, Some(order_id)) => FiscalError::OrderAlreadyInvoiced { order_id },
            _ => FiscalError::storage("Failed to create invoice", e),
        })?;

        timer.observe_duration();
        Ok(invoice)
    }

    async fn insert_line_items(
        &mut self,
        invoice_id: Uuid,
        lines: &[PricedLine],
    ) -> Result<Vec<InvoiceLineItem>, FiscalError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_line_items"])
            .start_timer();

        let mut items = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            let item = sqlx::query_as::<_, InvoiceLineItem>(concat!(
                "INSERT INTO invoice_line_items (",
                line_item_columns!(),
                ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) ",
                "RETURNING ",
                line_item_columns!()
            ))
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(line.input.order_line_id)
            .bind(&line.input.description)
            .bind(line.input.quantity)
            .bind(line.input.unit_price)
            .bind(line.input.discount)
            .bind(line.input.tax)
            .bind(line.line_total)
            .bind(i as i32)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| FiscalError::storage("Failed to insert line item", e))?;
            items.push(item);
        }

        timer.observe_duration();
        Ok(items)
    }

    async fn get_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, FiscalError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to get invoice", e))?;

        timer.observe_duration();
        Ok(invoice)
    }

    async fn lock_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, FiscalError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices WHERE invoice_id = $1 FOR UPDATE"
        ))
        .bind(invoice_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to lock invoice", e))?;

        timer.observe_duration();
        Ok(invoice)
    }

    async fn find_open_invoice_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<Invoice>, FiscalError> {
        sqlx::query_as::<_, Invoice>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices WHERE order_id = $1 AND status <> 'voided'"
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to find order invoice", e))
    }

    async fn line_items(&mut self, invoice_id: Uuid) -> Result<Vec<InvoiceLineItem>, FiscalError> {
        sqlx::query_as::<_, InvoiceLineItem>(concat!(
            "SELECT ",
            line_item_columns!(),
            " FROM invoice_line_items WHERE invoice_id = $1 ORDER BY sort_order"
        ))
        .bind(invoice_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to get line items", e))
    }

    async fn stamp_invoice(
        &mut self,
        invoice_id: Uuid,
        stamp: &FiscalStamp,
    ) -> Result<Invoice, FiscalError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["stamp_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(concat!(
            "UPDATE invoices ",
            "SET fiscal_number = $2, sequence_id = $3, issue_date = $4, due_date = $5, ",
            "issued_utc = $6, status = 'issued' ",
            "WHERE invoice_id = $1 AND fiscal_number IS NULL ",
            "RETURNING ",
            invoice_columns!()
        ))
        .bind(invoice_id)
        .bind(&stamp.fiscal_number)
        .bind(stamp.sequence_id)
        .bind(stamp.issue_date)
        .bind(stamp.due_date)
        .bind(stamp.issued_utc)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to stamp invoice", e))?;

        timer.observe_duration();

        invoice.ok_or(FiscalError::AlreadyIssued { invoice_id })
    }

    async fn update_settlement(
        &mut self,
        invoice_id: Uuid,
        status: InvoiceStatus,
        amount_paid: Decimal,
    ) -> Result<Invoice, FiscalError> {
        sqlx::query_as::<_, Invoice>(concat!(
            "UPDATE invoices SET status = $2, amount_paid = $3 WHERE invoice_id = $1 RETURNING ",
            invoice_columns!()
        ))
        .bind(invoice_id)
        .bind(status.as_str())
        .bind(amount_paid)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to update settlement", e))?
        .ok_or(FiscalError::InvoiceNotFound(invoice_id))
    }

    async fn mark_voided(
        &mut self,
        invoice_id: Uuid,
        reason: Option<&str>,
        voided_utc: DateTime<Utc>,
    ) -> Result<Invoice, FiscalError> {
        sqlx::query_as::<_, Invoice>(concat!(
            "UPDATE invoices SET status = 'voided', void_reason = $2, voided_utc = $3 ",
            "WHERE invoice_id = $1 RETURNING ",
            invoice_columns!()
        ))
        .bind(invoice_id)
        .bind(reason)
        .bind(voided_utc)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to void invoice", e))?
        .ok_or(FiscalError::InvoiceNotFound(invoice_id))
    }

    async fn paid_total(&mut self, invoice_id: Uuid) -> Result<Decimal, FiscalError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["paid_total"])
            .start_timer();

        let total = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to sum payments", e))?;

        timer.observe_duration();
        Ok(total)
    }

    async fn insert_payment(&mut self, input: &NewPayment) -> Result<Payment, FiscalError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(concat!(
            "INSERT INTO payments (",
            payment_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING ",
            payment_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(input.invoice_id)
        .bind(input.amount)
        .bind(&input.payment_method)
        .bind(&input.reference)
        .bind(&input.bank)
        .bind(&input.notes)
        .bind(input.received_by)
        .bind(input.paid_utc)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to record payment", e))?;

        timer.observe_duration();
        Ok(payment)
    }

    async fn payments(&mut self, invoice_id: Uuid) -> Result<Vec<Payment>, FiscalError> {
        sqlx::query_as::<_, Payment>(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE invoice_id = $1 ORDER BY paid_utc, payment_id"
        ))
        .bind(invoice_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| FiscalError::storage("Failed to list payments", e))
    }

    async fn commit(self: Box<Self>) -> Result<(), FiscalError> {
        self.tx
            .commit()
            .await
            .map_err(|e| FiscalError::storage("Failed to commit transaction", e))
    }
}
