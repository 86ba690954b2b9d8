//! Payment recording.

use anyhow::anyhow;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use super::ApiError;
use crate::models::{Payment, PaymentMethod, PaymentRequest};
use crate::startup::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyPaymentRequest {
    pub amount: Decimal,

    #[validate(length(min = 1, message = "Payment method is required"))]
    pub method: String,

    #[validate(length(max = 100))]
    pub reference: Option<String>,

    #[validate(length(max = 100))]
    pub bank: Option<String>,

    pub notes: Option<String>,

    pub received_by: Option<Uuid>,
}

/// Payment plus the invoice state it produced.
#[derive(Debug, Serialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub invoice_status: String,
    pub amount_paid: Decimal,
    pub outstanding: Decimal,
}

/// POST /invoices/:id/payments
pub async fn apply_payment(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(req): Json<ApplyPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentReceipt>), ApiError> {
    req.validate()?;

    let method = PaymentMethod::from_string(&req.method).ok_or_else(|| {
        AppError::BadRequest(anyhow!("Unknown payment method: {}", req.method))
    })?;

    let payment = state
        .core
        .ledger
        .apply_payment(&PaymentRequest {
            invoice_id,
            amount: req.amount,
            method,
            reference: req.reference,
            bank: req.bank,
            notes: req.notes,
            received_by: req.received_by,
        })
        .await?;

    let detail = state.core.ledger.invoice_detail(invoice_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(PaymentReceipt {
            payment,
            invoice_status: detail.invoice.status,
            amount_paid: detail.invoice.amount_paid,
            outstanding: detail.outstanding,
        }),
    ))
}
