//! Invoice issuing, stamping and voiding.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::ApiError;
use crate::billing::{InvoiceDetail, InvoiceDocument};
use crate::models::{Invoice, InvoiceRequest, Order};
use crate::startup::AppState;

#[derive(Debug, Default, Deserialize, Validate)]
pub struct VoidInvoiceRequest {
    #[validate(length(max = 500, message = "Reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

/// Build and stamp an invoice from ad-hoc items.
///
/// POST /invoices
pub async fn build_invoice(
    State(state): State<AppState>,
    Json(req): Json<InvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceDocument>), ApiError> {
    req.validate()?;

    let document = state.core.builder.build_invoice(&req).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// POST /invoices/draft
pub async fn draft_invoice(
    State(state): State<AppState>,
    Json(req): Json<InvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceDocument>), ApiError> {
    req.validate()?;

    let document = state.core.builder.draft_invoice(&req).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// POST /invoices/from-order
pub async fn build_invoice_from_order(
    State(state): State<AppState>,
    Json(order): Json<Order>,
) -> Result<(StatusCode, Json<InvoiceDocument>), ApiError> {
    order.validate()?;

    let document = state.core.builder.build_invoice_from_order(&order).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// GET /invoices/:id
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetail>, ApiError> {
    let detail = state.core.ledger.invoice_detail(invoice_id).await?;
    Ok(Json(detail))
}

/// Allocate the fiscal number of a draft.
///
/// POST /invoices/:id/stamp
pub async fn stamp_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDocument>, ApiError> {
    let document = state.core.builder.stamp_invoice(invoice_id).await?;
    Ok(Json(document))
}

/// POST /invoices/:id/void
pub async fn void_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(req): Json<VoidInvoiceRequest>,
) -> Result<Json<Invoice>, ApiError> {
    req.validate()?;

    let invoice = state
        .core
        .ledger
        .void_invoice(invoice_id, req.reason.as_deref())
        .await?;

    Ok(Json(invoice))
}
