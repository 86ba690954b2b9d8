//! HTTP handlers for fiscal-service.

pub mod invoices;
pub mod payments;
pub mod sequences;

pub use invoices::*;
pub use payments::*;
pub use sequences::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;
use thiserror::Error;

use crate::billing::{ErrorKind, FiscalError};
use crate::services::metrics::record_error;

/// Error returned by every fiscal handler.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Fiscal(#[from] FiscalError),

    #[error(transparent)]
    App(#[from] AppError),
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::App(AppError::from(err))
    }
}

#[derive(Serialize)]
struct FiscalErrorResponse {
    error: String,
    code: &'static str,
    kind: &'static str,
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ResourceExhaustion => "resource_exhaustion",
        ErrorKind::Validation => "validation",
        ErrorKind::Consistency => "consistency",
        ErrorKind::NotFound => "not_found",
        ErrorKind::Storage => "storage",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::App(err) => return err.into_response(),
            ApiError::Fiscal(err) => err,
        };

        let kind = err.kind();
        let status = match kind {
            ErrorKind::ResourceExhaustion | ErrorKind::Consistency => StatusCode::CONFLICT,
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        };

        record_error(err.code(), kind_label(kind));

        let message = match kind {
            ErrorKind::Storage => {
                tracing::error!(error = %err, "Storage failure");
                "Storage error".to_string()
            }
            ErrorKind::ResourceExhaustion => {
                tracing::error!(error = %err, code = err.code(), "Fiscal numbering unavailable");
                err.to_string()
            }
            _ => {
                tracing::debug!(error = %err, code = err.code(), "Request rejected");
                err.to_string()
            }
        };

        (
            status,
            Json(FiscalErrorResponse {
                error: message,
                code: err.code(),
                kind: kind_label(kind),
            }),
        )
            .into_response()
    }
}
