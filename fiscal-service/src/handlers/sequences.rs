//! Fiscal sequence administration.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use validator::Validate;

use super::ApiError;
use crate::models::{CreateSequence, FiscalSequence};
use crate::startup::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSequenceRequest {
    #[validate(length(min = 1, max = 20, message = "Document type must be 1-20 characters"))]
    pub document_type: String,

    #[validate(length(min = 1, max = 3, message = "Series must be 1-3 characters"))]
    pub series: String,

    #[validate(range(min = 1, message = "Range start must be at least 1"))]
    pub range_start: i64,

    #[validate(range(min = 1, message = "Range end must be at least 1"))]
    pub range_end: i64,

    pub expiration_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ListSequencesQuery {
    pub document_type: Option<String>,
}

/// Register an authorized range.
///
/// POST /sequences
pub async fn create_sequence(
    State(state): State<AppState>,
    Json(req): Json<CreateSequenceRequest>,
) -> Result<(StatusCode, Json<FiscalSequence>), ApiError> {
    req.validate()?;

    let sequence = state
        .core
        .allocator
        .create_sequence(&CreateSequence {
            document_type: req.document_type,
            series: req.series,
            range_start: req.range_start,
            range_end: req.range_end,
            expiration_date: req.expiration_date,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(sequence)))
}

/// GET /sequences
pub async fn list_sequences(
    State(state): State<AppState>,
    Query(query): Query<ListSequencesQuery>,
) -> Result<Json<Vec<FiscalSequence>>, ApiError> {
    let sequences = state
        .core
        .allocator
        .list_sequences(query.document_type.as_deref())
        .await?;

    Ok(Json(sequences))
}

/// POST /sequences/:id/deactivate
pub async fn deactivate_sequence(
    State(state): State<AppState>,
    Path(sequence_id): Path<i64>,
) -> Result<Json<FiscalSequence>, ApiError> {
    let sequence = state.core.allocator.deactivate_sequence(sequence_id).await?;
    Ok(Json(sequence))
}
