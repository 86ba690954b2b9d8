//! Sequence pool and fiscal number allocation.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, instrument, warn};

use super::error::FiscalError;
use super::FiscalSettings;
use crate::models::{Allocation, CreateSequence, FiscalSequence};
use crate::services::metrics::{record_allocation, record_allocation_failure};
use crate::services::{FiscalStore, FiscalTx};

pub const MAX_DOCUMENT_TYPE_LEN: usize = 20;
pub const MAX_SERIES_LEN: usize = 3;
/// Widest numeric part such that type, series and number fit in 40 characters.
pub const MAX_NUMBER_WIDTH: usize = 40 - MAX_DOCUMENT_TYPE_LEN - MAX_SERIES_LEN;

/// Document types and series are short ASCII alphanumeric codes.
pub fn is_fiscal_code(value: &str, max_len: usize) -> bool {
    !value.is_empty() && value.len() <= max_len && value.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Reject document types no sequence could ever be registered under.
pub fn validate_document_type(document_type: &str) -> Result<(), FiscalError> {
    if is_fiscal_code(document_type, MAX_DOCUMENT_TYPE_LEN) {
        Ok(())
    } else {
        Err(FiscalError::InvalidDocumentType(format!(
            "'{}' must be 1-{} ASCII letters or digits",
            document_type, MAX_DOCUMENT_TYPE_LEN
        )))
    }
}

/// Format a fiscal number: document type, series, then the cursor zero-padded
/// to `width` digits.
pub fn format_fiscal_number(document_type: &str, series: &str, number: i64, width: usize) -> String {
    format!("{document_type}{series}{number:0>width$}")
}

/// Pick the sequence that serves the next number.
///
/// `candidates` are the active sequences of one document type ordered by
/// `range_start`, then `sequence_id`.
pub fn select_sequence<'a>(
    candidates: &'a [FiscalSequence],
    document_type: &str,
    issue_date: NaiveDate,
) -> Result<&'a FiscalSequence, FiscalError> {
    let active: Vec<&FiscalSequence> = candidates.iter().filter(|s| s.active).collect();

    if active.is_empty() {
        return Err(FiscalError::NoActiveSequence {
            document_type: document_type.to_string(),
        });
    }

    if let Some(sequence) = active.iter().find(|s| s.can_issue_on(issue_date)) {
        return Ok(sequence);
    }

    // Nothing usable: report expiry if capacity is left anywhere.
    if let Some(sequence) = active.iter().find(|s| !s.is_exhausted()) {
        return Err(FiscalError::Expired {
            document_type: document_type.to_string(),
            sequence_id: sequence.sequence_id,
            expired_on: sequence.expiration_date,
        });
    }

    let last = active[active.len() - 1];
    Err(FiscalError::Exhausted {
        document_type: document_type.to_string(),
        sequence_id: last.sequence_id,
    })
}

/// Claims fiscal numbers from the durable sequence pool.
///
/// The cursor is never cached: every allocation locks and re-reads the
/// sequence rows inside the caller's transaction.
#[derive(Clone)]
pub struct SequenceAllocator {
    store: Arc<dyn FiscalStore>,
    settings: FiscalSettings,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn FiscalStore>, settings: FiscalSettings) -> Self {
        Self { store, settings }
    }

    /// Claim exactly one fiscal number in its own transaction.
    #[instrument(skip(self))]
    pub async fn allocate(
        &self,
        document_type: &str,
        issue_date: NaiveDate,
    ) -> Result<Allocation, FiscalError> {
        let mut tx = self.store.begin().await?;
        let allocation = self
            .allocate_in(tx.as_mut(), document_type, issue_date)
            .await?;
        tx.commit().await?;

        record_allocation(document_type, allocation.sequence_id, allocation.remaining);
        info!(
            fiscal_number = %allocation.fiscal_number,
            sequence_id = allocation.sequence_id,
            "Fiscal number allocated"
        );

        Ok(allocation)
    }

    /// Claim one number inside an open transaction.
    ///
    /// The increment becomes permanent only when `tx` commits.
    pub(crate) async fn allocate_in(
        &self,
        tx: &mut dyn FiscalTx,
        document_type: &str,
        issue_date: NaiveDate,
    ) -> Result<Allocation, FiscalError> {
        validate_document_type(document_type)?;
        let candidates = tx.lock_active_sequences(document_type).await?;

        let chosen = match select_sequence(&candidates, document_type, issue_date) {
            Ok(sequence) => sequence,
            Err(e) => {
                record_allocation_failure(e.code());
                warn!(
                    document_type = %document_type,
                    issue_date = %issue_date,
                    reason = e.code(),
                    "Fiscal number allocation failed"
                );
                return Err(e);
            }
        };

        let number = chosen.current_cursor;
        let advanced = tx.advance_cursor(chosen.sequence_id).await?;

        let allocation = Allocation {
            fiscal_number: format_fiscal_number(
                &advanced.document_type,
                &advanced.series,
                number,
                self.settings.number_width,
            ),
            sequence_id: advanced.sequence_id,
            number,
            remaining: advanced.remaining(),
        };

        if allocation.remaining < self.settings.low_sequence_threshold {
            warn!(
                document_type = %document_type,
                sequence_id = allocation.sequence_id,
                remaining = allocation.remaining,
                "Fiscal sequence running low"
            );
        }

        Ok(allocation)
    }

    /// Provision a new authorized range.
    #[instrument(skip(self, input), fields(document_type = %input.document_type, series = %input.series))]
    pub async fn create_sequence(
        &self,
        input: &CreateSequence,
    ) -> Result<FiscalSequence, FiscalError> {
        self.validate_sequence(input)?;

        let mut tx = self.store.begin().await?;
        tx.lock_sequence_pool(&input.document_type, &input.series)
            .await?;

        // Read after the lock so a concurrent registration is visible.
        let existing = tx.list_sequences(Some(&input.document_type)).await?;
        if let Some(clash) = existing
            .iter()
            .find(|s| s.series == input.series && s.overlaps(input.range_start, input.range_end))
        {
            return Err(FiscalError::InvalidSequence(format!(
                "range {}-{} overlaps sequence {} ({}-{})",
                input.range_start,
                input.range_end,
                clash.sequence_id,
                clash.range_start,
                clash.range_end
            )));
        }

        let sequence = tx.insert_sequence(input).await?;
        tx.commit().await?;

        info!(
            sequence_id = sequence.sequence_id,
            range_start = sequence.range_start,
            range_end = sequence.range_end,
            expiration_date = %sequence.expiration_date,
            "Fiscal sequence created"
        );

        Ok(sequence)
    }

    /// Stop issuing from a sequence. Sequences are never deleted.
    #[instrument(skip(self))]
    pub async fn deactivate_sequence(&self, sequence_id: i64) -> Result<FiscalSequence, FiscalError> {
        let mut tx = self.store.begin().await?;
        let sequence = tx
            .set_sequence_active(sequence_id, false)
            .await?
            .ok_or(FiscalError::SequenceNotFound(sequence_id))?;
        tx.commit().await?;

        info!(sequence_id = sequence_id, "Fiscal sequence deactivated");

        Ok(sequence)
    }

    pub async fn list_sequences(
        &self,
        document_type: Option<&str>,
    ) -> Result<Vec<FiscalSequence>, FiscalError> {
        let mut tx = self.store.begin().await?;
        tx.list_sequences(document_type).await
    }

    fn validate_sequence(&self, input: &CreateSequence) -> Result<(), FiscalError> {
        if !is_fiscal_code(&input.document_type, MAX_DOCUMENT_TYPE_LEN) {
            return Err(FiscalError::InvalidSequence(format!(
                "document type must be 1-{} ASCII letters or digits",
                MAX_DOCUMENT_TYPE_LEN
            )));
        }
        if !is_fiscal_code(&input.series, MAX_SERIES_LEN) {
            return Err(FiscalError::InvalidSequence(format!(
                "series must be 1-{} ASCII letters or digits",
                MAX_SERIES_LEN
            )));
        }
        if input.range_start < 1 || input.range_start > input.range_end {
            return Err(FiscalError::InvalidSequence(format!(
                "range {}-{} is not a valid ascending range starting at 1 or above",
                input.range_start, input.range_end
            )));
        }
        if input.range_end.to_string().len() > self.settings.number_width {
            return Err(FiscalError::InvalidSequence(format!(
                "range end {} does not fit in {} digits",
                input.range_end, self.settings.number_width
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sequence(id: i64, start: i64, end: i64, cursor: i64, expires: NaiveDate) -> FiscalSequence {
        FiscalSequence {
            sequence_id: id,
            document_type: "B02".to_string(),
            series: "A".to_string(),
            range_start: start,
            range_end: end,
            current_cursor: cursor,
            expiration_date: expires,
            active: true,
            created_utc: Utc::now(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn formats_with_prefix_and_padding() {
        assert_eq!(format_fiscal_number("B02", "A", 1, 10), "B02A0000000001");
        assert_eq!(format_fiscal_number("", "", 42, 10), "0000000042");
        assert_eq!(format_fiscal_number("B01", "E", 12345678, 8), "B01E12345678");
    }

    #[test]
    fn fiscal_codes_are_short_and_alphanumeric() {
        assert!(validate_document_type("B02").is_ok());
        assert!(validate_document_type("E31").is_ok());
        assert!(matches!(
            validate_document_type(""),
            Err(FiscalError::InvalidDocumentType(_))
        ));
        assert!(validate_document_type(" B02").is_err());
        assert!(validate_document_type("B-02").is_err());
        assert!(validate_document_type(&"B".repeat(21)).is_err());
        assert!(is_fiscal_code("A", MAX_SERIES_LEN));
        assert!(!is_fiscal_code("TOOLONG", MAX_SERIES_LEN));
    }

    #[test]
    fn picks_lowest_usable_range() {
        let far = date(2099, 1, 1);
        let candidates = vec![
            sequence(3, 1, 10, 11, far),
            sequence(1, 11, 20, 11, far),
            sequence(2, 21, 30, 21, far),
        ];

        let chosen = select_sequence(&candidates, "B02", date(2026, 1, 1)).unwrap();
        assert_eq!(chosen.sequence_id, 1);
    }

    #[test]
    fn no_candidates_means_no_active_sequence() {
        let err = select_sequence(&[], "B01", date(2026, 1, 1)).unwrap_err();
        assert!(matches!(err, FiscalError::NoActiveSequence { .. }));
    }

    #[test]
    fn only_exhausted_ranges_report_exhausted() {
        let candidates = vec![sequence(1, 1, 3, 4, date(2099, 1, 1))];
        let err = select_sequence(&candidates, "B02", date(2026, 1, 1)).unwrap_err();
        assert!(matches!(err, FiscalError::Exhausted { sequence_id: 1, .. }));
    }

    #[test]
    fn expired_range_with_capacity_reports_expired() {
        let candidates = vec![
            sequence(1, 1, 3, 4, date(2099, 1, 1)),
            sequence(2, 4, 100, 4, date(2025, 12, 31)),
        ];
        let err = select_sequence(&candidates, "B02", date(2026, 1, 1)).unwrap_err();
        assert!(matches!(err, FiscalError::Expired { sequence_id: 2, .. }));
    }

    #[test]
    fn expired_range_is_skipped_when_another_is_valid() {
        let candidates = vec![
            sequence(1, 1, 100, 1, date(2025, 12, 31)),
            sequence(2, 101, 200, 101, date(2099, 1, 1)),
        ];
        let chosen = select_sequence(&candidates, "B02", date(2026, 1, 1)).unwrap();
        assert_eq!(chosen.sequence_id, 2);
    }
}
