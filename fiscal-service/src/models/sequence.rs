//! Fiscal sequence (NCF range) model for fiscal-service.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One authorized numbering range for a fiscal document type.
///
/// `current_cursor` is the next number to issue. A cursor of `range_end + 1`
/// marks the range as exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct FiscalSequence {
    pub sequence_id: i64,
    pub document_type: String,
    pub series: String,
    pub range_start: i64,
    pub range_end: i64,
    pub current_cursor: i64,
    pub expiration_date: NaiveDate,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}

impl FiscalSequence {
    pub fn is_exhausted(&self) -> bool {
        self.current_cursor > self.range_end
    }

    /// A sequence expiring on the issue date is still valid that day.
    pub fn is_expired_on(&self, issue_date: NaiveDate) -> bool {
        self.expiration_date < issue_date
    }

    /// Numbers still available in this range.
    pub fn remaining(&self) -> i64 {
        (self.range_end + 1 - self.current_cursor).max(0)
    }

    pub fn can_issue_on(&self, issue_date: NaiveDate) -> bool {
        self.active && !self.is_exhausted() && !self.is_expired_on(issue_date)
    }

    pub fn overlaps(&self, range_start: i64, range_end: i64) -> bool {
        self.range_start <= range_end && range_start <= self.range_end
    }
}

/// Input for provisioning a new sequence range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSequence {
    pub document_type: String,
    pub series: String,
    pub range_start: i64,
    pub range_end: i64,
    pub expiration_date: NaiveDate,
}

/// Result of claiming one fiscal number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub fiscal_number: String,
    pub sequence_id: i64,
    /// The raw cursor value consumed.
    pub number: i64,
    /// Numbers left in the range after this allocation.
    pub remaining: i64,
}
