//! Invoice model for fiscal-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::line_item::LineItemInput;

/// Invoice settlement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Issued,
    PartiallyPaid,
    Paid,
    Voided,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Voided => "voided",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "issued" => InvoiceStatus::Issued,
            "partially_paid" => InvoiceStatus::PartiallyPaid,
            "paid" => InvoiceStatus::Paid,
            "voided" => InvoiceStatus::Voided,
            _ => InvoiceStatus::Pending,
        }
    }
}

/// Billable document tied to one patient and at most one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub fiscal_number: Option<String>,
    pub sequence_id: Option<i64>,
    pub document_type: String,
    pub order_id: Option<Uuid>,
    pub patient_id: Uuid,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub other_taxes: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub status: String,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    pub issued_by: Option<Uuid>,
    pub void_reason: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub issued_utc: Option<DateTime<Utc>>,
    pub voided_utc: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn outstanding(&self) -> Decimal {
        self.total - self.amount_paid
    }
}

/// Row values for inserting a pending invoice.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub patient_id: Uuid,
    pub order_id: Option<Uuid>,
    pub document_type: String,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub other_taxes: Decimal,
    pub total: Decimal,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    pub issued_by: Option<Uuid>,
}

/// Fiscal stamp written onto an invoice when it is issued.
#[derive(Debug, Clone)]
pub struct FiscalStamp {
    pub fiscal_number: String,
    pub sequence_id: i64,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub issued_utc: DateTime<Utc>,
}

/// Invoice-level discount rule, applied after line totals are summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiscountPolicy {
    #[default]
    None,
    /// Fixed currency amount off the subtotal.
    Fixed(Decimal),
    /// Percentage (0-100) of the subtotal.
    Percentage(Decimal),
}

/// Input for building an invoice from ad-hoc items.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InvoiceRequest {
    pub patient_id: Uuid,
    #[serde(default)]
    pub order_id: Option<Uuid>,
    #[validate(nested)]
    pub lines: Vec<LineItemInput>,
    #[serde(default)]
    pub discount: DiscountPolicy,
    /// Defaults to the configured ITBIS rate.
    #[serde(default)]
    pub tax_rate: Option<Decimal>,
    /// Defaults to the configured document type.
    #[serde(default)]
    #[validate(length(max = 20, message = "Document type must be at most 20 characters"))]
    pub document_type: Option<String>,
    #[serde(default)]
    pub other_taxes: Decimal,
    #[serde(default)]
    #[validate(length(max = 20, message = "Payment method must be at most 20 characters"))]
    pub payment_method: Option<String>,
    #[serde(default)]
    #[validate(length(max = 1000, message = "Notes must be at most 1000 characters"))]
    pub notes: Option<String>,
    #[serde(default)]
    pub issued_by: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_strings() {
        for status in [
            InvoiceStatus::Pending,
            InvoiceStatus::Issued,
            InvoiceStatus::PartiallyPaid,
            InvoiceStatus::Paid,
            InvoiceStatus::Voided,
        ] {
            assert_eq!(InvoiceStatus::from_string(status.as_str()), status);
        }
    }

    #[test]
    fn discount_policy_deserializes_tagged() {
        let policy: DiscountPolicy =
            serde_json::from_str(r#"{"type":"percentage","value":"10"}"#).unwrap();
        assert_eq!(policy, DiscountPolicy::Percentage(Decimal::TEN));

        let policy: DiscountPolicy = serde_json::from_str(r#"{"type":"none"}"#).unwrap();
        assert_eq!(policy, DiscountPolicy::None);
    }
}
