//! Payment model for fiscal-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Accepted payment methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Check,
    Insurance,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::Check => "check",
            PaymentMethod::Insurance => "insurance",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(PaymentMethod::Cash),
            "card" => Some(PaymentMethod::Card),
            "transfer" => Some(PaymentMethod::Transfer),
            "check" => Some(PaymentMethod::Check),
            "insurance" => Some(PaymentMethod::Insurance),
            _ => None,
        }
    }
}

/// One settlement event against an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub payment_method: String,
    pub reference: Option<String>,
    pub bank: Option<String>,
    pub notes: Option<String>,
    pub received_by: Option<Uuid>,
    pub paid_utc: DateTime<Utc>,
}

/// Input for applying a payment.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub bank: Option<String>,
    pub notes: Option<String>,
    pub received_by: Option<Uuid>,
}

/// Row values for inserting a payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub payment_method: String,
    pub reference: Option<String>,
    pub bank: Option<String>,
    pub notes: Option<String>,
    pub received_by: Option<Uuid>,
    pub paid_utc: DateTime<Utc>,
}
