//! Order abstraction consumed from the lab-order collaborator.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A lab order with its billable entries, prices already resolved.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Order {
    pub order_id: Uuid,
    #[validate(length(min = 1, max = 50, message = "Order number must be 1-50 characters"))]
    pub order_number: String,
    pub patient_id: Uuid,
    /// Overrides the configured document type (e.g. `B01` for companies).
    #[serde(default)]
    #[validate(length(max = 20, message = "Document type must be at most 20 characters"))]
    pub document_type: Option<String>,
    #[serde(default)]
    pub registered_by: Option<Uuid>,
    #[validate(nested)]
    pub lines: Vec<OrderLine>,
}

/// One billable study on an order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderLine {
    pub order_line_id: Uuid,
    #[validate(length(min = 1, max = 500, message = "Description must be 1-500 characters"))]
    pub description: String,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount: Decimal,
}

fn default_quantity() -> i32 {
    1
}
