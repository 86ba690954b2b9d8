//! Fiscal Service library.
//!
//! Fiscal receipt numbering (NCF), invoice building and the payment ledger
//! for the diagnostic center.

pub mod billing;
pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
