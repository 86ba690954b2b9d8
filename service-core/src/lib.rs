//! service-core: shared HTTP service plumbing for fiscal-service.
//!
//! Configuration loading, the common error type, tracing setup and the
//! request middleware every service router carries.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;

pub use axum;
pub use tracing;
pub use validator;
