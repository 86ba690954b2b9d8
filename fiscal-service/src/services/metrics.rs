//! Prometheus metrics for fiscal-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    CounterVec, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

/// Fiscal numbers issued, by document type.
pub static FISCAL_NUMBERS_ALLOCATED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fiscal_numbers_allocated_total",
        "Total fiscal numbers allocated by document type",
        &["document_type"]
    )
    .expect("Failed to register fiscal_numbers_allocated_total")
});

/// Allocation failures, by reason.
pub static ALLOCATION_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fiscal_allocation_failures_total",
        "Total fiscal number allocation failures by reason",
        &["reason"] // no_active_sequence, exhausted, expired
    )
    .expect("Failed to register fiscal_allocation_failures_total")
});

/// Numbers left in the sequence that served the last allocation.
pub static SEQUENCE_REMAINING: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "fiscal_sequence_remaining",
        "Fiscal numbers remaining in the active sequence",
        &["document_type", "sequence_id"]
    )
    .expect("Failed to register fiscal_sequence_remaining")
});

/// Invoice transitions by resulting status.
pub static INVOICES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fiscal_invoices_total",
        "Total invoice state transitions by status",
        &["status"] // pending, issued, partially_paid, paid, voided
    )
    .expect("Failed to register fiscal_invoices_total")
});

/// Payments by method.
pub static PAYMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fiscal_payments_total",
        "Total payments applied by payment method",
        &["payment_method"]
    )
    .expect("Failed to register fiscal_payments_total")
});

/// Payment amount by method.
pub static PAYMENT_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fiscal_payment_amount_total",
        "Total payment amount by payment method",
        &["payment_method"]
    )
    .expect("Failed to register fiscal_payment_amount_total")
});

/// Core errors surfaced to callers, by code and kind.
pub static ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fiscal_errors_total",
        "Total core errors by code and kind",
        &["code", "kind"]
    )
    .expect("Failed to register fiscal_errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fiscal_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register fiscal_db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&FISCAL_NUMBERS_ALLOCATED_TOTAL);
    Lazy::force(&ALLOCATION_FAILURES_TOTAL);
    Lazy::force(&SEQUENCE_REMAINING);
    Lazy::force(&INVOICES_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&PAYMENT_AMOUNT_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

/// Record a fiscal number allocation.
pub fn record_allocation(document_type: &str, sequence_id: i64, remaining: i64) {
    FISCAL_NUMBERS_ALLOCATED_TOTAL
        .with_label_values(&[document_type])
        .inc();
    let sequence_label = sequence_id.to_string();
    SEQUENCE_REMAINING
        .with_label_values(&[document_type, sequence_label.as_str()])
        .set(remaining);
}

/// Record an allocation failure. The requested document type is caller
/// input and stays out of the labels.
pub fn record_allocation_failure(reason: &str) {
    ALLOCATION_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}

/// Record an invoice entering `status`.
pub fn record_invoice_status(status: &str) {
    INVOICES_TOTAL.with_label_values(&[status]).inc();
}

/// Record an applied payment.
pub fn record_payment(payment_method: &str, amount: f64) {
    PAYMENTS_TOTAL.with_label_values(&[payment_method]).inc();
    PAYMENT_AMOUNT_TOTAL
        .with_label_values(&[payment_method])
        .inc_by(amount.abs());
}

/// Record a core error for alerting.
pub fn record_error(code: &str, kind: &str) {
    ERRORS_TOTAL.with_label_values(&[code, kind]).inc();
}
