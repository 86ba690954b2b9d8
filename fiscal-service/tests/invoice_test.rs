//! Invoice building and stamping tests.

mod common;

use chrono::Duration;
use common::{far_future, invoice_request, issue_date, line, seed_sequence, test_core};
use fiscal_service::billing::FiscalError;
use fiscal_service::models::{DiscountPolicy, InvoiceStatus, Order, OrderLine};
use fiscal_service::services::get_metrics;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn lab_order() -> Order {
    Order {
        order_id: Uuid::new_v4(),
        order_number: "ORD-2026-0001".to_string(),
        patient_id: Uuid::new_v4(),
        document_type: None,
        registered_by: Some(Uuid::new_v4()),
        lines: vec![
            OrderLine {
                order_line_id: Uuid::new_v4(),
                description: "Hemograma completo".to_string(),
                quantity: 1,
                unit_price: dec!(850.00),
                discount: Decimal::ZERO,
            },
            OrderLine {
                order_line_id: Uuid::new_v4(),
                description: "Glucosa en ayunas".to_string(),
                quantity: 1,
                unit_price: dec!(350.00),
                discount: dec!(50.00),
            },
        ],
    }
}

#[tokio::test]
async fn builds_and_stamps_invoice_with_itbis() {
    let core = test_core();
    seed_sequence(&core, "B02", 1, 100, far_future()).await;

    let mut second = line("Tomografia", 1, dec!(1200.00));
    second.discount = dec!(100.00);
    let request = invoice_request(vec![line("Consulta", 2, dec!(500.00)), second]);

    let document = core.builder.build_invoice(&request).await.unwrap();
    let invoice = &document.invoice;

    assert_eq!(invoice.subtotal, dec!(2100.00));
    assert_eq!(invoice.discount, dec!(0));
    assert_eq!(invoice.tax, dec!(378.00));
    assert_eq!(invoice.total, dec!(2478.00));
    assert_eq!(invoice.status(), InvoiceStatus::Issued);
    assert_eq!(invoice.fiscal_number.as_deref(), Some("B02A0000000001"));
    assert_eq!(invoice.invoice_number, "FAC-00000001");
    assert_eq!(invoice.document_type, "B02");
    assert_eq!(invoice.issue_date, Some(issue_date()));
    assert_eq!(invoice.due_date, Some(issue_date() + Duration::days(30)));
    assert!(invoice.sequence_id.is_some());

    let totals: Vec<Decimal> = document.line_items.iter().map(|l| l.line_total).collect();
    assert_eq!(totals, vec![dec!(1000.00), dec!(1100.00)]);
    assert_eq!(document.line_items[1].sort_order, 1);
}

#[tokio::test]
async fn percentage_discount_is_taken_before_tax() {
    let core = test_core();
    seed_sequence(&core, "B02", 1, 100, far_future()).await;

    let mut request = invoice_request(vec![line("Perfil lipidico", 1, dec!(1000.00))]);
    request.discount = DiscountPolicy::Percentage(dec!(10));

    let invoice = core.builder.build_invoice(&request).await.unwrap().invoice;

    assert_eq!(invoice.discount, dec!(100.00));
    assert_eq!(invoice.tax, dec!(162.00));
    assert_eq!(invoice.total, dec!(1062.00));
}

#[tokio::test]
async fn empty_invoice_is_rejected_without_side_effects() {
    let core = test_core();
    seed_sequence(&core, "B02", 1, 100, far_future()).await;

    let err = core
        .builder
        .build_invoice(&invoice_request(vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, FiscalError::EmptyInvoice));

    let sequences = core.allocator.list_sequences(Some("B02")).await.unwrap();
    assert_eq!(sequences[0].current_cursor, 1);
}

#[tokio::test]
async fn negative_price_is_rejected() {
    let core = test_core();
    seed_sequence(&core, "B02", 1, 100, far_future()).await;

    let err = core
        .builder
        .build_invoice(&invoice_request(vec![line("Ajuste", 1, dec!(-10.00))]))
        .await
        .unwrap_err();
    assert!(matches!(err, FiscalError::InvalidAmount(_)));
}

#[tokio::test]
async fn allocation_failure_persists_nothing() {
    let core = test_core();
    let request = invoice_request(vec![line("Consulta", 1, dec!(500.00))]);

    let err = core.builder.build_invoice(&request).await.unwrap_err();
    assert!(matches!(err, FiscalError::NoActiveSequence { .. }));

    // The rolled-back invoice did not consume an internal number either.
    seed_sequence(&core, "B02", 1, 100, far_future()).await;
    let invoice = core.builder.build_invoice(&request).await.unwrap().invoice;
    assert_eq!(invoice.invoice_number, "FAC-00000001");
    assert_eq!(invoice.fiscal_number.as_deref(), Some("B02A0000000001"));
}

#[tokio::test]
async fn document_type_override_draws_from_its_own_pool() {
    let core = test_core();
    seed_sequence(&core, "B02", 1, 100, far_future()).await;
    seed_sequence(&core, "B01", 500, 600, far_future()).await;

    let mut request = invoice_request(vec![line("Chequeo empresarial", 1, dec!(3000.00))]);
    request.document_type = Some("B01".to_string());

    let invoice = core.builder.build_invoice(&request).await.unwrap().invoice;
    assert_eq!(invoice.document_type, "B01");
    assert_eq!(invoice.fiscal_number.as_deref(), Some("B01A0000000500"));
}

#[tokio::test]
async fn invoice_from_order_carries_order_lines() {
    let core = test_core();
    seed_sequence(&core, "B02", 1, 100, far_future()).await;
    let order = lab_order();

    let document = core.builder.build_invoice_from_order(&order).await.unwrap();

    assert_eq!(document.invoice.order_id, Some(order.order_id));
    assert_eq!(document.invoice.patient_id, order.patient_id);
    assert_eq!(document.invoice.issued_by, order.registered_by);
    assert_eq!(document.invoice.subtotal, dec!(1150.00));
    assert_eq!(document.invoice.tax, dec!(207.00));
    assert_eq!(document.invoice.total, dec!(1357.00));
    assert_eq!(
        document.line_items[0].order_line_id,
        Some(order.lines[0].order_line_id)
    );
}

#[tokio::test]
async fn order_is_invoiced_at_most_once() {
    let core = test_core();
    seed_sequence(&core, "B02", 1, 100, far_future()).await;
    let order = lab_order();

    let first = core.builder.build_invoice_from_order(&order).await.unwrap();

    let err = core
        .builder
        .build_invoice_from_order(&order)
        .await
        .unwrap_err();
    assert!(matches!(err, FiscalError::OrderAlreadyInvoiced { .. }));

    // The rejected attempt must not burn a fiscal number.
    let sequences = core.allocator.list_sequences(Some("B02")).await.unwrap();
    assert_eq!(sequences[0].current_cursor, 2);

    // Voiding frees the order for a replacement invoice.
    core.ledger
        .void_invoice(first.invoice.invoice_id, Some("Wrong patient"))
        .await
        .unwrap();
    let replacement = core.builder.build_invoice_from_order(&order).await.unwrap();
    assert_eq!(
        replacement.invoice.fiscal_number.as_deref(),
        Some("B02A0000000002")
    );
}

#[tokio::test]
async fn draft_is_stamped_later() {
    let core = test_core();
    let request = invoice_request(vec![line("Consulta", 1, dec!(500.00))]);

    let draft = core.builder.draft_invoice(&request).await.unwrap();
    assert_eq!(draft.invoice.status(), InvoiceStatus::Pending);
    assert!(draft.invoice.fiscal_number.is_none());
    assert_eq!(draft.invoice.total, dec!(590.00));

    // Without a sequence the draft stays pending.
    let err = core
        .builder
        .stamp_invoice(draft.invoice.invoice_id)
        .await
        .unwrap_err();
    assert!(matches!(err, FiscalError::NoActiveSequence { .. }));
    let detail = core
        .ledger
        .invoice_detail(draft.invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(detail.invoice.status(), InvoiceStatus::Pending);

    seed_sequence(&core, "B02", 1, 100, far_future()).await;
    let stamped = core
        .builder
        .stamp_invoice(draft.invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(stamped.invoice.status(), InvoiceStatus::Issued);
    assert_eq!(stamped.invoice.fiscal_number.as_deref(), Some("B02A0000000001"));
    assert_eq!(stamped.line_items.len(), 1);

    let err = core
        .builder
        .stamp_invoice(draft.invoice.invoice_id)
        .await
        .unwrap_err();
    assert!(matches!(err, FiscalError::AlreadyIssued { .. }));
}

#[tokio::test]
async fn voided_draft_cannot_be_stamped() {
    let core = test_core();
    seed_sequence(&core, "B02", 1, 100, far_future()).await;

    let draft = core
        .builder
        .draft_invoice(&invoice_request(vec![line("Consulta", 1, dec!(500.00))]))
        .await
        .unwrap();
    core.ledger
        .void_invoice(draft.invoice.invoice_id, None)
        .await
        .unwrap();

    let err = core
        .builder
        .stamp_invoice(draft.invoice.invoice_id)
        .await
        .unwrap_err();
    assert!(matches!(err, FiscalError::InvoiceVoided { .. }));
}

#[tokio::test]
async fn stamping_unknown_invoice_is_not_found() {
    let core = test_core();

    let err = core
        .builder
        .stamp_invoice(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, FiscalError::InvoiceNotFound(_)));
}

#[tokio::test]
async fn oversized_unit_price_is_rejected_without_side_effects() {
    let core = test_core();
    seed_sequence(&core, "B02", 1, 100, far_future()).await;

    let err = core
        .builder
        .build_invoice(&invoice_request(vec![line("Resonancia", 2, Decimal::MAX)]))
        .await
        .unwrap_err();
    assert!(matches!(err, FiscalError::InvalidAmount(_)));

    let sequences = core.allocator.list_sequences(Some("B02")).await.unwrap();
    assert_eq!(sequences[0].current_cursor, 1);
}

#[tokio::test]
async fn total_beyond_storable_range_is_rejected() {
    let core = test_core();
    seed_sequence(&core, "B02", 1, 100, far_future()).await;

    // ITBIS lifts the total to 10^12 or more.
    let request = invoice_request(vec![line("Equipo", 1, dec!(900000000000.00))]);
    let err = core.builder.build_invoice(&request).await.unwrap_err();
    assert!(matches!(err, FiscalError::InvalidAmount(_)));
}

#[tokio::test]
async fn malformed_document_type_is_rejected_before_allocation() {
    let core = test_core();
    seed_sequence(&core, "B02", 1, 100, far_future()).await;

    let too_long = "B".repeat(21);
    for document_type in ["B-02", "B02 ", too_long.as_str()] {
        let mut request = invoice_request(vec![line("Consulta", 1, dec!(500.00))]);
        request.document_type = Some(document_type.to_string());

        let err = core.builder.build_invoice(&request).await.unwrap_err();
        assert!(matches!(err, FiscalError::InvalidDocumentType(_)));
    }

    let sequences = core.allocator.list_sequences(Some("B02")).await.unwrap();
    assert_eq!(sequences[0].current_cursor, 1);
}

#[tokio::test]
async fn unknown_document_types_do_not_become_metric_labels() {
    let core = test_core();

    for i in 0..3 {
        let mut request = invoice_request(vec![line("Consulta", 1, dec!(500.00))]);
        request.document_type = Some(format!("QX{i}UNREGISTERED"));

        let err = core.builder.build_invoice(&request).await.unwrap_err();
        assert!(matches!(err, FiscalError::NoActiveSequence { .. }));
    }

    let metrics = get_metrics();
    assert!(metrics.contains("fiscal_allocation_failures_total{reason=\"no_active_sequence\"}"));
    assert!(!metrics.contains("UNREGISTERED"));
}
