//! Payment ledger tests.

mod common;

use common::{far_future, invoice_request, line, seed_sequence, test_core};
use fiscal_service::billing::{ErrorKind, FiscalCore, FiscalError};
use fiscal_service::models::{Invoice, InvoiceStatus, PaymentMethod, PaymentRequest};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn payment(invoice_id: Uuid, amount: Decimal) -> PaymentRequest {
    PaymentRequest {
        invoice_id,
        amount,
        method: PaymentMethod::Cash,
        reference: None,
        bank: None,
        notes: None,
        received_by: None,
    }
}

/// Issue the 2478.00 invoice used throughout these tests.
async fn issued_invoice(core: &FiscalCore) -> Invoice {
    seed_sequence(core, "B02", 1, 100, far_future()).await;

    let mut second = line("Tomografia", 1, dec!(1200.00));
    second.discount = dec!(100.00);
    let request = invoice_request(vec![line("Consulta", 2, dec!(500.00)), second]);

    core.builder.build_invoice(&request).await.unwrap().invoice
}

#[tokio::test]
async fn full_payment_settles_and_blocks_overpayment() {
    let core = test_core();
    let invoice = issued_invoice(&core).await;
    assert_eq!(invoice.total, dec!(2478.00));

    core.ledger
        .apply_payment(&payment(invoice.invoice_id, dec!(2478.00)))
        .await
        .unwrap();

    let detail = core.ledger.invoice_detail(invoice.invoice_id).await.unwrap();
    assert_eq!(detail.invoice.status(), InvoiceStatus::Paid);
    assert_eq!(detail.invoice.amount_paid, dec!(2478.00));
    assert_eq!(detail.outstanding, Decimal::ZERO);

    let err = core
        .ledger
        .apply_payment(&payment(invoice.invoice_id, dec!(0.01)))
        .await
        .unwrap_err();
    assert!(matches!(err, FiscalError::Overpayment { .. }));
    assert_eq!(err.kind(), ErrorKind::Consistency);

    let detail = core.ledger.invoice_detail(invoice.invoice_id).await.unwrap();
    assert_eq!(detail.payments.len(), 1);
}

#[tokio::test]
async fn partial_payments_accumulate() {
    let core = test_core();
    let invoice = issued_invoice(&core).await;

    core.ledger
        .apply_payment(&payment(invoice.invoice_id, dec!(1000.00)))
        .await
        .unwrap();

    let detail = core.ledger.invoice_detail(invoice.invoice_id).await.unwrap();
    assert_eq!(detail.invoice.status(), InvoiceStatus::PartiallyPaid);
    assert_eq!(detail.outstanding, dec!(1478.00));

    let mut card = payment(invoice.invoice_id, dec!(1478.00));
    card.method = PaymentMethod::Card;
    card.reference = Some("AUTH-4411".to_string());
    let recorded = core.ledger.apply_payment(&card).await.unwrap();
    assert_eq!(recorded.payment_method, "card");

    let detail = core.ledger.invoice_detail(invoice.invoice_id).await.unwrap();
    assert_eq!(detail.invoice.status(), InvoiceStatus::Paid);
    assert_eq!(detail.payments.len(), 2);
}

#[tokio::test]
async fn payment_larger_than_outstanding_is_rejected() {
    let core = test_core();
    let invoice = issued_invoice(&core).await;

    core.ledger
        .apply_payment(&payment(invoice.invoice_id, dec!(2000.00)))
        .await
        .unwrap();

    let err = core
        .ledger
        .apply_payment(&payment(invoice.invoice_id, dec!(500.00)))
        .await
        .unwrap_err();

    match err {
        FiscalError::Overpayment {
            outstanding,
            attempted,
            ..
        } => {
            assert_eq!(outstanding, dec!(478.00));
            assert_eq!(attempted, dec!(500.00));
        }
        other => panic!("Expected Overpayment, got {:?}", other),
    }
}

#[tokio::test]
async fn invalid_amounts_are_rejected() {
    let core = test_core();
    let invoice = issued_invoice(&core).await;

    for amount in [dec!(0), dec!(-5.00), dec!(10.001)] {
        let err = core
            .ledger
            .apply_payment(&payment(invoice.invoice_id, amount))
            .await
            .unwrap_err();
        assert!(
            matches!(err, FiscalError::InvalidAmount(_)),
            "amount {} should be rejected",
            amount
        );
    }

    let detail = core.ledger.invoice_detail(invoice.invoice_id).await.unwrap();
    assert!(detail.payments.is_empty());
}

#[tokio::test]
async fn pending_invoice_cannot_take_payments() {
    let core = test_core();
    let draft = core
        .builder
        .draft_invoice(&invoice_request(vec![line("Consulta", 1, dec!(500.00))]))
        .await
        .unwrap();

    let err = core
        .ledger
        .apply_payment(&payment(draft.invoice.invoice_id, dec!(100.00)))
        .await
        .unwrap_err();
    assert!(matches!(err, FiscalError::InvoiceNotIssued { .. }));
}

#[tokio::test]
async fn voided_invoice_cannot_take_payments() {
    let core = test_core();
    let invoice = issued_invoice(&core).await;
    core.ledger
        .void_invoice(invoice.invoice_id, None)
        .await
        .unwrap();

    let err = core
        .ledger
        .apply_payment(&payment(invoice.invoice_id, dec!(100.00)))
        .await
        .unwrap_err();
    assert!(matches!(err, FiscalError::InvoiceVoided { .. }));
}

#[tokio::test]
async fn unknown_invoice_is_not_found() {
    let core = test_core();

    let err = core
        .ledger
        .apply_payment(&payment(Uuid::new_v4(), dec!(100.00)))
        .await
        .unwrap_err();
    assert!(matches!(err, FiscalError::InvoiceNotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payments_never_exceed_total() {
    let core = test_core();
    let invoice = issued_invoice(&core).await;

    // 10 x 300.00 against 2478.00: only 8 can fit.
    let mut handles = Vec::new();
    for _ in 0..10 {
        let ledger = core.ledger.clone();
        let request = payment(invoice.invoice_id, dec!(300.00));
        handles.push(tokio::spawn(async move { ledger.apply_payment(&request).await }));
    }

    let mut accepted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(FiscalError::Overpayment { .. }) => rejected += 1,
            Err(other) => panic!("Unexpected error: {:?}", other),
        }
    }
    assert_eq!(accepted, 8);
    assert_eq!(rejected, 2);

    let detail = core.ledger.invoice_detail(invoice.invoice_id).await.unwrap();
    assert_eq!(detail.invoice.amount_paid, dec!(2400.00));
    assert_eq!(detail.outstanding, dec!(78.00));
    assert_eq!(detail.invoice.status(), InvoiceStatus::PartiallyPaid);
}
