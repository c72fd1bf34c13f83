//! End-to-end payment scenarios against the in-memory stores and scripted gateways.

mod common;

use common::{decimal, user, Harness};
use quickcart_backend::database::order_repository::{OrderStore, PaymentStatus};
use quickcart_backend::error::ErrorCode;
use quickcart_backend::middleware::auth::UserRole;
use quickcart_backend::payments::{PaymentMethod, PaymentState};
use quickcart_backend::services::PaymentIntentRequest;
use std::sync::atomic::Ordering;
use uuid::Uuid;

fn intent(order_id: Uuid, method: PaymentMethod) -> PaymentIntentRequest {
    PaymentIntentRequest {
        order_id,
        payment_method: method,
        amount: None,
        currency: None,
        email: Some("ada@example.com".to_string()),
    }
}

#[tokio::test]
async fn paystack_intent_then_verify_completes_order() {
    let h = Harness::new().await;
    let buyer = user(UserRole::Customer);
    let order = h.place_order(&buyer).await;
    assert_eq!(order.amount, decimal("99.90"));

    let created = h
        .orchestrator
        .create_payment_intent(&buyer, intent(order.id, PaymentMethod::Card))
        .await
        .expect("intent created");
    assert!(created.transaction_id.starts_with("QC-"));
    assert!(created.authorization_url.is_some());
    assert_eq!(created.order.payment_status, PaymentStatus::Pending);
    assert_eq!(created.order.payment_method, Some(PaymentMethod::Card));
    assert_eq!(
        created.order.transaction_id.as_deref(),
        Some(created.transaction_id.as_str())
    );

    let verified = h
        .orchestrator
        .verify_payment(&created.transaction_id)
        .await
        .expect("verified");
    assert_eq!(verified.payment_status, PaymentStatus::Completed);
    assert_eq!(verified.amount, order.amount);
    assert_eq!(h.paystack.verify_calls.load(Ordering::SeqCst), 1);

    // Second confirmation is a no-op and does not reach the provider
    let again = h
        .orchestrator
        .verify_payment(&created.transaction_id)
        .await
        .expect("idempotent verify");
    assert_eq!(again.payment_status, PaymentStatus::Completed);
    assert_eq!(again.version, verified.version);
    assert_eq!(h.paystack.verify_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn paypal_execute_then_refund_is_idempotent() {
    let h = Harness::new().await;
    let buyer = user(UserRole::Customer);
    let order = h.place_order(&buyer).await;

    let created = h
        .orchestrator
        .create_payment_intent(&buyer, intent(order.id, PaymentMethod::Paypal))
        .await
        .expect("intent created");
    assert!(created.transaction_id.starts_with("PAYID-"));

    let executed = h
        .orchestrator
        .execute_paypal_payment(&buyer, &created.transaction_id, "PAYER-1")
        .await
        .expect("executed");
    assert_eq!(executed.payment_status, PaymentStatus::Completed);

    let refunded = h
        .orchestrator
        .refund_payment(&buyer, &created.transaction_id, Some("changed my mind".to_string()))
        .await
        .expect("refunded");
    assert_eq!(refunded.order.payment_status, PaymentStatus::Refunded);
    assert_eq!(refunded.order.refund_id.as_deref(), Some(refunded.refund_id.as_str()));

    let repeat = h
        .orchestrator
        .refund_payment(&buyer, &created.transaction_id, None)
        .await
        .expect("repeat refund returns the first one");
    assert_eq!(repeat.refund_id, refunded.refund_id);
    assert_eq!(h.paypal.refund_calls.load(Ordering::SeqCst), 1);

    // Refunded is terminal
    let err = h
        .orchestrator
        .create_payment_intent(&buyer, intent(order.id, PaymentMethod::Paypal))
        .await
        .expect_err("no new intent after refund");
    assert_eq!(err.error_code(), ErrorCode::InvalidPaymentTransition);
}

#[tokio::test]
async fn switching_provider_after_intent_is_rejected() {
    let h = Harness::new().await;
    let buyer = user(UserRole::Customer);
    let order = h.place_order(&buyer).await;

    let first = h
        .orchestrator
        .create_payment_intent(&buyer, intent(order.id, PaymentMethod::Paystack))
        .await
        .expect("paystack intent");

    let err = h
        .orchestrator
        .create_payment_intent(&buyer, intent(order.id, PaymentMethod::Paypal))
        .await
        .expect_err("cannot blend providers");
    assert_eq!(err.status_code(), 409);
    assert_eq!(err.error_code(), ErrorCode::PaymentMethodConflict);

    // Another Paystack channel is fine and replaces the reference
    let second = h
        .orchestrator
        .create_payment_intent(&buyer, intent(order.id, PaymentMethod::MobileMoney))
        .await
        .expect("same provider retry");
    assert_ne!(second.transaction_id, first.transaction_id);
    assert_eq!(second.order.payment_method, Some(PaymentMethod::MobileMoney));

    // A PayPal capture cannot be applied to a Paystack order
    let err = h
        .orchestrator
        .execute_paypal_payment(&buyer, &second.transaction_id, "PAYER-1")
        .await
        .expect_err("method mismatch");
    assert_eq!(err.error_code(), ErrorCode::PaymentMethodMismatch);
}

#[tokio::test]
async fn amount_mismatch_leaves_order_pending_and_dead_letters() {
    let h = Harness::new().await;
    let buyer = user(UserRole::Customer);
    let order = h.place_order(&buyer).await;
    let created = h
        .orchestrator
        .create_payment_intent(&buyer, intent(order.id, PaymentMethod::Card))
        .await
        .expect("intent created");

    h.paystack.report_amount("10.00");
    let err = h
        .orchestrator
        .verify_payment(&created.transaction_id)
        .await
        .expect_err("amount mismatch");
    assert_eq!(err.error_code(), ErrorCode::AmountMismatch);

    let current = h
        .orders_store
        .find_by_id(order.id)
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(current.payment_status, PaymentStatus::Pending);

    let events = h.events.all().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "reconciliation.amount_mismatch");
    assert_eq!(events[0].reference.as_deref(), Some(created.transaction_id.as_str()));
}

#[tokio::test]
async fn failed_payment_is_terminal() {
    let h = Harness::new().await;
    let buyer = user(UserRole::Customer);
    let order = h.place_order(&buyer).await;
    let created = h
        .orchestrator
        .create_payment_intent(&buyer, intent(order.id, PaymentMethod::Card))
        .await
        .expect("intent created");

    h.paystack.report_state(PaymentState::Failed);
    let failed = h
        .orchestrator
        .verify_payment(&created.transaction_id)
        .await
        .expect("failure recorded");
    assert_eq!(failed.payment_status, PaymentStatus::Failed);

    let err = h
        .orchestrator
        .create_payment_intent(&buyer, intent(order.id, PaymentMethod::Card))
        .await
        .expect_err("no retry after failure");
    assert_eq!(err.error_code(), ErrorCode::InvalidPaymentTransition);

    // The provider later claims success: recorded for operators, order untouched
    h.paystack.report_state(PaymentState::Success);
    let err = h
        .orchestrator
        .verify_payment(&created.transaction_id)
        .await
        .expect_err("failed orders cannot complete");
    assert_eq!(err.error_code(), ErrorCode::InvalidPaymentTransition);

    let current = h
        .orders_store
        .find_by_id(order.id)
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(current.payment_status, PaymentStatus::Failed);
    assert!(h
        .events
        .all()
        .await
        .iter()
        .any(|e| e.event_type == "reconciliation.settled_after_failure"));
}

#[tokio::test]
async fn confirmed_payment_without_order_is_a_reconciliation_gap() {
    let h = Harness::new().await;

    let err = h
        .orchestrator
        .verify_payment("QC-unknown-reference")
        .await
        .expect_err("no order");
    assert_eq!(err.status_code(), 404);
    assert_eq!(err.error_code(), ErrorCode::ReconciliationGap);

    let events = h.events.all().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "reconciliation.missing_order");
    assert!(!events[0].is_replayable());
}

#[tokio::test]
async fn intent_and_refund_are_guarded() {
    let h = Harness::new().await;
    let buyer = user(UserRole::Customer);
    let stranger = user(UserRole::Customer);
    let order = h.place_order(&buyer).await;

    let err = h
        .orchestrator
        .create_payment_intent(&stranger, intent(order.id, PaymentMethod::Card))
        .await
        .expect_err("not the owner");
    assert_eq!(err.status_code(), 403);

    let mut wrong_amount = intent(order.id, PaymentMethod::Card);
    wrong_amount.amount = Some(decimal("1.00"));
    let err = h
        .orchestrator
        .create_payment_intent(&buyer, wrong_amount)
        .await
        .expect_err("client amount must match the order");
    assert_eq!(err.status_code(), 400);

    let created = h
        .orchestrator
        .create_payment_intent(&buyer, intent(order.id, PaymentMethod::Card))
        .await
        .expect("intent created");

    let err = h
        .orchestrator
        .refund_payment(&buyer, &created.transaction_id, None)
        .await
        .expect_err("pending orders cannot be refunded");
    assert_eq!(err.error_code(), ErrorCode::InvalidPaymentTransition);

    h.orchestrator
        .verify_payment(&created.transaction_id)
        .await
        .expect("verified");
    let err = h
        .orchestrator
        .refund_payment(&stranger, &created.transaction_id, None)
        .await
        .expect_err("only the owner or an admin refunds");
    assert_eq!(err.status_code(), 403);

    let admin = user(UserRole::Admin);
    let refunded = h
        .orchestrator
        .refund_payment(&admin, &created.transaction_id, None)
        .await
        .expect("admin refund");
    assert_eq!(refunded.order.payment_status, PaymentStatus::Refunded);
    assert_eq!(refunded.order.amount, decimal("99.90"));
}

#[tokio::test]
async fn racing_intents_for_different_providers_leave_no_orphan() {
    let h = Harness::new().await;
    let buyer = user(UserRole::Customer);
    let order = h.place_order(&buyer).await;

    // Both intents claim the order before either gateway answers; PayPal answers first
    h.paypal.set_latency(50);
    h.paystack.set_latency(150);
    let (paypal, card) = tokio::join!(
        h.orchestrator
            .create_payment_intent(&buyer, intent(order.id, PaymentMethod::Paypal)),
        h.orchestrator
            .create_payment_intent(&buyer, intent(order.id, PaymentMethod::Card)),
    );

    let err = paypal.expect_err("order was re-claimed for paystack");
    assert_eq!(err.error_code(), ErrorCode::PaymentMethodConflict);
    let card = card.expect("last claim wins");

    let current = h
        .orders_store
        .find_by_id(order.id)
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(current.payment_method, Some(PaymentMethod::Card));
    assert_eq!(current.transaction_id.as_deref(), Some(card.transaction_id.as_str()));

    // The PayPal payment created for the losing intent is on record for operators
    let events = h.events.all().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "reconciliation.intent_unlinked");
    assert_eq!(events[0].reference.as_deref(), Some("PAYID-1"));
}

#[tokio::test]
async fn intents_and_settlements_are_bound_to_the_store_currency() {
    let h = Harness::new().await;
    let buyer = user(UserRole::Customer);
    let order = h.place_order(&buyer).await;

    let mut naira = intent(order.id, PaymentMethod::Card);
    naira.currency = Some("NGN".to_string());
    let err = h
        .orchestrator
        .create_payment_intent(&buyer, naira)
        .await
        .expect_err("orders are priced in USD");
    assert_eq!(err.status_code(), 400);
    let untouched = h
        .orders_store
        .find_by_id(order.id)
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(untouched.version, order.version);

    let mut restated = intent(order.id, PaymentMethod::Card);
    restated.currency = Some("usd".to_string());
    let created = h
        .orchestrator
        .create_payment_intent(&buyer, restated)
        .await
        .expect("same currency in lower case");

    // Right amount, wrong currency
    h.paystack.report_currency("NGN");
    let err = h
        .orchestrator
        .verify_payment(&created.transaction_id)
        .await
        .expect_err("currency mismatch");
    assert_eq!(err.error_code(), ErrorCode::AmountMismatch);

    let current = h
        .orders_store
        .find_by_id(order.id)
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(current.payment_status, PaymentStatus::Pending);
    let events = h.events.all().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "reconciliation.amount_mismatch");
}

#[tokio::test]
async fn provider_timeout_leaves_order_unchanged() {
    let h = Harness::new().await;
    let buyer = user(UserRole::Customer);
    let order = h.place_order(&buyer).await;
    let created = h
        .orchestrator
        .create_payment_intent(&buyer, intent(order.id, PaymentMethod::Card))
        .await
        .expect("intent created");

    h.paystack.time_out();
    let err = h
        .orchestrator
        .verify_payment(&created.transaction_id)
        .await
        .expect_err("gateway never answered");
    assert_eq!(err.status_code(), 504);
    assert_eq!(err.error_code(), ErrorCode::ExternalServiceTimeout);
    assert!(err.is_retryable());

    let current = h
        .orders_store
        .find_by_id(order.id)
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(current.payment_status, PaymentStatus::Pending);
    assert_eq!(current.version, created.order.version);
    assert!(h.events.all().await.is_empty());
}

#[tokio::test]
async fn concurrent_verify_and_refund_on_one_order() {
    let h = Harness::new().await;
    let buyer = user(UserRole::Customer);
    let order = h.place_order(&buyer).await;
    let created = h
        .orchestrator
        .create_payment_intent(&buyer, intent(order.id, PaymentMethod::Card))
        .await
        .expect("intent created");
    let reference = created.transaction_id.clone();

    // While verification is in flight the order is still pending, so the refund is refused
    h.paystack.set_latency(50);
    let (verified, refund) = tokio::join!(
        h.orchestrator.verify_payment(&reference),
        h.orchestrator.refund_payment(&buyer, &reference, None),
    );
    let verified = verified.expect("verified");
    assert_eq!(verified.payment_status, PaymentStatus::Completed);
    assert_eq!(
        refund.expect_err("not yet paid").error_code(),
        ErrorCode::InvalidPaymentTransition
    );
    assert_eq!(h.paystack.refund_calls.load(Ordering::SeqCst), 0);

    // Once settled, a slow refund and a repeat verification both land on one consistent order
    let (refund, again) = tokio::join!(
        h.orchestrator.refund_payment(&buyer, &reference, None),
        h.orchestrator.verify_payment(&reference),
    );
    let refund = refund.expect("refunded");
    assert_eq!(again.expect("already settled").version, verified.version);
    assert_eq!(refund.order.payment_status, PaymentStatus::Refunded);
    assert_eq!(refund.order.version, verified.version + 1);
    assert_eq!(h.paystack.refund_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.paystack.verify_calls.load(Ordering::SeqCst), 1);
}
