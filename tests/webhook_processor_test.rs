mod common;

use assert_matches::assert_matches;
use checkout_api::{
    entities::{OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    webhooks::WebhookAck,
};
use common::{checkout_request, TestHarness};
use rust_decimal_macros::dec;
use uuid::Uuid;

const TIMESTAMP: &str = "2025-06-01T12:00:00Z";

async fn card_order(app: &TestHarness, user_id: Uuid) -> Uuid {
    let product_id = app.seed_product("Camera", dec!(320.00), 10).await;
    app.services
        .carts
        .add_item(user_id, product_id, 1)
        .await
        .unwrap();
    let outcome = app
        .services
        .checkout
        .checkout(user_id, checkout_request(PaymentMethod::CreditCard))
        .await
        .unwrap();
    outcome.order.id
}

fn event_body(event_id: &str, event_type: &str, order_id: Uuid) -> Vec<u8> {
    format!(
        r#"{{"id":"{}","type":"{}","data":{{"order_id":"{}","gateway_intent_id":"pi_1"}}}}"#,
        event_id, event_type, order_id
    )
    .into_bytes()
}

#[tokio::test]
async fn missing_signature_is_rejected_before_parsing() {
    let app = TestHarness::new().await;

    // Deliberately unparseable body: rejection must happen on the
    // signature alone.
    let result = app.webhooks.handle_event(b"not json at all", TIMESTAMP, None).await;
    assert_matches!(result, Err(ServiceError::SignatureInvalid));
}

#[tokio::test]
async fn invalid_signature_is_rejected_with_no_side_effects() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();
    let order_id = card_order(&app, user_id).await;

    let body = event_body("evt_1", "payment_succeeded", order_id);
    let result = app
        .webhooks
        .handle_event(&body, TIMESTAMP, Some("deadbeef"))
        .await;
    assert_matches!(result, Err(ServiceError::SignatureInvalid));

    // Order state unchanged.
    let order = app.services.orders.get_order(user_id, order_id).await.unwrap().0;
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn payment_succeeded_settles_the_order() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();
    let order_id = card_order(&app, user_id).await;

    let body = event_body("evt_ok", "payment_succeeded", order_id);
    let signature = app.sign_webhook(TIMESTAMP, &body);

    let ack = app
        .webhooks
        .handle_event(&body, TIMESTAMP, Some(&signature))
        .await
        .unwrap();
    assert_eq!(ack, WebhookAck::Processed);

    let order = app.services.orders.get_order(user_id, order_id).await.unwrap().0;
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn replayed_event_id_is_a_no_op() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();
    let order_id = card_order(&app, user_id).await;

    let body = event_body("evt_dup", "payment_succeeded", order_id);
    let signature = app.sign_webhook(TIMESTAMP, &body);

    let first = app
        .webhooks
        .handle_event(&body, TIMESTAMP, Some(&signature))
        .await
        .unwrap();
    assert_eq!(first, WebhookAck::Processed);

    let second = app
        .webhooks
        .handle_event(&body, TIMESTAMP, Some(&signature))
        .await
        .unwrap();
    assert_eq!(second, WebhookAck::Duplicate);

    // Same terminal state as applying once.
    let order = app.services.orders.get_order(user_id, order_id).await.unwrap().0;
    assert_eq!(order.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn payment_failed_marks_the_order_failed() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();
    let order_id = card_order(&app, user_id).await;

    let body = event_body("evt_fail", "payment_failed", order_id);
    let signature = app.sign_webhook(TIMESTAMP, &body);

    let ack = app
        .webhooks
        .handle_event(&body, TIMESTAMP, Some(&signature))
        .await
        .unwrap();
    assert_eq!(ack, WebhookAck::Processed);

    let order = app.services.orders.get_order(user_id, order_id).await.unwrap().0;
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn out_of_order_settlement_is_acknowledged_and_ignored() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();
    let order_id = card_order(&app, user_id).await;

    // Settle first.
    let body = event_body("evt_a", "payment_succeeded", order_id);
    let signature = app.sign_webhook(TIMESTAMP, &body);
    app.webhooks
        .handle_event(&body, TIMESTAMP, Some(&signature))
        .await
        .unwrap();

    // A late payment_failed for the same order must not regress the state
    // and must still be acknowledged.
    let late = event_body("evt_b", "payment_failed", order_id);
    let late_sig = app.sign_webhook(TIMESTAMP, &late);
    let ack = app
        .webhooks
        .handle_event(&late, TIMESTAMP, Some(&late_sig))
        .await
        .unwrap();
    assert_matches!(ack, WebhookAck::Ignored(_));

    let order = app.services.orders.get_order(user_id, order_id).await.unwrap().0;
    assert_eq!(order.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn unknown_event_types_are_acknowledged() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();
    let order_id = card_order(&app, user_id).await;

    let body = event_body("evt_x", "payout_created", order_id);
    let signature = app.sign_webhook(TIMESTAMP, &body);

    let ack = app
        .webhooks
        .handle_event(&body, TIMESTAMP, Some(&signature))
        .await
        .unwrap();
    assert_matches!(ack, WebhookAck::Ignored(_));
}

#[tokio::test]
async fn malformed_but_signed_payload_is_acknowledged() {
    let app = TestHarness::new().await;

    let body = b"{\"almost\": \"an event\"}";
    let signature = app.sign_webhook(TIMESTAMP, body);

    let ack = app
        .webhooks
        .handle_event(body, TIMESTAMP, Some(&signature))
        .await
        .unwrap();
    assert_matches!(ack, WebhookAck::Ignored(_));
}

#[tokio::test]
async fn settlement_for_unknown_order_is_acknowledged_for_follow_up() {
    let app = TestHarness::new().await;

    let body = event_body("evt_orphan", "payment_succeeded", Uuid::new_v4());
    let signature = app.sign_webhook(TIMESTAMP, &body);

    let ack = app
        .webhooks
        .handle_event(&body, TIMESTAMP, Some(&signature))
        .await
        .unwrap();
    assert_matches!(ack, WebhookAck::Ignored(_));
}
