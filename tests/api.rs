mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use common::{harness, paid_order, Harness};
use storefront_core::api::{self, AppState};
use storefront_core::domain::value_objects::ProductId;
use storefront_core::infrastructure::stripe;

const SECRET: &str = "whsec_test";

fn app(h: &Harness) -> Router {
    api::router(AppState { orchestrator: h.orchestrator.clone(), webhook_secret: Arc::from(SECRET) })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri).header("content-type", "application/json").body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let (status, body) = send(&app(&h), Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_add_to_cart_reports_remaining_stock_and_conflicts() {
    let h = harness();
    h.store.seed_product(ProductId(1), "Linen shirt", 2000, 5);
    let app = app(&h);

    let (status, body) = send(&app, post("/api/v1/cart/add", json!({"sessionId": "s1", "productId": 1, "quantity": 2}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newStockAvailable"], 3);

    let (status, body) = send(&app, post("/api/v1/cart/add", json!({"sessionId": "s2", "productId": 1, "quantity": 4}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "insufficient_stock");
    assert_eq!(body["available"], 3);

    let (status, body) = send(&app, Request::get("/api/v1/products/1/availability").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stock"], 5);
    assert_eq!(body["available"], 3);

    let (status, _) = send(&app, post("/api/v1/cart/release", json!({"sessionId": "s1", "productId": 1}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.store.hold_count(), 0);
}

#[tokio::test]
async fn test_add_to_cart_validates_input() {
    let h = harness();
    h.store.seed_product(ProductId(1), "Linen shirt", 2000, 5);
    let app = app(&h);

    let (status, body) = send(&app, post("/api/v1/cart/add", json!({"sessionId": "s1", "productId": 1, "quantity": 0}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_failed");

    let (status, _) = send(&app, post("/api/v1/cart/add", json!({"sessionId": "s1", "productId": 99, "quantity": 1}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature_without_side_effects() {
    let h = harness();
    let app = app(&h);
    let payload = json!({"type": "checkout.session.completed"}).to_string();

    let unsigned = Request::post("/api/v1/webhooks/payment").body(Body::from(payload.clone())).unwrap();
    let (status, body) = send(&app, unsigned).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "signature_invalid");

    let header = stripe::sign_payload(payload.as_bytes(), "whsec_wrong", stripe::now_secs()).unwrap();
    let forged = Request::post("/api/v1/webhooks/payment").header("Stripe-Signature", header).body(Body::from(payload)).unwrap();
    let (status, _) = send(&app, forged).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.store.order_count(), 0);
}

#[tokio::test]
async fn test_checkout_then_signed_webhook_creates_one_order() {
    let h = harness();
    h.store.seed_product(ProductId(1), "Linen shirt", 2000, 5);
    let app = app(&h);

    let checkout = json!({
        "sessionId": "s1",
        "customer": {"name": "Ana", "email": "ana@example.com"},
        "shippingAddress": {"line1": "Calle Mayor 1", "city": "Madrid", "postalCode": "28013", "country": "ES"},
        "items": [{"productId": 1, "quantity": 2}]
    });
    let (status, body) = send(&app, post("/api/v1/checkout", checkout)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["total"], "44.95");
    let session_id = body["paymentSession"].as_str().unwrap().to_string();
    let (snapshot, payment) = h.gateway.session(&session_id).unwrap();

    let event = json!({
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": session_id,
            "payment_intent": payment.0,
            "payment_status": "paid",
            "metadata": stripe::encode_metadata(&snapshot).unwrap(),
        }}
    })
    .to_string();
    for _ in 0..2 {
        let header = stripe::sign_payload(event.as_bytes(), SECRET, stripe::now_secs()).unwrap();
        let request = Request::post("/api/v1/webhooks/payment").header("Stripe-Signature", header).body(Body::from(event.clone())).unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(h.store.order_count(), 1);
    assert_eq!(h.store.stock_of(ProductId(1)), Some(3));
}

#[tokio::test]
async fn test_webhook_asks_for_redelivery_when_unfulfillable_refund_fails() {
    let h = harness();
    h.store.seed_product(ProductId(2), "Last unit", 3000, 1);
    let started = h.orchestrator.start_checkout(common::checkout_request("s1", &[(2, 1)])).await.unwrap();
    let (snapshot, payment) = h.gateway.session(&started.session.id).unwrap();
    h.orchestrator.ledger().try_decrement(ProductId(2), 1).await.unwrap();
    h.gateway.set_fail_refunds(true);

    let event = json!({
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": started.session.id,
            "payment_intent": payment.0,
            "payment_status": "paid",
            "metadata": stripe::encode_metadata(&snapshot).unwrap(),
        }}
    })
    .to_string();
    let header = stripe::sign_payload(event.as_bytes(), SECRET, stripe::now_secs()).unwrap();
    let request = Request::post("/api/v1/webhooks/payment").header("Stripe-Signature", header).body(Body::from(event)).unwrap();
    let (status, body) = send(&app(&h), request).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "gateway_failure");
    assert_eq!(h.store.order_count(), 0);
}

#[tokio::test]
async fn test_admin_order_and_return_decisions() {
    let h = harness();
    h.store.seed_product(ProductId(3), "Coat", 2500, 4);
    let order = paid_order(&h, "s1", &[(3, 2)]).await;
    let app = app(&h);

    let (status, body) = send(&app, post("/api/v1/admin/orders/ship", json!({"orderId": order.id()}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "shipped");

    let (status, body) = send(&app, post("/api/v1/admin/orders/cancel", json!({"orderId": order.id()}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_state_transition");

    let uri = format!("/api/v1/orders/{}/returns", order.id());
    let (status, body) = send(&app, post(&uri, json!({"reason": "too small for me", "items": []}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let case_id = body["id"].clone();

    let (status, body) = send(&app, post("/api/v1/admin/returns/reject", json!({"returnCaseId": case_id, "reason": "worn item"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");

    let (status, _) = send(&app, post("/api/v1/admin/returns/confirm", json!({"returnCaseId": case_id}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.gateway.refunds().is_empty());

    let (status, body) = send(&app, Request::get(format!("/api/v1/orders/{}", order.id())).body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "shipped");
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let h = harness();
    let uri = format!("/api/v1/orders/{}", uuid::Uuid::now_v7());
    let (status, body) = send(&app(&h), Request::get(uri).body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}
