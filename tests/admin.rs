mod common;

use axum::http::StatusCode;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{admin_token, hosted_token, token_for, TestApp};
use experience_booking::crypto::SecretCipher;
use experience_booking::middleware::Role;
use experience_booking::models::{BookingStatus, PaymentState, PaymentStatus, RefundStatus};
use experience_booking::store::BookingStore;

/// Оплата наличными, подтвержденная администратором. Возвращает id брони и платежа.
async fn paid_in_cash(app: &TestApp, guests: i32, amount: i64) -> (Uuid, Uuid) {
    app.add_cash_gateway("cash", 0, true).await;
    let booking = app.seed_booking(guests, amount).await;
    let token = token_for(booking.explorer_id, Role::Explorer);

    let (status, body) = app
        .request(
            "POST",
            "/api/checkout",
            Some(&token),
            Some(json!({
                "booking_id": booking.id,
                "success_url": "https://shop.example.com/ok",
                "cancel_url": "https://shop.example.com/cancel",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let payment_id: Uuid = body["payment_id"].as_str().unwrap().parse().unwrap();

    let (status, body) = app
        .request(
            "POST",
            &format!("/api/admin/payments/{}/confirm", payment_id),
            Some(&admin_token()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["outcome"], "confirmed");

    (booking.id, payment_id)
}

async fn paid_via_hosted(app: &TestApp, server: &MockServer, amount: i64) -> Uuid {
    Mock::given(method("POST"))
        .and(path("/api/v1/PaymentInit/init"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "paymentId": "gw-1",
            "paymentURL": format!("{}/pay/gw-1", server.uri()),
        })))
        .mount(server)
        .await;

    app.add_hosted_gateway("x", &server.uri()).await;
    let booking = app.seed_booking(1, amount).await;
    let token = token_for(booking.explorer_id, Role::Explorer);
    let (_, body) = app
        .request(
            "POST",
            "/api/checkout",
            Some(&token),
            Some(json!({
                "booking_id": booking.id,
                "success_url": "https://shop.example.com/ok",
                "cancel_url": "https://shop.example.com/cancel",
                "provider_id": "x",
            })),
        )
        .await;
    let payment_id = body["payment_id"].as_str().unwrap().to_string();

    let signed = hosted_token("gw-1", &payment_id, "CONFIRMED");
    let (status, _) = app
        .hosted_webhook(
            "x",
            &[
                ("paymentId", "gw-1"),
                ("orderId", payment_id.as_str()),
                ("status", "CONFIRMED"),
                ("token", signed.as_str()),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    payment_id.parse().unwrap()
}

#[tokio::test]
async fn manual_confirmation_of_cash_payment_issues_tickets() {
    let app = TestApp::new();
    let (booking_id, payment_id) = paid_in_cash(&app, 2, 8_000).await;

    let booking = app.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.payment_status, PaymentStatus::Succeeded);
    assert_eq!(app.store.tickets_for(booking_id).await.len(), 2);

    let payment = app.store.get_payment(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentState::Succeeded);
    assert!(payment.captured_at.is_some());
}

#[tokio::test]
async fn cash_refund_is_unsupported_and_changes_nothing() {
    let app = TestApp::new();
    let (booking_id, payment_id) = paid_in_cash(&app, 1, 8_000).await;

    let (status, body) = app
        .request(
            "POST",
            &format!("/api/admin/payments/{}/refund", payment_id),
            Some(&admin_token()),
            Some(json!({ "reason": "guest asked" })),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "unsupported_operation");
    assert!(app.store.refunds_for(payment_id).await.is_empty());

    let booking = app.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn refund_is_bounded_by_what_is_left() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/PaymentRefund/refund"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "refundId": "rf-1",
            "status": "REFUNDED",
        })))
        .mount(&server)
        .await;

    let app = TestApp::new();
    let payment_id = paid_via_hosted(&app, &server, 10_000).await;
    let uri = format!("/api/admin/payments/{}/refund", payment_id);
    let admin = admin_token();

    let (status, body) = app
        .request("POST", &uri, Some(&admin), Some(json!({ "amount": 4_000 })))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["refund"]["amount"], 4_000);
    assert_eq!(body["refund"]["provider_refund_id"], "rf-1");

    let (status, _) = app
        .request("POST", &uri, Some(&admin), Some(json!({ "amount": 7_000 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Без суммы возвращается остаток.
    let (status, body) = app.request("POST", &uri, Some(&admin), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["refund"]["amount"], 6_000);
    assert_eq!(app.store.refunded_total(payment_id).await.unwrap(), 10_000);
}

#[tokio::test]
async fn concurrent_full_refunds_do_not_exceed_the_payment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/PaymentRefund/refund"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "success": true,
                    "refundId": "rf-slow",
                    "status": "REFUNDED",
                }))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let app = TestApp::new();
    let payment_id = paid_via_hosted(&app, &server, 10_000).await;
    let uri = format!("/api/admin/payments/{}/refund", payment_id);
    let admin = admin_token();

    let (first, second) = tokio::join!(
        app.request("POST", &uri, Some(&admin), Some(json!({ "amount": 10_000 }))),
        app.request("POST", &uri, Some(&admin), Some(json!({ "amount": 10_000 }))),
    );

    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::BAD_REQUEST]);

    let refunds = app.store.refunds_for(payment_id).await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].status, RefundStatus::Succeeded);
    assert_eq!(app.store.refunded_total(payment_id).await.unwrap(), 10_000);
}

#[tokio::test]
async fn failed_provider_refund_frees_the_reserved_amount() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/PaymentRefund/refund"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/PaymentRefund/refund"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "refundId": "rf-2",
            "status": "REFUNDED",
        })))
        .mount(&server)
        .await;

    let app = TestApp::new();
    let payment_id = paid_via_hosted(&app, &server, 5_000).await;
    let uri = format!("/api/admin/payments/{}/refund", payment_id);
    let admin = admin_token();

    let (status, _) = app.request("POST", &uri, Some(&admin), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(app.store.refunds_for(payment_id).await.is_empty());

    let (status, body) = app.request("POST", &uri, Some(&admin), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["refund"]["amount"], 5_000);
    assert_eq!(body["refund"]["status"], "SUCCEEDED");
}

#[tokio::test]
async fn unpaid_payment_cannot_be_refunded() {
    let app = TestApp::new();
    app.add_cash_gateway("cash", 0, true).await;
    let booking = app.seed_booking(1, 3_000).await;
    let token = token_for(booking.explorer_id, Role::Explorer);
    let (_, body) = app
        .request(
            "POST",
            "/api/checkout",
            Some(&token),
            Some(json!({
                "booking_id": booking.id,
                "success_url": "https://shop.example.com/ok",
                "cancel_url": "https://shop.example.com/cancel",
            })),
        )
        .await;
    let payment_id = body["payment_id"].as_str().unwrap();

    let (status, _) = app
        .request(
            "POST",
            &format!("/api/admin/payments/{}/refund", payment_id),
            Some(&admin_token()),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn admin_routes_require_admin_role() {
    let app = TestApp::new();
    let uri = format!("/api/admin/payments/{}/confirm", Uuid::new_v4());

    let (status, _) = app.request("POST", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let organizer = token_for(Uuid::new_v4(), Role::Organizer);
    let (status, body) = app.request("POST", &uri, Some(&organizer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, _) = app.request("POST", &uri, Some(&admin_token()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn gateway_secrets_are_encrypted_at_rest_and_masked() {
    let app = TestApp::new();
    let admin = admin_token();

    let (status, body) = app
        .request(
            "PUT",
            "/api/admin/gateways/stripe-main",
            Some(&admin),
            Some(json!({
                "name": "Cards",
                "gateway_type": "CARD",
                "config": {
                    "secret_key": "sk_test_123",
                    "webhook_secret": "whsec_abc",
                },
                "test_mode": true,
                "is_enabled": true,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["gateway"]["config"]["secret_key"], "********");

    let stored = app.store.get_gateway("stripe-main").await.unwrap().unwrap();
    let sealed = stored.config_str("secret_key").unwrap().to_string();
    assert!(SecretCipher::is_encrypted(&sealed));
    assert_ne!(sealed, "sk_test_123");
    assert_eq!(app.cipher.decrypt(&sealed).unwrap(), "sk_test_123");

    // Обновление без секретов сохраняет прежние.
    let (status, _) = app
        .request(
            "PUT",
            "/api/admin/gateways/stripe-main",
            Some(&admin),
            Some(json!({
                "name": "Cards (EU)",
                "gateway_type": "CARD",
                "config": { "api_base": "https://api.stripe.com" },
                "is_enabled": true,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let stored = app.store.get_gateway("stripe-main").await.unwrap().unwrap();
    assert_eq!(stored.name, "Cards (EU)");
    assert_eq!(stored.config_str("secret_key"), Some(sealed.as_str()));
}

#[tokio::test]
async fn gateway_key_must_be_a_lowercase_identifier() {
    let app = TestApp::new();
    let (status, _) = app
        .request(
            "PUT",
            "/api/admin/gateways/Bad%20Key",
            Some(&admin_token()),
            Some(json!({ "name": "Cash", "gateway_type": "CASH" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn toggling_gateway_hides_it_from_checkout() {
    let app = TestApp::new();
    app.add_cash_gateway("cash", 0, true).await;
    let admin = admin_token();

    let (status, _) = app
        .request(
            "PATCH",
            "/api/admin/gateways/cash/enabled",
            Some(&admin),
            Some(json!({ "enabled": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.store.enabled_gateways().await.unwrap().is_empty());

    let (status, _) = app
        .request(
            "PATCH",
            "/api/admin/gateways/missing/enabled",
            Some(&admin),
            Some(json!({ "enabled": true })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
