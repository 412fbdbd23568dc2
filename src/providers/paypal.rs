//! PayPal: заказы v2 с немедленным списанием.
//!
//! Покупатель подтверждает заказ на стороне PayPal, после чего приходит
//! `CHECKOUT.ORDER.APPROVED`; списание выполняем сами и по его результату
//! решаем, оплачен ли платеж. Подлинность вебхука проверяет сам PayPal
//! через `verify-webhook-signature`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    payment_ref, read_json, CheckoutRequest, CheckoutSession, CircuitBreaker, PaymentProvider,
    ProviderError, ProviderOutcome, RefundReceipt, RefundRequest, WebhookDelivery, WebhookNotice,
};
use crate::models::money;

const LIVE_API: &str = "https://api-m.paypal.com";
const SANDBOX_API: &str = "https://api-m.sandbox.paypal.com";

/// Валюты без дробной части в терминах PayPal.
/// PayPal не принимает дробные суммы в этих валютах, даже если у них есть копейки.
const PAYPAL_WHOLE_UNITS: &[&str] = &["HUF", "TWD"];

#[derive(Clone, Deserialize)]
pub struct PayPalSettings {
    #[serde(default)]
    pub api_base: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    pub webhook_id: String,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct Order {
    id: String,
    status: Option<String>,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    custom_id: Option<String>,
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerificationResponse {
    verification_status: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event_type: String,
    #[serde(default)]
    resource: Value,
}

/// Форматирует сумму в минимальных единицах так, как ждет PayPal.
pub fn format_amount(amount: i64, currency: &str) -> String {
    if PAYPAL_WHOLE_UNITS.contains(&currency.to_ascii_uppercase().as_str()) {
        amount.to_string()
    } else {
        money::format_minor(amount, currency)
    }
}

pub struct PayPalProvider {
    key: String,
    settings: PayPalSettings,
    api_base: String,
    http: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
}

impl PayPalProvider {
    pub fn new(
        key: impl Into<String>,
        settings: PayPalSettings,
        test_mode: bool,
        http: reqwest::Client,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let api_base = settings
            .api_base
            .clone()
            .unwrap_or_else(|| if test_mode { SANDBOX_API } else { LIVE_API }.to_string());
        Self {
            key: key.into(),
            settings,
            api_base,
            http,
            breaker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        let token: AccessToken = self
            .breaker
            .call(async {
                let response = self
                    .http
                    .post(self.url("/v1/oauth2/token"))
                    .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
                    .form(&[("grant_type", "client_credentials")])
                    .send()
                    .await?;
                read_json(response).await
            })
            .await?;
        Ok(token.access_token)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        body: &Value,
    ) -> Result<T, ProviderError> {
        self.breaker
            .call(async {
                let response = self
                    .http
                    .post(self.url(path))
                    .bearer_auth(token)
                    .json(body)
                    .send()
                    .await?;
                read_json(response).await
            })
            .await
    }

    async fn get_order(&self, token: &str, order_id: &str) -> Result<Order, ProviderError> {
        self.breaker
            .call(async {
                let response = self
                    .http
                    .get(self.url(&format!("/v2/checkout/orders/{}", order_id)))
                    .bearer_auth(token)
                    .send()
                    .await?;
                read_json(response).await
            })
            .await
    }

    async fn verify_signature(
        &self,
        token: &str,
        delivery: &WebhookDelivery,
        event: &Value,
    ) -> Result<(), ProviderError> {
        let header = |name: &str| {
            delivery
                .header(name)
                .map(str::to_string)
                .ok_or(ProviderError::InvalidSignature)
        };

        let body = json!({
            "auth_algo": header("paypal-auth-algo")?,
            "cert_url": header("paypal-cert-url")?,
            "transmission_id": header("paypal-transmission-id")?,
            "transmission_sig": header("paypal-transmission-sig")?,
            "transmission_time": header("paypal-transmission-time")?,
            "webhook_id": self.settings.webhook_id,
            "webhook_event": event,
        });

        let verification: VerificationResponse = self
            .post_json(token, "/v1/notifications/verify-webhook-signature", &body)
            .await?;
        if verification.verification_status == "SUCCESS" {
            Ok(())
        } else {
            Err(ProviderError::InvalidSignature)
        }
    }

    /// Списывает одобренный заказ. Повторное списание уже оплаченного заказа
    /// не ошибка: итог придет событием `PAYMENT.CAPTURE.COMPLETED`.
    async fn capture(&self, token: &str, order_id: &str) -> Result<ProviderOutcome, ProviderError> {
        let path = format!("/v2/checkout/orders/{}/capture", order_id);
        match self.post_json::<Order>(token, &path, &json!({})).await {
            Ok(order) => {
                let captured = order.status.as_deref() == Some("COMPLETED")
                    && order
                        .purchase_units
                        .iter()
                        .filter_map(|unit| unit.payments.as_ref())
                        .flat_map(|payments| payments.captures.iter())
                        .any(|capture| capture.status.as_deref() == Some("COMPLETED"));
                info!(gateway = %self.key, order_id, captured, "PayPal order captured");
                Ok(if captured {
                    ProviderOutcome::Succeeded
                } else {
                    ProviderOutcome::Processing
                })
            }
            Err(ProviderError::Rejected(msg)) if msg.contains("ORDER_ALREADY_CAPTURED") => {
                Ok(ProviderOutcome::Processing)
            }
            Err(err) => Err(err),
        }
    }
}

fn resource_str<'a>(resource: &'a Value, pointer: &str) -> Option<&'a str> {
    resource.pointer(pointer).and_then(Value::as_str)
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    fn key(&self) -> &str {
        &self.key
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.booking_id.to_string(),
                "custom_id": request.payment_id.to_string(),
                "description": request.description,
                "amount": {
                    "currency_code": request.currency.to_ascii_uppercase(),
                    "value": format_amount(request.amount, &request.currency),
                },
            }],
            "application_context": {
                "return_url": request.success_url,
                "cancel_url": request.cancel_url,
                "user_action": "PAY_NOW",
                "shipping_preference": "NO_SHIPPING",
            },
        });

        let order: Order = self.post_json(&token, "/v2/checkout/orders", &body).await?;
        let redirect_url = order
            .links
            .iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href.clone())
            .ok_or_else(|| ProviderError::Malformed("order has no approve link".into()))?;

        info!(gateway = %self.key, order_id = %order.id, "PayPal order created");
        Ok(CheckoutSession {
            redirect_url,
            provider_payment_id: Some(order.id),
        })
    }

    async fn create_refund(&self, request: &RefundRequest) -> Result<RefundReceipt, ProviderError> {
        let order_id = request
            .provider_payment_id
            .as_deref()
            .ok_or_else(|| ProviderError::Rejected("payment has no PayPal order".into()))?;

        let token = self.access_token().await?;
        let order = self.get_order(&token, order_id).await?;
        let capture_id = order
            .purchase_units
            .iter()
            .filter_map(|unit| unit.payments.as_ref())
            .flat_map(|payments| payments.captures.iter())
            .map(|capture| capture.id.clone())
            .next()
            .ok_or_else(|| ProviderError::Rejected("order has no capture".into()))?;

        let mut body = json!({
            "amount": {
                "value": format_amount(request.amount, &request.currency),
                "currency_code": request.currency.to_ascii_uppercase(),
            },
        });
        if let Some(reason) = &request.reason {
            body["note_to_payer"] = Value::String(reason.clone());
        }

        let refund: RefundResponse = self
            .post_json(
                &token,
                &format!("/v2/payments/captures/{}/refund", capture_id),
                &body,
            )
            .await?;

        Ok(RefundReceipt {
            provider_refund_id: Some(refund.id),
            status: refund.status.unwrap_or_else(|| "PENDING".into()),
        })
    }

    async fn verify_webhook(
        &self,
        delivery: &WebhookDelivery,
    ) -> Result<WebhookNotice, ProviderError> {
        let raw: Value = serde_json::from_slice(&delivery.body)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let token = self.access_token().await?;
        if let Err(err) = self.verify_signature(&token, delivery, &raw).await {
            warn!(gateway = %self.key, error = %err, "PayPal webhook verification failed");
            return Err(err);
        }

        let event: WebhookEvent =
            serde_json::from_value(raw).map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let resource = &event.resource;

        match event.event_type.as_str() {
            "CHECKOUT.ORDER.APPROVED" => {
                let order_id = resource_str(resource, "/id").ok_or(ProviderError::MissingReference)?;
                let custom_id = resource_str(resource, "/purchase_units/0/custom_id");
                let outcome = self.capture(&token, order_id).await?;
                Ok(WebhookNotice {
                    reference: payment_ref(custom_id, Some(order_id)),
                    outcome,
                })
            }
            kind @ ("PAYMENT.CAPTURE.COMPLETED"
            | "PAYMENT.CAPTURE.PENDING"
            | "PAYMENT.CAPTURE.DENIED"
            | "PAYMENT.CAPTURE.DECLINED") => {
                let outcome = match kind {
                    "PAYMENT.CAPTURE.COMPLETED" => ProviderOutcome::Succeeded,
                    "PAYMENT.CAPTURE.PENDING" => ProviderOutcome::Processing,
                    _ => ProviderOutcome::Failed,
                };
                let custom_id = resource_str(resource, "/custom_id");
                let order_id = resource_str(resource, "/supplementary_data/related_ids/order_id");
                Ok(WebhookNotice {
                    reference: payment_ref(custom_id, order_id),
                    outcome,
                })
            }
            _ => Ok(WebhookNotice::ignored()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::PaymentRef;
    use axum::http::{HeaderMap, HeaderValue};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(api_base: &str) -> PayPalProvider {
        PayPalProvider::new(
            "paypal",
            PayPalSettings {
                api_base: Some(api_base.to_string()),
                client_id: "client".into(),
                client_secret: "secret".into(),
                webhook_id: "WH-1".into(),
            },
            true,
            reqwest::Client::new(),
            Arc::new(CircuitBreaker::new("paypal", 3, Duration::from_secs(60))),
        )
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "access_token": "A21", "expires_in": 300 })),
            )
            .mount(server)
            .await;
    }

    async fn mount_verification(server: &MockServer, status: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/notifications/verify-webhook-signature"))
            .and(body_partial_json(json!({ "webhook_id": "WH-1" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "verification_status": status })),
            )
            .mount(server)
            .await;
    }

    fn signed_delivery(event: &Value) -> WebhookDelivery {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("paypal-auth-algo", "SHA256withRSA"),
            ("paypal-cert-url", "https://api.paypal.com/cert.pem"),
            ("paypal-transmission-id", "tx-1"),
            ("paypal-transmission-sig", "c2lnbmF0dXJl"),
            ("paypal-transmission-time", "2026-10-19T10:00:00Z"),
        ] {
            headers.insert(name, HeaderValue::from_static(value));
        }
        WebhookDelivery {
            headers,
            body: serde_json::to_vec(event).unwrap().into(),
        }
    }

    #[test]
    fn amounts_respect_currency_exponent() {
        assert_eq!(format_amount(12_345, "USD"), "123.45");
        assert_eq!(format_amount(5, "eur"), "0.05");
        assert_eq!(format_amount(1_500, "JPY"), "1500");
        assert_eq!(format_amount(1_500, "HUF"), "1500");
    }

    #[tokio::test]
    async fn order_redirects_to_approve_link() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        let payment_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders"))
            .and(body_partial_json(json!({
                "intent": "CAPTURE",
                "purchase_units": [{ "custom_id": payment_id.to_string() }]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "ORDER-1",
                "status": "CREATED",
                "links": [
                    { "href": "https://api.paypal.com/v2/checkout/orders/ORDER-1", "rel": "self" },
                    { "href": "https://www.paypal.com/checkoutnow?token=ORDER-1", "rel": "approve" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = provider(&server.uri())
            .create_checkout(&CheckoutRequest {
                booking_id: Uuid::new_v4(),
                payment_id,
                amount: 2_599,
                currency: "USD".into(),
                success_url: "https://app.example.com/ok".into(),
                cancel_url: "https://app.example.com/cancel".into(),
                description: "Wine tasting".into(),
                customer_email: None,
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(session.redirect_url, "https://www.paypal.com/checkoutnow?token=ORDER-1");
        assert_eq!(session.provider_payment_id.as_deref(), Some("ORDER-1"));
    }

    #[tokio::test]
    async fn approved_order_is_captured() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_verification(&server, "SUCCESS").await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/ORDER-1/capture"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "ORDER-1",
                "status": "COMPLETED",
                "purchase_units": [{
                    "payments": { "captures": [{ "id": "CAP-1", "status": "COMPLETED" }] }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let payment_id = Uuid::new_v4();
        let event = json!({
            "event_type": "CHECKOUT.ORDER.APPROVED",
            "resource": {
                "id": "ORDER-1",
                "purchase_units": [{ "custom_id": payment_id.to_string() }]
            }
        });

        let notice = provider(&server.uri())
            .verify_webhook(&signed_delivery(&event))
            .await
            .unwrap();

        assert_eq!(notice.outcome, ProviderOutcome::Succeeded);
        assert_eq!(notice.reference, Some(PaymentRef::Internal(payment_id)));
    }

    #[tokio::test]
    async fn denied_capture_is_failure() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_verification(&server, "SUCCESS").await;

        let event = json!({
            "event_type": "PAYMENT.CAPTURE.DENIED",
            "resource": {
                "id": "CAP-9",
                "supplementary_data": { "related_ids": { "order_id": "ORDER-9" } }
            }
        });

        let notice = provider(&server.uri())
            .verify_webhook(&signed_delivery(&event))
            .await
            .unwrap();

        assert_eq!(notice.outcome, ProviderOutcome::Failed);
        assert_eq!(notice.reference, Some(PaymentRef::Provider("ORDER-9".into())));
    }

    #[tokio::test]
    async fn failed_verification_is_rejected() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_verification(&server, "FAILURE").await;

        let event = json!({ "event_type": "PAYMENT.CAPTURE.COMPLETED", "resource": {} });
        let err = provider(&server.uri())
            .verify_webhook(&signed_delivery(&event))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidSignature));
    }

    #[tokio::test]
    async fn missing_transmission_headers_are_rejected() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        let err = provider(&server.uri())
            .verify_webhook(&WebhookDelivery {
                headers: HeaderMap::new(),
                body: br#"{"event_type":"PAYMENT.CAPTURE.COMPLETED","resource":{}}"#.to_vec().into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidSignature));
    }
}
