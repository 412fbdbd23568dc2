//! Карточный процессор с хостинговыми checkout-сессиями.
//!
//! Сессия создается form-запросом с секретным ключом в `Authorization`,
//! вебхук подписан заголовком `Card-Signature: t=<unix>,v1=<hex>`, где
//! `v1 = HMAC-SHA256(webhook_secret, "<t>.<body>")`.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    payment_ref, read_json, CheckoutRequest, CheckoutSession, CircuitBreaker, PaymentProvider,
    ProviderError, ProviderOutcome, RefundReceipt, RefundRequest, WebhookDelivery, WebhookNotice,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "card-signature";
/// Допустимое расхождение часов между нами и процессором.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

fn default_api_base() -> String {
    "https://api.stripe.com".to_string()
}

#[derive(Clone, Deserialize)]
pub struct CardSettings {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionLookup {
    payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CardEvent {
    #[serde(rename = "type")]
    kind: String,
    data: CardEventData,
}

#[derive(Debug, Deserialize)]
struct CardEventData {
    object: SessionObject,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: Option<String>,
    client_reference_id: Option<String>,
    payment_status: Option<String>,
}

pub struct CardProcessor {
    key: String,
    settings: CardSettings,
    http: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
}

impl CardProcessor {
    pub fn new(
        key: impl Into<String>,
        settings: CardSettings,
        http: reqwest::Client,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            key: key.into(),
            settings,
            http,
            breaker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_base.trim_end_matches('/'), path)
    }

    /// Поля form-запроса checkout-сессии. Каждый ключ metadata попадает в
    /// форму один раз, идентификаторы брони и платежа всегда наши.
    fn checkout_form(request: &CheckoutRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("client_reference_id".to_string(), request.payment_id.to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                request.amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.description.clone(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }

        let mut metadata = request.metadata.clone();
        metadata.insert("booking_id".to_string(), request.booking_id.to_string());
        metadata.insert("payment_id".to_string(), request.payment_id.to_string());
        form.extend(
            metadata
                .into_iter()
                .map(|(name, value)| (format!("metadata[{}]", name), value)),
        );
        form
    }

    /// Проверяет заголовок подписи относительно момента `now` (unix-секунды).
    pub fn verify_signature(&self, header: &str, body: &[u8], now: i64) -> Result<(), ProviderError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(ProviderError::InvalidSignature)?;
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(ProviderError::InvalidSignature);
        }

        let mut mac = HmacSha256::new_from_slice(self.settings.webhook_secret.as_bytes())
            .map_err(|e| ProviderError::Misconfigured(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);

        let matched = signatures
            .iter()
            .filter_map(|sig| hex::decode(sig).ok())
            .any(|sig| mac.clone().verify_slice(&sig).is_ok());
        if matched {
            Ok(())
        } else {
            Err(ProviderError::InvalidSignature)
        }
    }

    fn map_event(event: CardEvent) -> WebhookNotice {
        let object = event.data.object;
        let outcome = match event.kind.as_str() {
            "checkout.session.completed" => match object.payment_status.as_deref() {
                Some("paid") | Some("no_payment_required") => ProviderOutcome::Succeeded,
                // Отложенные методы оплаты: деньги придут отдельным событием.
                _ => ProviderOutcome::Processing,
            },
            "checkout.session.async_payment_succeeded" => ProviderOutcome::Succeeded,
            "checkout.session.expired" | "checkout.session.async_payment_failed" => {
                ProviderOutcome::Failed
            }
            _ => return WebhookNotice::ignored(),
        };

        WebhookNotice {
            reference: payment_ref(object.client_reference_id.as_deref(), object.id.as_deref()),
            outcome,
        }
    }
}

#[async_trait]
impl PaymentProvider for CardProcessor {
    fn key(&self) -> &str {
        &self.key
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let form = Self::checkout_form(request);

        let session: SessionResponse = self
            .breaker
            .call(async {
                let response = self
                    .http
                    .post(self.url("/v1/checkout/sessions"))
                    .bearer_auth(&self.settings.secret_key)
                    .form(&form)
                    .send()
                    .await?;
                read_json(response).await
            })
            .await?;

        let redirect_url = session
            .url
            .ok_or_else(|| ProviderError::Malformed("checkout session has no url".into()))?;

        info!(gateway = %self.key, session_id = %session.id, "Card checkout session created");
        Ok(CheckoutSession {
            redirect_url,
            provider_payment_id: Some(session.id),
        })
    }

    async fn create_refund(&self, request: &RefundRequest) -> Result<RefundReceipt, ProviderError> {
        let session_id = request
            .provider_payment_id
            .as_deref()
            .ok_or_else(|| ProviderError::Rejected("payment has no checkout session".into()))?;

        let lookup: SessionLookup = self
            .breaker
            .call(async {
                let response = self
                    .http
                    .get(self.url(&format!("/v1/checkout/sessions/{}", session_id)))
                    .bearer_auth(&self.settings.secret_key)
                    .send()
                    .await?;
                read_json(response).await
            })
            .await?;
        let payment_intent = lookup
            .payment_intent
            .ok_or_else(|| ProviderError::Rejected("checkout session was never paid".into()))?;

        let mut form = vec![
            ("payment_intent".to_string(), payment_intent),
            ("amount".to_string(), request.amount.to_string()),
            ("metadata[payment_id]".to_string(), request.payment_id.to_string()),
        ];
        if let Some(reason) = &request.reason {
            form.push(("metadata[reason]".to_string(), reason.clone()));
        }

        let refund: RefundResponse = self
            .breaker
            .call(async {
                let response = self
                    .http
                    .post(self.url("/v1/refunds"))
                    .bearer_auth(&self.settings.secret_key)
                    .form(&form)
                    .send()
                    .await?;
                read_json(response).await
            })
            .await?;

        Ok(RefundReceipt {
            provider_refund_id: Some(refund.id),
            status: refund.status.unwrap_or_else(|| "pending".into()),
        })
    }

    async fn verify_webhook(
        &self,
        delivery: &WebhookDelivery,
    ) -> Result<WebhookNotice, ProviderError> {
        let header = delivery.header(SIGNATURE_HEADER).ok_or_else(|| {
            warn!(gateway = %self.key, "Card webhook without signature header");
            ProviderError::InvalidSignature
        })?;
        self.verify_signature(header, &delivery.body, Utc::now().timestamp())?;

        let event: CardEvent = serde_json::from_slice(&delivery.body)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Ok(Self::map_event(event))
    }
}
