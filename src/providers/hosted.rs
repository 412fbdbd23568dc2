//! Шлюз с хостинговой платежной формой (альтернативные карточные шлюзы).
//!
//! Запросы подписываются токеном SHA-256 от конкатенации полей запроса,
//! пароля и идентификатора продавца. Вебхук приходит с тем же видом токена
//! над `paymentId + orderId + status`. Таких шлюзов может быть несколько,
//! каждый со своим ключом и учетными данными.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::{
    payment_ref, read_json, CheckoutRequest, CheckoutSession, CircuitBreaker, PaymentProvider,
    ProviderError, ProviderOutcome, RefundReceipt, RefundRequest, WebhookDelivery, WebhookNotice,
};

fn default_language() -> String {
    "ru".to_string()
}

#[derive(Clone, Deserialize)]
pub struct HostedSettings {
    pub api_base: String,
    pub merchant_id: String,
    pub password: String,
    #[serde(default = "default_language")]
    pub language: String,
}

// --- Модели данных для API шлюза ---

#[derive(Debug, Serialize)]
struct PaymentInitRequest<'a> {
    #[serde(rename = "teamSlug")]
    team_slug: &'a str,
    token: String,
    amount: i64,
    #[serde(rename = "orderId")]
    order_id: String,
    currency: &'a str,
    description: &'a str,
    #[serde(rename = "successURL")]
    success_url: &'a str,
    #[serde(rename = "failURL")]
    fail_url: &'a str,
    #[serde(rename = "notificationURL")]
    notification_url: &'a str,
    email: Option<&'a str>,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct PaymentInitResponse {
    success: bool,
    #[serde(rename = "paymentId")]
    payment_id: Option<String>,
    #[serde(rename = "paymentURL")]
    payment_url: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct PaymentRefundRequest<'a> {
    #[serde(rename = "teamSlug")]
    team_slug: &'a str,
    token: String,
    #[serde(rename = "paymentId")]
    payment_id: &'a str,
    amount: i64,
    currency: &'a str,
    reason: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PaymentRefundResponse {
    success: bool,
    #[serde(rename = "refundId")]
    refund_id: Option<String>,
    status: Option<String>,
    message: Option<String>,
}

/// Тело уведомления. Шлюз шлет его формой, старые интеграции присылают JSON.
#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "paymentId")]
    payment_id: String,
    #[serde(rename = "orderId", default)]
    order_id: String,
    status: String,
    token: String,
}

pub struct HostedGateway {
    key: String,
    settings: HostedSettings,
    notification_url: String,
    http: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
}

fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

impl HostedGateway {
    pub fn new(
        key: impl Into<String>,
        settings: HostedSettings,
        notification_url: String,
        http: reqwest::Client,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            key: key.into(),
            settings,
            notification_url,
            http,
            breaker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_base.trim_end_matches('/'), path)
    }

    /// Токен запроса на инициацию платежа.
    fn init_token(&self, amount: i64, currency: &str, order_id: &str) -> String {
        sha256_hex(&format!(
            "{}{}{}{}{}",
            amount, currency, order_id, self.settings.password, self.settings.merchant_id
        ))
    }

    fn refund_token(&self, amount: i64, currency: &str, payment_id: &str) -> String {
        sha256_hex(&format!(
            "{}{}{}{}{}",
            amount, currency, payment_id, self.settings.password, self.settings.merchant_id
        ))
    }

    /// Токен, которым шлюз подписывает уведомление.
    pub fn notification_token(&self, payment_id: &str, order_id: &str, status: &str) -> String {
        sha256_hex(&format!(
            "{}{}{}{}{}",
            payment_id, order_id, status, self.settings.password, self.settings.merchant_id
        ))
    }

    fn parse_notification(body: &[u8]) -> Result<Notification, ProviderError> {
        let first = body.iter().find(|b| !b.is_ascii_whitespace());
        if first == Some(&b'{') {
            serde_json::from_slice(body).map_err(|e| ProviderError::Malformed(e.to_string()))
        } else {
            serde_urlencoded::from_bytes(body).map_err(|e| ProviderError::Malformed(e.to_string()))
        }
    }

    fn map_status(status: &str) -> ProviderOutcome {
        match status {
            "CONFIRMED" => ProviderOutcome::Succeeded,
            "CANCELLED" | "FAILED" | "REJECTED" | "EXPIRED" => ProviderOutcome::Failed,
            "AUTHORIZED" => ProviderOutcome::Processing,
            _ => ProviderOutcome::Ignored,
        }
    }
}

#[async_trait]
impl PaymentProvider for HostedGateway {
    fn key(&self) -> &str {
        &self.key
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let order_id = request.payment_id.to_string();
        let body = PaymentInitRequest {
            team_slug: &self.settings.merchant_id,
            token: self.init_token(request.amount, &request.currency, &order_id),
            amount: request.amount,
            order_id,
            currency: &request.currency,
            description: &request.description,
            success_url: &request.success_url,
            fail_url: &request.cancel_url,
            notification_url: &self.notification_url,
            email: request.customer_email.as_deref(),
            language: &self.settings.language,
        };

        info!(
            gateway = %self.key,
            amount = request.amount,
            currency = %request.currency,
            "Initiating hosted-form payment"
        );

        let response: PaymentInitResponse = self
            .breaker
            .call(async {
                let response = self
                    .http
                    .post(self.url("/api/v1/PaymentInit/init"))
                    .json(&body)
                    .send()
                    .await?;
                read_json(response).await
            })
            .await?;

        if !response.success {
            return Err(ProviderError::Rejected(
                response.message.unwrap_or_else(|| "payment init failed".into()),
            ));
        }
        let redirect_url = response
            .payment_url
            .ok_or_else(|| ProviderError::Malformed("init response has no paymentURL".into()))?;

        Ok(CheckoutSession {
            redirect_url,
            provider_payment_id: response.payment_id,
        })
    }

    async fn create_refund(&self, request: &RefundRequest) -> Result<RefundReceipt, ProviderError> {
        let payment_id = request
            .provider_payment_id
            .as_deref()
            .ok_or_else(|| ProviderError::Rejected("payment was never registered at gateway".into()))?;

        let body = PaymentRefundRequest {
            team_slug: &self.settings.merchant_id,
            token: self.refund_token(request.amount, &request.currency, payment_id),
            payment_id,
            amount: request.amount,
            currency: &request.currency,
            reason: request.reason.as_deref(),
        };

        let response: PaymentRefundResponse = self
            .breaker
            .call(async {
                let response = self
                    .http
                    .post(self.url("/api/v1/PaymentRefund/refund"))
                    .json(&body)
                    .send()
                    .await?;
                read_json(response).await
            })
            .await?;

        if !response.success {
            return Err(ProviderError::Rejected(
                response.message.unwrap_or_else(|| "refund failed".into()),
            ));
        }
        Ok(RefundReceipt {
            provider_refund_id: response.refund_id,
            status: response.status.unwrap_or_else(|| "REFUNDED".into()),
        })
    }

    async fn verify_webhook(
        &self,
        delivery: &WebhookDelivery,
    ) -> Result<WebhookNotice, ProviderError> {
        let notification = Self::parse_notification(&delivery.body)?;

        let expected = self.notification_token(
            &notification.payment_id,
            &notification.order_id,
            &notification.status,
        );
        let valid: bool = expected
            .as_bytes()
            .ct_eq(notification.token.to_ascii_lowercase().as_bytes())
            .into();
        if !valid {
            warn!(gateway = %self.key, payment_id = %notification.payment_id, "Hosted webhook token mismatch");
            return Err(ProviderError::InvalidSignature);
        }

        let outcome = Self::map_status(&notification.status);
        if outcome == ProviderOutcome::Ignored {
            return Ok(WebhookNotice::ignored());
        }

        Ok(WebhookNotice {
            reference: payment_ref(Some(&notification.order_id), Some(&notification.payment_id)),
            outcome,
        })
    }
}
