//! Платежные провайдеры.
//!
//! Каждый шлюз из `payment_gateways` превращается в адаптер, реализующий
//! [`PaymentProvider`]. Оркестратор checkout, сверка вебхуков и возвраты
//! работают только через этот трейт и ничего не знают о конкретном API.

pub mod card;
pub mod cash;
pub mod circuit_breaker;
pub mod factory;
pub mod hosted;
pub mod paypal;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::HeaderMap;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::PaymentGateway;

pub use card::CardProcessor;
pub use cash::CashProvider;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use factory::GatewayProviderFactory;
pub use hosted::HostedGateway;
pub use paypal::PayPalProvider;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Операция не поддерживается этим типом шлюза (например, возврат наличных).
    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("webhook signature is invalid")]
    InvalidSignature,

    #[error("webhook does not reference a payment")]
    MissingReference,

    #[error("malformed provider payload: {0}")]
    Malformed(String),

    #[error("gateway is misconfigured: {0}")]
    Misconfigured(String),

    /// Провайдер ответил, но отказал (4xx или `success: false`).
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// Сеть, таймаут или 5xx.
    #[error("provider transport failure: {0}")]
    Transport(String),

    #[error("circuit breaker is open - provider temporarily unavailable")]
    CircuitOpen,
}

impl ProviderError {
    /// Сбой, который говорит о недоступности провайдера и учитывается
    /// автоматическим выключателем.
    pub fn is_outage(&self) -> bool {
        matches!(self, ProviderError::Transport(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub booking_id: Uuid,
    pub payment_id: Uuid,
    /// Сумма в минимальных единицах валюты.
    pub amount: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub description: String,
    pub customer_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub redirect_url: String,
    /// Идентификатор на стороне провайдера, если он есть (у наличных нет).
    pub provider_payment_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub payment_id: Uuid,
    pub provider_payment_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReceipt {
    pub provider_refund_id: Option<String>,
    pub status: String,
}

/// Сырая доставка вебхука: заголовки и неизмененное тело.
/// Подпись считается по байтам тела, поэтому парсить его заранее нельзя.
#[derive(Debug, Clone, Default)]
pub struct WebhookDelivery {
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WebhookDelivery {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Как вебхук ссылается на платеж.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentRef {
    /// Наш `payments.id`, переданный провайдеру при создании checkout.
    Internal(Uuid),
    /// Идентификатор провайдера (`payments.provider_payment_id`).
    Provider(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOutcome {
    Succeeded,
    Failed,
    Processing,
    /// Событие нас не интересует, подтверждаем получение и ничего не меняем.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotice {
    pub reference: Option<PaymentRef>,
    pub outcome: ProviderOutcome,
}

impl WebhookNotice {
    pub fn ignored() -> Self {
        Self {
            reference: None,
            outcome: ProviderOutcome::Ignored,
        }
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Ключ шлюза, из которого построен адаптер.
    fn key(&self) -> &str;

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError>;

    async fn create_refund(&self, request: &RefundRequest) -> Result<RefundReceipt, ProviderError>;

    /// Проверяет подлинность доставки и переводит ее в итог платежа.
    async fn verify_webhook(&self, delivery: &WebhookDelivery)
        -> Result<WebhookNotice, ProviderError>;
}

/// Строит адаптер по сохраненным настройкам шлюза.
pub trait ProviderFactory: Send + Sync {
    fn resolve(&self, gateway: &PaymentGateway) -> Result<Arc<dyn PaymentProvider>, ProviderError>;
}

/// Разбирает ответ провайдера: 5xx считаем сбоем транспорта, 4xx отказом.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if status.is_server_error() {
        return Err(ProviderError::Transport(format!("provider answered {}", status)));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Rejected(format!("{}: {}", status, body)));
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// Настройки адаптера из расшифрованного `config` шлюза.
pub(crate) fn settings<T: DeserializeOwned>(
    gateway_key: &str,
    config: serde_json::Value,
) -> Result<T, ProviderError> {
    serde_json::from_value(config)
        .map_err(|e| ProviderError::Misconfigured(format!("{}: {}", gateway_key, e)))
}

/// Ссылка на платеж: наш UUID, если провайдер вернул его, иначе его собственный id.
pub(crate) fn payment_ref(internal: Option<&str>, provider: Option<&str>) -> Option<PaymentRef> {
    internal
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .map(PaymentRef::Internal)
        .or_else(|| {
            provider
                .filter(|id| !id.is_empty())
                .map(|id| PaymentRef::Provider(id.to_string()))
        })
}
