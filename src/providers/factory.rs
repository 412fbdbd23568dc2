use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{
    card::CardSettings, hosted::HostedSettings, paypal::PayPalSettings, settings, CardProcessor,
    CashProvider, CircuitBreaker, HostedGateway, PayPalProvider, PaymentProvider, ProviderError,
    ProviderFactory,
};
use crate::config::{CircuitBreakerConfig, PaymentConfig};
use crate::crypto::SecretCipher;
use crate::models::{GatewayType, PaymentGateway};

pub const PROTOCOL_CARD_PROCESSOR: &str = "card_processor";
pub const PROTOCOL_HOSTED_FORM: &str = "hosted_form";

/// Строит адаптер из сохраненной записи шлюза при каждом обращении.
///
/// Адаптеры не кешируются: правка настроек администратором действует со
/// следующего запроса, а секреты расшифровываются только на время вызова.
/// Между построениями живут лишь автоматические выключатели, по одному на
/// ключ шлюза, иначе счетчик сбоев обнулялся бы на каждом запросе.
pub struct GatewayProviderFactory {
    http: reqwest::Client,
    cipher: SecretCipher,
    payment: PaymentConfig,
    breaker_config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl GatewayProviderFactory {
    pub fn new(
        cipher: SecretCipher,
        payment: PaymentConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(payment.http_timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Misconfigured(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            cipher,
            payment,
            breaker_config,
            breakers: Mutex::new(HashMap::new()),
        })
    }

    fn breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    key,
                    self.breaker_config.failure_threshold,
                    Duration::from_secs(self.breaker_config.timeout_seconds),
                ))
            })
            .clone()
    }
}

impl ProviderFactory for GatewayProviderFactory {
    fn resolve(&self, gateway: &PaymentGateway) -> Result<Arc<dyn PaymentProvider>, ProviderError> {
        let key = gateway.key.as_str();

        if gateway.gateway_type == GatewayType::Cash {
            return Ok(Arc::new(CashProvider::new(key)));
        }

        let config = self
            .cipher
            .open_config(&gateway.config)
            .map_err(|e| ProviderError::Misconfigured(format!("{}: {}", key, e)))?;

        let provider: Arc<dyn PaymentProvider> = match gateway.gateway_type {
            GatewayType::Paypal => Arc::new(PayPalProvider::new(
                key,
                settings::<PayPalSettings>(key, config)?,
                gateway.test_mode,
                self.http.clone(),
                self.breaker(key),
            )),
            GatewayType::Card => {
                match gateway.config_str("protocol").unwrap_or(PROTOCOL_CARD_PROCESSOR) {
                    PROTOCOL_CARD_PROCESSOR => Arc::new(CardProcessor::new(
                        key,
                        settings::<CardSettings>(key, config)?,
                        self.http.clone(),
                        self.breaker(key),
                    )),
                    PROTOCOL_HOSTED_FORM => Arc::new(HostedGateway::new(
                        key,
                        settings::<HostedSettings>(key, config)?,
                        self.payment.webhook_url(key),
                        self.http.clone(),
                        self.breaker(key),
                    )),
                    other => {
                        return Err(ProviderError::Misconfigured(format!(
                            "{}: unknown protocol {}",
                            key, other
                        )))
                    }
                }
            }
            GatewayType::Cash => Arc::new(CashProvider::new(key)),
        };

        Ok(provider)
    }
}
