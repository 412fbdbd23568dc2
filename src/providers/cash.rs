use async_trait::async_trait;

use super::{
    CheckoutRequest, CheckoutSession, PaymentProvider, ProviderError, RefundReceipt,
    RefundRequest, WebhookDelivery, WebhookNotice,
};

/// Оплата на месте. Никаких внешних вызовов: checkout сразу возвращает
/// на страницу успеха, а подтверждение делает администратор вручную.
#[derive(Debug, Clone)]
pub struct CashProvider {
    key: String,
}

impl CashProvider {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl PaymentProvider for CashProvider {
    fn key(&self) -> &str {
        &self.key
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        Ok(CheckoutSession {
            redirect_url: request.success_url.clone(),
            provider_payment_id: None,
        })
    }

    async fn create_refund(&self, _request: &RefundRequest) -> Result<RefundReceipt, ProviderError> {
        Err(ProviderError::Unsupported(
            "Возврат наличной оплаты выполняется вручную".into(),
        ))
    }

    async fn verify_webhook(
        &self,
        _delivery: &WebhookDelivery,
    ) -> Result<WebhookNotice, ProviderError> {
        Err(ProviderError::Unsupported("cash gateway has no webhooks".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[tokio::test]
    async fn checkout_redirects_to_success_url() {
        let provider = CashProvider::new("cash");
        let session = provider
            .create_checkout(&CheckoutRequest {
                booking_id: Uuid::new_v4(),
                payment_id: Uuid::new_v4(),
                amount: 1_000,
                currency: "USD".into(),
                success_url: "https://app.example.com/done".into(),
                cancel_url: "https://app.example.com/cancel".into(),
                description: "Sunset kayak".into(),
                customer_email: None,
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(session.redirect_url, "https://app.example.com/done");
        assert_eq!(session.provider_payment_id, None);
    }

    #[tokio::test]
    async fn refund_is_unsupported() {
        let err = CashProvider::new("cash")
            .create_refund(&RefundRequest {
                payment_id: Uuid::new_v4(),
                provider_payment_id: None,
                amount: 100,
                currency: "USD".into(),
                reason: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
    }
}
