use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiResult, AppError};
use crate::models::{PaymentState, Refund};
use crate::providers::{ProviderError, ProviderFactory, RefundRequest};
use crate::store::{BookingStore, NewRefund, RefundReservation};

/// Возврат по успешному платежу через тот шлюз, которым он был оплачен.
pub struct RefundService {
    store: Arc<dyn BookingStore>,
    providers: Arc<dyn ProviderFactory>,
}

impl RefundService {
    pub fn new(store: Arc<dyn BookingStore>, providers: Arc<dyn ProviderFactory>) -> Self {
        Self { store, providers }
    }

    pub async fn refund(
        &self,
        payment_id: Uuid,
        amount: Option<i64>,
        reason: Option<String>,
    ) -> ApiResult<Refund> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Платеж не найден".to_string()))?;

        if payment.status != PaymentState::Succeeded {
            return Err(AppError::Conflict(
                "Вернуть можно только успешный платеж".to_string(),
            ));
        }

        // Шлюз мог быть выключен после оплаты, возврат все равно идет через него.
        let gateway = self
            .store
            .get_gateway(&payment.gateway_key)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!("gateway {} disappeared", payment.gateway_key))
            })?;
        let provider = self.providers.resolve(&gateway)?;

        // Сумма резервируется до обращения к провайдеру: параллельный
        // возврат увидит ее в остатке.
        let reserved = match self
            .store
            .reserve_refund(NewRefund {
                payment_id: payment.id,
                amount,
                reason: reason.clone(),
            })
            .await?
        {
            RefundReservation::Reserved(refund) => refund,
            RefundReservation::PaymentNotFound => {
                return Err(AppError::NotFound("Платеж не найден".to_string()))
            }
            RefundReservation::NotRefundable => {
                return Err(AppError::Conflict(
                    "Вернуть можно только успешный платеж".to_string(),
                ))
            }
            RefundReservation::OutOfRange { refundable } => {
                return Err(AppError::Validation(format!(
                    "Сумма возврата должна быть от 1 до {}",
                    refundable
                )))
            }
        };

        let result = provider
            .create_refund(&RefundRequest {
                payment_id: payment.id,
                provider_payment_id: payment.provider_payment_id.clone(),
                amount: reserved.amount,
                currency: payment.currency.clone(),
                reason,
            })
            .await;

        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) => {
                match &e {
                    ProviderError::Unsupported(_) => {
                        info!(%payment_id, gateway = %payment.gateway_key, "Refund not supported by gateway")
                    }
                    _ => warn!(%payment_id, gateway = %payment.gateway_key, error = %e, "Refund failed"),
                }
                self.store.release_refund(reserved.id).await?;
                return Err(AppError::from(e));
            }
        };

        let refund = self
            .store
            .complete_refund(reserved.id, receipt.provider_refund_id)
            .await?;

        info!(
            %payment_id,
            refund_id = %refund.id,
            amount = refund.amount,
            status = %receipt.status,
            "💸 Refund accepted by provider"
        );
        Ok(refund)
    }
}
