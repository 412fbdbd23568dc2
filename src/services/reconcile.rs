use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::confirmation::ConfirmationRunner;
use crate::error::{ApiResult, AppError};
use crate::models::Payment;
use crate::providers::{PaymentRef, ProviderFactory, ProviderOutcome, WebhookDelivery};
use crate::store::{BookingStore, Settlement, SettlementOutcome};

/// Сверка итогов оплаты: вебхуки провайдеров и ручное подтверждение
/// администратором идут через один и тот же путь `settle`.
pub struct Reconciler {
    store: Arc<dyn BookingStore>,
    providers: Arc<dyn ProviderFactory>,
    confirmations: ConfirmationRunner,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn BookingStore>,
        providers: Arc<dyn ProviderFactory>,
        confirmations: ConfirmationRunner,
    ) -> Self {
        Self {
            store,
            providers,
            confirmations,
        }
    }

    /// Обрабатывает доставку вебхука для шлюза `gateway_key`.
    /// Любая ошибка до `settle` означает, что состояние не менялось.
    pub async fn handle(
        &self,
        gateway_key: &str,
        delivery: WebhookDelivery,
    ) -> ApiResult<SettlementOutcome> {
        // Выключенный шлюз не участвует в новых оплатах, но уведомления по
        // уже начатым платежам через него принимаются.
        let gateway = self
            .store
            .get_gateway(gateway_key)
            .await?
            .ok_or_else(|| AppError::NotFound("Платежный шлюз не найден".to_string()))?;

        let provider = self.providers.resolve(&gateway)?;
        let notice = provider.verify_webhook(&delivery).await.map_err(|e| {
            warn!(gateway = %gateway_key, error = %e, "Webhook rejected");
            AppError::from(e)
        })?;

        let settlement = match notice.outcome {
            ProviderOutcome::Succeeded => Settlement::Succeeded {
                captured_at: Utc::now(),
            },
            ProviderOutcome::Failed => Settlement::Failed,
            ProviderOutcome::Processing => Settlement::Processing,
            ProviderOutcome::Ignored => {
                info!(gateway = %gateway_key, "Webhook acknowledged without action");
                return Ok(SettlementOutcome::Unchanged);
            }
        };

        let reference = notice.reference.ok_or_else(|| {
            warn!(gateway = %gateway_key, "Webhook without payment reference");
            AppError::Authenticity("missing payment reference".to_string())
        })?;
        let payment = self.find_payment(gateway_key, &reference).await?;

        self.settle(payment.id, settlement).await
    }

    async fn find_payment(&self, gateway_key: &str, reference: &PaymentRef) -> ApiResult<Payment> {
        let payment = match reference {
            PaymentRef::Internal(id) => self.store.get_payment(*id).await?,
            PaymentRef::Provider(provider_id) => {
                self.store
                    .find_payment_by_provider_id(gateway_key, provider_id)
                    .await?
            }
        };

        match payment {
            Some(payment) if payment.gateway_key == gateway_key => Ok(payment),
            Some(payment) => {
                warn!(
                    gateway = %gateway_key,
                    payment_id = %payment.id,
                    owner = %payment.gateway_key,
                    "Webhook references a payment of another gateway"
                );
                Err(AppError::Authenticity("payment belongs to another gateway".to_string()))
            }
            None => {
                warn!(gateway = %gateway_key, ?reference, "Webhook references unknown payment");
                Err(AppError::Authenticity("unknown payment".to_string()))
            }
        }
    }

    /// Применяет итог к платежу и брони. Подтверждение запускает побочные
    /// эффекты только при фактическом переходе брони в CONFIRMED.
    pub async fn settle(
        &self,
        payment_id: Uuid,
        settlement: Settlement,
    ) -> ApiResult<SettlementOutcome> {
        let outcome = self.store.settle_payment(payment_id, settlement).await?;
        info!(%payment_id, ?settlement, ?outcome, "Payment settlement applied");

        if outcome == SettlementOutcome::Confirmed {
            if let Some(payment) = self.store.get_payment(payment_id).await? {
                match self.confirmations.run(payment.booking_id).await {
                    Ok(report) => info!(
                        booking_id = %report.booking_id,
                        tickets = report.tickets.len(),
                        notified = report.notified,
                        emailed = report.tickets_emailed,
                        "✅ Booking confirmed"
                    ),
                    Err(e) => error!(
                        booking_id = %payment.booking_id,
                        error = %e,
                        "Confirmation side effects failed"
                    ),
                }
            }
        }

        Ok(outcome)
    }

    /// Ручное подтверждение или отмена (наличные, разбор инцидентов).
    pub async fn settle_manually(
        &self,
        payment_id: Uuid,
        succeeded: bool,
    ) -> ApiResult<SettlementOutcome> {
        if self.store.get_payment(payment_id).await?.is_none() {
            return Err(AppError::NotFound("Платеж не найден".to_string()));
        }

        let settlement = if succeeded {
            Settlement::Succeeded {
                captured_at: Utc::now(),
            }
        } else {
            Settlement::Failed
        };
        self.settle(payment_id, settlement).await
    }
}
