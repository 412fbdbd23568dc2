use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::hold::hold_deadline;
use crate::error::{ApiResult, AppError};
use crate::models::PaymentGateway;
use crate::providers::{CheckoutRequest, ProviderFactory};
use crate::store::{BookingStore, NewPayment};

#[derive(Debug, Clone)]
pub struct CheckoutCommand {
    pub booking_id: Uuid,
    pub explorer_id: Uuid,
    pub success_url: String,
    pub cancel_url: String,
    /// Ключ шлюза, выбранный покупателем. Без него берется шлюз по умолчанию.
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResult {
    pub redirect_url: String,
    pub payment_id: Uuid,
    pub gateway_key: String,
    pub provider_payment_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Выбирает шлюз: явно запрошенный (только если включен), иначе первый
/// включенный по `sort_order`, затем по ключу.
pub async fn select_gateway(
    store: &dyn BookingStore,
    requested: Option<&str>,
) -> ApiResult<PaymentGateway> {
    match requested {
        Some(key) => match store.get_gateway(key).await? {
            Some(gateway) if gateway.is_enabled => Ok(gateway),
            _ => Err(AppError::Validation(format!(
                "Способ оплаты «{}» недоступен",
                key
            ))),
        },
        None => store
            .enabled_gateways()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("Нет доступных способов оплаты".to_string())),
    }
}

pub struct CheckoutService {
    store: Arc<dyn BookingStore>,
    providers: Arc<dyn ProviderFactory>,
}

impl CheckoutService {
    pub fn new(store: Arc<dyn BookingStore>, providers: Arc<dyn ProviderFactory>) -> Self {
        Self { store, providers }
    }

    pub async fn create_checkout_for_booking(
        &self,
        command: CheckoutCommand,
    ) -> ApiResult<CheckoutResult> {
        let booking = self
            .store
            .get_booking(command.booking_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Бронирование не найдено".to_string()))?;

        if booking.explorer_id != command.explorer_id {
            return Err(AppError::Forbidden(
                "Бронирование принадлежит другому пользователю".to_string(),
            ));
        }

        let now = Utc::now();
        if !booking.is_payable(now) {
            return Err(AppError::Conflict(
                "Бронирование больше нельзя оплатить".to_string(),
            ));
        }

        let gateway = select_gateway(self.store.as_ref(), command.provider_id.as_deref()).await?;
        let provider = self.providers.resolve(&gateway)?;

        let expires_at = self
            .store
            .set_hold_deadline_if_unset(booking.id, hold_deadline(booking.created_at))
            .await?;

        // Дедлайн считается от создания брони и мог истечь еще до первой оплаты.
        if expires_at <= now {
            info!(booking_id = %booking.id, %expires_at, "Hold lapsed before first checkout");
            return Err(AppError::Conflict(
                "Бронирование больше нельзя оплатить".to_string(),
            ));
        }

        let payment = self
            .store
            .create_payment(NewPayment {
                booking_id: booking.id,
                gateway_key: gateway.key.clone(),
                amount: booking.total_amount,
                currency: booking.currency.clone(),
            })
            .await?;

        let context = self.store.booking_context(booking.id).await?;
        let description = context
            .as_ref()
            .map(|c| c.experience.title.clone())
            .unwrap_or_else(|| format!("Booking {}", booking.id));
        let customer_email = context.map(|c| c.explorer.email);

        let mut metadata = BTreeMap::new();
        metadata.insert("booking_id".to_string(), booking.id.to_string());
        metadata.insert("payment_id".to_string(), payment.id.to_string());

        let request = CheckoutRequest {
            booking_id: booking.id,
            payment_id: payment.id,
            amount: payment.amount,
            currency: payment.currency.clone(),
            success_url: command.success_url,
            cancel_url: command.cancel_url,
            description,
            customer_email,
            metadata,
        };

        // Платеж остается PENDING, бронь не трогаем: покупатель может повторить.
        let session = provider.create_checkout(&request).await.map_err(|e| {
            error!(
                booking_id = %booking.id,
                payment_id = %payment.id,
                gateway = %gateway.key,
                error = %e,
                "Checkout creation failed"
            );
            AppError::from(e)
        })?;

        // Наличные: ничего не ушло провайдеру, платеж ждет ручного подтверждения.
        if session.provider_payment_id.is_some() {
            self.store
                .mark_checkout_started(payment.id, session.provider_payment_id.clone())
                .await?;
        }

        info!(
            booking_id = %booking.id,
            payment_id = %payment.id,
            gateway = %gateway.key,
            "💳 Checkout created"
        );

        Ok(CheckoutResult {
            redirect_url: session.redirect_url,
            payment_id: payment.id,
            gateway_key: gateway.key,
            provider_payment_id: session.provider_payment_id,
            expires_at,
        })
    }
}
