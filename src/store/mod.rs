//! Хранилище бронирований, платежей, шлюзов и билетов.
//!
//! Все переходы состояний выполняются здесь одной транзакцией: сервисы
//! только решают, *какой* переход нужен, а хранилище гарантирует, что
//! обновления Payment и Booking применяются вместе или не применяются вовсе.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Booking, BookingContext, BookingStatus, EmailSettings, Notification, Payment, PaymentGateway,
    PaymentState, PaymentStatus, Refund, Ticket, UnknownVariant,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

impl From<UnknownVariant> for StoreError {
    fn from(err: UnknownVariant) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub booking_id: Uuid,
    pub gateway_key: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub explorer_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub kind: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct NewRefund {
    pub payment_id: Uuid,
    /// `None` резервирует весь остаток.
    pub amount: Option<i64>,
    pub reason: Option<String>,
}

/// Результат попытки зарезервировать возврат.
#[derive(Debug, Clone)]
pub enum RefundReservation {
    /// Создана PENDING-запись, остаток платежа уже уменьшен на ее сумму.
    Reserved(Refund),
    PaymentNotFound,
    /// Платеж не в статусе SUCCEEDED.
    NotRefundable,
    OutOfRange { refundable: i64 },
}

/// Сумма возврата в пределах `1..=остаток`. Ошибка несет сам остаток.
pub fn plan_refund(requested: Option<i64>, captured: i64, refunded: i64) -> Result<i64, i64> {
    let refundable = (captured - refunded).max(0);
    let amount = requested.unwrap_or(refundable);
    if amount < 1 || amount > refundable {
        Err(refundable)
    } else {
        Ok(amount)
    }
}

/// Итог, который нужно применить к платежу.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Succeeded { captured_at: DateTime<Utc> },
    Failed,
    Processing,
}

/// Что реально изменилось после `settle_payment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Бронь перешла в CONFIRMED этим вызовом. Только в этом случае
    /// запускаются побочные эффекты подтверждения.
    Confirmed,
    /// Платеж прошел, но бронь уже была подтверждена раньше.
    AlreadyConfirmed,
    /// Промежуточный или неуспешный статус применен.
    Applied,
    /// Повторная доставка или терминальное состояние, ничего не менялось.
    Unchanged,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;

    async fn booking_context(&self, id: Uuid) -> Result<Option<BookingContext>, StoreError>;

    /// Выставляет `expires_at`, только если он еще пуст. Возвращает
    /// действующий дедлайн (новый или ранее сохраненный).
    async fn set_hold_deadline_if_unset(
        &self,
        booking_id: Uuid,
        deadline: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError>;

    /// Создает платеж в статусе PENDING и делает его текущим для брони.
    async fn create_payment(&self, payment: NewPayment) -> Result<Payment, StoreError>;

    /// Фиксирует, что провайдер принял checkout: сохраняет его идентификатор
    /// и переводит платеж и бронь в PROCESSING (если еще не терминальны).
    async fn mark_checkout_started(
        &self,
        payment_id: Uuid,
        provider_payment_id: Option<String>,
    ) -> Result<Payment, StoreError>;

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError>;

    async fn find_payment_by_provider_id(
        &self,
        gateway_key: &str,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// Атомарно применяет итог к Payment и Booking.
    async fn settle_payment(
        &self,
        payment_id: Uuid,
        settlement: Settlement,
    ) -> Result<SettlementOutcome, StoreError>;

    /// Отменяет все PENDING-брони с истекшим холдом и без успешной оплаты.
    /// Возвращает количество отмененных броней.
    async fn cancel_expired_holds(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Отмена брони владельцем: только пока PENDING и не оплачена.
    async fn cancel_pending_booking(&self, booking_id: Uuid) -> Result<bool, StoreError>;

    /// Включенные шлюзы в порядке `sort_order`, затем `key`.
    async fn enabled_gateways(&self) -> Result<Vec<PaymentGateway>, StoreError>;

    async fn get_gateway(&self, key: &str) -> Result<Option<PaymentGateway>, StoreError>;

    async fn upsert_gateway(&self, gateway: PaymentGateway) -> Result<PaymentGateway, StoreError>;

    async fn set_gateway_enabled(&self, key: &str, enabled: bool) -> Result<bool, StoreError>;

    /// Идемпотентно выпускает по билету на каждое место подтвержденной брони.
    async fn ensure_tickets(&self, booking_id: Uuid) -> Result<Vec<Ticket>, StoreError>;

    async fn record_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError>;

    /// Под блокировкой платежа сверяет сумму с остатком и создает
    /// PENDING-возврат. Незавершенные резервы тоже занимают остаток.
    async fn reserve_refund(&self, refund: NewRefund) -> Result<RefundReservation, StoreError>;

    /// Провайдер принял возврат: резерв становится SUCCEEDED.
    async fn complete_refund(
        &self,
        refund_id: Uuid,
        provider_refund_id: Option<String>,
    ) -> Result<Refund, StoreError>;

    /// Провайдер отказал: резерв удаляется и остаток освобождается.
    async fn release_refund(&self, refund_id: Uuid) -> Result<(), StoreError>;

    /// Сумма всех возвратов платежа, включая резервы.
    async fn refunded_total(&self, payment_id: Uuid) -> Result<i64, StoreError>;

    async fn email_settings(&self) -> Result<Option<EmailSettings>, StoreError>;
}

/// Изменения, которые нужно записать при применении итога платежа.
/// Оба хранилища применяют один и тот же план, чтобы правила переходов
/// жили в одном месте.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    pub payment_status: Option<PaymentState>,
    pub captured_at: Option<DateTime<Utc>>,
    pub booking_status: Option<BookingStatus>,
    pub booking_payment_status: Option<PaymentStatus>,
    pub outcome: SettlementOutcome,
}

impl SettlementPlan {
    fn unchanged() -> Self {
        Self {
            payment_status: None,
            captured_at: None,
            booking_status: None,
            booking_payment_status: None,
            outcome: SettlementOutcome::Unchanged,
        }
    }
}

pub fn plan_settlement(booking: &Booking, payment: &Payment, settlement: Settlement) -> SettlementPlan {
    let is_current = booking.payment_id == Some(payment.id);

    match settlement {
        Settlement::Succeeded { captured_at } => {
            let captured_at = payment.captured_at.unwrap_or(captured_at);

            if booking.status == BookingStatus::Confirmed {
                if payment.status == PaymentState::Succeeded {
                    return SettlementPlan::unchanged();
                }
                // Деньги по второй попытке все равно списаны, фиксируем это.
                return SettlementPlan {
                    payment_status: Some(PaymentState::Succeeded),
                    captured_at: Some(captured_at),
                    booking_status: None,
                    booking_payment_status: None,
                    outcome: SettlementOutcome::AlreadyConfirmed,
                };
            }

            SettlementPlan {
                payment_status: Some(PaymentState::Succeeded),
                captured_at: Some(captured_at),
                booking_status: Some(BookingStatus::Confirmed),
                booking_payment_status: Some(PaymentStatus::Succeeded),
                outcome: SettlementOutcome::Confirmed,
            }
        }
        Settlement::Failed => {
            if payment.status.is_terminal() {
                return SettlementPlan::unchanged();
            }
            let touch_booking = is_current
                && booking.status != BookingStatus::Confirmed
                && booking.payment_status != PaymentStatus::Succeeded;

            SettlementPlan {
                payment_status: Some(PaymentState::Cancelled),
                captured_at: None,
                booking_status: None,
                booking_payment_status: touch_booking.then_some(PaymentStatus::Cancelled),
                outcome: SettlementOutcome::Applied,
            }
        }
        Settlement::Processing => {
            if payment.status.is_terminal() {
                return SettlementPlan::unchanged();
            }
            let payment_status =
                (payment.status == PaymentState::Pending).then_some(PaymentState::Processing);
            let booking_payment_status = (is_current
                && booking.status == BookingStatus::Pending
                && matches!(
                    booking.payment_status,
                    PaymentStatus::RequiresPaymentMethod | PaymentStatus::Cancelled
                ))
            .then_some(PaymentStatus::Processing);

            if payment_status.is_none() && booking_payment_status.is_none() {
                return SettlementPlan::unchanged();
            }
            SettlementPlan {
                payment_status,
                captured_at: None,
                booking_status: None,
                booking_payment_status,
                outcome: SettlementOutcome::Applied,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pair(status: BookingStatus, payment_status: PaymentStatus, state: PaymentState) -> (Booking, Payment) {
        let now = Utc::now();
        let payment_id = Uuid::new_v4();
        let booking = Booking {
            id: Uuid::new_v4(),
            explorer_id: Uuid::new_v4(),
            experience_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            status,
            payment_status,
            expires_at: Some(now),
            total_amount: 5_000,
            currency: "USD".into(),
            guests: 1,
            payment_id: Some(payment_id),
            created_at: now,
            updated_at: now,
        };
        let payment = Payment {
            id: payment_id,
            booking_id: booking.id,
            gateway_key: "cash".into(),
            amount: 5_000,
            currency: "USD".into(),
            status: state,
            provider_payment_id: None,
            captured_at: None,
            created_at: now,
            updated_at: now,
        };
        (booking, payment)
    }

    #[test]
    fn success_confirms_pending_booking() {
        let (b, p) = pair(BookingStatus::Pending, PaymentStatus::Processing, PaymentState::Processing);
        let plan = plan_settlement(&b, &p, Settlement::Succeeded { captured_at: Utc::now() });

        assert_eq!(plan.outcome, SettlementOutcome::Confirmed);
        assert_eq!(plan.booking_status, Some(BookingStatus::Confirmed));
        assert_eq!(plan.booking_payment_status, Some(PaymentStatus::Succeeded));
        assert!(plan.captured_at.is_some());
    }

    #[test]
    fn redelivered_success_is_unchanged() {
        let (b, p) = pair(BookingStatus::Confirmed, PaymentStatus::Succeeded, PaymentState::Succeeded);
        let plan = plan_settlement(&b, &p, Settlement::Succeeded { captured_at: Utc::now() });
        assert_eq!(plan, SettlementPlan::unchanged());
    }

    #[test]
    fn failure_keeps_booking_pending() {
        let (b, p) = pair(BookingStatus::Pending, PaymentStatus::Processing, PaymentState::Processing);
        let plan = plan_settlement(&b, &p, Settlement::Failed);

        assert_eq!(plan.payment_status, Some(PaymentState::Cancelled));
        assert_eq!(plan.booking_status, None);
        assert_eq!(plan.booking_payment_status, Some(PaymentStatus::Cancelled));
    }

    #[test]
    fn late_failure_never_downgrades_captured_payment() {
        let (b, p) = pair(BookingStatus::Confirmed, PaymentStatus::Succeeded, PaymentState::Succeeded);
        assert_eq!(plan_settlement(&b, &p, Settlement::Failed), SettlementPlan::unchanged());
    }

    #[test]
    fn failure_of_stale_attempt_leaves_booking_alone() {
        let (mut b, p) = pair(BookingStatus::Pending, PaymentStatus::Processing, PaymentState::Processing);
        b.payment_id = Some(Uuid::new_v4());
        let plan = plan_settlement(&b, &p, Settlement::Failed);

        assert_eq!(plan.payment_status, Some(PaymentState::Cancelled));
        assert_eq!(plan.booking_payment_status, None);
    }

    #[test]
    fn refund_fits_into_what_is_left() {
        assert_eq!(plan_refund(Some(4_000), 10_000, 0), Ok(4_000));
        assert_eq!(plan_refund(None, 10_000, 4_000), Ok(6_000));
        assert_eq!(plan_refund(Some(7_000), 10_000, 4_000), Err(6_000));
        assert_eq!(plan_refund(Some(0), 10_000, 0), Err(10_000));
        assert_eq!(plan_refund(None, 10_000, 10_000), Err(0));
    }

    fn apply(booking: &mut Booking, payment: &mut Payment, plan: &SettlementPlan) {
        if let Some(status) = plan.payment_status {
            payment.status = status;
        }
        if plan.captured_at.is_some() {
            payment.captured_at = plan.captured_at;
        }
        if let Some(status) = plan.booking_status {
            booking.status = status;
        }
        if let Some(status) = plan.booking_payment_status {
            booking.payment_status = status;
        }
    }

    fn settlement() -> impl Strategy<Value = Settlement> {
        prop_oneof![
            Just(Settlement::Succeeded { captured_at: Utc::now() }),
            Just(Settlement::Failed),
            Just(Settlement::Processing),
        ]
    }

    proptest! {
        // В любом порядке доставок: CONFIRMED только вместе с SUCCEEDED,
        // и списанный платеж больше не откатывается.
        #[test]
        fn confirmed_booking_is_always_paid(events in proptest::collection::vec(settlement(), 1..12)) {
            let (mut b, mut p) = pair(BookingStatus::Pending, PaymentStatus::RequiresPaymentMethod, PaymentState::Pending);
            let mut captured = false;

            for event in events {
                let plan = plan_settlement(&b, &p, event);
                apply(&mut b, &mut p, &plan);

                prop_assert!(b.is_consistent());
                if captured {
                    prop_assert_eq!(p.status, PaymentState::Succeeded);
                    prop_assert_eq!(b.status, BookingStatus::Confirmed);
                }
                captured = p.status == PaymentState::Succeeded;
            }
        }
    }
}
