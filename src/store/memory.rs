//! Хранилище в памяти процесса.
//!
//! Та же семантика, что у `PgStore`: каждый метод выполняется под одной
//! блокировкой, поэтому переходы атомарны. Используется в тестах и для
//! локального запуска без базы.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    plan_refund, plan_settlement, BookingStore, NewNotification, NewPayment, NewRefund,
    RefundReservation, Settlement, SettlementOutcome, StoreError,
};
use crate::models::{
    ticket::{generate_ticket_code, unique_ticket_code},
    Booking, BookingContext, BookingStatus, EmailSettings, Experience, ExperienceSession, Explorer,
    Notification, Payment, PaymentGateway, PaymentState, PaymentStatus, Refund, RefundStatus,
    Ticket, TicketStatus,
};

#[derive(Default)]
struct State {
    explorers: HashMap<Uuid, Explorer>,
    experiences: HashMap<Uuid, Experience>,
    sessions: HashMap<Uuid, ExperienceSession>,
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<Uuid, Payment>,
    gateways: HashMap<String, PaymentGateway>,
    tickets: Vec<Ticket>,
    notifications: Vec<Notification>,
    refunds: Vec<Refund>,
    email_settings: Option<EmailSettings>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Наполнение: контекст брони ведет основное приложение ---

    pub async fn insert_explorer(&self, explorer: Explorer) {
        self.state.lock().await.explorers.insert(explorer.id, explorer);
    }

    pub async fn insert_experience(&self, experience: Experience) {
        self.state
            .lock()
            .await
            .experiences
            .insert(experience.id, experience);
    }

    pub async fn insert_session(&self, session: ExperienceSession) {
        self.state.lock().await.sessions.insert(session.id, session);
    }

    pub async fn insert_booking(&self, booking: Booking) {
        self.state.lock().await.bookings.insert(booking.id, booking);
    }

    pub async fn set_email_settings(&self, settings: EmailSettings) {
        self.state.lock().await.email_settings = Some(settings);
    }

    // --- Инспекция для тестов ---

    pub async fn tickets_for(&self, booking_id: Uuid) -> Vec<Ticket> {
        self.state
            .lock()
            .await
            .tickets
            .iter()
            .filter(|t| t.booking_id == booking_id)
            .cloned()
            .collect()
    }

    pub async fn notifications_for(&self, explorer_id: Uuid) -> Vec<Notification> {
        self.state
            .lock()
            .await
            .notifications
            .iter()
            .filter(|n| n.explorer_id == explorer_id)
            .cloned()
            .collect()
    }

    pub async fn payments_for(&self, booking_id: Uuid) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .state
            .lock()
            .await
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        payments
    }

    pub async fn refunds_for(&self, payment_id: Uuid) -> Vec<Refund> {
        self.state
            .lock()
            .await
            .refunds
            .iter()
            .filter(|r| r.payment_id == payment_id)
            .cloned()
            .collect()
    }
}

fn sorted_gateways<'a>(gateways: impl Iterator<Item = &'a PaymentGateway>) -> Vec<PaymentGateway> {
    let mut list: Vec<PaymentGateway> = gateways.cloned().collect();
    list.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.key.cmp(&b.key)));
    list
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.state.lock().await.bookings.get(&id).cloned())
    }

    async fn booking_context(&self, id: Uuid) -> Result<Option<BookingContext>, StoreError> {
        let state = self.state.lock().await;
        let Some(booking) = state.bookings.get(&id) else {
            return Ok(None);
        };

        let context = match (
            state.explorers.get(&booking.explorer_id),
            state.experiences.get(&booking.experience_id),
            state.sessions.get(&booking.session_id),
        ) {
            (Some(explorer), Some(experience), Some(session)) => Some(BookingContext {
                booking: booking.clone(),
                explorer: explorer.clone(),
                experience: experience.clone(),
                session: session.clone(),
            }),
            _ => None,
        };
        Ok(context)
    }

    async fn set_hold_deadline_if_unset(
        &self,
        booking_id: Uuid,
        deadline: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get_mut(&booking_id)
            .ok_or(StoreError::NotFound("booking"))?;

        if let Some(existing) = booking.expires_at {
            return Ok(existing);
        }
        booking.expires_at = Some(deadline);
        booking.updated_at = Utc::now();
        Ok(deadline)
    }

    async fn create_payment(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        let mut state = self.state.lock().await;
        if !state.bookings.contains_key(&payment.booking_id) {
            return Err(StoreError::NotFound("booking"));
        }

        let now = Utc::now();
        let record = Payment {
            id: Uuid::new_v4(),
            booking_id: payment.booking_id,
            gateway_key: payment.gateway_key,
            amount: payment.amount,
            currency: payment.currency,
            status: PaymentState::Pending,
            provider_payment_id: None,
            captured_at: None,
            created_at: now,
            updated_at: now,
        };
        state.payments.insert(record.id, record.clone());

        if let Some(booking) = state.bookings.get_mut(&record.booking_id) {
            if booking.status == BookingStatus::Pending {
                booking.payment_id = Some(record.id);
                booking.updated_at = now;
            }
        }
        Ok(record)
    }

    async fn mark_checkout_started(
        &self,
        payment_id: Uuid,
        provider_payment_id: Option<String>,
    ) -> Result<Payment, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(StoreError::NotFound("payment"))?;
        if provider_payment_id.is_some() {
            payment.provider_payment_id = provider_payment_id;
        }
        if payment.status == PaymentState::Pending {
            payment.status = PaymentState::Processing;
        }
        payment.updated_at = now;
        let payment = payment.clone();

        if let Some(booking) = state.bookings.get_mut(&payment.booking_id) {
            if booking.payment_id == Some(payment_id)
                && booking.status == BookingStatus::Pending
                && matches!(
                    booking.payment_status,
                    PaymentStatus::RequiresPaymentMethod | PaymentStatus::Cancelled
                )
            {
                booking.payment_status = PaymentStatus::Processing;
                booking.updated_at = now;
            }
        }
        Ok(payment)
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.state.lock().await.payments.get(&id).cloned())
    }

    async fn find_payment_by_provider_id(
        &self,
        gateway_key: &str,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .payments
            .values()
            .find(|p| {
                p.gateway_key == gateway_key
                    && p.provider_payment_id.as_deref() == Some(provider_payment_id)
            })
            .cloned())
    }

    async fn settle_payment(
        &self,
        payment_id: Uuid,
        settlement: Settlement,
    ) -> Result<SettlementOutcome, StoreError> {
        let mut state = self.state.lock().await;

        let payment = state
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or(StoreError::NotFound("payment"))?;
        let booking = state
            .bookings
            .get(&payment.booking_id)
            .cloned()
            .ok_or(StoreError::NotFound("booking"))?;

        let plan = plan_settlement(&booking, &payment, settlement);
        if plan.outcome == SettlementOutcome::Unchanged {
            return Ok(plan.outcome);
        }

        let now = Utc::now();
        if let Some(p) = state.payments.get_mut(&payment_id) {
            if let Some(status) = plan.payment_status {
                p.status = status;
                p.updated_at = now;
            }
            if plan.captured_at.is_some() {
                p.captured_at = plan.captured_at;
            }
        }
        if let Some(b) = state.bookings.get_mut(&booking.id) {
            if let Some(status) = plan.booking_status {
                b.status = status;
                b.payment_id = Some(payment_id);
                b.updated_at = now;
            }
            if let Some(payment_status) = plan.booking_payment_status {
                b.payment_status = payment_status;
                b.updated_at = now;
            }
        }
        Ok(plan.outcome)
    }

    async fn cancel_expired_holds(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();

        for booking in state.bookings.values_mut() {
            if booking.eligible_for_expiry(now) {
                booking.status = BookingStatus::Cancelled;
                booking.updated_at = Utc::now();
                expired.push(booking.id);
            }
        }

        for payment in state.payments.values_mut() {
            if expired.contains(&payment.booking_id) && !payment.status.is_terminal() {
                payment.status = PaymentState::Cancelled;
                payment.updated_at = Utc::now();
            }
        }
        Ok(expired.len() as u64)
    }

    async fn cancel_pending_booking(&self, booking_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(booking) = state.bookings.get_mut(&booking_id) else {
            return Ok(false);
        };
        if booking.status != BookingStatus::Pending
            || booking.payment_status == PaymentStatus::Succeeded
        {
            return Ok(false);
        }
        booking.status = BookingStatus::Cancelled;
        booking.updated_at = Utc::now();

        for payment in state.payments.values_mut() {
            if payment.booking_id == booking_id && !payment.status.is_terminal() {
                payment.status = PaymentState::Cancelled;
                payment.updated_at = Utc::now();
            }
        }
        Ok(true)
    }

    async fn enabled_gateways(&self) -> Result<Vec<PaymentGateway>, StoreError> {
        let state = self.state.lock().await;
        Ok(sorted_gateways(state.gateways.values().filter(|g| g.is_enabled)))
    }

    async fn get_gateway(&self, key: &str) -> Result<Option<PaymentGateway>, StoreError> {
        Ok(self.state.lock().await.gateways.get(key).cloned())
    }

    async fn upsert_gateway(&self, gateway: PaymentGateway) -> Result<PaymentGateway, StoreError> {
        self.state
            .lock()
            .await
            .gateways
            .insert(gateway.key.clone(), gateway.clone());
        Ok(gateway)
    }

    async fn set_gateway_enabled(&self, key: &str, enabled: bool) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.gateways.get_mut(key) {
            Some(gateway) => {
                gateway.is_enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ensure_tickets(&self, booking_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(StoreError::NotFound("booking"))?;

        if !booking.is_confirmed_and_paid() {
            return Err(StoreError::InvalidState("tickets require a confirmed booking"));
        }

        for seat in 1..=booking.guests {
            let issued = state
                .tickets
                .iter()
                .any(|t| t.booking_id == booking_id && t.seat_number == seat);
            if !issued {
                let code = unique_ticket_code(generate_ticket_code, |code| {
                    state.tickets.iter().any(|t| t.code == code)
                })
                .ok_or(StoreError::InvalidState("no free ticket code"))?;
                state.tickets.push(Ticket {
                    id: Uuid::new_v4(),
                    code,
                    seat_number: seat,
                    status: TicketStatus::Valid,
                    booking_id,
                    session_id: booking.session_id,
                    explorer_id: booking.explorer_id,
                    issued_at: Utc::now(),
                });
            }
        }

        let mut tickets: Vec<Ticket> = state
            .tickets
            .iter()
            .filter(|t| t.booking_id == booking_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.seat_number);
        Ok(tickets)
    }

    async fn record_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError> {
        let record = Notification {
            id: Uuid::new_v4(),
            explorer_id: notification.explorer_id,
            booking_id: notification.booking_id,
            kind: notification.kind,
            title: notification.title,
            body: notification.body,
            created_at: Utc::now(),
        };
        self.state.lock().await.notifications.push(record.clone());
        Ok(record)
    }

    async fn reserve_refund(&self, refund: NewRefund) -> Result<RefundReservation, StoreError> {
        let mut state = self.state.lock().await;
        let Some(payment) = state.payments.get(&refund.payment_id) else {
            return Ok(RefundReservation::PaymentNotFound);
        };
        if payment.status != PaymentState::Succeeded {
            return Ok(RefundReservation::NotRefundable);
        }

        let refunded: i64 = state
            .refunds
            .iter()
            .filter(|r| r.payment_id == refund.payment_id)
            .map(|r| r.amount)
            .sum();
        let amount = match plan_refund(refund.amount, payment.amount, refunded) {
            Ok(amount) => amount,
            Err(refundable) => return Ok(RefundReservation::OutOfRange { refundable }),
        };

        let record = Refund {
            id: Uuid::new_v4(),
            payment_id: refund.payment_id,
            amount,
            status: RefundStatus::Pending,
            reason: refund.reason,
            provider_refund_id: None,
            created_at: Utc::now(),
        };
        state.refunds.push(record.clone());
        Ok(RefundReservation::Reserved(record))
    }

    async fn complete_refund(
        &self,
        refund_id: Uuid,
        provider_refund_id: Option<String>,
    ) -> Result<Refund, StoreError> {
        let mut state = self.state.lock().await;
        let refund = state
            .refunds
            .iter_mut()
            .find(|r| r.id == refund_id)
            .ok_or(StoreError::NotFound("refund"))?;
        refund.status = RefundStatus::Succeeded;
        refund.provider_refund_id = provider_refund_id;
        Ok(refund.clone())
    }

    async fn release_refund(&self, refund_id: Uuid) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .refunds
            .retain(|r| r.id != refund_id || r.status != RefundStatus::Pending);
        Ok(())
    }

    async fn refunded_total(&self, payment_id: Uuid) -> Result<i64, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .refunds
            .iter()
            .filter(|r| r.payment_id == payment_id)
            .map(|r| r.amount)
            .sum())
    }

    async fn email_settings(&self) -> Result<Option<EmailSettings>, StoreError> {
        Ok(self.state.lock().await.email_settings.clone())
    }
}
