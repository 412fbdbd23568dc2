use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    plan_refund, plan_settlement, BookingStore, NewNotification, NewPayment, NewRefund,
    RefundReservation, Settlement, SettlementOutcome, StoreError,
};
use crate::{
    database::Database,
    models::{
        ticket::{generate_ticket_code, CODE_ATTEMPTS},
        Booking, BookingContext, EmailSettings, Experience, ExperienceSession, Explorer,
        Notification, Payment, PaymentGateway, PaymentState, Refund, RefundStatus, Ticket,
    },
};

const BOOKING_COLUMNS: &str = "id, explorer_id, experience_id, session_id, status, payment_status, \
     expires_at, total_amount, currency, guests, payment_id, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, booking_id, gateway_key, amount, currency, status, \
     provider_payment_id, captured_at, created_at, updated_at";

const GATEWAY_COLUMNS: &str =
    "key, name, gateway_type, config, test_mode, is_enabled, logo_url, sort_order";

const TICKET_COLUMNS: &str =
    "id, code, seat_number, status, booking_id, session_id, explorer_id, issued_at";

const REFUND_COLUMNS: &str =
    "id, payment_id, amount, status, reason, provider_refund_id, created_at";

// --- Строки БД: статусы хранятся как TEXT и разбираются при чтении ---

#[derive(FromRow)]
struct BookingRow {
    id: Uuid,
    explorer_id: Uuid,
    experience_id: Uuid,
    session_id: Uuid,
    status: String,
    payment_status: String,
    expires_at: Option<DateTime<Utc>>,
    total_amount: i64,
    currency: String,
    guests: i32,
    payment_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            explorer_id: row.explorer_id,
            experience_id: row.experience_id,
            session_id: row.session_id,
            status: row.status.parse()?,
            payment_status: row.payment_status.parse()?,
            expires_at: row.expires_at,
            total_amount: row.total_amount,
            currency: row.currency,
            guests: row.guests,
            payment_id: row.payment_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    booking_id: Uuid,
    gateway_key: String,
    amount: i64,
    currency: String,
    status: String,
    provider_payment_id: Option<String>,
    captured_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            booking_id: row.booking_id,
            gateway_key: row.gateway_key,
            amount: row.amount,
            currency: row.currency,
            status: row.status.parse()?,
            provider_payment_id: row.provider_payment_id,
            captured_at: row.captured_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct GatewayRow {
    key: String,
    name: String,
    gateway_type: String,
    config: serde_json::Value,
    test_mode: bool,
    is_enabled: bool,
    logo_url: Option<String>,
    sort_order: i32,
}

impl TryFrom<GatewayRow> for PaymentGateway {
    type Error = StoreError;

    fn try_from(row: GatewayRow) -> Result<Self, Self::Error> {
        Ok(PaymentGateway {
            key: row.key,
            name: row.name,
            gateway_type: row.gateway_type.parse()?,
            config: row.config,
            test_mode: row.test_mode,
            is_enabled: row.is_enabled,
            logo_url: row.logo_url,
            sort_order: row.sort_order,
        })
    }
}

#[derive(FromRow)]
struct TicketRow {
    id: Uuid,
    code: String,
    seat_number: i32,
    status: String,
    booking_id: Uuid,
    session_id: Uuid,
    explorer_id: Uuid,
    issued_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            code: row.code,
            seat_number: row.seat_number,
            status: row.status.parse()?,
            booking_id: row.booking_id,
            session_id: row.session_id,
            explorer_id: row.explorer_id,
            issued_at: row.issued_at,
        })
    }
}

#[derive(FromRow)]
struct RefundRow {
    id: Uuid,
    payment_id: Uuid,
    amount: i64,
    status: String,
    reason: Option<String>,
    provider_refund_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RefundRow> for Refund {
    type Error = StoreError;

    fn try_from(row: RefundRow) -> Result<Self, Self::Error> {
        Ok(Refund {
            id: row.id,
            payment_id: row.payment_id,
            amount: row.amount,
            status: row.status.parse()?,
            reason: row.reason,
            provider_refund_id: row.provider_refund_id,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ContextRow {
    explorer_email: String,
    explorer_name: String,
    experience_title: String,
    experience_location: Option<String>,
    session_starts_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct EmailSettingsRow {
    host: String,
    port: i32,
    username: String,
    password: String,
    from_email: String,
    from_name: String,
}

/// Хранилище поверх PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    db: Database,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn lock_booking(
        tx: &mut Transaction<'_, Postgres>,
        booking_id: Uuid,
    ) -> Result<Booking, StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE id = $1 FOR UPDATE",
            BOOKING_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.ok_or(StoreError::NotFound("booking"))?.try_into()
    }

    async fn lock_payment(
        tx: &mut Transaction<'_, Postgres>,
        payment_id: Uuid,
    ) -> Result<Payment, StoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE id = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.ok_or(StoreError::NotFound("payment"))?.try_into()
    }

    // booking_id у платежа неизменен, читаем его без блокировки, чтобы
    // дальше брать блокировки в едином порядке: сначала бронь, потом платеж.
    async fn payment_booking_id(&self, payment_id: Uuid) -> Result<Uuid, StoreError> {
        sqlx::query_scalar::<_, Uuid>("SELECT booking_id FROM payments WHERE id = $1")
            .bind(payment_id)
            .fetch_optional(&self.db.pool)
            .await?
            .ok_or(StoreError::NotFound("payment"))
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;

        row.map(Booking::try_from).transpose()
    }

    async fn booking_context(&self, id: Uuid) -> Result<Option<BookingContext>, StoreError> {
        let Some(booking) = self.get_booking(id).await? else {
            return Ok(None);
        };

        let ctx: Option<ContextRow> = sqlx::query_as(
            r#"
            SELECT u.email AS explorer_email,
                   u.display_name AS explorer_name,
                   e.title AS experience_title,
                   e.location AS experience_location,
                   s.starts_at AS session_starts_at
            FROM bookings b
            JOIN explorers u ON u.id = b.explorer_id
            JOIN experiences e ON e.id = b.experience_id
            JOIN experience_sessions s ON s.id = b.session_id
            WHERE b.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(ctx.map(|row| BookingContext {
            explorer: Explorer {
                id: booking.explorer_id,
                email: row.explorer_email,
                display_name: row.explorer_name,
            },
            experience: Experience {
                id: booking.experience_id,
                title: row.experience_title,
                location: row.experience_location,
            },
            session: ExperienceSession {
                id: booking.session_id,
                starts_at: row.session_starts_at,
            },
            booking,
        }))
    }

    async fn set_hold_deadline_if_unset(
        &self,
        booking_id: Uuid,
        deadline: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        // COALESCE не дает продлить уже выставленный холд.
        let effective: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            "UPDATE bookings
             SET expires_at = COALESCE(expires_at, $2), updated_at = NOW()
             WHERE id = $1
             RETURNING expires_at",
        )
        .bind(booking_id)
        .bind(deadline)
        .fetch_optional(&self.db.pool)
        .await?;

        effective
            .flatten()
            .ok_or(StoreError::NotFound("booking"))
    }

    async fn create_payment(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        let mut tx = self.db.pool.begin().await?;

        let row: PaymentRow = sqlx::query_as(&format!(
            "INSERT INTO payments (id, booking_id, gateway_key, amount, currency, status)
             VALUES ($1, $2, $3, $4, $5, 'PENDING')
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(payment.booking_id)
        .bind(&payment.gateway_key)
        .bind(payment.amount)
        .bind(&payment.currency)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE bookings SET payment_id = $2, updated_at = NOW()
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(payment.booking_id)
        .bind(row.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn mark_checkout_started(
        &self,
        payment_id: Uuid,
        provider_payment_id: Option<String>,
    ) -> Result<Payment, StoreError> {
        let booking_id = self.payment_booking_id(payment_id).await?;
        let mut tx = self.db.pool.begin().await?;
        let _booking = Self::lock_booking(&mut tx, booking_id).await?;

        let row: PaymentRow = sqlx::query_as(&format!(
            "UPDATE payments
             SET provider_payment_id = COALESCE($2, provider_payment_id),
                 status = CASE WHEN status = 'PENDING' THEN 'PROCESSING' ELSE status END,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .bind(provider_payment_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE bookings SET payment_status = 'PROCESSING', updated_at = NOW()
             WHERE id = $1 AND payment_id = $2 AND status = 'PENDING'
               AND payment_status IN ('REQUIRES_PAYMENT_METHOD', 'CANCELLED')",
        )
        .bind(booking_id)
        .bind(payment_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;

        row.map(Payment::try_from).transpose()
    }

    async fn find_payment_by_provider_id(
        &self,
        gateway_key: &str,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE gateway_key = $1 AND provider_payment_id = $2",
            PAYMENT_COLUMNS
        ))
        .bind(gateway_key)
        .bind(provider_payment_id)
        .fetch_optional(&self.db.pool)
        .await?;

        row.map(Payment::try_from).transpose()
    }

    async fn settle_payment(
        &self,
        payment_id: Uuid,
        settlement: Settlement,
    ) -> Result<SettlementOutcome, StoreError> {
        let booking_id = self.payment_booking_id(payment_id).await?;
        let mut tx = self.db.pool.begin().await?;

        let booking = Self::lock_booking(&mut tx, booking_id).await?;
        let payment = Self::lock_payment(&mut tx, payment_id).await?;
        let plan = plan_settlement(&booking, &payment, settlement);

        if plan.outcome == SettlementOutcome::Unchanged {
            tx.rollback().await?;
            return Ok(plan.outcome);
        }

        if let Some(status) = plan.payment_status {
            sqlx::query(
                "UPDATE payments
                 SET status = $2, captured_at = COALESCE($3, captured_at), updated_at = NOW()
                 WHERE id = $1",
            )
            .bind(payment_id)
            .bind(status.as_str())
            .bind(plan.captured_at)
            .execute(&mut *tx)
            .await?;
        }

        if plan.booking_status.is_some() || plan.booking_payment_status.is_some() {
            let confirms = plan.booking_status.is_some();
            sqlx::query(
                "UPDATE bookings
                 SET status = COALESCE($2, status),
                     payment_status = COALESCE($3, payment_status),
                     payment_id = CASE WHEN $4 THEN $5 ELSE payment_id END,
                     updated_at = NOW()
                 WHERE id = $1",
            )
            .bind(booking_id)
            .bind(plan.booking_status.map(|s| s.as_str()))
            .bind(plan.booking_payment_status.map(|s| s.as_str()))
            .bind(confirms)
            .bind(payment_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            payment_id = %payment_id,
            booking_id = %booking_id,
            outcome = ?plan.outcome,
            "Payment settlement applied"
        );
        Ok(plan.outcome)
    }

    async fn cancel_expired_holds(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        // Одна инструкция: и брони, и их незавершенные платежи.
        let cancelled: i64 = sqlx::query_scalar(
            r#"
            WITH expired AS (
                UPDATE bookings
                SET status = 'CANCELLED', updated_at = NOW()
                WHERE expires_at <= $1
                  AND status = 'PENDING'
                  AND payment_status <> 'SUCCEEDED'
                RETURNING id
            ), released AS (
                UPDATE payments
                SET status = 'CANCELLED', updated_at = NOW()
                WHERE booking_id IN (SELECT id FROM expired)
                  AND status IN ('PENDING', 'PROCESSING')
                RETURNING id
            )
            SELECT COUNT(*) FROM expired
            "#,
        )
        .bind(now)
        .fetch_one(&self.db.pool)
        .await?;

        Ok(cancelled as u64)
    }

    async fn cancel_pending_booking(&self, booking_id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.db.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE bookings SET status = 'CANCELLED', updated_at = NOW()
             WHERE id = $1 AND status = 'PENDING' AND payment_status <> 'SUCCEEDED'",
        )
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE payments SET status = 'CANCELLED', updated_at = NOW()
             WHERE booking_id = $1 AND status IN ('PENDING', 'PROCESSING')",
        )
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn enabled_gateways(&self) -> Result<Vec<PaymentGateway>, StoreError> {
        let rows: Vec<GatewayRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payment_gateways WHERE is_enabled ORDER BY sort_order, key",
            GATEWAY_COLUMNS
        ))
        .fetch_all(&self.db.pool)
        .await?;

        rows.into_iter().map(PaymentGateway::try_from).collect()
    }

    async fn get_gateway(&self, key: &str) -> Result<Option<PaymentGateway>, StoreError> {
        let row: Option<GatewayRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payment_gateways WHERE key = $1",
            GATEWAY_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.db.pool)
        .await?;

        row.map(PaymentGateway::try_from).transpose()
    }

    async fn upsert_gateway(&self, gateway: PaymentGateway) -> Result<PaymentGateway, StoreError> {
        let row: GatewayRow = sqlx::query_as(&format!(
            "INSERT INTO payment_gateways
                (key, name, gateway_type, config, test_mode, is_enabled, logo_url, sort_order)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (key) DO UPDATE SET
                name = EXCLUDED.name,
                gateway_type = EXCLUDED.gateway_type,
                config = EXCLUDED.config,
                test_mode = EXCLUDED.test_mode,
                is_enabled = EXCLUDED.is_enabled,
                logo_url = EXCLUDED.logo_url,
                sort_order = EXCLUDED.sort_order,
                updated_at = NOW()
             RETURNING {}",
            GATEWAY_COLUMNS
        ))
        .bind(&gateway.key)
        .bind(&gateway.name)
        .bind(gateway.gateway_type.as_str())
        .bind(&gateway.config)
        .bind(gateway.test_mode)
        .bind(gateway.is_enabled)
        .bind(&gateway.logo_url)
        .bind(gateway.sort_order)
        .fetch_one(&self.db.pool)
        .await?;

        row.try_into()
    }

    async fn set_gateway_enabled(&self, key: &str, enabled: bool) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE payment_gateways SET is_enabled = $2, updated_at = NOW() WHERE key = $1",
        )
        .bind(key)
        .bind(enabled)
        .execute(&self.db.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ensure_tickets(&self, booking_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let mut tx = self.db.pool.begin().await?;
        let booking = Self::lock_booking(&mut tx, booking_id).await?;

        if !booking.is_confirmed_and_paid() {
            tx.rollback().await?;
            return Err(StoreError::InvalidState("tickets require a confirmed booking"));
        }

        // Уникальный (booking_id, seat_number) делает повторный вызов no-op.
        // Конфликт без цели ловит и совпавший code: тогда места нет, и
        // вставка повторяется с новым кодом.
        for seat in 1..=booking.guests {
            let mut attempts = 0;
            loop {
                let inserted = sqlx::query(
                    "INSERT INTO tickets (id, code, seat_number, status, booking_id, session_id, explorer_id)
                     VALUES ($1, $2, $3, 'VALID', $4, $5, $6)
                     ON CONFLICT DO NOTHING",
                )
                .bind(Uuid::new_v4())
                .bind(generate_ticket_code())
                .bind(seat)
                .bind(booking.id)
                .bind(booking.session_id)
                .bind(booking.explorer_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
                if inserted == 1 {
                    break;
                }

                let seat_issued: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM tickets WHERE booking_id = $1 AND seat_number = $2)",
                )
                .bind(booking.id)
                .bind(seat)
                .fetch_one(&mut *tx)
                .await?;
                if seat_issued {
                    break;
                }

                attempts += 1;
                warn!(booking_id = %booking.id, seat, attempts, "Ticket code collision, regenerating");
                if attempts >= CODE_ATTEMPTS {
                    tx.rollback().await?;
                    return Err(StoreError::InvalidState("no free ticket code"));
                }
            }
        }

        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tickets WHERE booking_id = $1 ORDER BY seat_number",
            TICKET_COLUMNS
        ))
        .bind(booking_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        rows.into_iter().map(Ticket::try_from).collect()
    }

    async fn record_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError> {
        let id = Uuid::new_v4();
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            "INSERT INTO notifications (id, explorer_id, booking_id, kind, title, body)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING created_at",
        )
        .bind(id)
        .bind(notification.explorer_id)
        .bind(notification.booking_id)
        .bind(&notification.kind)
        .bind(&notification.title)
        .bind(&notification.body)
        .fetch_one(&self.db.pool)
        .await?;

        Ok(Notification {
            id,
            explorer_id: notification.explorer_id,
            booking_id: notification.booking_id,
            kind: notification.kind,
            title: notification.title,
            body: notification.body,
            created_at,
        })
    }

    async fn reserve_refund(&self, refund: NewRefund) -> Result<RefundReservation, StoreError> {
        let mut tx = self.db.pool.begin().await?;

        // Блокировка платежа сериализует параллельные возвраты по нему.
        let payment = match Self::lock_payment(&mut tx, refund.payment_id).await {
            Ok(payment) => payment,
            Err(StoreError::NotFound(_)) => {
                tx.rollback().await?;
                return Ok(RefundReservation::PaymentNotFound);
            }
            Err(e) => return Err(e),
        };
        if payment.status != PaymentState::Succeeded {
            tx.rollback().await?;
            return Ok(RefundReservation::NotRefundable);
        }

        let refunded: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(amount)::BIGINT FROM refunds WHERE payment_id = $1",
        )
        .bind(payment.id)
        .fetch_one(&mut *tx)
        .await?;

        let amount = match plan_refund(refund.amount, payment.amount, refunded.unwrap_or(0)) {
            Ok(amount) => amount,
            Err(refundable) => {
                tx.rollback().await?;
                return Ok(RefundReservation::OutOfRange { refundable });
            }
        };

        let row: RefundRow = sqlx::query_as(&format!(
            "INSERT INTO refunds (id, payment_id, amount, status, reason)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {}",
            REFUND_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(payment.id)
        .bind(amount)
        .bind(RefundStatus::Pending.as_str())
        .bind(&refund.reason)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RefundReservation::Reserved(row.try_into()?))
    }

    async fn complete_refund(
        &self,
        refund_id: Uuid,
        provider_refund_id: Option<String>,
    ) -> Result<Refund, StoreError> {
        let row: Option<RefundRow> = sqlx::query_as(&format!(
            "UPDATE refunds SET status = $2, provider_refund_id = $3
             WHERE id = $1
             RETURNING {}",
            REFUND_COLUMNS
        ))
        .bind(refund_id)
        .bind(RefundStatus::Succeeded.as_str())
        .bind(&provider_refund_id)
        .fetch_optional(&self.db.pool)
        .await?;

        row.ok_or(StoreError::NotFound("refund"))?.try_into()
    }

    async fn release_refund(&self, refund_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM refunds WHERE id = $1 AND status = $2")
            .bind(refund_id)
            .bind(RefundStatus::Pending.as_str())
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    async fn refunded_total(&self, payment_id: Uuid) -> Result<i64, StoreError> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(amount)::BIGINT FROM refunds WHERE payment_id = $1",
        )
        .bind(payment_id)
        .fetch_one(&self.db.pool)
        .await?;

        Ok(total.unwrap_or(0))
    }

    async fn email_settings(&self) -> Result<Option<EmailSettings>, StoreError> {
        let row: Option<EmailSettingsRow> = sqlx::query_as(
            "SELECT host, port, username, password, from_email, from_name
             FROM email_settings WHERE id = 1",
        )
        .fetch_optional(&self.db.pool)
        .await?;

        row.map(|r| {
            let port = u16::try_from(r.port)
                .map_err(|_| StoreError::Corrupt(format!("smtp port {}", r.port)))?;
            Ok(EmailSettings {
                host: r.host,
                port,
                username: r.username,
                password: r.password,
                from_email: r.from_email,
                from_name: r.from_name,
            })
        })
        .transpose()
    }
}
