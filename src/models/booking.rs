use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

text_enum!(BookingStatus {
    Pending => "PENDING",
    Confirmed => "CONFIRMED",
    Cancelled => "CANCELLED",
});

/// Платежный статус бронирования (зеркало последней попытки оплаты).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    RequiresPaymentMethod,
    Processing,
    Succeeded,
    Cancelled,
}

text_enum!(PaymentStatus {
    RequiresPaymentMethod => "REQUIRES_PAYMENT_METHOD",
    Processing => "PROCESSING",
    Succeeded => "SUCCEEDED",
    Cancelled => "CANCELLED",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub explorer_id: Uuid,
    pub experience_id: Uuid,
    pub session_id: Uuid,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub expires_at: Option<DateTime<Utc>>,
    /// Сумма в минимальных единицах валюты.
    pub total_amount: i64,
    pub currency: String,
    pub guests: i32,
    pub payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Холд истек: дедлайн выставлен и уже прошел.
    pub fn hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    /// Можно ли начать (или повторить) оплату.
    pub fn is_payable(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Pending
            && self.payment_status != PaymentStatus::Succeeded
            && !self.hold_lapsed(now)
    }

    /// Бронь подпадает под автоматическую отмену sweeper'ом.
    pub fn eligible_for_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Pending
            && self.payment_status != PaymentStatus::Succeeded
            && self.hold_lapsed(now)
    }

    pub fn is_confirmed_and_paid(&self) -> bool {
        self.status == BookingStatus::Confirmed && self.payment_status == PaymentStatus::Succeeded
    }

    pub fn is_consistent(&self) -> bool {
        self.status != BookingStatus::Confirmed || self.payment_status == PaymentStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn booking(expires_at: Option<DateTime<Utc>>, payment_status: PaymentStatus) -> Booking {
        let now = Utc::now();
        Booking {
            id: Uuid::new_v4(),
            explorer_id: Uuid::new_v4(),
            experience_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            status: BookingStatus::Pending,
            payment_status,
            expires_at,
            total_amount: 12_000,
            currency: "USD".into(),
            guests: 2,
            payment_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn booking_without_deadline_never_expires() {
        let b = booking(None, PaymentStatus::RequiresPaymentMethod);
        assert!(!b.eligible_for_expiry(Utc::now() + Duration::days(365)));
        assert!(b.is_payable(Utc::now()));
    }

    #[test]
    fn paid_booking_is_not_eligible_for_expiry() {
        let past = Utc::now() - Duration::minutes(1);
        assert!(booking(Some(past), PaymentStatus::RequiresPaymentMethod).eligible_for_expiry(Utc::now()));
        assert!(!booking(Some(past), PaymentStatus::Succeeded).eligible_for_expiry(Utc::now()));
    }

    #[test]
    fn statuses_round_trip_through_text() {
        for status in [BookingStatus::Pending, BookingStatus::Confirmed, BookingStatus::Cancelled] {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert!("PAID".parse::<PaymentStatus>().is_err());
    }
}
