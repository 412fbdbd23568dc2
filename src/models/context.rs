use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Booking;

#[derive(Debug, Clone, Serialize)]
pub struct Explorer {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Experience {
    pub id: Uuid,
    pub title: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperienceSession {
    pub id: Uuid,
    pub starts_at: DateTime<Utc>,
}

/// Бронирование вместе с данными, нужными для билетов и писем.
#[derive(Debug, Clone, Serialize)]
pub struct BookingContext {
    pub booking: Booking,
    pub explorer: Explorer,
    pub experience: Experience,
    pub session: ExperienceSession,
}

/// In-app уведомление.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub explorer_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Настройки SMTP из админки.
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Зашифрованный пароль (`enc:v1:...`), расшифровывается при отправке.
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}
