use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Pending,
    Processing,
    Succeeded,
    Cancelled,
}

text_enum!(PaymentState {
    Pending => "PENDING",
    Processing => "PROCESSING",
    Succeeded => "SUCCEEDED",
    Cancelled => "CANCELLED",
});

impl PaymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentState::Succeeded | PaymentState::Cancelled)
    }
}

/// Одна попытка оплаты бронирования через конкретный шлюз.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub gateway_key: String,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentState,
    /// Идентификатор, выданный провайдером (сессия, заказ, платеж).
    pub provider_payment_id: Option<String>,
    /// Выставляется только при успешном списании.
    pub captured_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// PENDING: сумма зарезервирована, провайдер еще не ответил.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    Succeeded,
}

text_enum!(RefundStatus {
    Pending => "PENDING",
    Succeeded => "SUCCEEDED",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: i64,
    pub status: RefundStatus,
    pub reason: Option<String>,
    pub provider_refund_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
