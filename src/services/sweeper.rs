use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::store::{BookingStore, StoreError};

/// Отмена броней с истекшим холдом.
///
/// Весь отбор и отмена выполняются хранилищем одной операцией, поэтому
/// параллельные или повторные прогоны безопасны: бронь, оплаченная между
/// прогонами, под фильтр уже не попадет.
pub struct ExpirationSweeper {
    store: Arc<dyn BookingStore>,
}

impl ExpirationSweeper {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    /// Возвращает число отмененных броней.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let cancelled = self.store.cancel_expired_holds(now).await?;
        if cancelled > 0 {
            info!(cancelled, "🧹 Expired booking holds cancelled");
        }
        Ok(cancelled)
    }

    /// Периодический прогон внутри процесса, если внешний планировщик не используется.
    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep(Utc::now()).await {
                    error!(error = %e, "Expiration sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Booking, BookingStatus, PaymentStatus};
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    fn booking(expires_in: ChronoDuration, payment_status: PaymentStatus) -> Booking {
        let now = Utc::now();
        Booking {
            id: Uuid::new_v4(),
            explorer_id: Uuid::new_v4(),
            experience_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            status: BookingStatus::Pending,
            payment_status,
            expires_at: Some(now + expires_in),
            total_amount: 3_000,
            currency: "USD".into(),
            guests: 1,
            payment_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn cancels_only_lapsed_unpaid_holds() {
        let store = MemoryStore::new();
        let lapsed = booking(ChronoDuration::minutes(-1), PaymentStatus::Processing);
        let fresh = booking(ChronoDuration::minutes(10), PaymentStatus::RequiresPaymentMethod);
        store.insert_booking(lapsed.clone()).await;
        store.insert_booking(fresh.clone()).await;

        let sweeper = ExpirationSweeper::new(Arc::new(store.clone()));
        assert_eq!(sweeper.sweep(Utc::now()).await.unwrap(), 1);
        // повторный прогон ничего не меняет
        assert_eq!(sweeper.sweep(Utc::now()).await.unwrap(), 0);

        let lapsed = store.get_booking(lapsed.id).await.unwrap().unwrap();
        let fresh = store.get_booking(fresh.id).await.unwrap().unwrap();
        assert_eq!(lapsed.status, BookingStatus::Cancelled);
        assert_eq!(fresh.status, BookingStatus::Pending);
    }
}
