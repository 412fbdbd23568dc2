//! Окно удержания брони.
//!
//! Пока бронь в статусе PENDING, она держит место не дольше этого окна.
//! Дедлайн считается от момента создания брони и фиксируется один раз
//! при первой попытке оплаты; повторные попытки его не двигают.

use chrono::{DateTime, Duration, Utc};

/// 15 минут в миллисекундах.
pub const HOLD_WINDOW_MS: i64 = 15 * 60 * 1000;

pub fn hold_window() -> Duration {
    Duration::milliseconds(HOLD_WINDOW_MS)
}

/// Дедлайн удержания для брони, созданной в `created_at`.
pub fn hold_deadline(created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at + hold_window()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn window_is_fifteen_minutes() {
        assert_eq!(hold_window(), Duration::minutes(15));
    }

    proptest! {
        #[test]
        fn deadline_is_creation_plus_window(secs in 0i64..4_000_000_000) {
            let created = DateTime::from_timestamp(secs, 0).unwrap();
            let deadline = hold_deadline(created);
            prop_assert_eq!((deadline - created).num_milliseconds(), HOLD_WINDOW_MS);
            prop_assert_eq!(hold_deadline(created), deadline);
        }
    }
}
