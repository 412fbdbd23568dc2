pub mod admin;
pub mod bookings;
pub mod checkout;
pub mod cron;
pub mod webhooks;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(checkout::routes())
        .merge(bookings::routes())
        .merge(webhooks::routes())
        .merge(cron::routes())
        .merge(admin::routes())
}
