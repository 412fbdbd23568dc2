use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::patch,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiResult, AppError};
use crate::middleware::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/bookings/{id}/cancel", patch(cancel_booking))
}

// PATCH /api/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let booking = state
        .store
        .get_booking(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Бронирование не найдено".to_string()))?;

    if booking.explorer_id != user.user_id {
        return Err(AppError::Forbidden(
            "Бронирование принадлежит другому пользователю".to_string(),
        ));
    }

    if !state.store.cancel_pending_booking(booking_id).await? {
        return Err(AppError::Conflict(
            "Отменить можно только неоплаченное бронирование".to_string(),
        ));
    }

    tracing::info!(%booking_id, explorer_id = %user.user_id, "Booking cancelled by explorer");
    Ok(Json(json!({ "success": true, "booking_id": booking_id, "status": "CANCELLED" })))
}
