use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::error::{ApiResult, AppError};
use crate::AppState;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/cron/expire-bookings", post(expire_bookings))
}

fn authorize(headers: &HeaderMap, expected: &str) -> Result<(), AppError> {
    let provided = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let matches: bool = provided.as_bytes().ct_eq(expected.as_bytes()).into();
    if expected.is_empty() || !matches {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

// POST /api/cron/expire-bookings
async fn expire_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    authorize(&headers, state.config.security.cron_secret.expose_secret())?;

    let cancelled = state.sweeper().sweep(Utc::now()).await?;
    Ok(Json(json!({ "success": true, "cancelled": cancelled })))
}
