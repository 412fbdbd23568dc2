use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::middleware::AuthUser;
use crate::services::CheckoutCommand;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/checkout", post(create_checkout))
}

// POST /api/checkout
#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutBody {
    pub booking_id: Uuid,
    #[validate(url)]
    pub success_url: String,
    #[validate(url)]
    pub cancel_url: String,
    #[validate(length(min = 1, max = 64))]
    pub provider_id: Option<String>,
}

async fn create_checkout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<CheckoutBody>,
) -> ApiResult<impl IntoResponse> {
    body.validate()?;

    let result = state
        .checkout()
        .create_checkout_for_booking(CheckoutCommand {
            booking_id: body.booking_id,
            explorer_id: user.user_id,
            success_url: body.success_url,
            cancel_url: body.cancel_url,
            provider_id: body.provider_id,
        })
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "url": result.redirect_url,
            "payment_id": result.payment_id,
            "gateway": result.gateway_key,
            "provider_payment_id": result.provider_payment_id,
            "expires_at": result.expires_at,
        })),
    ))
}
