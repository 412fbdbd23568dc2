use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::providers::WebhookDelivery;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/{gateway_key}", post(receive_webhook))
}

/// POST /api/webhooks/{gateway_key}
///
/// Тело читается как есть: подпись провайдера считается по сырым байтам.
async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(gateway_key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    tracing::info!(gateway = %gateway_key, bytes = body.len(), "Webhook received");

    state
        .reconciler()
        .handle(&gateway_key, WebhookDelivery { headers, body })
        .await?;

    Ok(Json(json!({ "received": true })))
}
