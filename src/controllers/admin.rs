use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{patch, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::crypto::SECRET_FIELDS;
use crate::error::{ApiResult, AppError};
use crate::middleware::AdminUser;
use crate::models::{GatewayType, PaymentGateway};
use crate::store::SettlementOutcome;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/payments/{id}/refund", post(refund_payment))
        .route("/admin/payments/{id}/confirm", post(confirm_payment))
        .route("/admin/payments/{id}/cancel", post(cancel_payment))
        .route("/admin/gateways/{key}", put(upsert_gateway))
        .route("/admin/gateways/{key}/enabled", patch(set_gateway_enabled))
}

fn outcome_label(outcome: SettlementOutcome) -> &'static str {
    match outcome {
        SettlementOutcome::Confirmed => "confirmed",
        SettlementOutcome::AlreadyConfirmed => "already_confirmed",
        SettlementOutcome::Applied => "applied",
        SettlementOutcome::Unchanged => "unchanged",
    }
}

/* ---------- PAYMENTS ---------- */

// POST /api/admin/payments/{id}/refund
#[derive(Debug, Deserialize, Validate)]
pub struct RefundBody {
    /// Без суммы возвращается весь остаток платежа.
    #[validate(range(min = 1))]
    pub amount: Option<i64>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

async fn refund_payment(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(payment_id): Path<Uuid>,
    Json(body): Json<RefundBody>,
) -> ApiResult<impl IntoResponse> {
    body.validate()?;

    let refund = state
        .refunds()
        .refund(payment_id, body.amount, body.reason)
        .await?;

    tracing::info!(%payment_id, admin = %admin.email, amount = refund.amount, "Refund issued");
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "refund": refund }))))
}

// POST /api/admin/payments/{id}/confirm
async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.reconciler().settle_manually(payment_id, true).await?;
    tracing::info!(%payment_id, admin = %admin.email, ?outcome, "Payment confirmed manually");
    Ok(Json(json!({ "success": true, "outcome": outcome_label(outcome) })))
}

// POST /api/admin/payments/{id}/cancel
async fn cancel_payment(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.reconciler().settle_manually(payment_id, false).await?;
    tracing::info!(%payment_id, admin = %admin.email, ?outcome, "Payment cancelled manually");
    Ok(Json(json!({ "success": true, "outcome": outcome_label(outcome) })))
}

/* ---------- GATEWAYS ---------- */

// PUT /api/admin/gateways/{key}
#[derive(Debug, Deserialize, Validate)]
pub struct GatewayBody {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub gateway_type: GatewayType,
    #[serde(default = "empty_config")]
    pub config: Value,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub is_enabled: bool,
    #[validate(url)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
}

fn empty_config() -> Value {
    json!({})
}

/// Секреты, не присланные в обновлении, переносятся из сохраненной версии,
/// чтобы админке не нужно было знать их для правки остальных полей.
fn carry_over_secrets(config: &mut Value, previous: Option<&Value>) {
    let (Value::Object(map), Some(Value::Object(old))) = (config, previous) else {
        return;
    };
    for field in SECRET_FIELDS {
        if !map.contains_key(*field) {
            if let Some(sealed) = old.get(*field) {
                map.insert((*field).to_string(), sealed.clone());
            }
        }
    }
}

/// Копия настроек для ответа: секреты не отдаем даже зашифрованными.
fn masked(gateway: &PaymentGateway) -> Value {
    let mut config = gateway.config.clone();
    if let Value::Object(map) = &mut config {
        for field in SECRET_FIELDS {
            if let Some(value) = map.get_mut(*field) {
                *value = Value::String("********".to_string());
            }
        }
    }
    json!({
        "key": gateway.key,
        "name": gateway.name,
        "gateway_type": gateway.gateway_type,
        "config": config,
        "test_mode": gateway.test_mode,
        "is_enabled": gateway.is_enabled,
        "logo_url": gateway.logo_url,
        "sort_order": gateway.sort_order,
    })
}

async fn upsert_gateway(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(key): Path<String>,
    Json(body): Json<GatewayBody>,
) -> ApiResult<impl IntoResponse> {
    body.validate()?;
    if !PaymentGateway::is_valid_key(&key) {
        return Err(AppError::Validation(
            "Ключ шлюза: строчные латинские буквы, цифры, '-' и '_'".to_string(),
        ));
    }
    if !body.config.is_object() {
        return Err(AppError::Validation("config должен быть объектом".to_string()));
    }

    let previous = state.store.get_gateway(&key).await?;
    let mut config = body.config;
    carry_over_secrets(&mut config, previous.as_ref().map(|g| &g.config));
    state
        .cipher
        .seal_config(&mut config)
        .map_err(|e| AppError::Internal(format!("sealing gateway secrets: {}", e)))?;

    let gateway = state
        .store
        .upsert_gateway(PaymentGateway {
            key,
            name: body.name,
            gateway_type: body.gateway_type,
            config,
            test_mode: body.test_mode,
            is_enabled: body.is_enabled,
            logo_url: body.logo_url,
            sort_order: body.sort_order,
        })
        .await?;

    tracing::info!(
        gateway = %gateway.key,
        admin = %admin.email,
        enabled = gateway.is_enabled,
        "Payment gateway saved"
    );
    Ok(Json(json!({ "success": true, "gateway": masked(&gateway) })))
}

// PATCH /api/admin/gateways/{key}/enabled
#[derive(Debug, Deserialize)]
pub struct EnabledBody {
    pub enabled: bool,
}

async fn set_gateway_enabled(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(key): Path<String>,
    Json(body): Json<EnabledBody>,
) -> ApiResult<impl IntoResponse> {
    if !state.store.set_gateway_enabled(&key, body.enabled).await? {
        return Err(AppError::NotFound("Платежный шлюз не найден".to_string()));
    }

    tracing::info!(gateway = %key, admin = %admin.email, enabled = body.enabled, "Payment gateway toggled");
    Ok(Json(json!({ "success": true, "key": key, "enabled": body.enabled })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omitted_secrets_are_carried_over() {
        let previous = json!({ "merchant_id": "m-1", "password": "enc:v1:AAAA" });
        let mut config = json!({ "merchant_id": "m-2" });

        carry_over_secrets(&mut config, Some(&previous));
        assert_eq!(config["merchant_id"], "m-2");
        assert_eq!(config["password"], "enc:v1:AAAA");
    }

    #[test]
    fn masked_view_hides_secrets() {
        let gateway = PaymentGateway {
            key: "card".into(),
            name: "Card".into(),
            gateway_type: GatewayType::Card,
            config: json!({ "secret_key": "enc:v1:AAAA", "api_base": "https://api" }),
            test_mode: true,
            is_enabled: true,
            logo_url: None,
            sort_order: 0,
        };
        let view = masked(&gateway);
        assert_eq!(view["config"]["secret_key"], "********");
        assert_eq!(view["config"]["api_base"], "https://api");
    }
}
