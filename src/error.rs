use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::{providers::ProviderError, store::StoreError};

/// Ошибки HTTP-слоя. Каждая ветка соответствует одному классу из таксономии:
/// клиентские ошибки не меняют состояние, внешние сбои отдаются как 502.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Вебхук не прошел проверку подлинности. Детали только в логах.
    #[error("rejected delivery: {0}")]
    Authenticity(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("payment provider failure: {0}")]
    Upstream(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ApiError {
    success: bool,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Authenticity(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unsupported(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Authenticity(_) => "invalid_delivery",
            AppError::Unsupported(_) => "unsupported_operation",
            AppError::Upstream(_) => "provider_unavailable",
            AppError::Store(_) | AppError::Internal(_) => "internal_error",
        }
    }

    // Сообщение для клиента. Внутренние детали наружу не отдаем.
    fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Unsupported(msg) => msg.clone(),
            AppError::Unauthorized => "Требуется авторизация".to_string(),
            AppError::Authenticity(_) => "Invalid webhook delivery".to_string(),
            AppError::Upstream(_) => {
                "Ошибка платежного шлюза. Повторите попытку позже.".to_string()
            }
            AppError::Store(_) | AppError::Internal(_) => "Внутренняя ошибка".to_string(),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unsupported(op) => AppError::Unsupported(op),
            ProviderError::InvalidSignature
            | ProviderError::MissingReference
            | ProviderError::Malformed(_) => AppError::Authenticity(err.to_string()),
            ProviderError::Misconfigured(msg) => AppError::Internal(msg),
            ProviderError::Rejected(_) | ProviderError::Transport(_) | ProviderError::CircuitOpen => {
                AppError::Upstream(err.to_string())
            }
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }

        let body = ApiError {
            success: false,
            code: self.code(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, AppError>;
