use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Explorer,
    Organizer,
    Admin,
}

/// Claims сессионного токена, выпущенного внешним провайдером аутентификации.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub exp: usize,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

/// Пользователь с ролью администратора.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(error = %e, "Session token rejected");
            AppError::Unauthorized
        })
}

// Bearer JWT extractor
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        let claims = verify_token(token, state.config.auth.jwt_secret.expose_secret())?;

        Ok(AuthUser {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        })
    }
}

impl FromRequestParts<Arc<crate::AppState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            return Err(AppError::Forbidden("Недостаточно прав".to_string()));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, exp_offset: Duration) -> String {
        let claims = Claims {
            sub: Uuid::new_v4(),
            email: "ana@example.com".into(),
            role: Role::Explorer,
            exp: (Utc::now() + exp_offset).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let claims = verify_token(&token("jwt-secret", Duration::hours(1)), "jwt-secret").unwrap();
        assert_eq!(claims.role, Role::Explorer);
    }

    #[test]
    fn rejects_foreign_or_expired_token() {
        assert!(matches!(
            verify_token(&token("other", Duration::hours(1)), "jwt-secret"),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            verify_token(&token("jwt-secret", Duration::hours(-2)), "jwt-secret"),
            Err(AppError::Unauthorized)
        ));
    }
}
