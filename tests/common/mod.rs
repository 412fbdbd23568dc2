#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use fake::Fake;
use jsonwebtoken::{encode, EncodingKey, Header};
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

use experience_booking::{
    config::{
        AppConfig, AuthConfig, CircuitBreakerConfig, Config, DatabaseConfig, PaymentConfig,
        SecurityConfig, SweeperConfig,
    },
    controllers,
    crypto::SecretCipher,
    middleware::{Claims, Role},
    models::{
        Booking, BookingStatus, Experience, ExperienceSession, Explorer, GatewayType,
        PaymentGateway, PaymentStatus,
    },
    providers::GatewayProviderFactory,
    services::{MailError, Mailer, OutgoingEmail},
    store::{BookingStore, MemoryStore},
    AppState,
};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const ENCRYPTION_SECRET: &str = "test-operator-secret";
pub const CRON_SECRET: &str = "test-cron-secret";
pub const HOSTED_PASSWORD: &str = "hosted-p@ss";
pub const HOSTED_MERCHANT: &str = "team-42";

/// Почтальон, который только запоминает письма.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config {
        app: AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            environment: "test".into(),
            rust_log: "experience_booking=debug".into(),
            log_format: "text".into(),
        },
        database: DatabaseConfig {
            url: Secret::new("postgres://unused".to_string()),
            pool_size: 1,
        },
        auth: AuthConfig {
            jwt_secret: Secret::new(JWT_SECRET.to_string()),
        },
        security: SecurityConfig {
            encryption_secret: Secret::new(ENCRYPTION_SECRET.to_string()),
            cron_secret: Secret::new(CRON_SECRET.to_string()),
        },
        payment: PaymentConfig {
            currency: "USD".into(),
            public_base_url: "https://book.example.com".into(),
            http_timeout_seconds: 5,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            timeout_seconds: 60,
        },
        sweeper: SweeperConfig {
            interval_seconds: None,
        },
    }
}

pub struct TestApp {
    pub store: MemoryStore,
    pub mailer: Arc<RecordingMailer>,
    pub cipher: SecretCipher,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let config = test_config();
        let store = MemoryStore::new();
        let mailer = Arc::new(RecordingMailer::default());
        let cipher = SecretCipher::from_secret(ENCRYPTION_SECRET);
        let providers = Arc::new(
            GatewayProviderFactory::new(
                cipher.clone(),
                config.payment.clone(),
                config.circuit_breaker.clone(),
            )
            .unwrap(),
        );

        let state = AppState::new(config, Arc::new(store.clone()), providers, mailer.clone());
        let router = Router::new()
            .nest("/api", controllers::routes())
            .with_state(state);

        Self {
            store,
            mailer,
            cipher,
            router,
        }
    }

    /// Бронь в PENDING вместе с исследователем, впечатлением и сеансом.
    pub async fn seed_booking(&self, guests: i32, amount: i64) -> Booking {
        self.seed_booking_created_at(guests, amount, Utc::now()).await
    }

    pub async fn seed_booking_created_at(
        &self,
        guests: i32,
        amount: i64,
        created_at: DateTime<Utc>,
    ) -> Booking {
        let explorer = Explorer {
            id: Uuid::new_v4(),
            email: SafeEmail().fake(),
            display_name: Name().fake(),
        };
        let experience = Experience {
            id: Uuid::new_v4(),
            title: "Canyon sunrise hike".into(),
            location: Some("Charyn".into()),
        };
        let session = ExperienceSession {
            id: Uuid::new_v4(),
            starts_at: Utc::now() + Duration::days(7),
        };
        let booking = Booking {
            id: Uuid::new_v4(),
            explorer_id: explorer.id,
            experience_id: experience.id,
            session_id: session.id,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::RequiresPaymentMethod,
            expires_at: None,
            total_amount: amount,
            currency: "USD".into(),
            guests,
            payment_id: None,
            created_at,
            updated_at: created_at,
        };

        self.store.insert_explorer(explorer).await;
        self.store.insert_experience(experience).await;
        self.store.insert_session(session).await;
        self.store.insert_booking(booking.clone()).await;
        booking
    }

    pub async fn add_cash_gateway(&self, key: &str, sort_order: i32, enabled: bool) {
        self.store
            .upsert_gateway(PaymentGateway {
                key: key.into(),
                name: "Pay on site".into(),
                gateway_type: GatewayType::Cash,
                config: json!({}),
                test_mode: false,
                is_enabled: enabled,
                logo_url: None,
                sort_order,
            })
            .await
            .unwrap();
    }

    pub async fn add_hosted_gateway(&self, key: &str, api_base: &str) {
        let mut config = json!({
            "protocol": "hosted_form",
            "api_base": api_base,
            "merchant_id": HOSTED_MERCHANT,
            "password": HOSTED_PASSWORD,
        });
        self.cipher.seal_config(&mut config).unwrap();

        self.store
            .upsert_gateway(PaymentGateway {
                key: key.into(),
                name: "Hosted card form".into(),
                gateway_type: GatewayType::Card,
                config,
                test_mode: true,
                is_enabled: true,
                logo_url: None,
                sort_order: 10,
            })
            .await
            .unwrap();
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    /// Доставка вебхука шлюза с хостинговой формой (form-urlencoded).
    pub async fn hosted_webhook(&self, key: &str, fields: &[(&str, &str)]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/webhooks/{}", key))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(serde_urlencoded::to_string(fields).unwrap()))
            .unwrap();
        self.send(request).await
    }
}

pub fn token_for(user_id: Uuid, role: Role) -> String {
    let claims = Claims {
        sub: user_id,
        email: format!("{}@example.com", user_id.simple()),
        role,
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn admin_token() -> String {
    token_for(Uuid::new_v4(), Role::Admin)
}

/// Токен уведомления шлюза: SHA-256(paymentId + orderId + status + password + merchant).
pub fn hosted_token(payment_id: &str, order_id: &str, status: &str) -> String {
    use sha2::{Digest, Sha256};
    format!(
        "{:x}",
        Sha256::digest(
            format!(
                "{}{}{}{}{}",
                payment_id, order_id, status, HOSTED_PASSWORD, HOSTED_MERCHANT
            )
            .as_bytes()
        )
    )
}
