use config::{ConfigError, Environment};
use secrecy::Secret;
use serde::Deserialize;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub sweeper: SweeperConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    /// "text" или "json"
    pub log_format: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub pool_size: u32,
}

// Проверка сессионных токенов, выданных внешним провайдером аутентификации
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: Secret<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Секрет оператора, из которого выводится ключ шифрования настроек шлюзов.
    pub encryption_secret: Secret<String>,
    /// Общий секрет планировщика для /cron эндпоинтов.
    pub cron_secret: Secret<String>,
}

// Настройки платежей
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Валюта по умолчанию, если у бронирования она не указана.
    pub currency: String,
    /// Публичный базовый URL сервиса, из него строятся адреса вебхуков.
    pub public_base_url: String,
    pub http_timeout_seconds: u64,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

// Встроенный запуск sweeper; по умолчанию выключен, sweep дергает внешний планировщик
#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    #[serde(default)]
    pub interval_seconds: Option<u64>,
}

impl PaymentConfig {
    /// Адрес вебхука для конкретного шлюза.
    pub fn webhook_url(&self, gateway_key: &str) -> String {
        format!(
            "{}/api/webhooks/{}",
            self.public_base_url.trim_end_matches('/'),
            gateway_key
        )
    }
}

impl Config {
    /// Собирает конфигурацию из значений по умолчанию и переменных окружения
    /// вида `APP__PORT`, `DATABASE__URL`, `SECURITY__CRON_SECRET`.
    pub fn from_env() -> Result<Self, ConfigError> {
        config::Config::builder()
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 8000)?
            .set_default("app.environment", "development")?
            .set_default("app.rust_log", "experience_booking=debug,tower_http=debug")?
            .set_default("app.log_format", "text")?
            .set_default("database.pool_size", 20)?
            .set_default("payment.currency", "USD")?
            .set_default("payment.public_base_url", "http://localhost:8000")?
            .set_default("payment.http_timeout_seconds", 30)?
            .set_default("circuit_breaker.failure_threshold", 5)?
            .set_default("circuit_breaker.timeout_seconds", 60)?
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
