use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayType {
    Card,
    Cash,
    Paypal,
}

text_enum!(GatewayType {
    Card => "CARD",
    Cash => "CASH",
    Paypal => "PAYPAL",
});

/// Настройки платежного шлюза, которыми управляет администратор.
///
/// `config` хранит параметры провайдера как JSON; секретные поля лежат
/// в зашифрованном виде (`enc:v1:...`) и расшифровываются только в момент
/// построения адаптера.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentGateway {
    pub key: String,
    pub name: String,
    pub gateway_type: GatewayType,
    pub config: serde_json::Value,
    pub test_mode: bool,
    pub is_enabled: bool,
    pub logo_url: Option<String>,
    pub sort_order: i32,
}

impl PaymentGateway {
    /// Ключ шлюза: непустой, нижний регистр, `[a-z0-9_-]`.
    pub fn is_valid_key(key: &str) -> bool {
        !key.is_empty()
            && key.len() <= 64
            && key
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    }

    /// Строковый параметр из `config`.
    pub fn config_str(&self, field: &str) -> Option<&str> {
        self.config.get(field).and_then(|v| v.as_str())
    }
}
