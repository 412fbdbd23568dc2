//! Отправка писем.
//!
//! Глобального SMTP-транспорта нет: настройки хранятся в базе и меняются
//! администратором, поэтому `SmtpMailer` читает их и строит транспорт
//! на каждую отправку.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::crypto::SecretCipher;
use crate::models::EmailSettings;
use crate::store::{BookingStore, StoreError};

/// Порт SMTPS (TLS с самого начала соединения).
const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("email settings are not configured")]
    NotConfigured,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("smtp delivery failed: {0}")]
    Transport(String),

    #[error("smtp password could not be decrypted")]
    Secret,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub text: String,
    pub attachments: Vec<EmailAttachment>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    store: Arc<dyn BookingStore>,
    cipher: SecretCipher,
}

impl SmtpMailer {
    pub fn new(store: Arc<dyn BookingStore>, cipher: SecretCipher) -> Self {
        Self { store, cipher }
    }

    fn transport(
        &self,
        settings: &EmailSettings,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
        let password = if SecretCipher::is_encrypted(&settings.password) {
            self.cipher
                .decrypt(&settings.password)
                .map_err(|_| MailError::Secret)?
        } else {
            settings.password.clone()
        };
        let creds = Credentials::new(settings.username.clone(), password);

        let builder = if settings.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
        .map_err(|e| MailError::Transport(format!("Failed to create SMTP relay: {}", e)))?;

        Ok(builder.port(settings.port).credentials(creds).build())
    }
}

/// Собирает MIME-сообщение: текст и вложения.
pub fn build_message(settings: &EmailSettings, email: &OutgoingEmail) -> Result<Message, MailError> {
    let from: Mailbox = format!("{} <{}>", settings.from_name, settings.from_email)
        .parse()
        .map_err(|e| MailError::InvalidAddress(format!("from: {}", e)))?;
    let to: Mailbox = match &email.to_name {
        Some(name) => format!("{} <{}>", name, email.to),
        None => email.to.clone(),
    }
    .parse()
    .map_err(|e| MailError::InvalidAddress(format!("to: {}", e)))?;

    let builder = Message::builder().from(from).to(to).subject(&email.subject);

    if email.attachments.is_empty() {
        return builder
            .header(ContentType::TEXT_PLAIN)
            .body(email.text.clone())
            .map_err(|e| MailError::Build(e.to_string()));
    }

    let mut multipart = MultiPart::mixed().singlepart(
        SinglePart::builder()
            .header(ContentType::TEXT_PLAIN)
            .body(email.text.clone()),
    );
    for attachment in &email.attachments {
        let content_type = ContentType::parse(&attachment.content_type)
            .map_err(|e| MailError::Build(format!("{}: {}", attachment.filename, e)))?;
        multipart = multipart.singlepart(
            Attachment::new(attachment.filename.clone()).body(attachment.bytes.clone(), content_type),
        );
    }

    builder
        .multipart(multipart)
        .map_err(|e| MailError::Build(e.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let settings = self
            .store
            .email_settings()
            .await?
            .ok_or(MailError::NotConfigured)?;

        let message = build_message(&settings, &email)?;
        self.transport(&settings)?
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        info!(
            to = %email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "Email sent successfully"
        );
        Ok(())
    }
}
