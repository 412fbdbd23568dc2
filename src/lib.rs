pub mod config;
pub mod controllers;
pub mod crypto;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod services;
pub mod store;

use secrecy::ExposeSecret;
use std::sync::Arc;

use crate::crypto::SecretCipher;
use crate::providers::ProviderFactory;
use crate::services::{
    CheckoutService, ConfirmationRunner, ExpirationSweeper, Mailer, Reconciler, RefundService,
};
use crate::store::BookingStore;

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BookingStore>,
    pub providers: Arc<dyn ProviderFactory>,
    pub mailer: Arc<dyn Mailer>,
    pub cipher: SecretCipher,
    pub config: config::Config,
}

impl AppState {
    pub fn new(
        config: config::Config,
        store: Arc<dyn BookingStore>,
        providers: Arc<dyn ProviderFactory>,
        mailer: Arc<dyn Mailer>,
    ) -> Arc<Self> {
        let cipher = SecretCipher::from_secret(config.security.encryption_secret.expose_secret());
        Arc::new(Self {
            store,
            providers,
            mailer,
            cipher,
            config,
        })
    }

    pub fn checkout(&self) -> CheckoutService {
        CheckoutService::new(self.store.clone(), self.providers.clone())
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.store.clone(),
            self.providers.clone(),
            ConfirmationRunner::new(self.store.clone(), self.mailer.clone()),
        )
    }

    pub fn refunds(&self) -> RefundService {
        RefundService::new(self.store.clone(), self.providers.clone())
    }

    pub fn sweeper(&self) -> ExpirationSweeper {
        ExpirationSweeper::new(self.store.clone())
    }
}
