use anyhow::Context;
use axum::{routing::get, Router};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use experience_booking::{
    config::Config,
    controllers,
    crypto::SecretCipher,
    database::Database,
    providers::GatewayProviderFactory,
    services::SmtpMailer,
    store::{BookingStore, PgStore},
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(&config.app.rust_log);
    let registry = tracing_subscriber::registry().with(filter);

    if config.app.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config);

    info!(environment = %config.app.environment, "Starting experience booking service");

    // Connect to the database
    let db = Database::new(config.database.url.expose_secret(), config.database.pool_size)
        .await
        .context("Failed to connect to database")?;
    info!("Database connected");

    // Run migrations
    db.run_migrations()
        .await
        .context("Failed to run migrations")?;

    let store: Arc<dyn BookingStore> = Arc::new(PgStore::new(db));
    let cipher = SecretCipher::from_secret(config.security.encryption_secret.expose_secret());
    let providers = Arc::new(
        GatewayProviderFactory::new(
            cipher.clone(),
            config.payment.clone(),
            config.circuit_breaker.clone(),
        )
        .context("Failed to build payment providers")?,
    );
    let mailer = Arc::new(SmtpMailer::new(store.clone(), cipher));

    let app_state = AppState::new(config.clone(), store, providers, mailer);

    // --- Start background tasks ---

    if let Some(seconds) = config.sweeper.interval_seconds {
        info!(every_seconds = seconds, "In-process expiration sweeper enabled");
        app_state.sweeper().spawn(Duration::from_secs(seconds.max(1)));
    }

    // --- Start the web server ---

    let app = Router::new()
        .route("/", get(|| async { "Experience Booking API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let host: std::net::IpAddr = config
        .app
        .host
        .parse()
        .context("Invalid APP__HOST")?;
    let addr = SocketAddr::from((host, config.app.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind listener")?;
    axum::serve(listener, app.into_make_service())
        .await
        .context("Server error")?;

    Ok(())
}
