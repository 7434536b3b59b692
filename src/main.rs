use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

use spacebook::config::AppConfig;
use spacebook::db;
use spacebook::handlers;
use spacebook::services::email::resend::ResendEmailSender;
use spacebook::services::payments::stripe::StripeClient;
use spacebook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    if config.stripe_secret_key.is_empty() {
        tracing::warn!("STRIPE_SECRET_KEY is not set; cash bookings will fail");
    } else {
        tracing::info!(mode = config.stripe_mode(), "using Stripe payment processor");
    }
    if config.stripe_webhook_secret.is_empty() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET is not set; webhooks will be rejected");
    }
    if config.resend_api_key.is_empty() {
        tracing::warn!("RESEND_API_KEY is not set; confirmation emails will be skipped");
    }

    let payments = StripeClient::new(
        config.stripe_secret_key.clone(),
        config.stripe_api_base.clone(),
        config.stripe_api_version.clone(),
    );
    let mailer = ResendEmailSender::new(config.resend_api_key.clone(), config.email_from.clone());

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        payments: Box::new(payments),
        mailer: Box::new(mailer),
    });

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
