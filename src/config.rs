use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub site_url: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    pub stripe_api_version: String,
    pub stripe_webhook_tolerance_secs: i64,
    pub booking_currency: String,
    pub resend_api_key: String,
    pub email_from: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "spacebook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            site_url: env::var("SITE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            stripe_api_base: env::var("STRIPE_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            stripe_api_version: env::var("STRIPE_API_VERSION")
                .unwrap_or_else(|_| "2024-06-20".to_string()),
            stripe_webhook_tolerance_secs: env::var("STRIPE_WEBHOOK_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            booking_currency: env::var("BOOKING_CURRENCY")
                .map(|v| v.to_uppercase())
                .unwrap_or_else(|_| "NZD".to_string()),
            resend_api_key: env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Spacebook <bookings@example.com>".to_string()),
        }
    }

    /// `live` for live-mode secret or restricted keys, `test` otherwise.
    pub fn stripe_mode(&self) -> &'static str {
        if self.stripe_secret_key.starts_with("sk_live_") || self.stripe_secret_key.starts_with("rk_live_") {
            "live"
        } else {
            "test"
        }
    }
}
