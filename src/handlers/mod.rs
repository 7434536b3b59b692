pub mod admin;
pub mod health;
pub mod invoices;
pub mod public;
pub mod rooms;
pub mod webhook;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use chrono::NaiveDate;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/rooms/quote", post(rooms::quote))
        .route("/api/rooms/book", post(rooms::book))
        .route("/api/rooms/status", get(rooms::status))
        .route("/api/rooms/tokens", get(rooms::tokens))
        .route("/api/rooms/tokens/purchase", post(rooms::purchase_tokens))
        .route("/api/bookings/room/spaces", get(public::spaces))
        .route("/api/bookings/room/availability", get(public::availability))
        .route("/api/bookings/room/quote", post(public::quote))
        .route("/api/bookings/room/book", post(public::book))
        .route("/api/bookings/room/status", get(public::status))
        .route("/api/stripe/webhook", post(webhook::stripe_webhook))
        .route("/api/invoices/url", get(invoices::invoice_url))
        .route(
            "/api/admin/room-bookings",
            get(admin::list_bookings).post(admin::create_booking),
        )
        .route(
            "/api/admin/room-bookings/:id/cancel",
            post(admin::cancel_booking),
        )
        .route("/api/admin/credits", post(admin::set_credits))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Caller identity forwarded by the auth layer in front of this service.
pub(crate) fn caller_id(headers: &HeaderMap) -> &str {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("")
}

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
