use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::services::settlement::{self, EventOutcome};
use crate::state::AppState;

use super::today;

/// Checks a `t=<unix>,v1=<hex>[,v1=<hex>...]` header against the raw body.
/// Any one matching `v1` is enough; the timestamp must be within `tolerance_secs` of `now`.
fn verify_signature(secret: &str, header: &str, payload: &[u8], now: i64, tolerance_secs: i64) -> Result<(), &'static str> {
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or("missing timestamp")?;
    if signatures.is_empty() {
        return Err("missing v1 signature");
    }
    if (now - timestamp).abs() > tolerance_secs {
        return Err("timestamp outside tolerance");
    }

    for signature in signatures {
        let Ok(expected) = hex::decode(signature) else {
            continue;
        };
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
            return Err("invalid secret");
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err("no matching signature")
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

// POST /api/stripe/webhook
pub async fn stripe_webhook(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let secret = state.config.stripe_webhook_secret.trim();
    if secret.is_empty() {
        tracing::error!("webhook received but no signing secret is configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Webhook is not configured." })),
        )
            .into_response();
    }

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if signature.is_empty() {
        tracing::warn!("missing Stripe-Signature header");
        return bad_request("Missing signature.");
    }

    let now = chrono::Utc::now().timestamp();
    if let Err(reason) = verify_signature(
        secret,
        signature,
        &body,
        now,
        state.config.stripe_webhook_tolerance_secs,
    ) {
        tracing::warn!(reason, "webhook signature rejected");
        return bad_request("Invalid signature.");
    }

    let event: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "malformed webhook payload");
            return bad_request("Invalid payload.");
        }
    };
    if !event.is_object() {
        return bad_request("Invalid payload.");
    }
    // events are deduplicated by id
    let Some(event_id) = event["id"].as_str().filter(|id| !id.trim().is_empty()) else {
        tracing::warn!("webhook event without an id");
        return bad_request("Invalid payload.");
    };

    tracing::info!(
        event_id,
        event_type = event["type"].as_str().unwrap_or_default(),
        "webhook received"
    );

    match settlement::handle_event(&state, &event, today()).await {
        Ok(EventOutcome::Duplicate) => Json(json!({ "ok": true, "skipped": true })).into_response(),
        Ok(outcome) => Json(json!({ "ok": true, "outcome": outcome })).into_response(),
        Err(e) => e.into_response(),
    }
}
