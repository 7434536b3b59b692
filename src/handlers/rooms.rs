use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{BookingKind, CreditSummary, TenantContext};
use crate::services::booking::{self, MemberBookingCreated, Quote, SlotRequest};
use crate::services::payments::{self, CheckoutRequest, NewCustomer};
use crate::services::settlement::{self, StatusReport, MIN_TOKEN_PURCHASE, TOKEN_PRICE_CENTS};
use crate::services::{ledger, tenancy};
use crate::state::AppState;

use super::{caller_id, today};

fn context(state: &AppState, headers: &HeaderMap) -> Result<TenantContext, AppError> {
    let db = state.db();
    tenancy::resolve_context(&db, caller_id(headers))
}

// POST /api/rooms/quote
pub async fn quote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SlotRequest>,
) -> Result<Json<Quote>, AppError> {
    let ctx = context(&state, &headers)?;
    let slot = req.parse(today())?;
    let quote = booking::quote(&state, &slot, Some(&ctx.token_owner_id)).await?;
    Ok(Json(quote))
}

// POST /api/rooms/book
pub async fn book(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SlotRequest>,
) -> Result<Json<MemberBookingCreated>, AppError> {
    let ctx = context(&state, &headers)?;
    let slot = req.parse(today())?;
    let created = booking::create_member_booking(&state, &ctx, &slot).await?;
    Ok(Json(created))
}

#[derive(Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub booking: String,
    pub session_id: Option<String>,
}

// GET /api/rooms/status
pub async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<StatusQuery>,
) -> Result<Json<StatusReport>, AppError> {
    let ctx = context(&state, &headers)?;
    let booking_id = q.booking.trim();
    if booking_id.is_empty() {
        return Err(AppError::Validation("booking required.".to_string()));
    }

    let belongs = {
        let db = state.db();
        queries::get_member_booking(&db, booking_id)?
            .map(|b| b.tenant_id.as_deref() == Some(ctx.tenant_id()) || b.owner_id == ctx.user_id)
    };
    match belongs {
        Some(true) => {}
        _ => return Err(AppError::NotFound("Booking not found.".to_string())),
    }

    let report =
        settlement::poll_status(&state, BookingKind::Member, booking_id, q.session_id.as_deref()).await?;
    Ok(Json(report))
}

#[derive(Serialize)]
pub struct TokensResponse {
    pub ok: bool,
    pub token_owner_id: String,
    #[serde(flatten)]
    pub summary: CreditSummary,
}

// GET /api/rooms/tokens
pub async fn tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TokensResponse>, AppError> {
    let ctx = context(&state, &headers)?;
    let summary = {
        let db = state.db();
        ledger::summary(&db, &ctx.token_owner_id)?
    };
    Ok(Json(TokensResponse {
        ok: true,
        token_owner_id: ctx.token_owner_id,
        summary,
    }))
}

#[derive(Deserialize)]
pub struct PurchaseRequest {
    #[serde(default)]
    pub quantity: i64,
}

#[derive(Serialize)]
pub struct PurchaseResponse {
    pub ok: bool,
    pub quantity: i64,
    pub amount_cents: i64,
    pub currency: String,
    pub checkout_url: Option<String>,
    pub stripe_checkout_session_id: String,
}

// POST /api/rooms/tokens/purchase
pub async fn purchase_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<PurchaseResponse>, AppError> {
    let ctx = context(&state, &headers)?;
    if req.quantity < MIN_TOKEN_PURCHASE {
        return Err(AppError::Validation(format!(
            "Minimum purchase is {MIN_TOKEN_PURCHASE} tokens."
        )));
    }
    let amount_cents = req.quantity * TOKEN_PRICE_CENTS;
    let currency = state.config.booking_currency.clone();

    let customer_id = payments::ensure_customer(
        state.payments.as_ref(),
        ctx.tenant.stripe_customer_id.as_deref(),
        &NewCustomer {
            name: ctx.tenant.name.clone(),
            email: ctx.token_owner_email.clone(),
            metadata: vec![("tenant_id".to_string(), ctx.tenant_id().to_string())],
        },
        &format!("tenant-customer-{}", ctx.tenant_id()),
    )
    .await?;
    if ctx.tenant.stripe_customer_id.as_deref() != Some(customer_id.as_str()) {
        let db = state.db();
        queries::set_tenant_customer_id(&db, ctx.tenant_id(), &customer_id)?;
    }

    let minute = chrono::Utc::now().timestamp() / 60;
    let site = &state.config.site_url;
    let session = state
        .payments
        .create_checkout_session(
            &CheckoutRequest {
                customer_id,
                amount_cents,
                currency: currency.clone(),
                description: format!("{} meeting room tokens", req.quantity),
                success_url: format!("{site}/platform/rooms?tokens=success&session_id={{CHECKOUT_SESSION_ID}}"),
                cancel_url: format!("{site}/platform/rooms?tokens=cancel"),
                metadata: vec![
                    ("token_purchase".to_string(), "true".to_string()),
                    ("token_owner_id".to_string(), ctx.token_owner_id.clone()),
                    ("tenant_id".to_string(), ctx.tenant_id().to_string()),
                    ("purchaser_id".to_string(), ctx.user_id.clone()),
                    ("token_quantity".to_string(), req.quantity.to_string()),
                ],
                promotion_code_id: None,
            },
            &format!("tokens-{}-{}-{}-{minute}", ctx.tenant_id(), ctx.user_id, req.quantity),
        )
        .await?;

    tracing::info!(
        session_id = %session.id,
        owner_id = %ctx.token_owner_id,
        quantity = req.quantity,
        "token purchase checkout created"
    );

    Ok(Json(PurchaseResponse {
        ok: true,
        quantity: req.quantity,
        amount_cents,
        currency,
        checkout_url: session.url,
        stripe_checkout_session_id: session.id,
    }))
}
