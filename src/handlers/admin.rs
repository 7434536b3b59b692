use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::booking::parse_date;
use crate::models::{CreditPeriod, MemberBooking};
use crate::services::booking::{self, AdminBookingRequest};
use crate::services::pricing;
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if expected_token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized("unauthorized".to_string()));
    }
    Ok(())
}

// GET /api/admin/room-bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub space_slug: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct BookingsResponse {
    pub ok: bool,
    pub bookings: Vec<MemberBooking>,
}

fn optional_date(raw: Option<&str>, field: &str) -> Result<Option<chrono::NaiveDate>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => parse_date(s)
            .map(Some)
            .ok_or_else(|| AppError::Validation(format!("{field} must be YYYY-MM-DD."))),
    }
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<BookingsQuery>,
) -> Result<Json<BookingsResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let from = optional_date(q.from.as_deref(), "from")?;
    let to = optional_date(q.to.as_deref(), "to")?;
    let space = q.space_slug.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let limit = q.limit.unwrap_or(200).clamp(1, 1000);

    let bookings = {
        let db = state.db();
        queries::list_member_bookings(&db, from, to, space, limit)?
    };
    Ok(Json(BookingsResponse { ok: true, bookings }))
}

#[derive(Serialize)]
pub struct BookingResponse {
    pub ok: bool,
    pub booking: MemberBooking,
}

// POST /api/admin/room-bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AdminBookingRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let mut db = state.db();
    let booking = booking::admin_create_booking(&mut db, &req)?;
    Ok(Json(BookingResponse { ok: true, booking }))
}

// POST /api/admin/room-bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let mut db = state.db();
    let booking = booking::admin_cancel_booking(&mut db, &id)?;
    Ok(Json(BookingResponse { ok: true, booking }))
}

// POST /api/admin/credits
#[derive(Deserialize)]
pub struct CreditsRequest {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub period_start: String,
    pub tokens_total: i64,
}

#[derive(Serialize)]
pub struct CreditsResponse {
    pub ok: bool,
    pub period: CreditPeriod,
}

pub async fn set_credits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreditsRequest>,
) -> Result<Json<CreditsResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let tenant_id = req.tenant_id.trim();
    let owner_id = req.owner_id.trim();
    if tenant_id.is_empty() || owner_id.is_empty() {
        return Err(AppError::Validation("tenant_id and owner_id required.".to_string()));
    }
    if req.tokens_total < 0 {
        return Err(AppError::Validation("tokens_total must be zero or more.".to_string()));
    }
    let period_start = parse_date(&req.period_start)
        .map(pricing::month_start)
        .ok_or_else(|| AppError::Validation("period_start must be YYYY-MM-DD.".to_string()))?;

    let db = state.db();
    if !queries::is_tenant_user(&db, tenant_id, owner_id)? {
        return Err(AppError::Validation("Owner does not belong to that tenant.".to_string()));
    }

    queries::set_credit_total(&db, owner_id, &period_start, req.tokens_total)?;
    let period = queries::get_credit_period(&db, owner_id, &period_start)?
        .ok_or_else(|| anyhow::anyhow!("credit period {period_start} missing after upsert"))?;

    tracing::info!(owner_id, period_start = %period_start, tokens_total = req.tokens_total, "credit allowance set");
    Ok(Json(CreditsResponse { ok: true, period }))
}
