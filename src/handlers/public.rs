use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::booking::parse_date;
use crate::models::{BookingKind, Space};
use crate::services::booking::{self, Availability, PublicBookingCreated, PublicBookingRequest, Quote, SlotRequest};
use crate::services::settlement::{self, StatusReport};
use crate::state::AppState;

use super::today;

#[derive(Serialize)]
pub struct SpacesResponse {
    pub ok: bool,
    pub currency: String,
    pub spaces: Vec<Space>,
}

// GET /api/bookings/room/spaces
pub async fn spaces(State(state): State<Arc<AppState>>) -> Result<Json<SpacesResponse>, AppError> {
    let spaces = {
        let db = state.db();
        queries::list_spaces(&db)?
    };
    Ok(Json(SpacesResponse {
        ok: true,
        currency: state.config.booking_currency.clone(),
        spaces,
    }))
}

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    #[serde(default)]
    pub space_slug: String,
    #[serde(default)]
    pub date: String,
}

// GET /api/bookings/room/availability
pub async fn availability(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AvailabilityQuery>,
) -> Result<Json<Availability>, AppError> {
    let slug = q.space_slug.trim();
    if slug.is_empty() {
        return Err(AppError::Validation("space_slug required.".to_string()));
    }
    let date = parse_date(&q.date)
        .ok_or_else(|| AppError::Validation("date must be YYYY-MM-DD.".to_string()))?;

    let db = state.db();
    Ok(Json(booking::availability(&db, slug, date)?))
}

// POST /api/bookings/room/quote
pub async fn quote(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SlotRequest>,
) -> Result<Json<Quote>, AppError> {
    let slot = req.parse(today())?;
    Ok(Json(booking::quote(&state, &slot, None).await?))
}

// POST /api/bookings/room/book
pub async fn book(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PublicBookingRequest>,
) -> Result<Json<PublicBookingCreated>, AppError> {
    let slot = req.slot.parse(today())?;
    Ok(Json(booking::create_public_booking(&state, &req, &slot).await?))
}

#[derive(Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub booking: String,
    pub session_id: Option<String>,
}

// GET /api/bookings/room/status
pub async fn status(
    State(state): State<Arc<AppState>>,
    Query(q): Query<StatusQuery>,
) -> Result<Json<StatusReport>, AppError> {
    let booking_id = q.booking.trim();
    if booking_id.is_empty() {
        return Err(AppError::Validation("booking required.".to_string()));
    }
    let report =
        settlement::poll_status(&state, BookingKind::Public, booking_id, q.session_id.as_deref()).await?;
    Ok(Json(report))
}
