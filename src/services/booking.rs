use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::queries::{self, NewMemberBooking, NewPayment, NewPublicBooking};
use crate::errors::AppError;
use crate::models::booking::{parse_date, parse_time};
use crate::models::{
    BookingKind, BookingWindow, MemberBooking, MemberBookingStatus, OccupiedSlot, PaymentStatus,
    PublicBooking, PublicBookingStatus, Space, TenantContext,
};
use crate::services::ledger;
use crate::services::payments::{self, CheckoutRequest, NewCustomer, ProcessorError, ResolvedCoupon};
use crate::services::pricing;
use crate::services::scheduling;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct SlotRequest {
    #[serde(default)]
    pub space_slug: String,
    #[serde(default)]
    pub booking_date: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublicBookingRequest {
    #[serde(flatten)]
    pub slot: SlotRequest,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_email: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
}

/// A requested range after parsing and window validation.
#[derive(Debug, Clone)]
pub struct Slot {
    pub space_slug: String,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub hours: i64,
    pub coupon_code: Option<String>,
}

impl SlotRequest {
    pub fn parse(&self, today: NaiveDate) -> Result<Slot, AppError> {
        let space_slug = self.space_slug.trim();
        if space_slug.is_empty() {
            return Err(AppError::Validation("space_slug required.".to_string()));
        }
        let date = parse_date(&self.booking_date)
            .ok_or_else(|| AppError::Validation("booking_date must be YYYY-MM-DD.".to_string()))?;
        if self.start_time.trim().is_empty() || self.end_time.trim().is_empty() {
            return Err(AppError::Validation("start_time and end_time required.".to_string()));
        }
        let (Some(start), Some(end)) = (parse_time(&self.start_time), parse_time(&self.end_time)) else {
            return Err(AppError::Validation("start_time and end_time must be HH:MM.".to_string()));
        };

        scheduling::validate_window(space_slug, date, start, end, today)?;

        let hours = pricing::compute_hours(start, end);
        if hours == 0 {
            return Err(AppError::Validation("Invalid time range.".to_string()));
        }

        let coupon_code = self
            .coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| c.chars().take(40).collect());

        Ok(Slot {
            space_slug: space_slug.to_string(),
            date,
            start,
            end,
            hours,
            coupon_code,
        })
    }
}

fn load_space(conn: &Connection, slug: &str) -> Result<Space, AppError> {
    queries::get_space(conn, slug)?.ok_or_else(|| AppError::NotFound("Room not found.".to_string()))
}

// ── Quote ──

#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub hours: i64,
    pub room: RoomRef,
    pub tokens: TokenQuote,
    pub pricing: PricingQuote,
    pub coupon: Option<CouponQuote>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomRef {
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenQuote {
    pub period_start: Option<String>,
    pub tokens_per_hour: i64,
    pub required_tokens: i64,
    pub tokens_total: i64,
    pub tokens_used: i64,
    pub tokens_left: i64,
    pub tokens_applied: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PricingQuote {
    pub label: String,
    pub base_price_cents: i64,
    pub cash_due_before_discount_cents: i64,
    pub discount_cents: i64,
    pub final_cash_due_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CouponQuote {
    pub code: String,
    pub promotion_code_id: Option<String>,
    pub valid: bool,
    pub error: Option<String>,
}

/// What a booking would cost right now. Nothing is reserved or written.
pub async fn quote(state: &AppState, slot: &Slot, token_owner_id: Option<&str>) -> Result<Quote, AppError> {
    let (space, summary) = {
        let db = state.db();
        let space = load_space(&db, &slot.space_slug)?;
        let summary = match token_owner_id {
            Some(owner) => ledger::summary(&db, owner)?,
            None => Default::default(),
        };
        (space, summary)
    };

    let tokens_per_hour = space.tokens_per_hour.max(0);
    let required_tokens = slot.hours * tokens_per_hour;
    let tokens_applied = summary.tokens_left.min(required_tokens);

    let tier = pricing::tiered_price(&space, slot.hours);
    let cash_before = pricing::cash_due(tier.amount_cents, required_tokens, tokens_applied);

    let mut discount_cents = 0;
    let coupon = match slot.coupon_code.as_deref() {
        None => None,
        Some(code) if cash_before == 0 => Some(CouponQuote {
            code: code.to_string(),
            promotion_code_id: None,
            valid: false,
            error: Some("No cash is due, so a coupon is not needed.".to_string()),
        }),
        Some(code) => {
            let (promotion_code_id, error) = match payments::resolve_coupon(state.payments.as_ref(), code).await {
                Ok(Some(resolved)) => {
                    discount_cents = resolved.discount_cents(cash_before);
                    (Some(resolved.promotion_code_id), None)
                }
                Ok(None) => (None, Some("Coupon not found.".to_string())),
                Err(e) => (None, Some(e.message)),
            };
            Some(CouponQuote {
                code: code.to_string(),
                valid: promotion_code_id.is_some() && error.is_none(),
                promotion_code_id,
                error,
            })
        }
    };

    Ok(Quote {
        hours: slot.hours,
        room: RoomRef {
            slug: space.slug.clone(),
            title: space.title.clone(),
        },
        tokens: TokenQuote {
            period_start: summary.debit_period().map(str::to_string),
            tokens_per_hour,
            required_tokens,
            tokens_total: summary.tokens_total,
            tokens_used: summary.tokens_used,
            tokens_left: summary.tokens_left,
            tokens_applied,
        },
        pricing: PricingQuote {
            label: tier.label,
            base_price_cents: tier.amount_cents,
            cash_due_before_discount_cents: cash_before,
            discount_cents,
            final_cash_due_cents: (cash_before - discount_cents).max(0),
        },
        coupon,
    })
}

// ── Create ──

#[derive(Debug, Clone, Serialize)]
pub struct PaymentInstructions {
    pub required: bool,
    pub amount_cents: i64,
    pub discount_cents: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_checkout_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_checkout_client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberBookingCreated {
    pub ok: bool,
    pub booking: MemberBooking,
    pub payment: PaymentInstructions,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicBookingCreated {
    pub ok: bool,
    pub booking: PublicBooking,
    pub payment: PaymentInstructions,
}

/// Member booking. Tokens cover what they can; any remaining cash goes
/// through a checkout session and the booking waits in `requested`.
pub async fn create_member_booking(
    state: &AppState,
    ctx: &TenantContext,
    slot: &Slot,
) -> Result<MemberBookingCreated, AppError> {
    let currency = state.config.booking_currency.clone();

    let coupon: Option<Result<Option<ResolvedCoupon>, ProcessorError>> = match slot.coupon_code.as_deref() {
        Some(code) => Some(payments::resolve_coupon(state.payments.as_ref(), code).await),
        None => None,
    };

    // Overlap re-check, balance read, insert and any zero-cash debit share one lock.
    let (booking, space, cash_before, discount_cents, promotion_code_id, required_tokens) = {
        let mut db = state.db();
        let space = load_space(&db, &slot.space_slug)?;
        scheduling::ensure_slot_free(&db, &slot.space_slug, slot.date, slot.start, slot.end)??;

        let summary = ledger::summary(&db, &ctx.token_owner_id)?;
        let required_tokens = slot.hours * space.tokens_per_hour.max(0);
        let tokens_applied = summary.tokens_left.min(required_tokens);
        let base = pricing::tiered_price(&space, slot.hours).amount_cents;
        let cash_before = pricing::cash_due(base, required_tokens, tokens_applied);

        let (discount_cents, promotion_code_id) = match coupon {
            Some(result) if cash_before > 0 => match result? {
                Some(resolved) => (resolved.discount_cents(cash_before), Some(resolved.promotion_code_id)),
                None => return Err(AppError::Validation("Coupon not found.".to_string())),
            },
            _ => (0, None),
        };
        let final_cash = (cash_before - discount_cents).max(0);
        let status = if final_cash == 0 {
            MemberBookingStatus::Approved
        } else {
            MemberBookingStatus::Requested
        };
        let period_start = summary.debit_period().map(str::to_string);

        let tx = db.transaction().map_err(AppError::Database)?;
        let booking_id = queries::insert_member_booking(
            &tx,
            &NewMemberBooking {
                owner_id: &ctx.user_id,
                tenant_id: Some(ctx.tenant_id()),
                space_slug: &slot.space_slug,
                booking_date: slot.date,
                start_time: slot.start,
                end_time: slot.end,
                hours: slot.hours,
                tokens_used: tokens_applied,
                tokens_debited: if status == MemberBookingStatus::Approved { tokens_applied } else { 0 },
                token_owner_id: Some(&ctx.token_owner_id),
                token_period_start: period_start.as_deref(),
                price_cents: if status == MemberBookingStatus::Approved { 0 } else { cash_before },
                status,
            },
        )?;

        if status == MemberBookingStatus::Approved && tokens_applied > 0 {
            let period = period_start.as_deref().unwrap_or_default();
            ledger::apply_debit(&tx, &ctx.token_owner_id, period, tokens_applied)?;
        }

        let booking = queries::get_member_booking(&tx, &booking_id)?
            .ok_or_else(|| anyhow::anyhow!("booking {booking_id} vanished after insert"))?;
        tx.commit().map_err(AppError::Database)?;

        (booking, space, cash_before, discount_cents, promotion_code_id, required_tokens)
    };

    tracing::info!(
        booking_id = %booking.id,
        owner_id = %ctx.token_owner_id,
        status = booking.status.as_str(),
        tokens = booking.tokens_used,
        "member booking created"
    );

    if booking.status == MemberBookingStatus::Approved {
        return Ok(MemberBookingCreated {
            ok: true,
            booking,
            payment: PaymentInstructions {
                required: false,
                amount_cents: 0,
                discount_cents,
                currency,
                checkout_url: None,
                stripe_checkout_session_id: None,
                stripe_checkout_client_secret: None,
            },
        });
    }

    let final_cash = (cash_before - discount_cents).max(0);
    let metadata = vec![
        ("booking_kind".to_string(), BookingKind::Member.as_str().to_string()),
        ("booking_id".to_string(), booking.id.clone()),
        ("tenant_id".to_string(), ctx.tenant_id().to_string()),
        ("token_owner_id".to_string(), ctx.token_owner_id.clone()),
        ("booking_date".to_string(), slot.date.to_string()),
        ("space_slug".to_string(), slot.space_slug.clone()),
        ("tokens_applied".to_string(), booking.tokens_used.to_string()),
        ("required_tokens".to_string(), required_tokens.to_string()),
        ("discount_cents".to_string(), discount_cents.to_string()),
        ("coupon_code".to_string(), slot.coupon_code.clone().unwrap_or_default()),
    ];

    let result = start_member_checkout(
        state,
        ctx,
        &booking,
        &space,
        cash_before,
        final_cash,
        discount_cents,
        promotion_code_id,
        metadata,
        slot.coupon_code.as_deref(),
    )
    .await;

    match result {
        Ok(payment) => Ok(MemberBookingCreated {
            ok: true,
            booking,
            payment,
        }),
        Err(e) => {
            cancel_after_failure(state, BookingKind::Member, &booking.id);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn start_member_checkout(
    state: &AppState,
    ctx: &TenantContext,
    booking: &MemberBooking,
    space: &Space,
    cash_before: i64,
    final_cash: i64,
    discount_cents: i64,
    promotion_code_id: Option<String>,
    metadata: Vec<(String, String)>,
    coupon_code: Option<&str>,
) -> Result<PaymentInstructions, AppError> {
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

    let site = &state.config.site_url;
    let session = state
        .payments
        .create_checkout_session(
            &CheckoutRequest {
                customer_id: customer_id.clone(),
                amount_cents: cash_before,
                currency: currency.clone(),
                description: describe(space, booking.booking_date, booking.start_time, booking.end_time),
                success_url: format!(
                    "{site}/platform/rooms?stripe=success&booking={}&session_id={{CHECKOUT_SESSION_ID}}",
                    booking.id
                ),
                cancel_url: format!("{site}/platform/rooms?stripe=cancel&booking={}", booking.id),
                metadata,
                promotion_code_id,
            },
            &format!("checkout-{}", booking.id),
        )
        .await?;

    {
        let db = state.db();
        queries::insert_payment(
            &db,
            &NewPayment {
                booking_kind: BookingKind::Member,
                booking_id: &booking.id,
                tenant_id: Some(ctx.tenant_id()),
                token_owner_id: Some(&ctx.token_owner_id),
                stripe_customer_id: &customer_id,
                stripe_checkout_session_id: &session.id,
                amount_cents: final_cash,
                currency: &currency,
                discount_cents,
                coupon_code,
            },
        )?;
    }

    tracing::info!(booking_id = %booking.id, session_id = %session.id, amount = final_cash, "checkout session created");

    Ok(PaymentInstructions {
        required: true,
        amount_cents: final_cash,
        discount_cents,
        currency,
        checkout_url: session.url,
        stripe_checkout_session_id: Some(session.id),
        stripe_checkout_client_secret: session.client_secret,
    })
}

/// Anonymous booking. Always cash; the slot is held in `pending_payment`
/// until the checkout settles or expires.
pub async fn create_public_booking(
    state: &AppState,
    req: &PublicBookingRequest,
    slot: &Slot,
) -> Result<PublicBookingCreated, AppError> {
    let customer_name = req.customer_name.trim();
    let customer_email = req.customer_email.trim();
    let customer_phone = req
        .customer_phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    if customer_name.is_empty() {
        return Err(AppError::Validation("customer_name required.".to_string()));
    }
    if !is_plausible_email(customer_email) {
        return Err(AppError::Validation("A valid customer_email is required.".to_string()));
    }

    let currency = state.config.booking_currency.clone();

    let (space, base) = {
        let db = state.db();
        let space = load_space(&db, &slot.space_slug)?;
        let base = pricing::tiered_price(&space, slot.hours).amount_cents;
        (space, base)
    };
    if base <= 0 {
        return Err(AppError::Validation(
            "This room is not currently bookable online.".to_string(),
        ));
    }

    // Coupon problems never block a public booking; it just goes ahead at full price.
    let coupon = match slot.coupon_code.as_deref() {
        Some(code) => match payments::resolve_coupon(state.payments.as_ref(), code).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "coupon lookup failed, continuing without it");
                None
            }
        },
        None => None,
    };
    let discount_cents = coupon.as_ref().map(|c| c.discount_cents(base)).unwrap_or(0);
    let final_cash = (base - discount_cents).max(0);

    let booking = {
        let db = state.db();
        scheduling::ensure_slot_free(&db, &slot.space_slug, slot.date, slot.start, slot.end)??;
        let id = queries::insert_public_booking(
            &db,
            &NewPublicBooking {
                space_slug: &slot.space_slug,
                booking_date: slot.date,
                start_time: slot.start,
                end_time: slot.end,
                hours: slot.hours,
                price_cents: base,
                currency: &currency,
                status: PublicBookingStatus::PendingPayment,
                customer_name,
                customer_email,
                customer_phone,
            },
        )?;
        queries::get_public_booking(&db, &id)?
            .ok_or_else(|| anyhow::anyhow!("booking {id} vanished after insert"))?
    };

    tracing::info!(booking_id = %booking.id, space = %booking.space_slug, "public booking created");

    let result = start_public_checkout(state, &booking, &space, base, final_cash, discount_cents, coupon, slot).await;
    match result {
        Ok(payment) => Ok(PublicBookingCreated {
            ok: true,
            booking,
            payment,
        }),
        Err(e) => {
            cancel_after_failure(state, BookingKind::Public, &booking.id);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn start_public_checkout(
    state: &AppState,
    booking: &PublicBooking,
    space: &Space,
    base: i64,
    final_cash: i64,
    discount_cents: i64,
    coupon: Option<ResolvedCoupon>,
    slot: &Slot,
) -> Result<PaymentInstructions, AppError> {
    let currency = state.config.booking_currency.clone();

    let customer_id = payments::ensure_customer(
        state.payments.as_ref(),
        None,
        &NewCustomer {
            name: booking.customer_name.clone(),
            email: Some(booking.customer_email.clone()),
            metadata: vec![("public_booking_id".to_string(), booking.id.clone())],
        },
        &format!("public-customer-{}", booking.id),
    )
    .await?;

    let coupon_code = coupon.as_ref().and(slot.coupon_code.clone());
    let site = &state.config.site_url;
    let session = state
        .payments
        .create_checkout_session(
            &CheckoutRequest {
                customer_id: customer_id.clone(),
                amount_cents: base,
                currency: currency.clone(),
                description: describe(space, booking.booking_date, booking.start_time, booking.end_time),
                success_url: format!(
                    "{site}/book/room?stripe=success&booking={}&session_id={{CHECKOUT_SESSION_ID}}",
                    booking.id
                ),
                cancel_url: format!("{site}/book/room?stripe=cancel&booking={}", booking.id),
                metadata: vec![
                    ("booking_kind".to_string(), BookingKind::Public.as_str().to_string()),
                    ("booking_id".to_string(), booking.id.clone()),
                    ("space_slug".to_string(), booking.space_slug.clone()),
                    ("booking_date".to_string(), booking.booking_date.to_string()),
                    ("customer_email".to_string(), booking.customer_email.clone()),
                    ("discount_cents".to_string(), discount_cents.to_string()),
                    ("coupon_code".to_string(), coupon_code.clone().unwrap_or_default()),
                ],
                promotion_code_id: coupon.map(|c| c.promotion_code_id),
            },
            &format!("checkout-{}", booking.id),
        )
        .await?;

    {
        let db = state.db();
        queries::insert_payment(
            &db,
            &NewPayment {
                booking_kind: BookingKind::Public,
                booking_id: &booking.id,
                tenant_id: None,
                token_owner_id: None,
                stripe_customer_id: &customer_id,
                stripe_checkout_session_id: &session.id,
                amount_cents: final_cash,
                currency: &currency,
                discount_cents,
                coupon_code: coupon_code.as_deref(),
            },
        )?;
    }

    tracing::info!(booking_id = %booking.id, session_id = %session.id, amount = final_cash, "checkout session created");

    Ok(PaymentInstructions {
        required: true,
        amount_cents: final_cash,
        discount_cents,
        currency,
        checkout_url: session.url,
        stripe_checkout_session_id: Some(session.id),
        stripe_checkout_client_secret: session.client_secret,
    })
}

/// Frees the slot of a booking whose checkout could not be started.
fn cancel_after_failure(state: &AppState, kind: BookingKind, booking_id: &str) {
    let db = state.db();
    let result = match kind {
        BookingKind::Member => queries::transition_member_booking(
            &db,
            booking_id,
            MemberBookingStatus::Requested,
            MemberBookingStatus::Cancelled,
        ),
        BookingKind::Public => queries::transition_public_booking(
            &db,
            booking_id,
            PublicBookingStatus::PendingPayment,
            PublicBookingStatus::Cancelled,
        ),
    };
    match result {
        Ok(_) => tracing::warn!(booking_id, kind = kind.as_str(), "booking cancelled after checkout failure"),
        Err(e) => tracing::error!(error = %e, booking_id, "failed to cancel booking after checkout failure"),
    }
}

fn describe(space: &Space, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> String {
    let title = if space.title.trim().is_empty() {
        space.slug.as_str()
    } else {
        space.title.as_str()
    };
    format!(
        "Room booking: {title} ({date} {}–{})",
        start.format("%H:%M"),
        end.format("%H:%M")
    )
}

fn is_plausible_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !s.contains(char::is_whitespace),
        None => false,
    }
}

// ── Availability ──

#[derive(Debug, Clone, Serialize)]
pub struct Availability {
    pub space_slug: String,
    pub booking_date: NaiveDate,
    pub window: BookingWindow,
    pub occupied: Vec<OccupiedSlot>,
}

pub fn availability(conn: &Connection, space_slug: &str, date: NaiveDate) -> Result<Availability, AppError> {
    load_space(conn, space_slug)?;
    Ok(Availability {
        space_slug: space_slug.to_string(),
        booking_date: date,
        window: BookingWindow::for_space(space_slug, date),
        occupied: queries::get_occupied_slots(conn, space_slug, date)?,
    })
}

// ── Admin ──

#[derive(Debug, Clone, Deserialize)]
pub struct AdminBookingRequest {
    pub owner_id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub space_slug: String,
    pub booking_date: String,
    pub start_time: String,
    pub end_time: String,
}

/// Staff booking: no tokens, no cash, approved immediately. Only the
/// overlap rule applies.
pub fn admin_create_booking(conn: &mut Connection, req: &AdminBookingRequest) -> Result<MemberBooking, AppError> {
    let owner_id = req.owner_id.trim();
    if owner_id.is_empty() {
        return Err(AppError::Validation("owner_id required.".to_string()));
    }
    let date = parse_date(&req.booking_date)
        .ok_or_else(|| AppError::Validation("booking_date must be YYYY-MM-DD.".to_string()))?;
    let (Some(start), Some(end)) = (parse_time(&req.start_time), parse_time(&req.end_time)) else {
        return Err(AppError::Validation("start_time and end_time must be HH:MM.".to_string()));
    };
    if end <= start {
        return Err(AppError::Validation("end_time must be after start_time.".to_string()));
    }
    load_space(conn, &req.space_slug)?;

    let minutes = (end - start).num_minutes();
    let hours = (minutes + 59) / 60;

    let tx = conn.transaction().map_err(AppError::Database)?;
    scheduling::ensure_slot_free(&tx, &req.space_slug, date, start, end)??;
    let id = queries::insert_member_booking(
        &tx,
        &NewMemberBooking {
            owner_id,
            tenant_id: req.tenant_id.as_deref(),
            space_slug: &req.space_slug,
            booking_date: date,
            start_time: start,
            end_time: end,
            hours,
            tokens_used: 0,
            tokens_debited: 0,
            token_owner_id: None,
            token_period_start: None,
            price_cents: 0,
            status: MemberBookingStatus::Approved,
        },
    )?;
    let booking = queries::get_member_booking(&tx, &id)?
        .ok_or_else(|| anyhow::anyhow!("booking {id} vanished after insert"))?;
    tx.commit().map_err(AppError::Database)?;

    tracing::info!(booking_id = %booking.id, owner_id, "admin booking created");
    Ok(booking)
}

/// Cancels a member booking. Only tokens the ledger actually gave up go back
/// to the period they came from; a pending checkout is marked cancelled.
pub fn admin_cancel_booking(conn: &mut Connection, booking_id: &str) -> Result<MemberBooking, AppError> {
    let tx = conn.transaction().map_err(AppError::Database)?;
    let booking = queries::get_member_booking(&tx, booking_id)?
        .ok_or_else(|| AppError::NotFound("Booking not found.".to_string()))?;

    if booking.status == MemberBookingStatus::Cancelled {
        return Ok(booking);
    }

    queries::update_member_booking_status(&tx, booking_id, MemberBookingStatus::Cancelled)?;

    if let Some(owner) = booking.token_owner_id.as_deref().filter(|_| booking.tokens_debited > 0) {
        let period = booking
            .token_period_start
            .clone()
            .unwrap_or_else(|| pricing::month_start(booking.booking_date));
        ledger::refund(&tx, owner, &period, booking.tokens_debited)?;
        queries::set_tokens_debited(&tx, booking_id, 0)?;
    }

    if let Some(payment) = queries::latest_payment_for_booking(&tx, BookingKind::Member, booking_id)? {
        if payment.status == PaymentStatus::RequiresPayment {
            queries::close_payment(&tx, &payment.id, PaymentStatus::Cancelled)?;
        }
    }

    let updated = queries::get_member_booking(&tx, booking_id)?
        .ok_or_else(|| anyhow::anyhow!("booking {booking_id} vanished during cancel"))?;
    tx.commit().map_err(AppError::Database)?;

    tracing::info!(booking_id, refunded = booking.tokens_debited, "booking cancelled by admin");
    Ok(updated)
}
