use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::booking::{parse_date, parse_time};
use crate::models::{
    BookingKind, CreditPeriod, Invoice, MemberBooking, MemberBookingStatus, OccupiedSlot,
    PaidDetails, Payment, PaymentStatus, PublicBooking, PublicBookingStatus, Space, Tenant,
    TenantRole,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn now_str() -> String {
    Utc::now().naive_utc().format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).unwrap_or_else(|_| Utc::now().naive_utc())
}

fn time_str(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn date_str(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn parse_stored_date(s: &str) -> anyhow::Result<NaiveDate> {
    parse_date(s).with_context(|| format!("invalid stored date: {s}"))
}

fn parse_stored_time(s: &str) -> anyhow::Result<NaiveTime> {
    parse_time(s).with_context(|| format!("invalid stored time: {s}"))
}

// ── Spaces ──

const SPACE_COLUMNS: &str = "slug, title, pricing_half_day_cents, pricing_full_day_cents, pricing_per_event_cents, tokens_per_hour";

fn parse_space_row(row: &rusqlite::Row) -> rusqlite::Result<Space> {
    Ok(Space {
        slug: row.get(0)?,
        title: row.get(1)?,
        pricing_half_day_cents: row.get(2)?,
        pricing_full_day_cents: row.get(3)?,
        pricing_per_event_cents: row.get(4)?,
        tokens_per_hour: row.get(5)?,
    })
}

pub fn get_space(conn: &Connection, slug: &str) -> anyhow::Result<Option<Space>> {
    let space = conn
        .query_row(
            &format!("SELECT {SPACE_COLUMNS} FROM spaces WHERE slug = ?1"),
            params![slug],
            parse_space_row,
        )
        .optional()?;
    Ok(space)
}

pub fn list_spaces(conn: &Connection) -> anyhow::Result<Vec<Space>> {
    let mut stmt = conn.prepare(&format!("SELECT {SPACE_COLUMNS} FROM spaces ORDER BY title ASC"))?;
    let rows = stmt.query_map([], parse_space_row)?;

    let mut spaces = vec![];
    for row in rows {
        spaces.push(row?);
    }
    Ok(spaces)
}

pub fn upsert_space(conn: &Connection, space: &Space) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO spaces (slug, title, pricing_half_day_cents, pricing_full_day_cents, pricing_per_event_cents, tokens_per_hour)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(slug) DO UPDATE SET
           title = excluded.title,
           pricing_half_day_cents = excluded.pricing_half_day_cents,
           pricing_full_day_cents = excluded.pricing_full_day_cents,
           pricing_per_event_cents = excluded.pricing_per_event_cents,
           tokens_per_hour = excluded.tokens_per_hour",
        params![
            space.slug,
            space.title,
            space.pricing_half_day_cents,
            space.pricing_full_day_cents,
            space.pricing_per_event_cents,
            space.tokens_per_hour,
        ],
    )?;
    Ok(())
}

// ── Users & Tenants ──

pub fn insert_user(
    conn: &Connection,
    id: &str,
    email: &str,
    name: Option<&str>,
    is_admin: bool,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users (id, email, name, is_admin) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET email = excluded.email, name = excluded.name, is_admin = excluded.is_admin",
        params![id, email, name, is_admin as i32],
    )?;
    Ok(())
}

pub fn get_user_email(conn: &Connection, id: &str) -> anyhow::Result<Option<String>> {
    let email = conn
        .query_row("SELECT email FROM users WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    Ok(email)
}

pub fn is_admin_user(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let flag: Option<i32> = conn
        .query_row("SELECT is_admin FROM users WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    Ok(flag.unwrap_or(0) != 0)
}

pub fn insert_tenant(conn: &Connection, tenant: &Tenant) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO tenants (id, name, stripe_customer_id) VALUES (?1, ?2, ?3)",
        params![tenant.id, tenant.name, tenant.stripe_customer_id],
    )?;
    Ok(())
}

pub fn get_tenant(conn: &Connection, id: &str) -> anyhow::Result<Option<Tenant>> {
    let tenant = conn
        .query_row(
            "SELECT id, name, stripe_customer_id FROM tenants WHERE id = ?1",
            params![id],
            |row| {
                Ok(Tenant {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    stripe_customer_id: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(tenant)
}

pub fn set_tenant_customer_id(conn: &Connection, tenant_id: &str, customer_id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE tenants SET stripe_customer_id = ?1 WHERE id = ?2",
        params![customer_id, tenant_id],
    )?;
    Ok(())
}

pub fn add_tenant_user(
    conn: &Connection,
    tenant_id: &str,
    user_id: &str,
    role: TenantRole,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO tenant_users (tenant_id, user_id, role) VALUES (?1, ?2, ?3)
         ON CONFLICT(tenant_id, user_id) DO UPDATE SET role = excluded.role",
        params![tenant_id, user_id, role.as_str()],
    )?;
    Ok(())
}

pub fn first_tenant_for_user(conn: &Connection, user_id: &str) -> anyhow::Result<Option<String>> {
    let tenant_id = conn
        .query_row(
            "SELECT tenant_id FROM tenant_users WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC LIMIT 1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(tenant_id)
}

pub fn first_tenant_user_with_role(
    conn: &Connection,
    tenant_id: &str,
    role: TenantRole,
) -> anyhow::Result<Option<String>> {
    let user_id = conn
        .query_row(
            "SELECT user_id FROM tenant_users WHERE tenant_id = ?1 AND role = ?2 ORDER BY created_at ASC, rowid ASC LIMIT 1",
            params![tenant_id, role.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(user_id)
}

pub fn is_tenant_user(conn: &Connection, tenant_id: &str, user_id: &str) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tenant_users WHERE tenant_id = ?1 AND user_id = ?2",
        params![tenant_id, user_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ── Member Bookings ──

pub struct NewMemberBooking<'a> {
    pub owner_id: &'a str,
    pub tenant_id: Option<&'a str>,
    pub space_slug: &'a str,
    pub booking_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub hours: i64,
    pub tokens_used: i64,
    pub tokens_debited: i64,
    pub token_owner_id: Option<&'a str>,
    pub token_period_start: Option<&'a str>,
    pub price_cents: i64,
    pub status: MemberBookingStatus,
}

const MEMBER_BOOKING_COLUMNS: &str = "id, owner_id, tenant_id, space_slug, booking_date, start_time, end_time, hours, tokens_used, token_owner_id, token_period_start, price_cents, status, created_at, updated_at, tokens_debited";

pub fn insert_member_booking(conn: &Connection, booking: &NewMemberBooking) -> anyhow::Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_str();

    conn.execute(
        "INSERT INTO room_bookings (id, owner_id, tenant_id, space_slug, booking_date, start_time, end_time, hours, tokens_used, token_owner_id, token_period_start, price_cents, status, created_at, updated_at, tokens_debited)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14, ?15)",
        params![
            id,
            booking.owner_id,
            booking.tenant_id,
            booking.space_slug,
            date_str(booking.booking_date),
            time_str(booking.start_time),
            time_str(booking.end_time),
            booking.hours,
            booking.tokens_used,
            booking.token_owner_id,
            booking.token_period_start,
            booking.price_cents,
            booking.status.as_str(),
            now,
            booking.tokens_debited,
        ],
    )?;
    Ok(id)
}

fn parse_member_booking_row(row: &rusqlite::Row) -> anyhow::Result<MemberBooking> {
    let booking_date: String = row.get(4)?;
    let start_time: String = row.get(5)?;
    let end_time: String = row.get(6)?;
    let status: String = row.get(12)?;
    let created_at: String = row.get(13)?;
    let updated_at: String = row.get(14)?;

    Ok(MemberBooking {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        tenant_id: row.get(2)?,
        space_slug: row.get(3)?,
        booking_date: parse_stored_date(&booking_date)?,
        start_time: parse_stored_time(&start_time)?,
        end_time: parse_stored_time(&end_time)?,
        hours: row.get(7)?,
        tokens_used: row.get(8)?,
        tokens_debited: row.get(15)?,
        token_owner_id: row.get(9)?,
        token_period_start: row.get(10)?,
        price_cents: row.get(11)?,
        status: MemberBookingStatus::parse(&status),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

pub fn get_member_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<MemberBooking>> {
    let result = conn
        .query_row(
            &format!("SELECT {MEMBER_BOOKING_COLUMNS} FROM room_bookings WHERE id = ?1"),
            params![id],
            |row| Ok(parse_member_booking_row(row)),
        )
        .optional()?;

    result.transpose()
}

pub fn update_member_booking_status(
    conn: &Connection,
    id: &str,
    status: MemberBookingStatus,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE room_bookings SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now_str(), id],
    )?;
    Ok(count > 0)
}

/// Records how many tokens the ledger actually gave up for this booking.
pub fn set_tokens_debited(conn: &Connection, id: &str, tokens: i64) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE room_bookings SET tokens_debited = ?1, updated_at = ?2 WHERE id = ?3",
        params![tokens, now_str(), id],
    )?;
    Ok(())
}

/// Moves the booking to `to` only if it is still in `from`.
pub fn transition_member_booking(
    conn: &Connection,
    id: &str,
    from: MemberBookingStatus,
    to: MemberBookingStatus,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE room_bookings SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![to.as_str(), now_str(), id, from.as_str()],
    )?;
    Ok(count > 0)
}

pub fn list_member_bookings(
    conn: &Connection,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    space_slug: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<MemberBooking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMBER_BOOKING_COLUMNS} FROM room_bookings
         WHERE (?1 IS NULL OR booking_date >= ?1)
           AND (?2 IS NULL OR booking_date <= ?2)
           AND (?3 IS NULL OR space_slug = ?3)
         ORDER BY booking_date DESC, start_time DESC
         LIMIT ?4"
    ))?;

    let rows = stmt.query_map(
        params![from.map(date_str), to.map(date_str), space_slug, limit],
        |row| Ok(parse_member_booking_row(row)),
    )?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

// ── Public Bookings ──

pub struct NewPublicBooking<'a> {
    pub space_slug: &'a str,
    pub booking_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub hours: i64,
    pub price_cents: i64,
    pub currency: &'a str,
    pub status: PublicBookingStatus,
    pub customer_name: &'a str,
    pub customer_email: &'a str,
    pub customer_phone: Option<&'a str>,
}

const PUBLIC_BOOKING_COLUMNS: &str = "id, space_slug, booking_date, start_time, end_time, hours, price_cents, currency, status, customer_name, customer_email, customer_phone, created_at, updated_at";

pub fn insert_public_booking(conn: &Connection, booking: &NewPublicBooking) -> anyhow::Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_str();

    conn.execute(
        "INSERT INTO public_room_bookings (id, space_slug, booking_date, start_time, end_time, hours, price_cents, currency, status, customer_name, customer_email, customer_phone, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        params![
            id,
            booking.space_slug,
            date_str(booking.booking_date),
            time_str(booking.start_time),
            time_str(booking.end_time),
            booking.hours,
            booking.price_cents,
            booking.currency,
            booking.status.as_str(),
            booking.customer_name,
            booking.customer_email,
            booking.customer_phone,
            now,
        ],
    )?;
    Ok(id)
}

fn parse_public_booking_row(row: &rusqlite::Row) -> anyhow::Result<PublicBooking> {
    let booking_date: String = row.get(2)?;
    let start_time: String = row.get(3)?;
    let end_time: String = row.get(4)?;
    let status: String = row.get(8)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    Ok(PublicBooking {
        id: row.get(0)?,
        space_slug: row.get(1)?,
        booking_date: parse_stored_date(&booking_date)?,
        start_time: parse_stored_time(&start_time)?,
        end_time: parse_stored_time(&end_time)?,
        hours: row.get(5)?,
        price_cents: row.get(6)?,
        currency: row.get(7)?,
        status: PublicBookingStatus::parse(&status),
        customer_name: row.get(9)?,
        customer_email: row.get(10)?,
        customer_phone: row.get(11)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

pub fn get_public_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<PublicBooking>> {
    let result = conn
        .query_row(
            &format!("SELECT {PUBLIC_BOOKING_COLUMNS} FROM public_room_bookings WHERE id = ?1"),
            params![id],
            |row| Ok(parse_public_booking_row(row)),
        )
        .optional()?;

    result.transpose()
}

pub fn update_public_booking_status(
    conn: &Connection,
    id: &str,
    status: PublicBookingStatus,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE public_room_bookings SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now_str(), id],
    )?;
    Ok(count > 0)
}

pub fn transition_public_booking(
    conn: &Connection,
    id: &str,
    from: PublicBookingStatus,
    to: PublicBookingStatus,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE public_room_bookings SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![to.as_str(), now_str(), id, from.as_str()],
    )?;
    Ok(count > 0)
}

/// Every member and public booking still holding a slot on this space and date.
pub fn get_occupied_slots(
    conn: &Connection,
    space_slug: &str,
    date: NaiveDate,
) -> anyhow::Result<Vec<OccupiedSlot>> {
    let mut stmt = conn.prepare(
        "SELECT start_time, end_time, status, 'member' FROM room_bookings
         WHERE space_slug = ?1 AND booking_date = ?2 AND status IN ('requested', 'approved')
         UNION ALL
         SELECT start_time, end_time, status, 'public' FROM public_room_bookings
         WHERE space_slug = ?1 AND booking_date = ?2 AND status IN ('pending_payment', 'confirmed')
         ORDER BY 1 ASC",
    )?;

    let rows = stmt.query_map(params![space_slug, date_str(date)], |row| {
        let start: String = row.get(0)?;
        let end: String = row.get(1)?;
        let status: String = row.get(2)?;
        let source: String = row.get(3)?;
        Ok((start, end, status, source))
    })?;

    let mut slots = vec![];
    for row in rows {
        let (start, end, status, source) = row?;
        slots.push(OccupiedSlot {
            start_time: parse_stored_time(&start)?,
            end_time: parse_stored_time(&end)?,
            status,
            source: BookingKind::parse(&source),
        });
    }
    Ok(slots)
}

// ── Token Credits ──

pub fn list_credit_periods(conn: &Connection, owner_id: &str) -> anyhow::Result<Vec<CreditPeriod>> {
    let mut stmt = conn.prepare(
        "SELECT owner_id, period_start, tokens_total, tokens_used FROM room_credits
         WHERE owner_id = ?1 ORDER BY period_start ASC",
    )?;
    let rows = stmt.query_map(params![owner_id], |row| {
        Ok(CreditPeriod {
            owner_id: row.get(0)?,
            period_start: row.get(1)?,
            tokens_total: row.get(2)?,
            tokens_used: row.get(3)?,
        })
    })?;

    let mut periods = vec![];
    for row in rows {
        periods.push(row?);
    }
    Ok(periods)
}

pub fn get_credit_period(
    conn: &Connection,
    owner_id: &str,
    period_start: &str,
) -> anyhow::Result<Option<CreditPeriod>> {
    let period = conn
        .query_row(
            "SELECT owner_id, period_start, tokens_total, tokens_used FROM room_credits
             WHERE owner_id = ?1 AND period_start = ?2",
            params![owner_id, period_start],
            |row| {
                Ok(CreditPeriod {
                    owner_id: row.get(0)?,
                    period_start: row.get(1)?,
                    tokens_total: row.get(2)?,
                    tokens_used: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(period)
}

/// Sets a period's allowance, keeping whatever has already been used.
pub fn set_credit_total(
    conn: &Connection,
    owner_id: &str,
    period_start: &str,
    tokens_total: i64,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO room_credits (owner_id, period_start, tokens_total, tokens_used) VALUES (?1, ?2, ?3, 0)
         ON CONFLICT(owner_id, period_start) DO UPDATE SET tokens_total = excluded.tokens_total",
        params![owner_id, period_start, tokens_total],
    )?;
    Ok(())
}

pub fn add_credit_tokens(
    conn: &Connection,
    owner_id: &str,
    period_start: &str,
    tokens: i64,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO room_credits (owner_id, period_start, tokens_total, tokens_used) VALUES (?1, ?2, ?3, 0)
         ON CONFLICT(owner_id, period_start) DO UPDATE SET tokens_total = tokens_total + excluded.tokens_total",
        params![owner_id, period_start, tokens],
    )?;
    Ok(())
}

/// Adds `delta` to `tokens_used` in one statement, refusing to leave the row
/// overdrawn or negative. Returns false when no row satisfied the guard.
pub fn adjust_tokens_used(
    conn: &Connection,
    owner_id: &str,
    period_start: &str,
    delta: i64,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE room_credits SET tokens_used = tokens_used + ?3
         WHERE owner_id = ?1 AND period_start = ?2
           AND tokens_used + ?3 >= 0
           AND tokens_used + ?3 <= tokens_total",
        params![owner_id, period_start, delta],
    )?;
    Ok(count > 0)
}

// ── Payments ──

pub struct NewPayment<'a> {
    pub booking_kind: BookingKind,
    pub booking_id: &'a str,
    pub tenant_id: Option<&'a str>,
    pub token_owner_id: Option<&'a str>,
    pub stripe_customer_id: &'a str,
    pub stripe_checkout_session_id: &'a str,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub discount_cents: i64,
    pub coupon_code: Option<&'a str>,
}

const PAYMENT_COLUMNS: &str = "id, booking_kind, booking_id, tenant_id, token_owner_id, stripe_customer_id, stripe_checkout_session_id, stripe_invoice_id, stripe_payment_intent_id, amount_cents, currency, discount_cents, coupon_code, status, created_at, updated_at";

pub fn insert_payment(conn: &Connection, payment: &NewPayment) -> anyhow::Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_str();

    conn.execute(
        "INSERT INTO booking_payments (id, booking_kind, booking_id, tenant_id, token_owner_id, stripe_customer_id, stripe_checkout_session_id, amount_cents, currency, discount_cents, coupon_code, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        params![
            id,
            payment.booking_kind.as_str(),
            payment.booking_id,
            payment.tenant_id,
            payment.token_owner_id,
            payment.stripe_customer_id,
            payment.stripe_checkout_session_id,
            payment.amount_cents,
            payment.currency,
            payment.discount_cents,
            payment.coupon_code,
            PaymentStatus::RequiresPayment.as_str(),
            now,
        ],
    )?;
    Ok(id)
}

fn parse_payment_row(row: &rusqlite::Row) -> rusqlite::Result<Payment> {
    let kind: String = row.get(1)?;
    let status: String = row.get(13)?;
    let created_at: String = row.get(14)?;
    let updated_at: String = row.get(15)?;

    Ok(Payment {
        id: row.get(0)?,
        booking_kind: BookingKind::parse(&kind),
        booking_id: row.get(2)?,
        tenant_id: row.get(3)?,
        token_owner_id: row.get(4)?,
        stripe_customer_id: row.get(5)?,
        stripe_checkout_session_id: row.get(6)?,
        stripe_invoice_id: row.get(7)?,
        stripe_payment_intent_id: row.get(8)?,
        amount_cents: row.get(9)?,
        currency: row.get(10)?,
        discount_cents: row.get(11)?,
        coupon_code: row.get(12)?,
        status: PaymentStatus::parse(&status),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

pub fn get_payment_by_session(conn: &Connection, session_id: &str) -> anyhow::Result<Option<Payment>> {
    let payment = conn
        .query_row(
            &format!("SELECT {PAYMENT_COLUMNS} FROM booking_payments WHERE stripe_checkout_session_id = ?1"),
            params![session_id],
            parse_payment_row,
        )
        .optional()?;
    Ok(payment)
}

pub fn latest_payment_for_booking(
    conn: &Connection,
    kind: BookingKind,
    booking_id: &str,
) -> anyhow::Result<Option<Payment>> {
    let payment = conn
        .query_row(
            &format!(
                "SELECT {PAYMENT_COLUMNS} FROM booking_payments
                 WHERE booking_kind = ?1 AND booking_id = ?2
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            ),
            params![kind.as_str(), booking_id],
            parse_payment_row,
        )
        .optional()?;
    Ok(payment)
}

/// Compare-and-set from `requires_payment` to `paid`. Only one caller ever wins.
pub fn mark_payment_paid(conn: &Connection, id: &str, details: &PaidDetails) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE booking_payments SET
           status = 'paid',
           stripe_invoice_id = COALESCE(?2, stripe_invoice_id),
           stripe_payment_intent_id = COALESCE(?3, stripe_payment_intent_id),
           amount_cents = COALESCE(?4, amount_cents),
           currency = COALESCE(?5, currency),
           discount_cents = COALESCE(?6, discount_cents),
           updated_at = ?7
         WHERE id = ?1 AND status = 'requires_payment'",
        params![
            id,
            details.invoice_id,
            details.payment_intent_id,
            details.amount_cents,
            details.currency,
            details.discount_cents,
            now_str(),
        ],
    )?;
    Ok(count > 0)
}

/// Compare-and-set from `requires_payment` to `failed` or `cancelled`.
pub fn close_payment(conn: &Connection, id: &str, status: PaymentStatus) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE booking_payments SET status = ?2, updated_at = ?3
         WHERE id = ?1 AND status = 'requires_payment'",
        params![id, status.as_str(), now_str()],
    )?;
    Ok(count > 0)
}

// ── Processed Events ──

/// Records a processor event id. Returns false if it was already recorded.
pub fn record_processed_event(conn: &Connection, event_id: &str, event_type: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "INSERT OR IGNORE INTO processed_events (id, event_type) VALUES (?1, ?2)",
        params![event_id, event_type],
    )?;
    Ok(count > 0)
}

/// Releases an event id so a redelivery is processed again.
pub fn forget_processed_event(conn: &Connection, event_id: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM processed_events WHERE id = ?1", params![event_id])?;
    Ok(())
}

pub fn count_processed_events(conn: &Connection) -> anyhow::Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM processed_events", [], |row| row.get(0))?;
    Ok(count)
}

// ── Invoices ──

pub struct NewInvoice<'a> {
    pub owner_id: Option<&'a str>,
    pub payer_email: Option<&'a str>,
    pub membership_id: Option<&'a str>,
    pub invoice_number: &'a str,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub issued_on: &'a str,
}

/// Inserts a paid invoice unless one with the same number exists. Returns whether it was new.
pub fn insert_paid_invoice(conn: &Connection, invoice: &NewInvoice) -> anyhow::Result<bool> {
    let now = now_str();
    let count = conn.execute(
        "INSERT OR IGNORE INTO invoices (id, owner_id, payer_email, membership_id, invoice_number, amount_cents, currency, status, issued_on, due_on, paid_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'paid', ?8, ?8, ?9)",
        params![
            uuid::Uuid::new_v4().to_string(),
            invoice.owner_id,
            invoice.payer_email,
            invoice.membership_id,
            invoice.invoice_number,
            invoice.amount_cents,
            invoice.currency,
            invoice.issued_on,
            now,
        ],
    )?;
    Ok(count > 0)
}

const INVOICE_COLUMNS: &str = "id, owner_id, payer_email, membership_id, invoice_number, amount_cents, currency, status, issued_on, due_on, paid_at";

fn parse_invoice_row(row: &rusqlite::Row) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        payer_email: row.get(2)?,
        membership_id: row.get(3)?,
        invoice_number: row.get(4)?,
        amount_cents: row.get(5)?,
        currency: row.get(6)?,
        status: row.get(7)?,
        issued_on: row.get(8)?,
        due_on: row.get(9)?,
        paid_at: row.get(10)?,
    })
}

pub fn get_invoice(conn: &Connection, id: &str) -> anyhow::Result<Option<Invoice>> {
    let invoice = conn
        .query_row(
            &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1"),
            params![id],
            parse_invoice_row,
        )
        .optional()?;
    Ok(invoice)
}

pub fn list_invoices_for_owner(conn: &Connection, owner_id: &str) -> anyhow::Result<Vec<Invoice>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC"
    ))?;
    let rows = stmt.query_map(params![owner_id], parse_invoice_row)?;

    let mut invoices = vec![];
    for row in rows {
        invoices.push(row?);
    }
    Ok(invoices)
}

pub fn count_invoices_by_number(conn: &Connection, invoice_number: &str) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM invoices WHERE invoice_number = ?1",
        params![invoice_number],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ── Memberships ──

pub struct MembershipRow {
    pub id: String,
    pub owner_id: String,
    pub currency: String,
    pub payment_terms: String,
    pub stripe_subscription_id: Option<String>,
    pub next_invoice_at: Option<i64>,
}

pub fn insert_membership(conn: &Connection, id: &str, owner_id: &str, currency: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO memberships (id, owner_id, currency) VALUES (?1, ?2, ?3)",
        params![id, owner_id, currency],
    )?;
    Ok(())
}

pub fn get_membership(conn: &Connection, id: &str) -> anyhow::Result<Option<MembershipRow>> {
    let membership = conn
        .query_row(
            "SELECT id, owner_id, currency, payment_terms, stripe_subscription_id, next_invoice_at
             FROM memberships WHERE id = ?1",
            params![id],
            |row| {
                Ok(MembershipRow {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    currency: row.get(2)?,
                    payment_terms: row.get(3)?,
                    stripe_subscription_id: row.get(4)?,
                    next_invoice_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(membership)
}

pub fn activate_membership_card_billing(
    conn: &Connection,
    id: &str,
    subscription_id: &str,
    next_invoice_at: Option<i64>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE memberships SET
           payment_terms = 'auto_card',
           stripe_subscription_id = ?2,
           next_invoice_at = COALESCE(?3, next_invoice_at),
           updated_at = ?4
         WHERE id = ?1",
        params![id, subscription_id, next_invoice_at, now_str()],
    )?;
    Ok(count > 0)
}

pub fn revert_membership_to_invoice(conn: &Connection, subscription_id: &str) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE memberships SET payment_terms = 'invoice', stripe_subscription_id = NULL, updated_at = ?2
         WHERE stripe_subscription_id = ?1",
        params![subscription_id, now_str()],
    )?;
    Ok(count)
}

// ── Token Purchases ──

/// Claims a completed top-up session. Returns false if it was already credited.
pub fn record_token_purchase(
    conn: &Connection,
    session_id: &str,
    owner_id: &str,
    period_start: &str,
    quantity: i64,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "INSERT OR IGNORE INTO token_purchases (stripe_checkout_session_id, owner_id, period_start, quantity)
         VALUES (?1, ?2, ?3, ?4)",
        params![session_id, owner_id, period_start, quantity],
    )?;
    Ok(count > 0)
}
