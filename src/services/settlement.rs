use chrono::{DateTime, Datelike, NaiveDate};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;

use crate::db::queries::{self, NewInvoice};
use crate::errors::AppError;
use crate::models::{
    BookingKind, Invoice, MemberBookingStatus, PaidDetails, Payment, PaymentStatus, PublicBookingStatus,
};
use crate::services::email::{self, BookingConfirmation, EmailOutcome};
use crate::services::ledger::{self, LedgerError};
use crate::services::payments::CheckoutSession;
use crate::services::pricing;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Webhook,
    Poll,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Webhook => "webhook",
            Source::Poll => "poll",
        }
    }
}

/// Why a checkout ended without payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    Failed,
    Expired,
}

/// What a paid settlement changed. `newly_settled` is false when another
/// delivery or poll got there first.
#[derive(Debug, Clone)]
pub struct PaidOutcome {
    pub kind: BookingKind,
    pub booking_id: String,
    pub newly_settled: bool,
    pub invoice_number: String,
}

// ── Paid ──

/// Applies a paid checkout session exactly once: payment row, booking status,
/// token debit and paid invoice all commit together. The payment row's
/// `requires_payment` status is the compare-and-set guard.
pub fn apply_paid(conn: &Connection, session: &CheckoutSession) -> anyhow::Result<Option<PaidOutcome>> {
    let tx = conn.unchecked_transaction()?;

    let Some(payment) = queries::get_payment_by_session(&tx, &session.id)? else {
        return Ok(None);
    };

    let invoice_number = Invoice::number_for(
        session.invoice_id.as_deref().or(payment.stripe_invoice_id.as_deref()),
        &session.id,
    );
    let already = PaidOutcome {
        kind: payment.booking_kind,
        booking_id: payment.booking_id.clone(),
        newly_settled: false,
        invoice_number: invoice_number.clone(),
    };

    if payment.status.is_terminal() {
        return Ok(Some(already));
    }

    let details = PaidDetails {
        invoice_id: session.invoice_id.clone(),
        payment_intent_id: session.payment_intent_id.clone(),
        amount_cents: session.amount_total,
        currency: session.currency.clone(),
        discount_cents: session.amount_discount,
    };
    if !queries::mark_payment_paid(&tx, &payment.id, &details)? {
        return Ok(Some(already));
    }

    let amount_cents = session.amount_total.unwrap_or(payment.amount_cents).max(0);
    let currency = session.currency.clone().unwrap_or_else(|| payment.currency.clone());

    match payment.booking_kind {
        BookingKind::Member => settle_member(&tx, &payment, &invoice_number, amount_cents, &currency)?,
        BookingKind::Public => settle_public(&tx, &payment, &invoice_number, amount_cents, &currency)?,
    }

    tx.commit()?;

    Ok(Some(PaidOutcome {
        newly_settled: true,
        ..already
    }))
}

fn settle_member(
    conn: &Connection,
    payment: &Payment,
    invoice_number: &str,
    amount_cents: i64,
    currency: &str,
) -> anyhow::Result<()> {
    let Some(booking) = queries::get_member_booking(conn, &payment.booking_id)? else {
        tracing::warn!(booking_id = %payment.booking_id, "paid session for unknown member booking");
        return Ok(());
    };

    let approved = queries::transition_member_booking(
        conn,
        &booking.id,
        MemberBookingStatus::Requested,
        MemberBookingStatus::Approved,
    )?;
    if !approved {
        tracing::warn!(
            booking_id = %booking.id,
            status = booking.status.as_str(),
            "paid session for a booking that is no longer requested"
        );
    }

    let owner = booking
        .token_owner_id
        .clone()
        .or_else(|| payment.token_owner_id.clone());
    let period = booking
        .token_period_start
        .clone()
        .unwrap_or_else(|| pricing::month_start(booking.booking_date));

    // Quotes don't reserve tokens, so the balance may have gone since the
    // booking was made. Take what is there and record exactly that.
    if let Some(owner) = owner.as_deref().filter(|_| approved) {
        let debited = match ledger::debit_available(conn, owner, &period, booking.tokens_used) {
            Ok(taken) => taken,
            Err(LedgerError::Storage(e)) => return Err(e),
            Err(e) => {
                tracing::warn!(booking_id = %booking.id, owner_id = owner, error = %e, "token debit skipped at settlement");
                0
            }
        };
        if debited < booking.tokens_used {
            tracing::warn!(
                booking_id = %booking.id,
                owner_id = owner,
                expected = booking.tokens_used,
                debited,
                "token balance short at settlement"
            );
        }
        queries::set_tokens_debited(conn, &booking.id, debited)?;
    }

    let issued_on = booking.booking_date.to_string();
    let inserted = queries::insert_paid_invoice(
        conn,
        &NewInvoice {
            owner_id: owner.as_deref(),
            payer_email: None,
            membership_id: None,
            invoice_number,
            amount_cents,
            currency,
            issued_on: &issued_on,
        },
    )?;
    if !inserted {
        tracing::warn!(invoice_number, "invoice already recorded");
    }

    tracing::info!(booking_id = %booking.id, tokens = booking.tokens_used, "member booking approved");
    Ok(())
}

fn settle_public(
    conn: &Connection,
    payment: &Payment,
    invoice_number: &str,
    amount_cents: i64,
    currency: &str,
) -> anyhow::Result<()> {
    let Some(booking) = queries::get_public_booking(conn, &payment.booking_id)? else {
        tracing::warn!(booking_id = %payment.booking_id, "paid session for unknown public booking");
        return Ok(());
    };

    if !queries::transition_public_booking(
        conn,
        &booking.id,
        PublicBookingStatus::PendingPayment,
        PublicBookingStatus::Confirmed,
    )? {
        tracing::warn!(
            booking_id = %booking.id,
            status = booking.status.as_str(),
            "paid session for a booking that is no longer pending"
        );
    }

    let issued_on = booking.booking_date.to_string();
    let inserted = queries::insert_paid_invoice(
        conn,
        &NewInvoice {
            owner_id: None,
            payer_email: Some(&booking.customer_email),
            membership_id: None,
            invoice_number,
            amount_cents,
            currency,
            issued_on: &issued_on,
        },
    )?;
    if !inserted {
        tracing::warn!(invoice_number, "invoice already recorded");
    }

    tracing::info!(booking_id = %booking.id, "public booking confirmed");
    Ok(())
}

/// Result of settling, plus the non-critical effects that followed.
#[derive(Debug, Clone, Default)]
pub struct Settled {
    pub newly_settled: bool,
    pub invoice_url: Option<String>,
    pub email: Option<EmailOutcome>,
}

pub async fn settle_paid(state: &AppState, session: &CheckoutSession, source: Source) -> Result<Settled, AppError> {
    let outcome = {
        let db = state.db();
        apply_paid(&db, session)?
    };

    let Some(outcome) = outcome else {
        tracing::info!(session_id = %session.id, source = source.as_str(), "no payment recorded for session");
        return Ok(Settled::default());
    };

    tracing::info!(
        session_id = %session.id,
        booking_id = %outcome.booking_id,
        source = source.as_str(),
        newly_settled = outcome.newly_settled,
        "paid session reconciled"
    );

    if !outcome.newly_settled || outcome.kind != BookingKind::Public {
        return Ok(Settled {
            newly_settled: outcome.newly_settled,
            ..Default::default()
        });
    }

    let invoice_url = match (&session.invoice_url, &session.invoice_id) {
        (Some(url), _) => Some(url.clone()),
        (None, Some(invoice_id)) => match state.payments.invoice_url(invoice_id).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, invoice_id, "could not resolve invoice url");
                None
            }
        },
        (None, None) => None,
    };

    let email = send_confirmation(state, &outcome.booking_id, invoice_url.as_deref()).await;

    Ok(Settled {
        newly_settled: true,
        invoice_url,
        email: Some(email),
    })
}

async fn send_confirmation(state: &AppState, booking_id: &str, invoice_url: Option<&str>) -> EmailOutcome {
    let loaded = {
        let db = state.db();
        queries::get_public_booking(&db, booking_id).and_then(|booking| {
            let title = match &booking {
                Some(b) => queries::get_space(&db, &b.space_slug)?.map(|s| s.title),
                None => None,
            };
            Ok((booking, title))
        })
    };

    let (booking, title) = match loaded {
        Ok((Some(booking), title)) => (booking, title),
        Ok((None, _)) => return EmailOutcome::skipped("Booking not found."),
        Err(e) => {
            tracing::warn!(error = %e, booking_id, "could not load booking for confirmation email");
            return EmailOutcome::skipped("Booking could not be loaded.");
        }
    };

    let date = booking.booking_date.to_string();
    let start = booking.start_time.format("%H:%M").to_string();
    let end = booking.end_time.format("%H:%M").to_string();
    let message = email::booking_confirmation(&BookingConfirmation {
        to: &booking.customer_email,
        customer_name: &booking.customer_name,
        space_title: title.as_deref().unwrap_or(&booking.space_slug),
        booking_date: &date,
        start_time: &start,
        end_time: &end,
        invoice_url,
    });

    email::send_best_effort(state.mailer.as_ref(), &message).await
}

// ── Failed / expired ──

/// Closes an unpaid checkout. A payment already settled is left alone.
pub fn apply_closed(conn: &Connection, session_id: &str, closure: Closure) -> anyhow::Result<bool> {
    let tx = conn.unchecked_transaction()?;

    let Some(payment) = queries::get_payment_by_session(&tx, session_id)? else {
        return Ok(false);
    };

    let payment_status = match closure {
        Closure::Failed => PaymentStatus::Failed,
        Closure::Expired => PaymentStatus::Cancelled,
    };
    if !queries::close_payment(&tx, &payment.id, payment_status)? {
        return Ok(false);
    }

    match payment.booking_kind {
        BookingKind::Member => {
            queries::transition_member_booking(
                &tx,
                &payment.booking_id,
                MemberBookingStatus::Requested,
                MemberBookingStatus::Cancelled,
            )?;
        }
        BookingKind::Public => {
            let to = match closure {
                Closure::Failed => PublicBookingStatus::Cancelled,
                Closure::Expired => PublicBookingStatus::Expired,
            };
            queries::transition_public_booking(&tx, &payment.booking_id, PublicBookingStatus::PendingPayment, to)?;
        }
    }

    tx.commit()?;
    tracing::info!(session_id, booking_id = %payment.booking_id, ?closure, "unpaid checkout closed");
    Ok(true)
}

// ── Token top-ups ──

pub const TOKEN_PRICE_CENTS: i64 = 1000;
pub const MIN_TOKEN_PURCHASE: i64 = 10;

/// Credits a paid top-up session to the owner's period, once per session.
pub fn apply_token_purchase(conn: &Connection, session: &CheckoutSession, period_start: &str) -> anyhow::Result<bool> {
    let Some(owner_id) = session.meta("token_owner_id") else {
        tracing::warn!(session_id = %session.id, "token purchase without an owner");
        return Ok(false);
    };
    let quantity = session
        .meta("token_quantity")
        .and_then(|q| q.parse::<i64>().ok())
        .filter(|q| *q > 0);
    let Some(quantity) = quantity else {
        tracing::warn!(session_id = %session.id, "token purchase without a quantity");
        return Ok(false);
    };

    let tx = conn.unchecked_transaction()?;
    if !queries::record_token_purchase(&tx, &session.id, owner_id, period_start, quantity)? {
        return Ok(false);
    }
    ledger::credit(&tx, owner_id, period_start, quantity)?;
    tx.commit()?;
    Ok(true)
}

// ── Memberships ──

async fn activate_membership(state: &AppState, session: &CheckoutSession, today: NaiveDate) -> Result<(), AppError> {
    let Some(membership_id) = session.meta("membership_id") else {
        return Ok(());
    };
    let Some(subscription_id) = session.subscription_id.as_deref() else {
        return Ok(());
    };

    let membership = {
        let db = state.db();
        queries::get_membership(&db, membership_id)?
    };
    let Some(membership) = membership else {
        tracing::warn!(membership_id, "checkout completed for unknown membership");
        return Ok(());
    };

    let next_invoice_day = match state.payments.subscription_period_end(subscription_id).await {
        Ok(end) => end
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .map(|d| d.day() as i64),
        Err(e) => {
            tracing::warn!(error = %e, subscription_id, "could not read subscription period");
            None
        }
    };

    let issued_on = session
        .created
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|d| d.date_naive())
        .unwrap_or(today)
        .to_string();
    let invoice_number = Invoice::number_for(session.invoice_id.as_deref(), &session.id);
    let currency = session.currency.clone().unwrap_or(membership.currency.clone());

    let db = state.db();
    queries::activate_membership_card_billing(&db, &membership.id, subscription_id, next_invoice_day)?;
    queries::insert_paid_invoice(
        &db,
        &NewInvoice {
            owner_id: Some(&membership.owner_id),
            payer_email: None,
            membership_id: Some(&membership.id),
            invoice_number: &invoice_number,
            amount_cents: session.amount_total.unwrap_or(0).max(0),
            currency: &currency,
            issued_on: &issued_on,
        },
    )?;

    tracing::info!(membership_id, subscription_id, "membership switched to card billing");
    Ok(())
}

// ── Events ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Processed,
    Duplicate,
    Ignored,
}

/// Applies one verified processor event. The event id is recorded before
/// any effect runs; a redelivery of a recorded id does nothing.
pub async fn handle_event(state: &AppState, event: &Value, today: NaiveDate) -> Result<EventOutcome, AppError> {
    let event_id = event["id"]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Event has no id.".to_string()))?;
    let event_type = event["type"].as_str().unwrap_or_default();

    let fresh = {
        let db = state.db();
        queries::record_processed_event(&db, event_id, event_type)?
    };
    if !fresh {
        tracing::info!(event_id, event_type, "duplicate event skipped");
        return Ok(EventOutcome::Duplicate);
    }

    let result = dispatch(state, event_type, &event["data"]["object"], today).await;

    if let Err(e) = &result {
        // let the processor's retry run the effects again
        let db = state.db();
        if let Err(forget) = queries::forget_processed_event(&db, event_id) {
            tracing::error!(error = %forget, event_id, "failed to release event after error");
        }
        tracing::error!(error = %e, event_id, event_type, "event processing failed");
    }

    result
}

async fn dispatch(state: &AppState, event_type: &str, object: &Value, today: NaiveDate) -> Result<EventOutcome, AppError> {
    match event_type {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            let session = CheckoutSession::from_value(object);
            if !session.is_paid() {
                tracing::info!(session_id = %session.id, "checkout completed, payment still pending");
                return Ok(EventOutcome::Ignored);
            }

            if session.meta("token_purchase") == Some("true") {
                let credited = {
                    let db = state.db();
                    apply_token_purchase(&db, &session, &pricing::month_start(today))?
                };
                tracing::info!(session_id = %session.id, credited, "token purchase reconciled");
                return Ok(EventOutcome::Processed);
            }

            if session.meta("membership_id").is_some() {
                activate_membership(state, &session, today).await?;
                return Ok(EventOutcome::Processed);
            }

            settle_paid(state, &session, Source::Webhook).await?;
            Ok(EventOutcome::Processed)
        }
        "checkout.session.async_payment_failed" | "checkout.session.expired" => {
            let closure = if event_type.ends_with("expired") {
                Closure::Expired
            } else {
                Closure::Failed
            };
            let session_id = object["id"].as_str().unwrap_or_default();
            let db = state.db();
            apply_closed(&db, session_id, closure)?;
            Ok(EventOutcome::Processed)
        }
        "customer.subscription.deleted" => {
            if let Some(subscription_id) = object["id"].as_str() {
                let db = state.db();
                let reverted = queries::revert_membership_to_invoice(&db, subscription_id)?;
                tracing::info!(subscription_id, reverted, "subscription deleted");
            }
            Ok(EventOutcome::Processed)
        }
        _ => Ok(EventOutcome::Ignored),
    }
}

// ── Poll ──

#[derive(Debug, Clone, Serialize)]
pub struct PaymentView {
    pub status: PaymentStatus,
    pub currency: String,
    pub amount_cents: i64,
    pub discount_cents: i64,
    pub stripe_checkout_session_id: String,
    pub stripe_invoice_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
}

impl From<Payment> for PaymentView {
    fn from(p: Payment) -> Self {
        Self {
            status: p.status,
            currency: p.currency,
            amount_cents: p.amount_cents,
            discount_cents: p.discount_cents,
            stripe_checkout_session_id: p.stripe_checkout_session_id,
            stripe_invoice_id: p.stripe_invoice_id,
            stripe_payment_intent_id: p.stripe_payment_intent_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub ok: bool,
    pub booking: Value,
    pub payment: Option<PaymentView>,
    pub reconciled: bool,
    pub invoice_url: Option<String>,
    pub email: Option<EmailOutcome>,
}

fn load_booking(conn: &Connection, kind: BookingKind, booking_id: &str) -> Result<(Value, bool), AppError> {
    let found = match kind {
        BookingKind::Member => queries::get_member_booking(conn, booking_id)?
            .map(|b| -> anyhow::Result<_> { Ok((serde_json::to_value(&b)?, b.status.is_terminal())) }),
        BookingKind::Public => queries::get_public_booking(conn, booking_id)?
            .map(|b| -> anyhow::Result<_> { Ok((serde_json::to_value(&b)?, b.status.is_terminal())) }),
    };
    match found {
        Some(result) => Ok(result?),
        None => Err(AppError::NotFound("Booking not found.".to_string())),
    }
}

/// Status of a booking, settling it inline if the processor says the
/// checkout was paid but no event has arrived yet.
pub async fn poll_status(
    state: &AppState,
    kind: BookingKind,
    booking_id: &str,
    session_hint: Option<&str>,
) -> Result<StatusReport, AppError> {
    let (terminal, payment) = {
        let db = state.db();
        let (_, terminal) = load_booking(&db, kind, booking_id)?;
        (terminal, queries::latest_payment_for_booking(&db, kind, booking_id)?)
    };

    let mut settled = Settled::default();

    if let Some(payment) = payment.filter(|p| !terminal && p.status == PaymentStatus::RequiresPayment) {
        if let Some(hint) = session_hint.filter(|h| *h != payment.stripe_checkout_session_id) {
            tracing::debug!(booking_id, hint, "ignoring session hint for a different checkout");
        }

        match state
            .payments
            .retrieve_checkout_session(&payment.stripe_checkout_session_id)
            .await
        {
            Ok(session) if session.is_paid() => {
                settled = settle_paid(state, &session, Source::Poll).await?;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, booking_id, "could not read checkout session while polling");
            }
        }
    }

    let (booking, payment) = {
        let db = state.db();
        let (booking, _) = load_booking(&db, kind, booking_id)?;
        (booking, queries::latest_payment_for_booking(&db, kind, booking_id)?)
    };

    Ok(StatusReport {
        ok: true,
        booking,
        payment: payment.map(PaymentView::from),
        reconciled: settled.newly_settled,
        invoice_url: settled.invoice_url,
        email: settled.email,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::db::queries::{NewMemberBooking, NewPayment, NewPublicBooking};
    use chrono::NaiveTime;
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn member_booking(conn: &Connection, tokens: i64) -> String {
        queries::insert_member_booking(
            conn,
            &NewMemberBooking {
                owner_id: "carol",
                tenant_id: Some("acme"),
                space_slug: "boardroom",
                booking_date: d("2030-06-17"),
                start_time: t("09:00"),
                end_time: t("17:00"),
                hours: 8,
                tokens_used: tokens,
                tokens_debited: 0,
                token_owner_id: Some("alice"),
                token_period_start: Some("2030-06-01"),
                price_cents: 60000,
                status: MemberBookingStatus::Requested,
            },
        )
        .unwrap()
    }

    fn payment_for(conn: &Connection, kind: BookingKind, booking_id: &str, session_id: &str) {
        queries::insert_payment(
            conn,
            &NewPayment {
                booking_kind: kind,
                booking_id,
                tenant_id: None,
                token_owner_id: Some("alice"),
                stripe_customer_id: "cus_1",
                stripe_checkout_session_id: session_id,
                amount_cents: 60000,
                currency: "NZD",
                discount_cents: 0,
                coupon_code: None,
            },
        )
        .unwrap();
    }

    fn paid_session(id: &str) -> CheckoutSession {
        CheckoutSession::from_value(&json!({
            "id": id,
            "status": "complete",
            "payment_status": "paid",
            "amount_total": 59000,
            "currency": "nzd",
            "invoice": "in_1",
            "payment_intent": "pi_1",
            "total_details": { "amount_discount": 1000 }
        }))
    }

    #[test]
    fn test_paid_settlement_is_applied_once() {
        let conn = db::init_db(":memory:").unwrap();
        queries::set_credit_total(&conn, "alice", "2030-06-01", 10).unwrap();
        let booking_id = member_booking(&conn, 2);
        payment_for(&conn, BookingKind::Member, &booking_id, "cs_1");

        let first = apply_paid(&conn, &paid_session("cs_1")).unwrap().unwrap();
        let second = apply_paid(&conn, &paid_session("cs_1")).unwrap().unwrap();
        assert!(first.newly_settled);
        assert!(!second.newly_settled);
        assert_eq!(first.invoice_number, "stripe:in_1");

        let booking = queries::get_member_booking(&conn, &booking_id).unwrap().unwrap();
        assert_eq!(booking.status, MemberBookingStatus::Approved);

        let period = queries::get_credit_period(&conn, "alice", "2030-06-01").unwrap().unwrap();
        assert_eq!(period.tokens_used, 2);
        assert_eq!(queries::count_invoices_by_number(&conn, "stripe:in_1").unwrap(), 1);

        let payment = queries::get_payment_by_session(&conn, "cs_1").unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Paid);
        assert_eq!(payment.amount_cents, 59000);
        assert_eq!(payment.discount_cents, 1000);
        assert_eq!(payment.stripe_payment_intent_id.as_deref(), Some("pi_1"));
    }

    #[test]
    fn test_paid_session_without_payment_row_is_noop() {
        let conn = db::init_db(":memory:").unwrap();
        assert!(apply_paid(&conn, &paid_session("cs_unknown")).unwrap().is_none());
    }

    #[test]
    fn test_insufficient_tokens_at_settlement_still_approves() {
        let conn = db::init_db(":memory:").unwrap();
        queries::set_credit_total(&conn, "alice", "2030-06-01", 1).unwrap();
        let booking_id = member_booking(&conn, 2);
        payment_for(&conn, BookingKind::Member, &booking_id, "cs_1");

        apply_paid(&conn, &paid_session("cs_1")).unwrap();
        let booking = queries::get_member_booking(&conn, &booking_id).unwrap().unwrap();
        assert_eq!(booking.status, MemberBookingStatus::Approved);
        assert_eq!(booking.tokens_debited, 1);
        let period = queries::get_credit_period(&conn, "alice", "2030-06-01").unwrap().unwrap();
        assert_eq!(period.tokens_used, 1);
    }

    #[test]
    fn test_cancel_after_short_settlement_refunds_only_what_was_debited() {
        let mut conn = db::init_db(":memory:").unwrap();
        queries::set_credit_total(&conn, "alice", "2030-06-01", 5).unwrap();
        let first = member_booking(&conn, 4);
        let second = member_booking(&conn, 4);
        payment_for(&conn, BookingKind::Member, &first, "cs_a");
        payment_for(&conn, BookingKind::Member, &second, "cs_b");

        apply_paid(&conn, &paid_session("cs_a")).unwrap();
        apply_paid(&conn, &paid_session("cs_b")).unwrap();
        let period = queries::get_credit_period(&conn, "alice", "2030-06-01").unwrap().unwrap();
        assert_eq!(period.tokens_used, 5);
        let short = queries::get_member_booking(&conn, &second).unwrap().unwrap();
        assert_eq!(short.tokens_used, 4);
        assert_eq!(short.tokens_debited, 1);

        let cancelled = crate::services::booking::admin_cancel_booking(&mut conn, &second).unwrap();
        assert_eq!(cancelled.status, MemberBookingStatus::Cancelled);
        let period = queries::get_credit_period(&conn, "alice", "2030-06-01").unwrap().unwrap();
        assert_eq!(period.tokens_used, 4);

        crate::services::booking::admin_cancel_booking(&mut conn, &second).unwrap();
        let period = queries::get_credit_period(&conn, "alice", "2030-06-01").unwrap().unwrap();
        assert_eq!(period.tokens_used, 4);
    }

    #[test]
    fn test_paid_session_for_cancelled_booking_takes_no_tokens() {
        let conn = db::init_db(":memory:").unwrap();
        queries::set_credit_total(&conn, "alice", "2030-06-01", 10).unwrap();
        let booking_id = member_booking(&conn, 3);
        payment_for(&conn, BookingKind::Member, &booking_id, "cs_1");
        queries::update_member_booking_status(&conn, &booking_id, MemberBookingStatus::Cancelled).unwrap();

        apply_paid(&conn, &paid_session("cs_1")).unwrap();
        let period = queries::get_credit_period(&conn, "alice", "2030-06-01").unwrap().unwrap();
        assert_eq!(period.tokens_used, 0);
    }

    #[test]
    fn test_expired_public_checkout_releases_slot() {
        let conn = db::init_db(":memory:").unwrap();
        let booking_id = queries::insert_public_booking(
            &conn,
            &NewPublicBooking {
                space_slug: "boardroom",
                booking_date: d("2030-06-17"),
                start_time: t("09:00"),
                end_time: t("10:00"),
                hours: 1,
                price_cents: 10000,
                currency: "NZD",
                status: PublicBookingStatus::PendingPayment,
                customer_name: "Pat",
                customer_email: "pat@example.com",
                customer_phone: None,
            },
        )
        .unwrap();
        payment_for(&conn, BookingKind::Public, &booking_id, "cs_2");

        assert!(apply_closed(&conn, "cs_2", Closure::Expired).unwrap());
        assert!(!apply_closed(&conn, "cs_2", Closure::Expired).unwrap());

        let booking = queries::get_public_booking(&conn, &booking_id).unwrap().unwrap();
        assert_eq!(booking.status, PublicBookingStatus::Expired);
        let payment = queries::get_payment_by_session(&conn, "cs_2").unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Cancelled);
        assert!(queries::get_occupied_slots(&conn, "boardroom", d("2030-06-17")).unwrap().is_empty());
    }

    #[test]
    fn test_closure_does_not_undo_a_paid_booking() {
        let conn = db::init_db(":memory:").unwrap();
        queries::set_credit_total(&conn, "alice", "2030-06-01", 10).unwrap();
        let booking_id = member_booking(&conn, 0);
        payment_for(&conn, BookingKind::Member, &booking_id, "cs_1");
        apply_paid(&conn, &paid_session("cs_1")).unwrap();

        assert!(!apply_closed(&conn, "cs_1", Closure::Failed).unwrap());
        let booking = queries::get_member_booking(&conn, &booking_id).unwrap().unwrap();
        assert_eq!(booking.status, MemberBookingStatus::Approved);
    }

    #[test]
    fn test_token_purchase_credits_once() {
        let conn = db::init_db(":memory:").unwrap();
        let session = CheckoutSession::from_value(&json!({
            "id": "cs_tokens",
            "payment_status": "paid",
            "metadata": { "token_purchase": "true", "token_owner_id": "alice", "token_quantity": "12" }
        }));

        assert!(apply_token_purchase(&conn, &session, "2030-06-01").unwrap());
        assert!(!apply_token_purchase(&conn, &session, "2030-06-01").unwrap());

        let period = queries::get_credit_period(&conn, "alice", "2030-06-01").unwrap().unwrap();
        assert_eq!(period.tokens_total, 12);
    }
}
