use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;

use spacebook::config::AppConfig;
use spacebook::db::{self, queries};
use spacebook::handlers;
use spacebook::models::{Space, Tenant, TenantRole};
use spacebook::services::email::{Email, EmailSender};
use spacebook::services::payments::{
    CheckoutRequest, CheckoutSession, NewCustomer, PaymentProcessor, ProcessorError, PromotionCode,
};
use spacebook::services::pricing::{self, Discount};
use spacebook::state::AppState;

const WEBHOOK_SECRET: &str = "whsec_test";

// ── Mock Providers ──

#[derive(Default)]
struct ProcessorLog {
    sessions: HashMap<String, CheckoutSession>,
    requests: Vec<(CheckoutRequest, String)>,
    customers: usize,
    customer_keys: Vec<String>,
    /// Every stored customer id looks deleted.
    stale_customers: bool,
    fail_checkout: bool,
}

#[derive(Clone, Default)]
struct MockProcessor {
    log: Arc<Mutex<ProcessorLog>>,
}

impl MockProcessor {
    /// Flips a stored session to paid, the way the hosted checkout would.
    fn pay(&self, session_id: &str) {
        let mut log = self.log.lock().unwrap();
        let session = log.sessions.get_mut(session_id).unwrap();
        session.status = Some("complete".to_string());
        session.payment_status = Some("paid".to_string());
        session.invoice_id = Some(format!("in_{session_id}"));
        session.invoice_url = Some(format!("https://pay.test/invoice/{session_id}"));
    }

    fn last_request(&self) -> CheckoutRequest {
        self.log.lock().unwrap().requests.last().unwrap().0.clone()
    }
}

#[async_trait]
impl PaymentProcessor for MockProcessor {
    async fn retrieve_customer(&self, customer_id: &str) -> Result<Option<String>, ProcessorError> {
        let log = self.log.lock().unwrap();
        Ok((!log.stale_customers).then(|| customer_id.to_string()))
    }

    async fn create_customer(&self, _customer: &NewCustomer, key: &str) -> Result<String, ProcessorError> {
        let mut log = self.log.lock().unwrap();
        log.customers += 1;
        log.customer_keys.push(key.to_string());
        Ok(format!("cus_{}", log.customers))
    }

    async fn find_promotion_code(&self, code: &str) -> Result<Option<PromotionCode>, ProcessorError> {
        Ok((code == "SAVE10").then(|| PromotionCode {
            id: "promo_save10".to_string(),
            coupon_id: Some("co_save10".to_string()),
        }))
    }

    async fn retrieve_coupon(&self, _coupon_id: &str) -> Result<Option<Discount>, ProcessorError> {
        Ok(Some(Discount::PercentOff(10.0)))
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
        idempotency_key: &str,
    ) -> Result<CheckoutSession, ProcessorError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_checkout {
            return Err(ProcessorError::new("The API is temporarily unavailable.", "api_error"));
        }
        let id = format!("cs_test_{}", log.requests.len() + 1);
        let discount = request
            .promotion_code_id
            .as_ref()
            .map(|_| pricing::discount_cents(Some(Discount::PercentOff(10.0)), request.amount_cents))
            .unwrap_or(0);
        let session = CheckoutSession {
            id: id.clone(),
            url: Some(format!("https://checkout.test/{id}")),
            client_secret: Some(format!("{id}_secret")),
            status: Some("open".to_string()),
            payment_status: Some("unpaid".to_string()),
            amount_total: Some(request.amount_cents - discount),
            amount_discount: Some(discount),
            currency: Some(request.currency.clone()),
            metadata: request.metadata.iter().cloned().collect(),
            ..Default::default()
        };
        log.sessions.insert(id, session.clone());
        log.requests.push((request.clone(), idempotency_key.to_string()));
        Ok(session)
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSession, ProcessorError> {
        self.log
            .lock()
            .unwrap()
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| ProcessorError::new("No such checkout session", "resource_missing"))
    }

    async fn invoice_url(&self, invoice_id: &str) -> Result<Option<String>, ProcessorError> {
        Ok(Some(format!("https://pay.test/{invoice_id}")))
    }

    async fn subscription_period_end(&self, _subscription_id: &str) -> Result<Option<i64>, ProcessorError> {
        Ok(Some(1_900_000_000))
    }
}

#[derive(Clone, Default)]
struct MockMailer {
    sent: Arc<Mutex<Vec<Email>>>,
}

#[async_trait]
impl EmailSender for MockMailer {
    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, email: &Email) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: "test-token".to_string(),
        site_url: "http://localhost:3000".to_string(),
        stripe_secret_key: "sk_test_123".to_string(),
        stripe_webhook_secret: WEBHOOK_SECRET.to_string(),
        stripe_api_base: "https://api.stripe.com".to_string(),
        stripe_api_version: "2024-06-20".to_string(),
        stripe_webhook_tolerance_secs: 300,
        booking_currency: "NZD".to_string(),
        resend_api_key: "re_test".to_string(),
        email_from: "Spacebook <bookings@example.com>".to_string(),
    }
}

struct Harness {
    state: Arc<AppState>,
    processor: MockProcessor,
    mailer: MockMailer,
}

impl Harness {
    fn new() -> Self {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn);
        let processor = MockProcessor::default();
        let mailer = MockMailer::default();
        let state = Arc::new(AppState {
            db: Arc::new(Mutex::new(conn)),
            config: test_config(),
            payments: Box::new(processor.clone()),
            mailer: Box::new(mailer.clone()),
        });
        Self {
            state,
            processor,
            mailer,
        }
    }

    fn app(&self) -> Router {
        handlers::router(self.state.clone())
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let res = self.app().oneshot(req).await.unwrap();
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    fn set_credits(&self, owner: &str, tokens_total: i64) {
        let db = self.state.db();
        let period = pricing::month_start(chrono::Local::now().date_naive());
        queries::set_credit_total(&db, owner, &period, tokens_total).unwrap();
    }

    fn tokens_used(&self, owner: &str) -> i64 {
        let db = self.state.db();
        queries::list_credit_periods(&db, owner)
            .unwrap()
            .iter()
            .map(|p| p.tokens_used)
            .sum()
    }
}

fn seed(conn: &rusqlite::Connection) {
    queries::upsert_space(
        conn,
        &Space {
            slug: "boardroom".into(),
            title: "Boardroom".into(),
            pricing_half_day_cents: Some(45000),
            pricing_full_day_cents: Some(80000),
            pricing_per_event_cents: None,
            tokens_per_hour: 1,
        },
    )
    .unwrap();
    queries::upsert_space(
        conn,
        &Space {
            slug: "studio".into(),
            title: "Studio".into(),
            pricing_half_day_cents: None,
            pricing_full_day_cents: None,
            pricing_per_event_cents: None,
            tokens_per_hour: 0,
        },
    )
    .unwrap();

    queries::insert_user(conn, "alice", "alice@acme.test", Some("Alice"), false).unwrap();
    queries::insert_user(conn, "carol", "carol@acme.test", Some("Carol"), false).unwrap();
    queries::insert_user(conn, "drifter", "drifter@nowhere.test", None, false).unwrap();
    queries::insert_user(conn, "staff", "staff@spacebook.test", None, true).unwrap();
    queries::insert_tenant(
        conn,
        &Tenant {
            id: "acme".into(),
            name: "Acme Ltd".into(),
            stripe_customer_id: None,
        },
    )
    .unwrap();
    queries::add_tenant_user(conn, "acme", "alice", TenantRole::Owner).unwrap();
    queries::add_tenant_user(conn, "acme", "carol", TenantRole::Member).unwrap();
}

/// A weekday at least a week out, so lead-time rules never interfere.
fn future_weekday() -> NaiveDate {
    let mut date = chrono::Local::now().date_naive() + Duration::days(7);
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date += Duration::days(1);
    }
    date
}

fn future_saturday() -> NaiveDate {
    let mut date = chrono::Local::now().date_naive() + Duration::days(7);
    while date.weekday() != Weekday::Sat {
        date += Duration::days(1);
    }
    date
}

fn post_json(uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::empty()).unwrap()
}

fn slot(date: NaiveDate, start: &str, end: &str) -> Value {
    json!({
        "space_slug": "boardroom",
        "booking_date": date.to_string(),
        "start_time": start,
        "end_time": end,
    })
}

fn signed_webhook(event: &Value) -> Request<Body> {
    let payload = event.to_string();
    let timestamp = chrono::Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/stripe/webhook")
        .header("Content-Type", "application/json")
        .header("Stripe-Signature", format!("t={timestamp},v1={signature}"))
        .body(Body::from(payload))
        .unwrap()
}

fn completed_event(event_id: &str, session_id: &str, metadata: Value) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "status": "complete",
            "payment_status": "paid",
            "amount_total": 40000,
            "currency": "nzd",
            "invoice": format!("in_{session_id}"),
            "payment_intent": "pi_123",
            "metadata": metadata,
        }}
    })
}

// ── Tests ──

#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let (status, body) = h.send(get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_member_booking_covered_by_tokens_is_approved() {
    let h = Harness::new();
    h.set_credits("alice", 10);

    let (status, body) = h
        .send(post_json("/api/rooms/book", Some("carol"), slot(future_weekday(), "09:00", "17:00")))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["booking"]["status"], "approved");
    assert_eq!(body["booking"]["tokens_used"], 8);
    assert_eq!(body["payment"]["required"], false);
    assert_eq!(h.tokens_used("alice"), 8);
    assert!(h.processor.log.lock().unwrap().requests.is_empty());
}

#[tokio::test]
async fn test_member_quote_reports_tokens_and_cash() {
    let h = Harness::new();
    h.set_credits("alice", 2);

    let (status, body) = h
        .send(post_json("/api/rooms/quote", Some("carol"), slot(future_weekday(), "09:00", "13:00")))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hours"], 4);
    assert_eq!(body["tokens"]["required_tokens"], 4);
    assert_eq!(body["tokens"]["tokens_applied"], 2);
    assert_eq!(body["pricing"]["base_price_cents"], 45000);
    assert_eq!(body["pricing"]["final_cash_due_cents"], 22500);
    assert_eq!(h.tokens_used("alice"), 0);
}

#[tokio::test]
async fn test_member_cash_booking_settles_once_via_webhook() {
    let h = Harness::new();

    let (status, body) = h
        .send(post_json("/api/rooms/book", Some("carol"), slot(future_weekday(), "09:00", "13:00")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["booking"]["status"], "requested");
    assert_eq!(body["payment"]["required"], true);
    assert_eq!(body["payment"]["amount_cents"], 45000);
    let booking_id = body["booking"]["id"].as_str().unwrap().to_string();
    let session_id = body["payment"]["stripe_checkout_session_id"].as_str().unwrap().to_string();

    let request = h.processor.last_request();
    assert!(request.success_url.contains(&format!("booking={booking_id}")));
    assert!(request.success_url.ends_with("session_id={CHECKOUT_SESSION_ID}"));

    let event = completed_event(
        "evt_1",
        &session_id,
        json!({ "booking_kind": "member", "booking_id": booking_id }),
    );
    let (status, body) = h.send(signed_webhook(&event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, body) = h.send(signed_webhook(&event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skipped"], true);

    let db = h.state.db();
    let booking = queries::get_member_booking(&db, &booking_id).unwrap().unwrap();
    assert_eq!(booking.status.as_str(), "approved");
    let number = format!("stripe:in_{session_id}");
    assert_eq!(queries::count_invoices_by_number(&db, &number).unwrap(), 1);
    assert_eq!(queries::count_processed_events(&db).unwrap(), 1);
}

#[tokio::test]
async fn test_weekend_booking_is_rejected() {
    let h = Harness::new();
    h.set_credits("alice", 10);

    let (status, body) = h
        .send(post_json("/api/rooms/book", Some("carol"), slot(future_saturday(), "09:00", "11:00")))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Monday to Friday"));
    let db = h.state.db();
    assert!(queries::list_member_bookings(&db, None, None, None, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_overlapping_booking_conflicts() {
    let h = Harness::new();
    h.set_credits("alice", 20);
    let date = future_weekday();

    let (status, _) = h
        .send(post_json("/api/rooms/book", Some("carol"), slot(date, "09:00", "12:00")))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h
        .send(post_json("/api/rooms/book", Some("alice"), slot(date, "11:00", "13:00")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = h
        .send(post_json("/api/rooms/book", Some("alice"), slot(date, "12:00", "13:00")))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_member_routes_require_identity_and_tenant() {
    let h = Harness::new();
    let (status, _) = h.send(get("/api/rooms/tokens", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = h.send(get("/api/rooms/tokens", Some("drifter"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    h.set_credits("alice", 5);
    let (status, body) = h.send(get("/api/rooms/tokens", Some("carol"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_owner_id"], "alice");
    assert_eq!(body["tokens_left"], 5);
}

#[tokio::test]
async fn test_public_booking_poll_settles_once_and_emails() {
    let h = Harness::new();
    let mut body = slot(future_weekday(), "09:00", "10:00");
    body["customer_name"] = json!("Pat");
    body["customer_email"] = json!("pat@example.com");

    let (status, created) = h.send(post_json("/api/bookings/room/book", None, body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["booking"]["status"], "pending_payment");
    assert_eq!(created["payment"]["amount_cents"], 10000);
    let booking_id = created["booking"]["id"].as_str().unwrap().to_string();
    let session_id = created["payment"]["stripe_checkout_session_id"].as_str().unwrap().to_string();

    let uri = format!("/api/bookings/room/status?booking={booking_id}&session_id={session_id}");
    let (_, before) = h.send(get(&uri, None)).await;
    assert_eq!(before["booking"]["status"], "pending_payment");
    assert_eq!(before["reconciled"], false);

    h.processor.pay(&session_id);

    let (status, first) = h.send(get(&uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["booking"]["status"], "confirmed");
    assert_eq!(first["reconciled"], true);
    assert_eq!(first["payment"]["status"], "paid");
    assert_eq!(first["invoice_url"], format!("https://pay.test/invoice/{session_id}"));
    assert_eq!(first["email"]["ok"], true);

    let (_, second) = h.send(get(&uri, None)).await;
    assert_eq!(second["booking"]["status"], "confirmed");
    assert_eq!(second["reconciled"], false);

    let sent = h.mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "pat@example.com");
    assert!(sent[0].subject.contains("Boardroom"));
}

#[tokio::test]
async fn test_public_booking_with_coupon() {
    let h = Harness::new();
    let mut body = slot(future_weekday(), "09:00", "13:00");
    body["customer_name"] = json!("Pat");
    body["customer_email"] = json!("pat@example.com");
    body["coupon_code"] = json!("SAVE10");

    let (status, created) = h.send(post_json("/api/bookings/room/book", None, body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["payment"]["discount_cents"], 4500);
    assert_eq!(created["payment"]["amount_cents"], 40500);

    let request = h.processor.last_request();
    assert_eq!(request.amount_cents, 45000);
    assert_eq!(request.promotion_code_id.as_deref(), Some("promo_save10"));
}

#[tokio::test]
async fn test_unpriced_space_is_not_bookable_publicly() {
    let h = Harness::new();
    let mut body = slot(future_weekday(), "09:00", "10:00");
    body["space_slug"] = json!("studio");
    body["customer_name"] = json!("Pat");
    body["customer_email"] = json!("pat@example.com");

    let (status, body) = h.send(post_json("/api/bookings/room/book", None, body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "This room is not currently bookable online.");
}

#[tokio::test]
async fn test_expired_checkout_frees_public_slot() {
    let h = Harness::new();
    let date = future_weekday();
    let mut body = slot(date, "14:00", "15:00");
    body["customer_name"] = json!("Pat");
    body["customer_email"] = json!("pat@example.com");
    let (_, created) = h.send(post_json("/api/bookings/room/book", None, body)).await;
    let session_id = created["payment"]["stripe_checkout_session_id"].as_str().unwrap().to_string();

    let event = json!({
        "id": "evt_expired",
        "type": "checkout.session.expired",
        "data": { "object": { "id": session_id, "status": "expired" } }
    });
    let (status, _) = h.send(signed_webhook(&event)).await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/api/bookings/room/availability?space_slug=boardroom&date={date}");
    let (status, availability) = h.send(get(&uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(availability["occupied"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signatures() {
    let h = Harness::new();
    let event = completed_event("evt_x", "cs_x", json!({}));

    let missing = Request::builder()
        .method("POST")
        .uri("/api/stripe/webhook")
        .body(Body::from(event.to_string()))
        .unwrap();
    let (status, _) = h.send(missing).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let forged = Request::builder()
        .method("POST")
        .uri("/api/stripe/webhook")
        .header("Stripe-Signature", format!("t={},v1=00ff", chrono::Utc::now().timestamp()))
        .body(Body::from(event.to_string()))
        .unwrap();
    let (status, _) = h.send(forged).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let db = h.state.db();
    assert_eq!(queries::count_processed_events(&db).unwrap(), 0);
}

#[tokio::test]
async fn test_webhook_ignores_unknown_event_types() {
    let h = Harness::new();
    let event = json!({ "id": "evt_other", "type": "invoice.created", "data": { "object": {} } });
    let (status, body) = h.send(signed_webhook(&event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "ignored");
}

#[tokio::test]
async fn test_token_purchase_credits_owner() {
    let h = Harness::new();

    let (status, _) = h
        .send(post_json("/api/rooms/tokens/purchase", Some("carol"), json!({ "quantity": 5 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = h
        .send(post_json("/api/rooms/tokens/purchase", Some("carol"), json!({ "quantity": 12 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["amount_cents"], 12000);
    let session_id = body["stripe_checkout_session_id"].as_str().unwrap().to_string();

    let event = completed_event(
        "evt_tokens",
        &session_id,
        json!({ "token_purchase": "true", "token_owner_id": "alice", "token_quantity": "12" }),
    );
    let (status, _) = h.send(signed_webhook(&event)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, tokens) = h.send(get("/api/rooms/tokens", Some("carol"))).await;
    assert_eq!(tokens["tokens_total"], 12);
    assert_eq!(tokens["tokens_left"], 12);
}

#[tokio::test]
async fn test_admin_requires_token() {
    let h = Harness::new();
    let (status, body) = h.send(get("/api/admin/room-bookings", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let req = Request::builder()
        .uri("/api/admin/room-bookings")
        .header("Authorization", "Bearer wrong-token")
        .body(Body::empty())
        .unwrap();
    let (status, _) = h.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_cancel_refunds_tokens() {
    let h = Harness::new();
    h.set_credits("alice", 10);
    let (_, created) = h
        .send(post_json("/api/rooms/book", Some("carol"), slot(future_weekday(), "09:00", "12:00")))
        .await;
    let booking_id = created["booking"]["id"].as_str().unwrap().to_string();
    assert_eq!(h.tokens_used("alice"), 3);

    let cancel = || {
        Request::builder()
            .method("POST")
            .uri(format!("/api/admin/room-bookings/{booking_id}/cancel"))
            .header("Authorization", "Bearer test-token")
            .body(Body::empty())
            .unwrap()
    };
    let (status, body) = h.send(cancel()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["booking"]["status"], "cancelled");
    assert_eq!(h.tokens_used("alice"), 0);

    let (status, _) = h.send(cancel()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.tokens_used("alice"), 0);
}

#[tokio::test]
async fn test_admin_credits_require_tenant_membership() {
    let h = Harness::new();
    let request = |owner: &str| {
        Request::builder()
            .method("POST")
            .uri("/api/admin/credits")
            .header("Authorization", "Bearer test-token")
            .header("Content-Type", "application/json")
            .body(Body::from(
                json!({ "tenant_id": "acme", "owner_id": owner, "period_start": "2030-06-15", "tokens_total": 40 })
                    .to_string(),
            ))
            .unwrap()
    };

    let (status, _) = h.send(request("drifter")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = h.send(request("alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["period"]["period_start"], "2030-06-01");
    assert_eq!(body["period"]["tokens_total"], 40);
}

#[tokio::test]
async fn test_invoice_url_owner_only() {
    let h = Harness::new();
    let invoice_id = {
        let db = h.state.db();
        queries::insert_paid_invoice(
            &db,
            &queries::NewInvoice {
                owner_id: Some("alice"),
                payer_email: None,
                membership_id: None,
                invoice_number: "stripe:in_abc",
                amount_cents: 1000,
                currency: "NZD",
                issued_on: "2030-06-17",
            },
        )
        .unwrap();
        queries::list_invoices_for_owner(&db, "alice").unwrap()[0].id.clone()
    };
    let uri = format!("/api/invoices/url?invoice_id={invoice_id}");

    let (status, body) = h.send(get(&uri, Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://pay.test/in_abc");

    let (status, _) = h.send(get(&uri, Some("carol"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = h.send(get(&uri, Some("staff"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_membership_card_billing_lifecycle() {
    let h = Harness::new();
    {
        let db = h.state.db();
        queries::insert_membership(&db, "mem_1", "alice", "NZD").unwrap();
    }

    let mut event = completed_event("evt_mem", "cs_mem", json!({ "membership_id": "mem_1" }));
    event["data"]["object"]["subscription"] = json!("sub_1");
    event["data"]["object"]["mode"] = json!("subscription");
    let (status, _) = h.send(signed_webhook(&event)).await;
    assert_eq!(status, StatusCode::OK);

    {
        let db = h.state.db();
        let membership = queries::get_membership(&db, "mem_1").unwrap().unwrap();
        assert_eq!(membership.payment_terms, "auto_card");
        assert_eq!(membership.stripe_subscription_id.as_deref(), Some("sub_1"));
        assert!(membership.next_invoice_at.is_some());
        assert_eq!(queries::count_invoices_by_number(&db, "stripe:in_cs_mem").unwrap(), 1);
    }

    let deleted = json!({
        "id": "evt_sub_deleted",
        "type": "customer.subscription.deleted",
        "data": { "object": { "id": "sub_1" } }
    });
    let (status, _) = h.send(signed_webhook(&deleted)).await;
    assert_eq!(status, StatusCode::OK);

    let db = h.state.db();
    let membership = queries::get_membership(&db, "mem_1").unwrap().unwrap();
    assert_eq!(membership.payment_terms, "invoice");
    assert!(membership.stripe_subscription_id.is_none());
}

#[tokio::test]
async fn test_failed_checkout_cancels_public_booking_and_frees_slot() {
    let h = Harness::new();
    let date = future_weekday();
    let mut body = slot(date, "09:00", "10:00");
    body["customer_name"] = json!("Pat");
    body["customer_email"] = json!("pat@example.com");

    h.processor.log.lock().unwrap().fail_checkout = true;
    let (status, failed) = h.send(post_json("/api/bookings/room/book", None, body.clone())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(failed["error"].is_string());

    let uri = format!("/api/bookings/room/availability?space_slug=boardroom&date={date}");
    let (_, availability) = h.send(get(&uri, None)).await;
    assert!(availability["occupied"].as_array().unwrap().is_empty());
    {
        let db = h.state.db();
        let occupied = queries::get_occupied_slots(&db, "boardroom", date).unwrap();
        assert!(occupied.is_empty());
    }

    h.processor.log.lock().unwrap().fail_checkout = false;
    let (status, created) = h.send(post_json("/api/bookings/room/book", None, body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["booking"]["status"], "pending_payment");
}

#[tokio::test]
async fn test_failed_checkout_cancels_member_booking() {
    let h = Harness::new();
    let date = future_weekday();
    h.processor.log.lock().unwrap().fail_checkout = true;

    let (status, _) = h
        .send(post_json("/api/rooms/book", Some("carol"), slot(date, "09:00", "13:00")))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    {
        let db = h.state.db();
        let bookings = queries::list_member_bookings(&db, None, None, None, 10).unwrap();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].status.as_str(), "cancelled");
        assert!(queries::get_occupied_slots(&db, "boardroom", date).unwrap().is_empty());
    }

    h.processor.log.lock().unwrap().fail_checkout = false;
    let (status, created) = h
        .send(post_json("/api/rooms/book", Some("carol"), slot(date, "09:00", "13:00")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["booking"]["status"], "requested");
}

#[tokio::test]
async fn test_stale_tenant_customer_is_replaced_and_stored() {
    let h = Harness::new();
    {
        let db = h.state.db();
        queries::set_tenant_customer_id(&db, "acme", "cus_deleted").unwrap();
    }
    h.processor.log.lock().unwrap().stale_customers = true;

    let (status, _) = h
        .send(post_json("/api/rooms/book", Some("carol"), slot(future_weekday(), "09:00", "13:00")))
        .await;
    assert_eq!(status, StatusCode::OK);

    let keys = h.processor.log.lock().unwrap().customer_keys.clone();
    assert_eq!(keys, vec!["tenant-customer-acme-replaces-cus_deleted".to_string()]);
    assert_eq!(h.processor.last_request().customer_id, "cus_1");

    let db = h.state.db();
    let tenant = queries::get_tenant(&db, "acme").unwrap().unwrap();
    assert_eq!(tenant.stripe_customer_id.as_deref(), Some("cus_1"));
}

#[tokio::test]
async fn test_concurrent_polls_settle_once() {
    let h = Harness::new();
    let mut body = slot(future_weekday(), "09:00", "10:00");
    body["customer_name"] = json!("Pat");
    body["customer_email"] = json!("pat@example.com");
    let (_, created) = h.send(post_json("/api/bookings/room/book", None, body)).await;
    let booking_id = created["booking"]["id"].as_str().unwrap().to_string();
    let session_id = created["payment"]["stripe_checkout_session_id"].as_str().unwrap().to_string();

    h.processor.pay(&session_id);

    let uri = format!("/api/bookings/room/status?booking={booking_id}&session_id={session_id}");
    let ((first_status, first), (second_status, second)) =
        tokio::join!(h.send(get(&uri, None)), h.send(get(&uri, None)));
    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(first["booking"]["status"], "confirmed");
    assert_eq!(second["booking"]["status"], "confirmed");

    let reconciled = [&first, &second]
        .iter()
        .filter(|body| body["reconciled"] == true)
        .count();
    assert_eq!(reconciled, 1);
    assert_eq!(h.mailer.sent.lock().unwrap().len(), 1);

    let db = h.state.db();
    let number = format!("stripe:in_{session_id}");
    assert_eq!(queries::count_invoices_by_number(&db, &number).unwrap(), 1);
}

#[tokio::test]
async fn test_webhook_event_without_id_is_rejected() {
    let h = Harness::new();
    let (_, created) = h
        .send(post_json("/api/rooms/book", Some("carol"), slot(future_weekday(), "09:00", "13:00")))
        .await;
    let booking_id = created["booking"]["id"].as_str().unwrap().to_string();
    let session_id = created["payment"]["stripe_checkout_session_id"].as_str().unwrap().to_string();

    let mut event = completed_event(
        "",
        &session_id,
        json!({ "booking_kind": "member", "booking_id": booking_id }),
    );
    let (status, body) = h.send(signed_webhook(&event)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid payload.");

    event.as_object_mut().unwrap().remove("id");
    let (status, _) = h.send(signed_webhook(&event)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let db = h.state.db();
    assert_eq!(queries::count_processed_events(&db).unwrap(), 0);
    let booking = queries::get_member_booking(&db, &booking_id).unwrap().unwrap();
    assert_eq!(booking.status.as_str(), "requested");
}
