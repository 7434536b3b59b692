pub mod stripe;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::services::pricing::{self, Discount};

/// A processor failure normalized to what callers and logs need.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProcessorError {
    pub message: String,
    pub code: String,
    pub status: Option<u16>,
    pub request_id: Option<String>,
}

impl ProcessorError {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            status: None,
            request_id: None,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.code == "resource_missing" || self.status == Some(404)
    }
}

#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub name: String,
    pub email: Option<String>,
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct PromotionCode {
    pub id: String,
    pub coupon_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub customer_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: Vec<(String, String)>,
    pub promotion_code_id: Option<String>,
}

/// The parts of a checkout session settlement reads. Expanded and
/// unexpanded `invoice`/`payment_intent`/`subscription` both parse.
#[derive(Debug, Clone, Default)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub client_secret: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub amount_total: Option<i64>,
    pub amount_discount: Option<i64>,
    pub currency: Option<String>,
    pub invoice_id: Option<String>,
    pub invoice_url: Option<String>,
    pub payment_intent_id: Option<String>,
    pub subscription_id: Option<String>,
    pub created: Option<i64>,
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn from_value(v: &Value) -> Self {
        let metadata = v["metadata"]
            .as_object()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let invoice = &v["invoice"];
        let invoice_url = invoice["hosted_invoice_url"]
            .as_str()
            .or_else(|| invoice["invoice_pdf"].as_str())
            .map(str::to_string);

        Self {
            id: v["id"].as_str().unwrap_or_default().to_string(),
            url: v["url"].as_str().map(str::to_string),
            client_secret: v["client_secret"].as_str().map(str::to_string),
            status: v["status"].as_str().map(str::to_string),
            payment_status: v["payment_status"].as_str().map(str::to_string),
            amount_total: v["amount_total"].as_i64(),
            amount_discount: v["total_details"]["amount_discount"].as_i64(),
            currency: v["currency"].as_str().map(|c| c.to_uppercase()),
            invoice_id: id_or_object(invoice),
            invoice_url,
            payment_intent_id: id_or_object(&v["payment_intent"]),
            subscription_id: id_or_object(&v["subscription"]),
            created: v["created"].as_i64(),
            metadata,
        }
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    /// Paid outright, or completed with nothing left to collect. A completed
    /// session still reporting `unpaid` is waiting on a delayed payment method.
    pub fn is_paid(&self) -> bool {
        match self.payment_status.as_deref() {
            Some("paid") | Some("no_payment_required") => true,
            Some(_) => false,
            None => {
                self.status.as_deref() == Some("complete")
                    && self.amount_total.is_some_and(|a| a >= 0)
            }
        }
    }
}

fn id_or_object(v: &Value) -> Option<String> {
    v.as_str()
        .or_else(|| v["id"].as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// `None` when the id is unknown to the configured account or the customer was deleted.
    async fn retrieve_customer(&self, customer_id: &str) -> Result<Option<String>, ProcessorError>;

    async fn create_customer(
        &self,
        customer: &NewCustomer,
        idempotency_key: &str,
    ) -> Result<String, ProcessorError>;

    async fn find_promotion_code(&self, code: &str) -> Result<Option<PromotionCode>, ProcessorError>;

    async fn retrieve_coupon(&self, coupon_id: &str) -> Result<Option<Discount>, ProcessorError>;

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
        idempotency_key: &str,
    ) -> Result<CheckoutSession, ProcessorError>;

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSession, ProcessorError>;

    /// Hosted URL (or PDF) for an invoice, if the processor has one.
    async fn invoice_url(&self, invoice_id: &str) -> Result<Option<String>, ProcessorError>;

    /// Unix timestamp the subscription's current period ends.
    async fn subscription_period_end(&self, subscription_id: &str) -> Result<Option<i64>, ProcessorError>;
}

/// Reuses a stored customer id when it still resolves in the configured
/// account; otherwise creates a fresh one.
pub async fn ensure_customer(
    processor: &dyn PaymentProcessor,
    existing: Option<&str>,
    customer: &NewCustomer,
    idempotency_key: &str,
) -> Result<String, ProcessorError> {
    let existing = existing.map(str::trim).filter(|s| !s.is_empty());

    let key = match existing {
        Some(id) => match processor.retrieve_customer(id).await? {
            Some(found) => return Ok(found),
            None => {
                tracing::warn!(customer_id = id, "stored customer id is stale, creating a new one");
                format!("{idempotency_key}-replaces-{id}")
            }
        },
        None => idempotency_key.to_string(),
    };

    processor.create_customer(customer, &key).await
}

#[derive(Debug, Clone)]
pub struct ResolvedCoupon {
    pub promotion_code_id: String,
    pub discount: Option<Discount>,
}

impl ResolvedCoupon {
    pub fn discount_cents(&self, amount_cents: i64) -> i64 {
        pricing::discount_cents(self.discount, amount_cents)
    }
}

/// Looks up an active promotion code and the discount behind it.
/// `Ok(None)` when no such code exists.
pub async fn resolve_coupon(
    processor: &dyn PaymentProcessor,
    code: &str,
) -> Result<Option<ResolvedCoupon>, ProcessorError> {
    let code = code.trim();
    if code.is_empty() {
        return Ok(None);
    }

    let Some(promo) = processor.find_promotion_code(code).await? else {
        return Ok(None);
    };

    let discount = match promo.coupon_id.as_deref() {
        Some(coupon_id) => processor.retrieve_coupon(coupon_id).await?,
        None => None,
    };

    Ok(Some(ResolvedCoupon {
        promotion_code_id: promo.id,
        discount,
    }))
}

/// Hosted URL for an internal invoice number (`stripe:{invoice}` or
/// `stripe_session:{session}`). A session without an invoice falls back to
/// the session's own URL.
pub async fn resolve_invoice_url(
    processor: &dyn PaymentProcessor,
    invoice_number: &str,
) -> Result<Option<String>, ProcessorError> {
    let number = invoice_number.trim();

    if let Some(invoice_id) = number.strip_prefix("stripe:").filter(|s| !s.is_empty()) {
        return processor.invoice_url(invoice_id).await;
    }

    if let Some(session_id) = number.strip_prefix("stripe_session:").filter(|s| !s.is_empty()) {
        let session = processor.retrieve_checkout_session(session_id).await?;
        if session.invoice_url.is_some() {
            return Ok(session.invoice_url);
        }
        if let Some(invoice_id) = session.invoice_id.as_deref() {
            return processor.invoice_url(invoice_id).await;
        }
        return Ok(session.url);
    }

    Ok(None)
}
