use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::BookingKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub booking_kind: BookingKind,
    pub booking_id: String,
    pub tenant_id: Option<String>,
    pub token_owner_id: Option<String>,
    pub stripe_customer_id: String,
    pub stripe_checkout_session_id: String,
    pub stripe_invoice_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub discount_cents: i64,
    pub coupon_code: Option<String>,
    pub status: PaymentStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    RequiresPayment,
    Paid,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::RequiresPayment => "requires_payment",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "paid" => PaymentStatus::Paid,
            "failed" => PaymentStatus::Failed,
            "cancelled" => PaymentStatus::Cancelled,
            _ => PaymentStatus::RequiresPayment,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::RequiresPayment)
    }
}

/// Authoritative charge details reported by the processor once a session is paid.
#[derive(Debug, Clone, Default)]
pub struct PaidDetails {
    pub invoice_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub discount_cents: Option<i64>,
}
