use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Which booking table a payment or status request refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingKind {
    Member,
    Public,
}

impl BookingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingKind::Member => "member",
            BookingKind::Public => "public",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "public" => BookingKind::Public,
            _ => BookingKind::Member,
        }
    }
}

/// A booking made by a signed-in tenant member. May be partly paid with tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberBooking {
    pub id: String,
    pub owner_id: String,
    pub tenant_id: Option<String>,
    pub space_slug: String,
    pub booking_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub hours: i64,
    pub tokens_used: i64,
    /// What the ledger actually gave up; refunds never return more than this.
    pub tokens_debited: i64,
    pub token_owner_id: Option<String>,
    pub token_period_start: Option<String>,
    pub price_cents: i64,
    pub status: MemberBookingStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemberBookingStatus {
    Requested,
    Approved,
    Cancelled,
}

impl MemberBookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberBookingStatus::Requested => "requested",
            MemberBookingStatus::Approved => "approved",
            MemberBookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => MemberBookingStatus::Approved,
            "cancelled" => MemberBookingStatus::Cancelled,
            _ => MemberBookingStatus::Requested,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, MemberBookingStatus::Requested)
    }
}

/// An anonymous booking from the public site. Always settled in cash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicBooking {
    pub id: String,
    pub space_slug: String,
    pub booking_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub hours: i64,
    pub price_cents: i64,
    pub currency: String,
    pub status: PublicBookingStatus,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublicBookingStatus {
    PendingPayment,
    Confirmed,
    Cancelled,
    Expired,
}

impl PublicBookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicBookingStatus::PendingPayment => "pending_payment",
            PublicBookingStatus::Confirmed => "confirmed",
            PublicBookingStatus::Cancelled => "cancelled",
            PublicBookingStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => PublicBookingStatus::Confirmed,
            "cancelled" => PublicBookingStatus::Cancelled,
            "expired" => PublicBookingStatus::Expired,
            _ => PublicBookingStatus::PendingPayment,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PublicBookingStatus::PendingPayment)
    }
}

/// Start/end of an existing booking that still holds its slot.
#[derive(Debug, Clone, Serialize)]
pub struct OccupiedSlot {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub status: String,
    pub source: BookingKind,
}

pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_time(&raw).ok_or_else(|| serde::de::Error::custom("expected HH:MM"))
    }
}

/// Accepts `HH:MM` or `HH:MM:SS`; seconds are dropped.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    let hhmm = match s.len() {
        5 => s,
        8 => &s[..5],
        _ => return None,
    };
    NaiveTime::parse_from_str(hhmm, "%H:%M").ok()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}
