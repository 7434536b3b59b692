use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::Serialize;

use crate::models::Space;

/// Whole hours in `[start, end)`, rounded half-up. Zero for empty or inverted ranges.
pub fn compute_hours(start: NaiveTime, end: NaiveTime) -> i64 {
    let minutes = (end - start).num_minutes();
    if minutes <= 0 {
        return 0;
    }
    (minutes + 30) / 60
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceTier {
    pub label: String,
    pub amount_cents: i64,
}

/// Flat tiers win once the booking is long enough; shorter bookings pro-rate
/// from full-day/8, half-day/4 or per-event/5 in that order of preference.
pub fn tiered_price(space: &Space, hours: i64) -> PriceTier {
    let full_day = positive(space.pricing_full_day_cents);
    let half_day = positive(space.pricing_half_day_cents);
    let per_event = positive(space.pricing_per_event_cents);

    if hours <= 0 {
        return PriceTier {
            label: String::new(),
            amount_cents: 0,
        };
    }

    if let Some(full) = full_day.filter(|_| hours >= 8) {
        return PriceTier {
            label: "full day".to_string(),
            amount_cents: full,
        };
    }
    if let Some(half) = half_day.filter(|_| hours >= 4) {
        return PriceTier {
            label: "half day".to_string(),
            amount_cents: half,
        };
    }

    let prorated = if let Some(full) = full_day {
        div_round(full * hours, 8)
    } else if let Some(half) = half_day {
        div_round(half * hours, 4)
    } else if let Some(event) = per_event {
        div_round(event * hours, 5)
    } else {
        0
    };

    PriceTier {
        label: format!("{hours} hour(s)"),
        amount_cents: prorated,
    }
}

/// Cash owed after tokens: the unpaid fraction of required tokens times the base price.
pub fn cash_due(base_price_cents: i64, required_tokens: i64, tokens_applied: i64) -> i64 {
    let price = base_price_cents.max(0);
    let required = required_tokens.max(0);
    let applied = tokens_applied.clamp(0, required);

    if price == 0 {
        return 0;
    }
    if required == 0 {
        return price;
    }

    let remaining = required - applied;
    if remaining == 0 {
        return 0;
    }
    div_round(price * remaining, required).max(0)
}

/// A coupon's effect as reported by the processor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Discount {
    AmountOff(i64),
    PercentOff(f64),
}

/// Cents taken off `amount_cents`, never more than the amount itself.
pub fn discount_cents(discount: Option<Discount>, amount_cents: i64) -> i64 {
    let amount = amount_cents.max(0);
    if amount == 0 {
        return 0;
    }
    match discount {
        Some(Discount::AmountOff(off)) => off.clamp(0, amount),
        Some(Discount::PercentOff(pct)) if pct.is_finite() && pct > 0.0 => {
            let off = (amount as f64 * pct / 100.0).round() as i64;
            off.clamp(0, amount)
        }
        _ => 0,
    }
}

/// `YYYY-MM-01` for the month containing `date`.
pub fn month_start(date: NaiveDate) -> String {
    format!("{:04}-{:02}-01", date.year(), date.month())
}

fn positive(v: Option<i64>) -> Option<i64> {
    v.filter(|c| *c > 0)
}

fn div_round(numerator: i64, denominator: i64) -> i64 {
    (2 * numerator + denominator) / (2 * denominator)
}
