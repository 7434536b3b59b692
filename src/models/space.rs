use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    pub slug: String,
    pub title: String,
    pub pricing_half_day_cents: Option<i64>,
    pub pricing_full_day_cents: Option<i64>,
    pub pricing_per_event_cents: Option<i64>,
    pub tokens_per_hour: i64,
}
