use serde::{Deserialize, Serialize};

/// One owner's token allowance for a calendar month (`period_start` is `YYYY-MM-01`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreditPeriod {
    pub owner_id: String,
    pub period_start: String,
    pub tokens_total: i64,
    pub tokens_used: i64,
}

/// Balance across every period an owner has. `latest` is where new spend is debited.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreditSummary {
    pub tokens_total: i64,
    pub tokens_used: i64,
    pub tokens_left: i64,
    pub latest: Option<CreditPeriod>,
}

impl CreditSummary {
    pub fn debit_period(&self) -> Option<&str> {
        self.latest.as_ref().map(|p| p.period_start.as_str())
    }
}
