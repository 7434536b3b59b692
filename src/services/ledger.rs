use rusqlite::Connection;

use crate::db::queries;
use crate::models::CreditSummary;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("No token allowance exists for {period_start}.")]
    MissingPeriod { period_start: String },

    #[error("Not enough tokens left: {requested} requested, {available} available.")]
    Insufficient { requested: i64, available: i64 },

    #[error("Cannot refund {requested} tokens; only {used} were used.")]
    Overrefund { requested: i64, used: i64 },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Balance across every period the owner has. Unused tokens from earlier
/// months carry forward because they are part of the sum.
pub fn summary(conn: &Connection, owner_id: &str) -> anyhow::Result<CreditSummary> {
    let periods = queries::list_credit_periods(conn, owner_id)?;

    let tokens_total: i64 = periods.iter().map(|p| p.tokens_total).sum();
    let tokens_used: i64 = periods.iter().map(|p| p.tokens_used).sum();

    Ok(CreditSummary {
        tokens_total,
        tokens_used,
        tokens_left: (tokens_total - tokens_used).max(0),
        latest: periods.into_iter().max_by(|a, b| a.period_start.cmp(&b.period_start)),
    })
}

/// Spends `tokens` from one period row in a single conditional update, so
/// concurrent debits can never overdraw it.
pub fn apply_debit(
    conn: &Connection,
    owner_id: &str,
    period_start: &str,
    tokens: i64,
) -> Result<(), LedgerError> {
    if tokens <= 0 {
        return Ok(());
    }

    if queries::adjust_tokens_used(conn, owner_id, period_start, tokens)? {
        tracing::info!(owner_id, period_start, tokens, "tokens debited");
        return Ok(());
    }

    match queries::get_credit_period(conn, owner_id, period_start)? {
        None => Err(LedgerError::MissingPeriod {
            period_start: period_start.to_string(),
        }),
        Some(period) => Err(LedgerError::Insufficient {
            requested: tokens,
            available: (period.tokens_total - period.tokens_used).max(0),
        }),
    }
}

/// Spends as much of `tokens` as the period still holds and returns the amount
/// taken. Used at settlement, where cash has already been collected and a short
/// balance must not block the booking.
pub fn debit_available(
    conn: &Connection,
    owner_id: &str,
    period_start: &str,
    tokens: i64,
) -> Result<i64, LedgerError> {
    if tokens <= 0 {
        return Ok(0);
    }

    let period = queries::get_credit_period(conn, owner_id, period_start)?.ok_or_else(|| {
        LedgerError::MissingPeriod {
            period_start: period_start.to_string(),
        }
    })?;
    let take = tokens.min((period.tokens_total - period.tokens_used).max(0));
    if take == 0 {
        return Ok(0);
    }

    apply_debit(conn, owner_id, period_start, take)?;
    Ok(take)
}

/// Gives back tokens after an admin cancellation.
pub fn refund(
    conn: &Connection,
    owner_id: &str,
    period_start: &str,
    tokens: i64,
) -> Result<(), LedgerError> {
    if tokens <= 0 {
        return Ok(());
    }

    if queries::adjust_tokens_used(conn, owner_id, period_start, -tokens)? {
        tracing::info!(owner_id, period_start, tokens, "tokens refunded");
        return Ok(());
    }

    match queries::get_credit_period(conn, owner_id, period_start)? {
        None => Err(LedgerError::MissingPeriod {
            period_start: period_start.to_string(),
        }),
        Some(period) => Err(LedgerError::Overrefund {
            requested: tokens,
            used: period.tokens_used,
        }),
    }
}

/// Adds purchased tokens to a period, creating the row if needed.
pub fn credit(conn: &Connection, owner_id: &str, period_start: &str, tokens: i64) -> anyhow::Result<()> {
    queries::add_credit_tokens(conn, owner_id, period_start, tokens)?;
    tracing::info!(owner_id, period_start, tokens, "tokens credited");
    Ok(())
}
