use chrono::{Duration, NaiveDate, NaiveTime};
use rusqlite::Connection;

use crate::db::queries;
use crate::models::BookingWindow;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("Bookings must be made at least one day in advance.")]
    TooSoon,
    #[error("{0}")]
    Blocked(&'static str),
    #[error("This room can only be booked for {0}.")]
    FixedSlotOnly(&'static str),
    #[error("end_time must be after start_time.")]
    EmptyRange,
    #[error("Bookings must be within {0}.")]
    OutsideWindow(&'static str),
    #[error("That time range includes unavailable time.")]
    Conflict,
}

/// Checks a requested range against the space's window. `today` is the
/// caller's local date; same-day bookings are refused.
pub fn validate_window(
    space_slug: &str,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    today: NaiveDate,
) -> Result<(), SchedulingError> {
    if date < today + Duration::days(1) {
        return Err(SchedulingError::TooSoon);
    }

    match BookingWindow::for_space(space_slug, date) {
        BookingWindow::Blocked { reason } => Err(SchedulingError::Blocked(reason)),
        BookingWindow::Fixed {
            start: slot_start,
            end: slot_end,
            label,
            ..
        } => {
            if start != slot_start || end != slot_end {
                return Err(SchedulingError::FixedSlotOnly(label));
            }
            Ok(())
        }
        BookingWindow::Window {
            start: min_start,
            end: max_end,
            label,
        } => {
            if end <= start {
                return Err(SchedulingError::EmptyRange);
            }
            if start < min_start || end > max_end {
                return Err(SchedulingError::OutsideWindow(label));
            }
            Ok(())
        }
    }
}

/// Half-open intersection: ranges that only touch do not overlap.
pub fn overlaps(a_start: NaiveTime, a_end: NaiveTime, b_start: NaiveTime, b_end: NaiveTime) -> bool {
    a_start < b_end && a_end > b_start
}

/// Rejects the range if any live member or public booking on the same space and date intersects it.
pub fn ensure_slot_free(
    conn: &Connection,
    space_slug: &str,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
) -> anyhow::Result<Result<(), SchedulingError>> {
    let occupied = queries::get_occupied_slots(conn, space_slug, date)?;

    if occupied
        .iter()
        .any(|slot| overlaps(start, end, slot.start_time, slot.end_time))
    {
        return Ok(Err(SchedulingError::Conflict));
    }

    Ok(Ok(()))
}
