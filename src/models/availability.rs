use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::Serialize;

use super::booking::hhmm;

/// The lounge is sold as one evening event; every other space is a weekday meeting room.
pub const LOUNGE_SLUG: &str = "hive-lounge";

/// What part of a day a space can be booked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BookingWindow {
    /// Exactly one slot; the requested range must match it.
    Fixed {
        #[serde(rename = "start_time", with = "hhmm")]
        start: NaiveTime,
        #[serde(rename = "end_time", with = "hhmm")]
        end: NaiveTime,
        label: &'static str,
        reason: &'static str,
    },
    /// Any range inside `[start, end]`.
    Window {
        #[serde(rename = "start_time", with = "hhmm")]
        start: NaiveTime,
        #[serde(rename = "end_time", with = "hhmm")]
        end: NaiveTime,
        label: &'static str,
    },
    Blocked { reason: &'static str },
}

impl BookingWindow {
    pub fn for_space(space_slug: &str, date: NaiveDate) -> Self {
        if space_slug == LOUNGE_SLUG {
            return BookingWindow::Fixed {
                start: hm(17, 0),
                end: hm(22, 0),
                label: "5:00pm–10:00pm",
                reason: "Hive Lounge is booked as a single 5pm–10pm event slot.",
            };
        }

        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return BookingWindow::Blocked {
                reason: "Meeting rooms can only be booked Monday to Friday.",
            };
        }

        BookingWindow::Window {
            start: hm(9, 0),
            end: hm(17, 0),
            label: "9:00am–5:00pm",
        }
    }
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}
