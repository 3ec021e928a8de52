//! Local calendar days.
//!
//! Every "today" / "yesterday" decision is taken against the local calendar of
//! one configured UTC offset, never against the UTC date.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// One local calendar day and its inclusive `[start, end]` window in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDay {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl LocalDay {
    /// The local day of `date` in `tz`.
    pub fn of(date: NaiveDate, tz: &FixedOffset) -> Self {
        let start = local_to_utc(date, NaiveTime::MIN, tz);
        let end = start + Duration::days(1) - Duration::milliseconds(1);
        Self { date, start, end }
    }

    /// The local day that `at` falls in.
    pub fn containing(at: DateTime<Utc>, tz: &FixedOffset) -> Self {
        Self::of(at.with_timezone(tz).date_naive(), tz)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }

    pub fn previous(&self, tz: &FixedOffset) -> Self {
        let date = self.date.pred_opt().unwrap_or(self.date);
        Self::of(date, tz)
    }

    /// Whole local days from `earlier` to this day (negative when `earlier` is later).
    pub fn days_since(&self, earlier: NaiveDate) -> i64 {
        (self.date - earlier).num_days()
    }
}

/// UTC instant of a local wall-clock time.
pub fn local_to_utc(date: NaiveDate, time: NaiveTime, tz: &FixedOffset) -> DateTime<Utc> {
    (date.and_time(time) - Duration::seconds(i64::from(tz.local_minus_utc()))).and_utc()
}

/// Weekday number with Sunday = 0 ... Saturday = 6.
pub fn weekday_number(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Parse a fixed offset: `Z`, `UTC`, or anything chrono reads as an offset (`+03:00`).
pub fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    raw.parse().ok()
}
