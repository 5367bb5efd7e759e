//! Time handling for hourly satellite products.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};

use crate::error::SatError;
use serde::{Deserialize, Serialize};

/// Format used in file names and on the command line, e.g. `2023-01-01_00:00`.
pub const STAMP_FORMAT: &str = "%Y-%m-%d_%H:%M";

/// Format of the calendar-date fragment used to group a day's images.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub const SECONDS_PER_HOUR: i64 = 3600;
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Floor an instant to a multiple of `step_secs` since the epoch.
pub fn floor_to(dt: DateTime<Utc>, step_secs: i64) -> DateTime<Utc> {
    let secs = dt.timestamp();
    let excess = secs.rem_euclid(step_secs);
    dt - Duration::seconds(excess) - Duration::nanoseconds(dt.timestamp_subsec_nanos() as i64)
}

/// Floor an instant to the start of its hour.
pub fn floor_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    floor_to(dt, SECONDS_PER_HOUR)
}

/// Floor an instant to 00:00 UTC of its day.
pub fn floor_to_day(dt: DateTime<Utc>) -> DateTime<Utc> {
    floor_to(dt, SECONDS_PER_DAY)
}

/// True when the instant is exactly the top of a UTC day.
pub fn is_midnight(dt: DateTime<Utc>) -> bool {
    floor_to_day(dt) == dt
}

/// Render an instant the way file names carry it.
pub fn format_stamp(dt: DateTime<Utc>) -> String {
    dt.format(STAMP_FORMAT).to_string()
}

/// Parse a `%Y-%m-%d_%H:%M` stamp as UTC.
pub fn parse_stamp(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    NaiveDateTime::parse_from_str(s.trim(), STAMP_FORMAT)
        .map(|ndt| Utc.from_utc_datetime(&ndt))
        .map_err(|_| TimeParseError::InvalidFormat(s.to_string()))
}

/// A half-open `[start, end)` window of whole hours.
///
/// Both bounds are floored to the hour on construction. A window whose start
/// is not before its end is empty rather than invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: floor_to_hour(start),
            end: floor_to_hour(end),
        }
    }

    /// Like [`TimeWindow::new`], but an end before the start (compared before
    /// flooring) is a configuration error.
    pub fn try_new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, SatError> {
        if end < start {
            return Err(SatError::configuration(format!(
                "window end {} is before start {}",
                format_stamp(end),
                format_stamp(start)
            )));
        }
        Ok(Self::new(start, end))
    }

    /// The single hour preceding `ts` (after flooring `ts` to the hour).
    pub fn previous_hour(ts: DateTime<Utc>) -> Self {
        let end = floor_to_hour(ts);
        Self::new(end - Duration::hours(1), end)
    }

    /// Default window: yesterday at this hour up to one hour ago.
    pub fn default_relative_to(now: DateTime<Utc>) -> Self {
        Self::new(
            now - Duration::days(1) - Duration::hours(1),
            now - Duration::hours(1),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Number of whole hours in the window.
    pub fn len_hours(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            ((self.end - self.start).num_seconds() / SECONDS_PER_HOUR) as usize
        }
    }

    /// Every hourly instant in `[start, end)`.
    pub fn hours(&self) -> Vec<DateTime<Utc>> {
        (0..self.len_hours() as i64)
            .map(|h| self.start + Duration::hours(h))
            .collect()
    }

    /// `<start>-<end>` fragment used to name window-level artifacts.
    pub fn stamp(&self) -> String {
        format!("{}-{}", format_stamp(self.start), format_stamp(self.end))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}. Expected YYYY-MM-DD_HH:MM")]
    InvalidFormat(String),
}
