//! Fixed-width guide timestamps
//!
//! The schedule feed and the store both use decimal `YYYYMMDDhhmmss`
//! timestamps. `GuideTime` makes that an explicit newtype whose derived
//! ordering is chronological ordering, replacing ad-hoc string comparisons.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Microseconds per hour, used for the feed's offset-hours correction
const MICROS_PER_HOUR: f64 = 3_600_000_000.0;

/// A schedule timestamp in fixed decimal `YYYYMMDDhhmmss` form
///
/// The encoding is order-preserving: comparing two `GuideTime` values as
/// integers compares them chronologically. Derived `Ord` is relied on by the
/// store's `(channel, stop)` key ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct GuideTime(u64);

impl GuideTime {
    /// Smallest representable timestamp, used as a range-scan lower bound
    pub const MIN: GuideTime = GuideTime(0);
    /// Largest representable timestamp, used as a range-scan upper bound
    pub const MAX: GuideTime = GuideTime(u64::MAX);

    /// Wraps a raw `YYYYMMDDhhmmss` value
    pub const fn from_raw(value: u64) -> Self {
        GuideTime(value)
    }

    /// Returns the raw `YYYYMMDDhhmmss` value
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Encodes a calendar datetime into guide form
    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        let date = dt.date();
        let time = dt.time();
        GuideTime(
            date.year() as u64 * 10_000_000_000
                + date.month() as u64 * 100_000_000
                + date.day() as u64 * 1_000_000
                + time.hour() as u64 * 10_000
                + time.minute() as u64 * 100
                + time.second() as u64,
        )
    }

    /// Current wall-clock time in the given zone
    pub fn now_in(tz: Tz) -> Self {
        Self::from_datetime(Utc::now().with_timezone(&tz).naive_local())
    }

    /// Converts a Windows FILETIME tick count into a guide timestamp
    ///
    /// Ticks are 100-nanosecond units since 1601-01-01T00:00:00 UTC.
    /// `offset_hours` is the caller-supplied correction for time-zone/DST
    /// skew in the source feed; it may be negative or fractional.
    ///
    /// Returns `None` when the tick value falls outside the representable
    /// datetime range.
    pub fn from_filetime(ticks: u64, offset_hours: f64) -> Option<Self> {
        let micros = (ticks / 10) as i64 + (offset_hours * MICROS_PER_HOUR) as i64;
        let epoch = NaiveDate::from_ymd_opt(1601, 1, 1)?.and_hms_opt(0, 0, 0)?;
        let dt = epoch.checked_add_signed(Duration::microseconds(micros))?;
        Some(Self::from_datetime(dt))
    }

    /// The `YYYYMMDD` date portion
    pub fn date_part(self) -> u32 {
        (self.0 / 1_000_000) as u32
    }

    /// Formats the time-of-day portion as `hh:mm` for display rows
    pub fn hhmm(self) -> String {
        format!("{:02}:{:02}", (self.0 / 10_000) % 100, (self.0 / 100) % 100)
    }

    /// Decodes back into a calendar datetime
    ///
    /// Returns `None` when the digits do not form a valid date and time.
    pub fn to_naive(self) -> Option<NaiveDateTime> {
        let v = self.0;
        let date = NaiveDate::from_ymd_opt(
            (v / 10_000_000_000) as i32,
            ((v / 100_000_000) % 100) as u32,
            ((v / 1_000_000) % 100) as u32,
        )?;
        date.and_hms_opt(
            ((v / 10_000) % 100) as u32,
            ((v / 100) % 100) as u32,
            (v % 100) as u32,
        )
    }

    /// Shifts by whole minutes, carrying across hour and day boundaries
    ///
    /// The raw encoding is not closed under arithmetic (`..5930 + 100` is not
    /// a time), so the shift goes through a decoded datetime. Returns `None`
    /// when the value does not decode.
    pub fn checked_add_minutes(self, minutes: i64) -> Option<Self> {
        let shifted = self
            .to_naive()?
            .checked_add_signed(Duration::minutes(minutes))?;
        Some(Self::from_datetime(shifted))
    }
}

impl fmt::Display for GuideTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:014}", self.0)
    }
}

/// Returns the `[date 000000, date 235900)` bounds for a `YYYYMMDD` date
pub fn day_bounds(date: u32) -> (GuideTime, GuideTime) {
    let base = date as u64 * 1_000_000;
    (GuideTime(base), GuideTime(base + 235_900))
}

/// Today's calendar date in the given zone
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Converts a raw guide timestamp back into a zone-aware datetime
///
/// Used by timeshift callers that need a relative replay offset. Returns
/// `None` for values that do not form a valid calendar datetime.
pub fn to_datetime(t: GuideTime, tz: Tz) -> Option<chrono::DateTime<Tz>> {
    tz.from_local_datetime(&t.to_naive()?).single()
}

/// The sliding window of history retained by the store
///
/// Recomputed before every flush. Eviction trims only the trailing edge:
/// records starting before `lower` are deleted, while today-and-later
/// records are always kept. `upper` documents the edge of retained history
/// (`yesterday 23:59:00`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionWindow {
    /// Oldest retained `start` (`today − cached_days` at `000000`)
    pub lower: GuideTime,
    /// Edge of retained history (`yesterday` at `235900`)
    pub upper: GuideTime,
}

impl RetentionWindow {
    /// Computes the window for the given calendar day and retention depth
    pub fn compute(today: NaiveDate, cached_days: u32) -> Self {
        let lower_day = today - Duration::days(cached_days as i64);
        let yesterday = today - Duration::days(1);
        RetentionWindow {
            lower: day_bounds(date_value(lower_day)).0,
            upper: day_bounds(date_value(yesterday)).1,
        }
    }
}

/// Encodes a calendar date as `YYYYMMDD`
pub fn date_value(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}
