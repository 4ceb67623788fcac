//! Dates, durations and date ranges.
//!
//! Time is kept in whole seconds. Two sentinels bracket every horizon:
//! [`Date::INFINITE_PAST`] and [`Date::INFINITE_FUTURE`]. Arithmetic on a
//! sentinel leaves it unchanged, so "infinitely late" stays infinitely late
//! no matter how many offsets are applied to it.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

pub const SECONDS_PER_HOUR: i64 = 3_600;
pub const SECONDS_PER_DAY: i64 = 86_400;

/// A point in time, in seconds since the planning epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Date(pub i64);

impl Date {
    pub const INFINITE_PAST: Date = Date(i64::MIN);
    pub const INFINITE_FUTURE: Date = Date(i64::MAX);

    #[inline]
    pub fn from_days(days: i64) -> Date {
        Date(days * SECONDS_PER_DAY)
    }

    #[inline]
    pub fn from_hours(hours: i64) -> Date {
        Date(hours * SECONDS_PER_HOUR)
    }

    #[inline]
    pub fn is_infinite(self) -> bool {
        self == Date::INFINITE_PAST || self == Date::INFINITE_FUTURE
    }

    /// Round down to a multiple of `step`. Sentinels and non-positive steps
    /// are returned unchanged.
    pub fn align_down(self, step: Duration) -> Date {
        if self.is_infinite() || step.0 <= 0 {
            return self;
        }
        Date(self.0.div_euclid(step.0) * step.0)
    }

    /// Round up to a multiple of `step`.
    pub fn align_up(self, step: Duration) -> Date {
        let down = self.align_down(step);
        if down == self || self.is_infinite() { down } else { down + step }
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Date::INFINITE_PAST => write!(f, "-inf"),
            Date::INFINITE_FUTURE => write!(f, "+inf"),
            Date(s) => {
                let days = s.div_euclid(SECONDS_PER_DAY);
                let rest = s.rem_euclid(SECONDS_PER_DAY);
                if rest == 0 {
                    write!(f, "day {days}")
                } else {
                    write!(f, "day {days} +{rest}s")
                }
            }
        }
    }
}

/// A span of time in seconds. Negative durations are allowed in
/// intermediate arithmetic but never stored on the model.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Duration(pub i64);

impl Duration {
    pub const ZERO: Duration = Duration(0);
    pub const MAX: Duration = Duration(i64::MAX);

    #[inline]
    pub fn from_days(days: i64) -> Duration {
        Duration(days * SECONDS_PER_DAY)
    }

    #[inline]
    pub fn from_hours(hours: i64) -> Duration {
        Duration(hours * SECONDS_PER_HOUR)
    }

    #[inline]
    pub fn from_secs(secs: i64) -> Duration {
        Duration(secs)
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn hours(self) -> f64 {
        self.0 as f64 / SECONDS_PER_HOUR as f64
    }

    /// Multiply by a quantity, rounding to the nearest second.
    pub fn scale(self, factor: f64) -> Duration {
        if factor <= 0.0 || self.0 == 0 {
            return Duration::ZERO;
        }
        let secs = self.0 as f64 * factor;
        if secs >= i64::MAX as f64 {
            Duration::MAX
        } else {
            Duration(secs.round() as i64)
        }
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Duration {
    type Output = Duration;
    fn sub(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl Add<Duration> for Date {
    type Output = Date;
    fn add(self, rhs: Duration) -> Date {
        if self.is_infinite() {
            return self;
        }
        Date(self.0.saturating_add(rhs.0))
    }
}

impl Sub<Duration> for Date {
    type Output = Date;
    fn sub(self, rhs: Duration) -> Date {
        if self.is_infinite() {
            return self;
        }
        Date(self.0.saturating_sub(rhs.0))
    }
}

impl Sub for Date {
    type Output = Duration;
    fn sub(self, rhs: Date) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Date,
    pub end: Date,
}

impl DateRange {
    pub const ALWAYS: DateRange = DateRange {
        start: Date::INFINITE_PAST,
        end: Date::INFINITE_FUTURE,
    };

    pub fn new(start: Date, end: Date) -> DateRange {
        DateRange { start, end }
    }

    #[inline]
    pub fn contains(&self, date: Date) -> bool {
        date >= self.start && date < self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl Default for DateRange {
    fn default() -> Self {
        DateRange::ALWAYS
    }
}
