//! Time-varying values: step envelopes (buffer min/max targets, resource
//! size) and bucket calendars for bucketized resources.

use serde::{Deserialize, Serialize};

use crate::time::{Date, Duration};

/// A step function over time. The value changes at each listed date and
/// holds until the next change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    default: f64,
    changes: Vec<(Date, f64)>,
}

impl Envelope {
    pub fn constant(value: f64) -> Self {
        Self {
            default: value,
            changes: Vec::new(),
        }
    }

    /// Add a step. Steps may be added in any order.
    pub fn with_change(mut self, from: Date, value: f64) -> Self {
        self.set(from, value);
        self
    }

    pub fn set(&mut self, from: Date, value: f64) {
        match self.changes.binary_search_by(|(d, _)| d.cmp(&from)) {
            Ok(i) => self.changes[i].1 = value,
            Err(i) => self.changes.insert(i, (from, value)),
        }
    }

    pub fn value_at(&self, date: Date) -> f64 {
        let idx = self.changes.partition_point(|(d, _)| *d <= date);
        if idx == 0 {
            self.default
        } else {
            self.changes[idx - 1].1
        }
    }

    /// Dates strictly inside `(from, to)` where the value changes.
    pub fn changes_between(&self, from: Date, to: Date) -> impl Iterator<Item = Date> + '_ {
        self.changes
            .iter()
            .map(|(d, _)| *d)
            .filter(move |d| *d > from && *d < to)
    }

    /// True when the envelope is zero everywhere.
    pub fn is_zero(&self) -> bool {
        self.default == 0.0 && self.changes.iter().all(|(_, v)| *v == 0.0)
    }

    pub fn max_value(&self) -> f64 {
        self.changes
            .iter()
            .map(|(_, v)| *v)
            .fold(self.default, f64::max)
    }
}

/// One capacity bucket of a bucketized resource.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub start: Date,
    pub end: Date,
    pub capacity: f64,
}

/// Consecutive capacity buckets. Bucket `i` covers `[start_i, start_{i+1})`;
/// the last bucket extends to the infinite future. No capacity exists
/// before the first bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketCalendar {
    starts: Vec<(Date, f64)>,
}

impl BucketCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` buckets of width `width` starting at `first`, each with
    /// the same capacity. A zero-capacity bucket closes the calendar.
    pub fn uniform(first: Date, width: Duration, count: usize, capacity: f64) -> Self {
        let mut cal = Self::new();
        let mut d = first;
        for _ in 0..count {
            cal.add_bucket(d, capacity);
            d = d + width;
        }
        cal.add_bucket(d, 0.0);
        cal
    }

    pub fn add_bucket(&mut self, start: Date, capacity: f64) {
        match self.starts.binary_search_by(|(d, _)| d.cmp(&start)) {
            Ok(i) => self.starts[i].1 = capacity,
            Err(i) => self.starts.insert(i, (start, capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn index_of(&self, date: Date) -> Option<usize> {
        let idx = self.starts.partition_point(|(d, _)| *d <= date);
        if idx == 0 { None } else { Some(idx - 1) }
    }

    pub fn bucket(&self, index: usize) -> Option<Bucket> {
        let (start, capacity) = *self.starts.get(index)?;
        let end = self
            .starts
            .get(index + 1)
            .map(|(d, _)| *d)
            .unwrap_or(Date::INFINITE_FUTURE);
        Some(Bucket {
            start,
            end,
            capacity,
        })
    }
}
