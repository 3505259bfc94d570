use std::fmt;
use std::iter::FusedIterator;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid range: end {end} is before start {start}")]
pub struct InvalidRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Number of calendar days in `[start, end]`, counting both endpoints.
pub fn days_between_inclusive(start: NaiveDate, end: NaiveDate) -> Result<i64, InvalidRange> {
    if end < start {
        return Err(InvalidRange { start, end });
    }
    Ok((end - start).num_days() + 1)
}

/// Inclusive overlap: the two ranges share at least one calendar day.
pub fn ranges_overlap(
    start_a: NaiveDate,
    end_a: NaiveDate,
    start_b: NaiveDate,
    end_b: NaiveDate,
) -> bool {
    start_a <= end_b && end_a >= start_b
}

/// Every day in `[start, end]`, ascending. Empty when `end < start`.
pub fn expand_to_days(start: NaiveDate, end: NaiveDate) -> Days {
    Days {
        next: (start <= end).then_some(start),
        end,
    }
}

/// Day-by-day iterator over an inclusive range. Cloning restarts from the
/// clone point.
#[derive(Debug, Clone)]
pub struct Days {
    next: Option<NaiveDate>,
    end: NaiveDate,
}

impl Iterator for Days {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let current = self.next?;
        self.next = if current < self.end {
            current.succ_opt()
        } else {
            None
        };
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .next
            .map_or(0, |n| ((self.end - n).num_days() + 1) as usize);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Days {}
impl FusedIterator for Days {}

/// Inclusive calendar range with `start <= end` guaranteed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange", into = "RawRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Serialize, Deserialize)]
struct RawRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawRange> for DateRange {
    type Error = InvalidRange;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl From<DateRange> for RawRange {
    fn from(range: DateRange) -> Self {
        RawRange {
            start: range.start,
            end: range.end,
        }
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidRange> {
        if end < start {
            return Err(InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        ranges_overlap(self.start, self.end, other.start, other.end)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn iter_days(&self) -> Days {
        expand_to_days(self.start, self.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
