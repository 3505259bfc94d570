//! Reservation totals and cancellation fees.
//!
//! All amounts are integer minor units. A reservation's total is fixed when
//! the reservation is written and never recomputed from later rate edits.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dates::DateRange;
use crate::model::Unit;

/// Cancelling at least this many days before the start date is free.
pub const FREE_CANCELLATION_DAYS: i64 = 7;

/// Amount in the smallest currency unit (cents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub const fn from_major(major: i64) -> Self {
        Money(major * 100)
    }

    pub const fn cents(&self) -> i64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_mul(self, factor: i64) -> Option<Money> {
        self.0.checked_mul(factor).map(Money)
    }

    /// Parse a non-negative decimal amount: `"80"`, `"80.5"`, `"80.50"`.
    pub fn parse_major(s: &str) -> Result<Self, MoneyParseError> {
        let s = s.trim();
        let bad = || MoneyParseError(s.to_string());
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let major: i64 = whole.parse().map_err(|_| bad())?;
        let minor: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| bad())? * 10,
            _ => frac.parse().map_err(|_| bad())?,
        };
        major
            .checked_mul(100)
            .and_then(|c| c.checked_add(minor))
            .map(Money)
            .ok_or_else(bad)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid amount: {0:?}")]
pub struct MoneyParseError(pub String);

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// `days * daily_rate + sum(extras)`. No discounts, no proration. Fails
/// instead of wrapping when the amount does not fit.
pub fn total_price(days: i64, daily_rate: Money, extras: &[Money]) -> Result<Money, PricingError> {
    let mut total = daily_rate.checked_mul(days).ok_or(PricingError::Overflow)?;
    for fee in extras {
        total = total.checked_add(*fee).ok_or(PricingError::Overflow)?;
    }
    Ok(total)
}

/// Full flat fee inside the free-cancellation window, nothing outside it.
pub fn cancellation_fee(unit_fee: Money, days_until_start: i64) -> Money {
    if days_until_start < FREE_CANCELLATION_DAYS {
        unit_fee
    } else {
        Money::ZERO
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("unit does not offer extra {0:?}")]
    UnknownExtra(String),
    #[error("amount overflows")]
    Overflow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub days: i64,
    pub daily_rate: Money,
    pub extras: Vec<(String, Money)>,
    pub extras_total: Money,
    pub total: Money,
}

/// Price a stay on `unit` at its current rate. Duplicate extra names are
/// charged once.
pub fn quote(unit: &Unit, range: &DateRange, selected: &[String]) -> Result<Quote, PricingError> {
    let mut extras: Vec<(String, Money)> = Vec::with_capacity(selected.len());
    for name in selected {
        if extras.iter().any(|(n, _)| n == name) {
            continue;
        }
        let extra = unit
            .extras
            .iter()
            .find(|e| &e.name == name)
            .ok_or_else(|| PricingError::UnknownExtra(name.clone()))?;
        extras.push((extra.name.clone(), extra.fee));
    }
    let fees: Vec<Money> = extras.iter().map(|(_, fee)| *fee).collect();
    let days = range.days();
    Ok(Quote {
        days,
        daily_rate: unit.daily_rate,
        extras_total: total_price(1, Money::ZERO, &fees)?,
        total: total_price(days, unit.daily_rate, &fees)?,
        extras,
    })
}
