use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Milliunits per minor currency unit on the budgeting API's wire format.
pub const MILLIUNITS_PER_CENT: i64 = 10;

/// An exact currency amount held in minor units (cents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub const fn to_cents(self) -> i64 {
        self.0
    }

    /// Budgeting API milliunits (1.00 == 1000).
    pub const fn to_milliunits(self) -> i64 {
        self.0 * MILLIUNITS_PER_CENT
    }

    /// Accepts only values that are exact to the minor unit; `12.345` is rejected
    /// rather than rounded.
    pub fn from_decimal(decimal: Decimal) -> Option<Self> {
        let cents = decimal * Decimal::ONE_HUNDRED;
        if !cents.fract().is_zero() {
            return None;
        }
        cents.to_i64().map(Money)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Parses a receipt amount token such as `$1,234.56`, `-0.99` or `29.99`.
    pub fn parse(token: &str) -> Option<Self> {
        let clean: String = token
            .trim()
            .chars()
            .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
            .collect();
        if clean.is_empty() {
            return None;
        }
        Decimal::from_str(&clean).ok().and_then(Money::from_decimal)
    }

    pub const fn zero() -> Self {
        Money(0)
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn abs(self) -> Self {
        Money(self.0.abs())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Money(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |a, b| a + b)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}
