//! ISO-8601 durations used as billing cadences.

use crate::models::Period;
use chrono::{DateTime, Months, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SECONDS_PER_DAY: i64 = 86_400;
// 365.2425 days / 12
const APPROX_SECONDS_PER_MONTH: i64 = 2_629_746;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ISO-8601 duration '{0}'")]
pub struct CadenceParseError(pub String);

/// Calendar-aware recurrence interval (`P1M`, `P1Y`, `P2W`, `PT1H`, ...).
///
/// Components are signed; a leading `-` in the textual form negates all of
/// them. Arithmetic is always done from an anchor (`anchor + n * cadence`),
/// so month-end clamping never accumulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cadence {
    pub years: i32,
    pub months: i32,
    pub weeks: i32,
    pub days: i32,
    pub hours: i32,
    pub minutes: i32,
    pub seconds: i32,
}

impl Cadence {
    pub const ZERO: Cadence = Cadence {
        years: 0,
        months: 0,
        weeks: 0,
        days: 0,
        hours: 0,
        minutes: 0,
        seconds: 0,
    };

    pub fn years(years: i32) -> Self {
        Self { years, ..Self::ZERO }
    }

    pub fn months(months: i32) -> Self {
        Self { months, ..Self::ZERO }
    }

    pub fn weeks(weeks: i32) -> Self {
        Self { weeks, ..Self::ZERO }
    }

    pub fn days(days: i32) -> Self {
        Self { days, ..Self::ZERO }
    }

    pub fn hours(hours: i32) -> Self {
        Self { hours, ..Self::ZERO }
    }

    fn total_months(&self) -> i64 {
        i64::from(self.years) * 12 + i64::from(self.months)
    }

    fn total_days(&self) -> i64 {
        i64::from(self.weeks) * 7 + i64::from(self.days)
    }

    fn total_seconds(&self) -> i64 {
        i64::from(self.hours) * 3_600 + i64::from(self.minutes) * 60 + i64::from(self.seconds)
    }

    fn approx_seconds(&self) -> i64 {
        self.total_months() * APPROX_SECONDS_PER_MONTH
            + self.total_days() * SECONDS_PER_DAY
            + self.total_seconds()
    }

    /// `ts + times * self`, or `None` on overflow.
    pub fn add_to(&self, ts: DateTime<Utc>, times: i64) -> Option<DateTime<Utc>> {
        let months = self.total_months().checked_mul(times)?;
        let shifted = if months >= 0 {
            ts.checked_add_months(Months::new(u32::try_from(months).ok()?))?
        } else {
            ts.checked_sub_months(Months::new(u32::try_from(-months).ok()?))?
        };

        let days = self.total_days().checked_mul(times)?;
        let shifted = shifted.checked_add_signed(TimeDelta::try_days(days)?)?;

        let seconds = self.total_seconds().checked_mul(times)?;
        shifted.checked_add_signed(TimeDelta::try_seconds(seconds)?)
    }

    /// Whether adding this cadence moves time forward.
    pub fn is_positive(&self) -> bool {
        let reference = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single();
        match reference {
            Some(reference) => self
                .add_to(reference, 1)
                .map_or(false, |next| next > reference),
            None => false,
        }
    }

    /// The cycle `[anchor + k*self, anchor + (k+1)*self)` that contains `at`.
    ///
    /// Returns `None` for non-positive cadences, which have no cycles.
    pub fn aligned_period(&self, anchor: DateTime<Utc>, at: DateTime<Utc>) -> Option<Period> {
        if !self.is_positive() {
            return None;
        }

        let approx = self.approx_seconds().max(1);
        let mut n = (at - anchor).num_seconds().div_euclid(approx);

        while self.add_to(anchor, n)? > at {
            n -= 1;
        }
        while self.add_to(anchor, n + 1)? <= at {
            n += 1;
        }

        Some(Period::new(
            self.add_to(anchor, n)?,
            self.add_to(anchor, n + 1)?,
        ))
    }
}

impl FromStr for Cadence {
    type Err = CadenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CadenceParseError(s.to_string());

        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let rest = rest.strip_prefix('P').ok_or_else(invalid)?;

        let mut cadence = Cadence::ZERO;
        let mut in_time = false;
        let mut seen_component = false;
        let mut digits = String::new();

        for c in rest.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }

            if c == 'T' {
                if in_time || !digits.is_empty() {
                    return Err(invalid());
                }
                in_time = true;
                continue;
            }

            let value: i32 = digits.parse().map_err(|_| invalid())?;
            digits.clear();
            seen_component = true;

            let slot = match (in_time, c) {
                (false, 'Y') => &mut cadence.years,
                (false, 'M') => &mut cadence.months,
                (false, 'W') => &mut cadence.weeks,
                (false, 'D') => &mut cadence.days,
                (true, 'H') => &mut cadence.hours,
                (true, 'M') => &mut cadence.minutes,
                (true, 'S') => &mut cadence.seconds,
                _ => return Err(invalid()),
            };
            *slot = if negative { -value } else { value };
        }

        if !digits.is_empty() || !seen_component {
            return Err(invalid());
        }

        Ok(cadence)
    }
}

impl TryFrom<String> for Cadence {
    type Error = CadenceParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cadence> for String {
    fn from(value: Cadence) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [
            self.years,
            self.months,
            self.weeks,
            self.days,
            self.hours,
            self.minutes,
            self.seconds,
        ];
        if parts.iter().all(|p| *p == 0) {
            return write!(f, "PT0S");
        }

        let negative = parts.iter().all(|p| *p <= 0);
        if negative {
            write!(f, "-")?;
        }
        let abs = |v: i32| if negative { v.abs() } else { v };

        write!(f, "P")?;
        for (value, unit) in [
            (self.years, 'Y'),
            (self.months, 'M'),
            (self.weeks, 'W'),
            (self.days, 'D'),
        ] {
            if value != 0 {
                write!(f, "{}{}", abs(value), unit)?;
            }
        }
        if self.hours != 0 || self.minutes != 0 || self.seconds != 0 {
            write!(f, "T")?;
            for (value, unit) in [(self.hours, 'H'), (self.minutes, 'M'), (self.seconds, 'S')] {
                if value != 0 {
                    write!(f, "{}{}", abs(value), unit)?;
                }
            }
        }
        Ok(())
    }
}
