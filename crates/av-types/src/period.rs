use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{AvError, DataError};

/// A calendar year-month. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, AvError> {
        if !(1..=12).contains(&month) {
            return Err(DataError::ParseError {
                message: format!("month {month} out of range 1..=12"),
            }
            .into());
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Period containing the given calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Build from the `YYYYMM` integer encoding used by the sample files.
    pub fn from_yyyymm(value: u32) -> Result<Self, AvError> {
        Self::new((value / 100) as i32, value % 100)
    }

    pub fn yyyymm(&self) -> u32 {
        (self.year as u32) * 100 + self.month
    }

    /// Months since year 0; used for period arithmetic.
    fn ordinal(&self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    fn from_ordinal(ordinal: i64) -> Self {
        Self {
            year: ordinal.div_euclid(12) as i32,
            month: ordinal.rem_euclid(12) as u32 + 1,
        }
    }

    /// The period `n` months earlier.
    pub fn decrement(&self, n: u32) -> Self {
        Self::from_ordinal(self.ordinal() - n as i64)
    }

    /// The period `n` months later.
    pub fn increment(&self, n: u32) -> Self {
        Self::from_ordinal(self.ordinal() + n as i64)
    }

    /// Number of months from `self` to `other` (negative when `other` is earlier).
    pub fn months_until(&self, other: &Period) -> i64 {
        other.ordinal() - self.ordinal()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = AvError;

    /// Accepts `YYYYMM`, `YYYY-MM`, or a full `YYYY-MM-DD` date.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || -> AvError {
            DataError::ParseError {
                message: format!("invalid period {s:?}, expected YYYYMM or YYYY-MM"),
            }
            .into()
        };

        if s.len() == 6 && s.chars().all(|c| c.is_ascii_digit()) {
            let value: u32 = s.parse().map_err(|_| invalid())?;
            return Self::from_yyyymm(value);
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Self::from_date(date));
        }
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for Period {
    type Error = AvError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}
