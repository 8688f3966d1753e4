//! Week identity value types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// ISO week identity, serialized as `YYYY-WW`.
///
/// Ordering is by year, then week number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct WeekIdentifier {
    pub year: i32,
    pub week_number: u32,
}

impl WeekIdentifier {
    /// Build an identifier, rejecting weeks that do not exist in `year`.
    pub fn new(year: i32, week_number: u32) -> Option<Self> {
        NaiveDate::from_isoywd_opt(year, week_number, Weekday::Mon)?;
        Some(Self { year, week_number })
    }

    /// Monday that opens this week.
    pub fn monday(&self) -> NaiveDate {
        NaiveDate::from_isoywd_opt(self.year, self.week_number, Weekday::Mon)
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn plus_weeks(&self, weeks: i64) -> Self {
        crate::calendar::week_identifier_of_date(self.monday() + Duration::weeks(weeks))
    }

    pub fn succ(&self) -> Self {
        self.plus_weeks(1)
    }

    pub fn pred(&self) -> Self {
        self.plus_weeks(-1)
    }

    /// Whole weeks from `self` to `other` (negative if `other` is earlier).
    pub fn weeks_until(&self, other: &WeekIdentifier) -> i64 {
        (other.monday() - self.monday()).num_weeks()
    }
}

impl fmt::Display for WeekIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.week_number)
    }
}

impl FromStr for WeekIdentifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, week) = s
            .split_once('-')
            .ok_or_else(|| format!("Invalid week id '{}': expected YYYY-WW", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("Invalid year in week id '{}'", s))?;
        let week: u32 = week
            .parse()
            .map_err(|_| format!("Invalid week number in week id '{}'", s))?;
        WeekIdentifier::new(year, week)
            .ok_or_else(|| format!("Week {} does not exist in {}", week, year))
    }
}

impl From<WeekIdentifier> for String {
    fn from(id: WeekIdentifier) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for WeekIdentifier {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Monday 00:00:00 through Sunday 23:59:59 of one ISO week, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
