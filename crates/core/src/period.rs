//! Calendar-aligned period windows.
//!
//! Quotas are measured against fixed UTC buckets, not sliding windows: a daily
//! window runs from 00:00 UTC to the next 00:00 UTC, a monthly window from the
//! first of the month to the first of the next month.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::{Date, Month, OffsetDateTime, UtcOffset};

/// Granularity of a quota period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Daily,
    Monthly,
}

impl PeriodKind {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "daily" => Ok(Self::Daily),
            "monthly" => Ok(Self::Monthly),
            _ => Err(crate::Error::UnknownPeriod(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A half-open `[start, end)` UTC window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeriodWindow {
    pub kind: PeriodKind,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl PeriodWindow {
    /// The window of `kind` that contains `at`.
    pub fn containing(kind: PeriodKind, at: OffsetDateTime) -> crate::Result<Self> {
        let date = at.to_offset(UtcOffset::UTC).date();
        let (start, end) = match kind {
            PeriodKind::Daily => {
                let next = date.next_day().ok_or_else(|| {
                    crate::Error::InvalidPeriod(format!("no day after {date}"))
                })?;
                (date, next)
            }
            PeriodKind::Monthly => {
                let first = month_start(date.year(), date.month())?;
                let next = if date.month() == Month::December {
                    month_start(date.year() + 1, Month::January)?
                } else {
                    month_start(date.year(), date.month().next())?
                };
                (first, next)
            }
        };

        Ok(Self {
            kind,
            start: start.midnight().assume_utc(),
            end: end.midnight().assume_utc(),
        })
    }

    /// Daily window containing `at`.
    pub fn daily(at: OffsetDateTime) -> crate::Result<Self> {
        Self::containing(PeriodKind::Daily, at)
    }

    /// Monthly window containing `at`.
    pub fn monthly(at: OffsetDateTime) -> crate::Result<Self> {
        Self::containing(PeriodKind::Monthly, at)
    }

    /// When counters for this window stop applying.
    pub fn resets_at(&self) -> OffsetDateTime {
        self.end
    }
}

fn month_start(year: i32, month: Month) -> crate::Result<Date> {
    Date::from_calendar_date(year, month, 1).map_err(|e| crate::Error::InvalidPeriod(e.to_string()))
}
