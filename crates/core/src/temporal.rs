//! Named time-range predicates for retrieval ("past_week", "yesterday", ...).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A named predicate restricting retrieval to a time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalFilter {
    Today,
    Yesterday,
    PastWeek,
    PastMonth,
    PastYear,
}

/// A resolved UTC range. `start` is inclusive, `end` exclusive; a missing
/// `end` means "up to now and beyond".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && self.end.is_none_or(|end| at < end)
    }
}

impl TemporalFilter {
    pub const ALL: [TemporalFilter; 5] = [
        Self::Today,
        Self::Yesterday,
        Self::PastWeek,
        Self::PastMonth,
        Self::PastYear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::PastWeek => "past_week",
            Self::PastMonth => "past_month",
            Self::PastYear => "past_year",
        }
    }

    /// Resolve the filter against a reference instant.
    pub fn range(&self, now: DateTime<Utc>) -> TimeRange {
        let midnight = start_of_day(now);
        match self {
            Self::Today => TimeRange {
                start: midnight,
                end: None,
            },
            Self::Yesterday => TimeRange {
                start: midnight - Duration::days(1),
                end: Some(midnight),
            },
            Self::PastWeek => TimeRange {
                start: now - Duration::days(7),
                end: None,
            },
            Self::PastMonth => TimeRange {
                start: now - Duration::days(30),
                end: None,
            },
            Self::PastYear => TimeRange {
                start: now - Duration::days(365),
                end: None,
            },
        }
    }

    /// Detect a temporal phrase in free text ("what did I write yesterday?").
    ///
    /// Longer phrases are checked first so "last week" never degrades to a
    /// weaker match.
    pub fn detect(text: &str) -> Option<Self> {
        const PHRASES: &[(&str, TemporalFilter)] = &[
            ("last 7 days", TemporalFilter::PastWeek),
            ("past week", TemporalFilter::PastWeek),
            ("last week", TemporalFilter::PastWeek),
            ("this week", TemporalFilter::PastWeek),
            ("last 30 days", TemporalFilter::PastMonth),
            ("past month", TemporalFilter::PastMonth),
            ("last month", TemporalFilter::PastMonth),
            ("this month", TemporalFilter::PastMonth),
            ("past year", TemporalFilter::PastYear),
            ("last year", TemporalFilter::PastYear),
            ("this year", TemporalFilter::PastYear),
            ("yesterday", TemporalFilter::Yesterday),
            ("today", TemporalFilter::Today),
        ];

        let lower = text.to_lowercase();
        PHRASES
            .iter()
            .find(|(phrase, _)| lower.contains(phrase))
            .map(|(_, filter)| *filter)
    }
}

fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    let date = at.date_naive();
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

impl fmt::Display for TemporalFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemporalFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown temporal filter '{s}'"))
    }
}
