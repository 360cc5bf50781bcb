use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single sample of a price or exchange-rate feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    /// Sample instant, persisted as epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl TimePoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// A point stamped at 00:00 UTC of `date` (daily series).
    pub fn on_date(date: NaiveDate, value: f64) -> Self {
        Self {
            timestamp: date.and_time(chrono::NaiveTime::MIN).and_utc(),
            value,
        }
    }

    /// Finite value and a non-negative timestamp.
    pub fn is_well_formed(&self) -> bool {
        self.value.is_finite() && self.timestamp.timestamp_millis() >= 0
    }
}

/// Ordered sequence of samples, ascending by timestamp.
pub type TimeSeries = Vec<TimePoint>;

/// Resolution of the date key used to detect duplicate samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    /// One sample per UTC calendar day (historical series).
    Day,
    /// One sample per minute (intraday series).
    Minute,
}

impl Granularity {
    /// Truncate a timestamp to this granularity.
    pub fn date_key(&self, timestamp: &DateTime<Utc>) -> i64 {
        let secs = timestamp.timestamp();
        match self {
            Granularity::Day => secs.div_euclid(86_400),
            Granularity::Minute => secs.div_euclid(60),
        }
    }
}

/// Newest timestamp in a series, regardless of ordering.
pub fn latest_timestamp(series: &[TimePoint]) -> Option<DateTime<Utc>> {
    series.iter().map(|p| p.timestamp).max()
}
