use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::errors::CoreError;

/// Value of the holding in both currencies. Always recomputed, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub usd_value: f64,
    pub gbp_value: f64,
}

impl Valuation {
    /// `usd = price × shares`, `gbp = usd × rate`.
    pub fn compute(price: f64, rate: f64, shares: u64) -> Self {
        let usd_value = price * shares as f64;
        Self {
            usd_value,
            gbp_value: usd_value * rate,
        }
    }
}

/// A single data point for chart rendering.
///
/// The core generates these; the frontend just renders them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuationPoint {
    /// Timestamp of the price sample
    pub timestamp: DateTime<Utc>,

    /// Stock price at this point
    pub price: f64,

    /// Exchange rate sample nearest to `timestamp`
    pub rate: f64,

    pub usd_value: f64,
    pub gbp_value: f64,
}

/// Time windows offered on the historical chart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChartRange {
    OneWeek,
    OneMonth,
    SixMonths,
    OneYear,
    #[default]
    TwoYears,
}

impl ChartRange {
    /// Earliest instant included in the window ending at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            ChartRange::OneWeek => return now - Duration::days(7),
            ChartRange::OneMonth => 1,
            ChartRange::SixMonths => 6,
            ChartRange::OneYear => 12,
            ChartRange::TwoYears => 24,
        };
        now.checked_sub_months(Months::new(months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Keep the points at or after the cutoff.
    pub fn filter(&self, points: &[ValuationPoint], now: DateTime<Utc>) -> Vec<ValuationPoint> {
        let cutoff = self.cutoff(now);
        points
            .iter()
            .filter(|p| p.timestamp >= cutoff)
            .copied()
            .collect()
    }
}

impl Display for ChartRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChartRange::OneWeek => "1W",
            ChartRange::OneMonth => "1M",
            ChartRange::SixMonths => "6M",
            ChartRange::OneYear => "1Y",
            ChartRange::TwoYears => "2Y",
        })
    }
}

impl FromStr for ChartRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "1W" => Ok(ChartRange::OneWeek),
            "1M" => Ok(ChartRange::OneMonth),
            "6M" => Ok(ChartRange::SixMonths),
            "1Y" => Ok(ChartRange::OneYear),
            "2Y" => Ok(ChartRange::TwoYears),
            _ => Err(CoreError::ValidationError(format!("Invalid chart range: {s}"))),
        }
    }
}
