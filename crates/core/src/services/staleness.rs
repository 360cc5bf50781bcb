use chrono::{DateTime, Utc};
use std::time::Duration;

/// Current price and rate.
pub const LIVE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Intraday series re-poll.
pub const INTRADAY_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Daily historical series.
pub const HISTORICAL_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);

/// Full re-fetch of the multi-year historical window.
pub const REVALIDATION_THRESHOLD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// True when nothing was ever fetched or the last fetch is older than `threshold`.
pub fn is_stale(last_updated: Option<DateTime<Utc>>, threshold: Duration) -> bool {
    is_stale_at(last_updated, threshold, Utc::now())
}

/// `is_stale` against an explicit clock. A `last_updated` in the future
/// counts as fresh.
pub fn is_stale_at(
    last_updated: Option<DateTime<Utc>>,
    threshold: Duration,
    now: DateTime<Utc>,
) -> bool {
    match last_updated {
        None => true,
        Some(last) => match (now - last).to_std() {
            Ok(age) => age > threshold,
            Err(_) => false,
        },
    }
}

/// Refresh gate of one sync unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    pub threshold: Duration,
    /// Also skip when the newest sample itself is younger than `threshold`
    /// (intraday series: the source has nothing newer to give yet).
    pub skip_if_latest_point_fresh: bool,
}

impl StalenessPolicy {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            skip_if_latest_point_fresh: false,
        }
    }

    pub fn with_latest_point_check(threshold: Duration) -> Self {
        Self {
            threshold,
            skip_if_latest_point_fresh: true,
        }
    }

    pub fn needs_refresh(
        &self,
        last_updated: Option<DateTime<Utc>>,
        latest_point: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.skip_if_latest_point_fresh
            && latest_point.is_some()
            && !is_stale_at(latest_point, self.threshold, now)
        {
            return false;
        }
        is_stale_at(last_updated, self.threshold, now)
    }
}
