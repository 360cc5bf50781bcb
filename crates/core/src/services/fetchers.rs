use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::errors::CoreError;
use crate::models::series::{latest_timestamp, TimeSeries};
use crate::models::sync::DataKind;
use crate::providers::traits::MarketDataSource;
use crate::services::merge::retain_since;
use crate::services::staleness::is_stale_at;
use crate::storage::{CacheKey, CacheStore};

use super::sync_unit::Fetch;

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

// ── Current value ───────────────────────────────────────────────────

pub struct CurrentFetch {
    source: Arc<dyn MarketDataSource>,
}

impl CurrentFetch {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Fetch<f64> for CurrentFetch {
    fn source_name(&self) -> &str {
        self.source.name()
    }

    async fn fetch(&self, _current: &f64, _now: DateTime<Utc>) -> Result<f64, CoreError> {
        self.source.get_current().await
    }
}

// ── Intraday series ─────────────────────────────────────────────────

/// Polls today's samples. Asks only for what is newer than the last held
/// point and keeps nothing from previous days.
pub struct IntradayFetch {
    source: Arc<dyn MarketDataSource>,
}

impl IntradayFetch {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Fetch<TimeSeries> for IntradayFetch {
    fn source_name(&self) -> &str {
        self.source.name()
    }

    async fn fetch(&self, current: &TimeSeries, now: DateTime<Utc>) -> Result<TimeSeries, CoreError> {
        let day_start = start_of_day(now);
        let since = latest_timestamp(current)
            .filter(|latest| *latest >= day_start)
            .unwrap_or(day_start);
        debug!(source = self.source.name(), %since, "Fetching intraday series");
        self.source.get_intraday(since).await
    }

    fn retain(&self, value: TimeSeries, now: DateTime<Utc>) -> TimeSeries {
        retain_since(value, start_of_day(now))
    }
}

// ── Historical series ───────────────────────────────────────────────

/// Daily history over a rolling window. A full-window fetch runs when the
/// last one is older than `revalidation` (or never happened); otherwise only
/// the days since the newest held point are requested.
pub struct HistoricalFetch {
    source: Arc<dyn MarketDataSource>,
    cache: CacheStore,
    kind: DataKind,
    window: Duration,
    revalidation: std::time::Duration,
    last_validated: Mutex<Option<DateTime<Utc>>>,
}

impl HistoricalFetch {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        cache: CacheStore,
        kind: DataKind,
        window: Duration,
        revalidation: std::time::Duration,
    ) -> Self {
        let last_validated = cache
            .get::<i64>(CacheKey::LastValidated(kind))
            .and_then(DateTime::from_timestamp_millis);
        Self {
            source,
            cache,
            kind,
            window,
            revalidation,
            last_validated: Mutex::new(last_validated),
        }
    }

    pub fn last_validated(&self) -> Option<DateTime<Utc>> {
        self.last_validated.lock().ok().and_then(|guard| *guard)
    }

    fn mark_validated(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.last_validated.lock() {
            *guard = Some(now);
        }
        self.cache
            .set(CacheKey::LastValidated(self.kind), &now.timestamp_millis());
    }
}

#[async_trait]
impl Fetch<TimeSeries> for HistoricalFetch {
    fn source_name(&self) -> &str {
        self.source.name()
    }

    async fn fetch(&self, current: &TimeSeries, now: DateTime<Utc>) -> Result<TimeSeries, CoreError> {
        let today = now.date_naive();
        let full = current.is_empty() || is_stale_at(self.last_validated(), self.revalidation, now);

        let from = match latest_timestamp(current) {
            Some(latest) if !full => latest.date_naive(),
            _ => (now - self.window).date_naive(),
        };
        debug!(kind = %self.kind, %from, %today, full, "Fetching historical series");

        let series = self.source.get_historical(from, today).await?;
        if full {
            self.mark_validated(now);
        }
        Ok(series)
    }

    fn retain(&self, value: TimeSeries, now: DateTime<Utc>) -> TimeSeries {
        retain_since(value, start_of_day(now - self.window))
    }
}
