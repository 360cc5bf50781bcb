use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::series::Granularity;

/// The six data streams the engine keeps in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    CurrentPrice,
    CurrentRate,
    IntradayPrice,
    IntradayRate,
    HistoricalPrice,
    HistoricalRate,
}

impl DataKind {
    pub const ALL: [DataKind; 6] = [
        DataKind::CurrentPrice,
        DataKind::CurrentRate,
        DataKind::IntradayPrice,
        DataKind::IntradayRate,
        DataKind::HistoricalPrice,
        DataKind::HistoricalRate,
    ];

    /// Stable slug used in cache keys and log fields.
    pub fn slug(&self) -> &'static str {
        match self {
            DataKind::CurrentPrice => "current-price",
            DataKind::CurrentRate => "current-rate",
            DataKind::IntradayPrice => "intraday-prices",
            DataKind::IntradayRate => "intraday-rates",
            DataKind::HistoricalPrice => "historical-prices",
            DataKind::HistoricalRate => "historical-rates",
        }
    }

    /// Date-key granularity for series kinds; `None` for scalars.
    pub fn granularity(&self) -> Option<Granularity> {
        match self {
            DataKind::CurrentPrice | DataKind::CurrentRate => None,
            DataKind::IntradayPrice | DataKind::IntradayRate => Some(Granularity::Minute),
            DataKind::HistoricalPrice | DataKind::HistoricalRate => Some(Granularity::Day),
        }
    }

    pub fn is_historical(&self) -> bool {
        matches!(self, DataKind::HistoricalPrice | DataKind::HistoricalRate)
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// Position of a sync unit in its `Idle → Fetching → terminal` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Idle,
    Fetching,
    Updated,
    FellBackToCache,
    FellBackToDefault,
}

/// Result of one `refresh` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Data was fresh and the call was not forced; nothing happened.
    Skipped,
    Updated,
    FellBackToCache,
    FellBackToDefault,
}

impl RefreshOutcome {
    pub fn status(&self) -> Option<SyncStatus> {
        match self {
            RefreshOutcome::Skipped => None,
            RefreshOutcome::Updated => Some(SyncStatus::Updated),
            RefreshOutcome::FellBackToCache => Some(SyncStatus::FellBackToCache),
            RefreshOutcome::FellBackToDefault => Some(SyncStatus::FellBackToDefault),
        }
    }
}

/// Last known value of one data stream, as published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState<V> {
    pub value: V,
    /// When the value was last confirmed by the remote source.
    /// `None` on a cold start without cache.
    pub last_updated: Option<DateTime<Utc>>,
    pub loading: bool,
    pub status: SyncStatus,
}

impl<V> SyncState<V> {
    pub fn new(value: V, last_updated: Option<DateTime<Utc>>) -> Self {
        Self {
            value,
            last_updated,
            loading: false,
            status: SyncStatus::Idle,
        }
    }
}
