use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::CoreError;
use crate::models::series::{latest_timestamp, Granularity, TimeSeries};
use crate::models::sync::{DataKind, RefreshOutcome, SyncState, SyncStatus};
use crate::services::merge::merge_series;
use crate::services::staleness::StalenessPolicy;
use crate::storage::{CacheKey, CacheStore};

/// Value kinds a sync unit can hold: a scalar quote or a time series.
pub trait SyncValue:
    Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Strip malformed parts of a payload. `Err` when nothing usable is left.
    fn sanitize(self) -> Result<Self, String>;

    /// Fold a sanitized payload into the current value.
    fn absorb(&self, incoming: Self, granularity: Option<Granularity>) -> Self;

    /// Timestamp of the newest sample, for series.
    fn latest_point(&self) -> Option<DateTime<Utc>>;
}

impl SyncValue for f64 {
    fn sanitize(self) -> Result<Self, String> {
        if self.is_finite() && self >= 0.0 {
            Ok(self)
        } else {
            Err(format!("expected a finite non-negative number, got {self}"))
        }
    }

    fn absorb(&self, incoming: Self, _granularity: Option<Granularity>) -> Self {
        incoming
    }

    fn latest_point(&self) -> Option<DateTime<Utc>> {
        None
    }
}

impl SyncValue for TimeSeries {
    fn sanitize(self) -> Result<Self, String> {
        let total = self.len();
        let kept: TimeSeries = self.into_iter().filter(|p| p.is_well_formed()).collect();
        if kept.len() < total {
            debug!(dropped = total - kept.len(), "Dropped malformed points");
        }
        Ok(kept)
    }

    fn absorb(&self, incoming: Self, granularity: Option<Granularity>) -> Self {
        merge_series(self, &incoming, granularity.unwrap_or(Granularity::Day))
    }

    fn latest_point(&self) -> Option<DateTime<Utc>> {
        latest_timestamp(self)
    }
}

/// How a unit reaches its remote source.
#[async_trait]
pub trait Fetch<V>: Send + Sync {
    fn source_name(&self) -> &str;

    /// Fetch a batch, given the value currently held.
    async fn fetch(&self, current: &V, now: DateTime<Utc>) -> Result<V, CoreError>;

    /// Trim a freshly merged value to the retention window.
    fn retain(&self, value: V, _now: DateTime<Utc>) -> V {
        value
    }
}

/// Anything the refresh coordinator can poke.
#[async_trait]
pub trait Refreshable: Send + Sync {
    fn kind(&self) -> DataKind;

    async fn refresh(&self, force: bool) -> RefreshOutcome;
}

/// Spawn `unit.refresh(force)` and return at once.
pub fn request_refresh(unit: &Arc<dyn Refreshable>, force: bool) -> JoinHandle<RefreshOutcome> {
    let unit = Arc::clone(unit);
    tokio::spawn(async move { unit.refresh(force).await })
}

/// Owner of one data stream: keeps the last known value, decides when to
/// call the source and publishes every terminal transition on a watch channel.
pub struct SyncUnit<V: SyncValue> {
    kind: DataKind,
    policy: StalenessPolicy,
    fetcher: Arc<dyn Fetch<V>>,
    cache: CacheStore,
    default_value: V,
    state: watch::Sender<SyncState<V>>,
}

impl<V: SyncValue> SyncUnit<V> {
    /// Build a unit, seeding its state from the cache when a record exists.
    pub fn new(
        kind: DataKind,
        policy: StalenessPolicy,
        fetcher: Arc<dyn Fetch<V>>,
        cache: CacheStore,
        default_value: V,
    ) -> Self {
        let initial = match Self::load_cached(&cache, kind) {
            Some((value, last_updated)) => {
                debug!(%kind, ?last_updated, "Cold start from cache");
                SyncState::new(value, last_updated)
            }
            None => {
                debug!(%kind, "Cold start without cache");
                SyncState::new(default_value.clone(), None)
            }
        };
        let (state, _) = watch::channel(initial);

        Self {
            kind,
            policy,
            fetcher,
            cache,
            default_value,
            state,
        }
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState<V>> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SyncState<V> {
        self.state.borrow().clone()
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.borrow();
        self.policy
            .needs_refresh(state.last_updated, state.value.latest_point(), now)
    }

    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn refresh(&self, force: bool) -> RefreshOutcome {
        self.refresh_at(force, Utc::now()).await
    }

    /// `refresh` against an explicit clock.
    pub async fn refresh_at(&self, force: bool, now: DateTime<Utc>) -> RefreshOutcome {
        if !force && !self.needs_refresh(now) {
            debug!(kind = %self.kind, "Data fresh, skipping refresh");
            return RefreshOutcome::Skipped;
        }

        // Loading is internal bookkeeping; subscribers only see terminal states.
        self.state.send_if_modified(|s| {
            s.loading = true;
            s.status = SyncStatus::Fetching;
            false
        });

        let current = self.state.borrow().value.clone();
        let fetched = self
            .fetcher
            .fetch(&current, now)
            .await
            .and_then(|payload| {
                payload.sanitize().map_err(|message| CoreError::InvalidPayload {
                    source_name: self.fetcher.source_name().to_string(),
                    message,
                })
            });

        match fetched {
            Ok(incoming) => self.apply_update(incoming, now),
            Err(e) => self.fall_back(&e),
        }
    }

    fn apply_update(&self, incoming: V, now: DateTime<Utc>) -> RefreshOutcome {
        let granularity = self.kind.granularity();
        let mut updated = None;
        // Merge into whatever is current now, so overlapping calls do not
        // drop each other's points.
        self.state.send_modify(|s| {
            let value = self
                .fetcher
                .retain(s.value.absorb(incoming, granularity), now);
            s.value = value.clone();
            s.last_updated = Some(now);
            s.loading = false;
            s.status = SyncStatus::Updated;
            updated = Some(value);
        });

        if let Some(value) = updated {
            self.cache.set(CacheKey::Data(self.kind), &value);
            self.cache
                .set(CacheKey::LastUpdated(self.kind), &now.timestamp_millis());
        }
        info!(kind = %self.kind, source = self.fetcher.source_name(), "Updated from remote source");
        RefreshOutcome::Updated
    }

    /// Pick the newest value still around after a failed fetch: the stored
    /// record, the in-memory value (when the store rejected the last write),
    /// or the default.
    fn fall_back(&self, cause: &CoreError) -> RefreshOutcome {
        let stored = Self::load_cached(&self.cache, self.kind);
        let held = {
            let s = self.state.borrow();
            s.last_updated.map(|at| (s.value.clone(), at))
        };

        let (value, last_updated, outcome) = match (stored, held) {
            (Some((_, stored_at)), Some((value, at))) if stored_at.map_or(true, |t| at.timestamp_millis() > t.timestamp_millis()) => {
                warn!(kind = %self.kind, error = %cause, "Fetch failed and stored record is older, keeping in-memory value");
                (value, Some(at), RefreshOutcome::FellBackToCache)
            }
            (Some((value, last_updated)), _) => {
                warn!(kind = %self.kind, error = %cause, "Fetch failed, using cached value");
                (value, last_updated, RefreshOutcome::FellBackToCache)
            }
            (None, Some((value, at))) => {
                warn!(kind = %self.kind, error = %cause, "Fetch failed and no stored record, keeping in-memory value");
                (value, Some(at), RefreshOutcome::FellBackToCache)
            }
            (None, None) => {
                error!(kind = %self.kind, error = %cause, "Fetch failed with nothing cached, using default");
                (self.default_value.clone(), None, RefreshOutcome::FellBackToDefault)
            }
        };

        let status = outcome.status().unwrap_or(SyncStatus::Idle);
        self.state.send_modify(|s| {
            s.value = value;
            s.last_updated = last_updated;
            s.loading = false;
            s.status = status;
        });
        outcome
    }

    fn load_cached(cache: &CacheStore, kind: DataKind) -> Option<(V, Option<DateTime<Utc>>)> {
        let value = cache.get::<V>(CacheKey::Data(kind))?.sanitize().ok()?;
        let last_updated = cache
            .get::<i64>(CacheKey::LastUpdated(kind))
            .and_then(DateTime::from_timestamp_millis);
        Some((value, last_updated))
    }
}

impl<V: SyncValue> SyncUnit<V> {
    /// Fire-and-forget form of `refresh`.
    pub fn request_refresh(self: &Arc<Self>, force: bool) -> JoinHandle<RefreshOutcome> {
        let unit = Arc::clone(self);
        tokio::spawn(async move { SyncUnit::refresh(&unit, force).await })
    }
}

#[async_trait]
impl<V: SyncValue> Refreshable for SyncUnit<V> {
    fn kind(&self) -> DataKind {
        self.kind
    }

    async fn refresh(&self, force: bool) -> RefreshOutcome {
        SyncUnit::refresh(self, force).await
    }
}
