pub mod errors;
pub mod models;
pub mod providers;
pub mod services;
pub mod storage;

use chrono::{DateTime, Utc};
use models::{
    scenario::WhatIfScenario,
    series::TimeSeries,
    settings::Settings,
    sync::{DataKind, RefreshOutcome, SyncState},
    valuation::{ChartRange, Valuation, ValuationPoint},
};
use providers::{
    alphavantage::AlphaVantageProvider, frankfurter::FrankfurterProvider,
    traits::MarketDataSource,
};
use services::{
    fetchers::{CurrentFetch, HistoricalFetch, IntradayFetch},
    reactive::{spawn_derived, Dependencies},
    refresh::{LifecycleEvent, RefreshCoordinator},
    scenario_service::ScenarioStore,
    shares::ShareHolding,
    staleness::StalenessPolicy,
    sync_unit::{Refreshable, SyncUnit},
    valuation_graph::{ValuationGraph, ValuationInputs},
};
use std::sync::Arc;
use storage::{CacheStore, KeyValueStore};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use errors::CoreError;

/// Capacity of the lifecycle event queue handed out by `start`.
const EVENT_QUEUE: usize = 32;

/// Main entry point for the share valuation core library.
///
/// One engine per application session. It owns the six sync units, the
/// share count, the scenario store, the derived valuation graph and the
/// refresh coordinator, and exposes them as watch streams plus a handful of
/// commands. Must be built inside a tokio runtime.
#[must_use]
pub struct ValuationEngine {
    settings: Settings,
    current_price: Arc<SyncUnit<f64>>,
    current_rate: Arc<SyncUnit<f64>>,
    intraday_prices: Arc<SyncUnit<TimeSeries>>,
    intraday_rates: Arc<SyncUnit<TimeSeries>>,
    historical_prices: Arc<SyncUnit<TimeSeries>>,
    historical_rates: Arc<SyncUnit<TimeSeries>>,
    shares: ShareHolding,
    scenarios: ScenarioStore,
    graph: ValuationGraph,
    coordinator: Arc<RefreshCoordinator>,
    price: watch::Receiver<f64>,
    rate: watch::Receiver<f64>,
    usd: watch::Receiver<f64>,
    gbp: watch::Receiver<f64>,
    last_updated: watch::Receiver<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for ValuationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValuationEngine")
            .field("symbol", &self.settings.symbol)
            .field("shares", &self.shares.get())
            .field("scenarios", &self.scenarios.list().len())
            .field("price", &*self.price.borrow())
            .field("rate", &*self.rate.borrow())
            .finish()
    }
}

impl ValuationEngine {
    /// Wire an engine to explicit sources and a key/value store.
    pub fn new(
        settings: Settings,
        store: Arc<dyn KeyValueStore>,
        quotes: Arc<dyn MarketDataSource>,
        rates: Arc<dyn MarketDataSource>,
    ) -> Result<Self, CoreError> {
        settings.validate()?;
        let cache = CacheStore::new(store, settings.storage_namespace.clone());

        let live = StalenessPolicy::new(settings.live_refresh());
        let intraday = StalenessPolicy::with_latest_point_check(settings.live_refresh());
        let historical = StalenessPolicy::new(settings.historical_refresh());

        let current_price = Arc::new(SyncUnit::new(
            DataKind::CurrentPrice,
            live,
            Arc::new(CurrentFetch::new(Arc::clone(&quotes))),
            cache.clone(),
            settings.default_price,
        ));
        let current_rate = Arc::new(SyncUnit::new(
            DataKind::CurrentRate,
            live,
            Arc::new(CurrentFetch::new(Arc::clone(&rates))),
            cache.clone(),
            settings.default_rate,
        ));
        let intraday_prices = Arc::new(SyncUnit::new(
            DataKind::IntradayPrice,
            intraday,
            Arc::new(IntradayFetch::new(Arc::clone(&quotes))),
            cache.clone(),
            Vec::new(),
        ));
        let intraday_rates = Arc::new(SyncUnit::new(
            DataKind::IntradayRate,
            intraday,
            Arc::new(IntradayFetch::new(Arc::clone(&rates))),
            cache.clone(),
            Vec::new(),
        ));
        let historical_prices = Arc::new(Self::historical_unit(
            DataKind::HistoricalPrice,
            historical,
            quotes,
            &cache,
            &settings,
        ));
        let historical_rates = Arc::new(Self::historical_unit(
            DataKind::HistoricalRate,
            historical,
            rates,
            &cache,
            &settings,
        ));

        let shares = ShareHolding::new(cache.clone());
        let scenarios = ScenarioStore::new(cache);

        let graph = ValuationGraph::new(ValuationInputs {
            price: current_price.subscribe(),
            rate: current_rate.subscribe(),
            intraday_prices: intraday_prices.subscribe(),
            intraday_rates: intraday_rates.subscribe(),
            historical_prices: historical_prices.subscribe(),
            historical_rates: historical_rates.subscribe(),
            shares: shares.subscribe(),
            scenarios: scenarios.subscribe(),
        });

        let live_units: Vec<Arc<dyn Refreshable>> = vec![
            current_price.clone(),
            current_rate.clone(),
            intraday_prices.clone(),
            intraday_rates.clone(),
        ];
        let daily_units: Vec<Arc<dyn Refreshable>> =
            vec![historical_prices.clone(), historical_rates.clone()];
        let coordinator = Arc::new(RefreshCoordinator::new(
            live_units,
            daily_units,
            settings.live_refresh(),
            settings.historical_refresh(),
        ));

        let price = Self::value_of(current_price.subscribe());
        let rate = Self::value_of(current_rate.subscribe());
        let usd = Self::project(graph.current(), |v| v.usd_value);
        let gbp = Self::project(graph.current(), |v| v.gbp_value);
        let last_updated = {
            let (p, r) = (current_price.subscribe(), current_rate.subscribe());
            let deps = Dependencies::new().watch(p.clone()).watch(r.clone());
            spawn_derived(deps, move || p.borrow().last_updated.max(r.borrow().last_updated))
        };

        info!(symbol = %settings.symbol, namespace = %settings.storage_namespace, "Valuation engine ready");

        Ok(Self {
            settings,
            current_price,
            current_rate,
            intraday_prices,
            intraday_rates,
            historical_prices,
            historical_rates,
            shares,
            scenarios,
            graph,
            coordinator,
            price,
            rate,
            usd,
            gbp,
            last_updated,
        })
    }

    /// Engine backed by Alpha Vantage (quote) and Frankfurter (USD→GBP).
    pub fn with_default_providers(
        settings: Settings,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, CoreError> {
        let api_key = settings
            .api_key("alphavantage")
            .ok_or_else(|| CoreError::Config("missing api key for alphavantage".into()))?
            .to_string();
        let quotes = AlphaVantageProvider::new(api_key, settings.symbol.clone())
            .with_utc_offset_minutes(settings.exchange_utc_offset_minutes);
        Self::new(
            settings,
            store,
            Arc::new(quotes),
            Arc::new(FrankfurterProvider::new()),
        )
    }

    fn historical_unit(
        kind: DataKind,
        policy: StalenessPolicy,
        source: Arc<dyn MarketDataSource>,
        cache: &CacheStore,
        settings: &Settings,
    ) -> SyncUnit<TimeSeries> {
        let fetcher = HistoricalFetch::new(
            source,
            cache.clone(),
            kind,
            settings.history_window(),
            settings.revalidation(),
        );
        SyncUnit::new(kind, policy, Arc::new(fetcher), cache.clone(), Vec::new())
    }

    fn value_of(state: watch::Receiver<SyncState<f64>>) -> watch::Receiver<f64> {
        let source = state.clone();
        spawn_derived(Dependencies::new().watch(state), move || source.borrow().value)
    }

    fn project(
        valuation: watch::Receiver<Valuation>,
        field: fn(&Valuation) -> f64,
    ) -> watch::Receiver<f64> {
        let source = valuation.clone();
        spawn_derived(Dependencies::new().watch(valuation), move || {
            field(&source.borrow())
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ── Live streams ────────────────────────────────────────────────

    pub fn current_price(&self) -> watch::Receiver<f64> {
        self.price.clone()
    }

    pub fn current_rate(&self) -> watch::Receiver<f64> {
        self.rate.clone()
    }

    pub fn current_valuation(&self) -> watch::Receiver<Valuation> {
        self.graph.current()
    }

    pub fn current_usd(&self) -> watch::Receiver<f64> {
        self.usd.clone()
    }

    pub fn current_gbp(&self) -> watch::Receiver<f64> {
        self.gbp.clone()
    }

    pub fn is_online(&self) -> watch::Receiver<bool> {
        self.coordinator.is_online()
    }

    /// Most recent confirmation of either the price or the rate.
    pub fn last_updated(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_updated.clone()
    }

    // ── Chart streams ───────────────────────────────────────────────

    /// Today's valuation from the intraday series.
    pub fn daily_series(&self) -> watch::Receiver<Vec<ValuationPoint>> {
        self.graph.daily()
    }

    pub fn historical_series(&self) -> watch::Receiver<Vec<ValuationPoint>> {
        self.graph.historical()
    }

    pub fn historical_series_in(&self, range: ChartRange) -> watch::Receiver<Vec<ValuationPoint>> {
        self.graph.historical_in(range)
    }

    // ── Raw unit states ─────────────────────────────────────────────

    pub fn price_state(&self) -> watch::Receiver<SyncState<f64>> {
        self.current_price.subscribe()
    }

    pub fn rate_state(&self) -> watch::Receiver<SyncState<f64>> {
        self.current_rate.subscribe()
    }

    pub fn intraday_prices_state(&self) -> watch::Receiver<SyncState<TimeSeries>> {
        self.intraday_prices.subscribe()
    }

    pub fn intraday_rates_state(&self) -> watch::Receiver<SyncState<TimeSeries>> {
        self.intraday_rates.subscribe()
    }

    pub fn historical_prices_state(&self) -> watch::Receiver<SyncState<TimeSeries>> {
        self.historical_prices.subscribe()
    }

    pub fn historical_rates_state(&self) -> watch::Receiver<SyncState<TimeSeries>> {
        self.historical_rates.subscribe()
    }

    // ── Shares ──────────────────────────────────────────────────────

    pub fn shares(&self) -> u64 {
        self.shares.get()
    }

    pub fn shares_stream(&self) -> watch::Receiver<u64> {
        self.shares.subscribe()
    }

    pub fn set_shares(&self, shares: u64) {
        self.shares.set(shares);
    }

    pub fn clear_shares(&self) {
        self.shares.clear();
    }

    // ── Scenarios ───────────────────────────────────────────────────

    pub fn scenario_list(&self) -> watch::Receiver<Vec<WhatIfScenario>> {
        self.scenarios.subscribe()
    }

    /// Valuation of one scenario; `None` once it is deleted.
    pub fn scenario_valuation(&self, id: Uuid) -> watch::Receiver<Option<Valuation>> {
        self.graph.scenario(id)
    }

    pub fn add_scenario(&self) -> Result<WhatIfScenario, CoreError> {
        self.scenarios.add()
    }

    pub fn delete_scenario(&self, id: Uuid) -> Result<(), CoreError> {
        self.scenarios.delete(id)
    }

    pub fn update_scenario(&self, scenario: WhatIfScenario) -> Result<WhatIfScenario, CoreError> {
        self.scenarios.update(scenario)
    }

    pub fn reorder_scenarios(&self, ids: &[Uuid]) -> Result<(), CoreError> {
        self.scenarios.reorder(ids)
    }

    pub fn clear_scenarios(&self) {
        self.scenarios.clear();
    }

    // ── Refresh ─────────────────────────────────────────────────────

    /// Force every unit to call its source. Suppressed while offline.
    pub fn force_refresh_all(&self) -> Vec<JoinHandle<RefreshOutcome>> {
        self.coordinator.force_refresh_all()
    }

    /// Tell the engine whether the host is visible and focused right now.
    /// Call before `start` so the first lifecycle event is not taken for
    /// a resume.
    pub fn set_initial_visibility(&self, visible: bool, focused: bool) {
        self.coordinator.set_initial_visibility(visible, focused);
    }

    /// Spawn the refresh loop. The first timer ticks fire at once, so this
    /// also performs the initial load.
    pub fn start(&self) -> RefreshHandle {
        let (events, rx) = mpsc::channel(EVENT_QUEUE);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&self.coordinator).run(rx, cancel.clone()));
        RefreshHandle {
            events,
            cancel,
            task: Some(task),
        }
    }
}

/// Running refresh loop. Dropping the handle or calling `shutdown` stops
/// the loop, even while clones from `sender` are still alive.
#[derive(Debug)]
pub struct RefreshHandle {
    events: mpsc::Sender<LifecycleEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    pub async fn send(&self, event: LifecycleEvent) -> Result<(), CoreError> {
        self.events
            .send(event)
            .await
            .map_err(|_| CoreError::ValidationError("refresh loop has stopped".into()))
    }

    pub fn sender(&self) -> mpsc::Sender<LifecycleEvent> {
        self.events.clone()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
