// ═══════════════════════════════════════════════════════════════════
// Integration Tests — ValuationEngine wired to in-memory storage and
// scripted market data sources
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use share_valuation_core::errors::CoreError;
use share_valuation_core::models::series::{TimePoint, TimeSeries};
use share_valuation_core::models::settings::Settings;
use share_valuation_core::models::sync::{DataKind, SyncStatus};
use share_valuation_core::models::valuation::{ChartRange, Valuation};
use share_valuation_core::providers::MarketDataSource;
use share_valuation_core::services::refresh::LifecycleEvent;
use share_valuation_core::storage::{CacheKey, CacheStore, KeyValueStore, MemoryStore};
use share_valuation_core::ValuationEngine;

// ═══════════════════════════════════════════════════════════════════
// Mock market data source
// ═══════════════════════════════════════════════════════════════════

struct MockSource {
    current: f64,
    series: Mutex<TimeSeries>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl MockSource {
    fn new(current: f64) -> Arc<Self> {
        Self::with_series(current, Vec::new())
    }

    fn with_series(current: f64, series: TimeSeries) -> Arc<Self> {
        Arc::new(Self {
            current,
            series: Mutex::new(series),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        let source = Self::new(0.0);
        source.fail.store(true, Ordering::SeqCst);
        source
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer<T>(&self, value: T) -> Result<T, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(CoreError::Network("connection refused".into()))
        } else {
            Ok(value)
        }
    }
}

#[async_trait]
impl MarketDataSource for MockSource {
    fn name(&self) -> &str {
        "MockSource"
    }

    async fn get_current(&self) -> Result<f64, CoreError> {
        self.answer(self.current)
    }

    async fn get_intraday(&self, since: DateTime<Utc>) -> Result<TimeSeries, CoreError> {
        let points = self
            .series
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.timestamp >= since)
            .copied()
            .collect();
        self.answer(points)
    }

    async fn get_historical(&self, from: NaiveDate, to: NaiveDate) -> Result<TimeSeries, CoreError> {
        let points = self
            .series
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.timestamp.date_naive() >= from && p.timestamp.date_naive() <= to)
            .copied()
            .collect();
        self.answer(points)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn engine_with(
    store: Arc<MemoryStore>,
    quotes: Arc<MockSource>,
    rates: Arc<MockSource>,
) -> ValuationEngine {
    ValuationEngine::new(Settings::default(), store, quotes, rates).unwrap()
}

fn cache(store: &Arc<MemoryStore>) -> CacheStore {
    CacheStore::new(store.clone(), "share-valuation")
}

/// Wait (bounded) until the stream's value satisfies `pred`.
async fn settled<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl FnMut(&T) -> bool) -> T {
    tokio::time::timeout(std::time::Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("stream did not settle in time")
        .expect("stream closed")
        .clone()
}

async fn force_all(engine: &ValuationEngine) {
    for handle in engine.force_refresh_all() {
        handle.await.unwrap();
    }
}

fn days_ago(n: u64) -> NaiveDate {
    Utc::now().date_naive() - chrono::Days::new(n)
}

// ═══════════════════════════════════════════════════════════════════
// End-to-end scenarios
// ═══════════════════════════════════════════════════════════════════

#[test_log::test(tokio::test)]
async fn live_valuation_from_price_rate_and_shares() {
    let engine = engine_with(
        Arc::new(MemoryStore::new()),
        MockSource::new(250.0),
        MockSource::new(0.80),
    );
    engine.set_shares(10);
    force_all(&engine).await;

    let valuation = settled(&mut engine.current_valuation(), |v| v.usd_value == 2500.0).await;
    assert!((valuation.gbp_value - 2000.0).abs() < 1e-9);
    assert_eq!(settled(&mut engine.current_usd(), |v| *v == 2500.0).await, 2500.0);
    let gbp = settled(&mut engine.current_gbp(), |v| (*v - 2000.0).abs() < 1e-9).await;
    assert!((gbp - 2000.0).abs() < 1e-9);
}

#[test_log::test(tokio::test)]
async fn historical_refresh_merges_by_day() {
    let store = Arc::new(MemoryStore::new());
    let (d1, d2, d3) = (days_ago(2), days_ago(1), days_ago(0));
    cache(&store).set(
        CacheKey::Data(DataKind::HistoricalPrice),
        &vec![TimePoint::on_date(d1, 100.0), TimePoint::on_date(d2, 110.0)],
    );

    let quotes = MockSource::with_series(
        250.0,
        vec![TimePoint::on_date(d2, 111.0), TimePoint::on_date(d3, 120.0)],
    );
    let engine = engine_with(store.clone(), quotes, MockSource::new(0.8));
    force_all(&engine).await;

    let state = engine.historical_prices_state().borrow().clone();
    assert_eq!(
        state.value,
        vec![
            TimePoint::on_date(d1, 100.0),
            TimePoint::on_date(d2, 111.0),
            TimePoint::on_date(d3, 120.0),
        ]
    );
    assert_eq!(state.status, SyncStatus::Updated);

    let persisted: Option<TimeSeries> = cache(&store).get(CacheKey::Data(DataKind::HistoricalPrice));
    assert_eq!(persisted, Some(state.value));
}

/// Log sink shared between a test and its scoped subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// Current-thread runtime, so the spawned refreshes see the scoped subscriber.
#[tokio::test]
async fn failed_quote_falls_back_to_cached_price() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let store = Arc::new(MemoryStore::new());
    let cached_at = Utc::now() - Duration::hours(2);
    let c = cache(&store);
    c.set(CacheKey::Data(DataKind::CurrentPrice), &240.0);
    c.set(CacheKey::LastUpdated(DataKind::CurrentPrice), &cached_at.timestamp_millis());

    let engine = engine_with(store, MockSource::failing(), MockSource::new(0.8));
    let mut price_state = engine.price_state();
    price_state.borrow_and_update();
    force_all(&engine).await;

    assert!(price_state.has_changed().unwrap());
    let state = price_state.borrow_and_update().clone();
    assert_eq!(state.value, 240.0);
    assert_eq!(state.status, SyncStatus::FellBackToCache);
    assert!(!state.loading);
    assert_eq!(*engine.current_price().borrow(), 240.0);

    let output = logs.contents();
    assert!(output.contains("Fetch failed, using cached value"), "{output}");
    assert!(output.contains("WARN"), "{output}");
    assert!(output.contains("current-price"), "{output}");
}

#[test_log::test(tokio::test)]
async fn blank_custom_price_values_at_zero() {
    let engine = engine_with(
        Arc::new(MemoryStore::new()),
        MockSource::new(250.0),
        MockSource::new(0.8),
    );
    engine.set_shares(10);
    force_all(&engine).await;

    let mut scenario = engine.add_scenario().unwrap();
    scenario.use_live_price = false;
    scenario.custom_price = None;
    engine.update_scenario(scenario.clone()).unwrap();

    let valuation = settled(&mut engine.scenario_valuation(scenario.id), |v| v.is_some()).await;
    assert_eq!(valuation, Some(Valuation { usd_value: 0.0, gbp_value: 0.0 }));
}

// ═══════════════════════════════════════════════════════════════════
// Engine behaviour
// ═══════════════════════════════════════════════════════════════════

#[test_log::test(tokio::test)]
async fn cold_start_without_cache_emits_defaults() {
    let engine = engine_with(
        Arc::new(MemoryStore::new()),
        MockSource::failing(),
        MockSource::failing(),
    );
    assert_eq!(*engine.current_price().borrow(), 0.0);
    assert_eq!(*engine.current_rate().borrow(), 0.78);
    assert_eq!(*engine.last_updated().borrow(), None);

    force_all(&engine).await;
    assert_eq!(engine.rate_state().borrow().status, SyncStatus::FellBackToDefault);
    assert_eq!(*engine.current_rate().borrow(), 0.78);
}

#[test_log::test(tokio::test)]
async fn state_survives_restart_without_refetching() {
    let store = Arc::new(MemoryStore::new());
    {
        let engine = engine_with(store.clone(), MockSource::new(250.0), MockSource::new(0.8));
        engine.set_shares(4);
        engine.add_scenario().unwrap();
        force_all(&engine).await;
    }

    let quotes = MockSource::new(999.0);
    let engine = engine_with(store, quotes.clone(), MockSource::new(0.5));
    assert_eq!(*engine.current_price().borrow(), 250.0);
    assert_eq!(engine.shares(), 4);
    assert_eq!(engine.scenario_list().borrow().len(), 1);
    assert!(engine.last_updated().borrow().is_some());

    // Everything is fresh, so a gated round leaves the source alone.
    let handle = engine.start();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(quotes.calls(), 0);
    handle.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn start_loads_and_shutdown_stops() {
    let quotes = MockSource::new(250.0);
    let engine = engine_with(Arc::new(MemoryStore::new()), quotes.clone(), MockSource::new(0.8));
    let handle = engine.start();

    settled(&mut engine.current_price(), |p| *p == 250.0).await;
    settled(&mut engine.last_updated(), |t| t.is_some()).await;

    let sender = handle.sender();
    tokio::time::timeout(std::time::Duration::from_secs(3), handle.shutdown())
        .await
        .expect("shutdown should not wait for outstanding senders");
    assert!(sender.send(LifecycleEvent::Online).await.is_err());
}

#[test_log::test(tokio::test)]
async fn dropping_handle_stops_loop() {
    let engine = engine_with(
        Arc::new(MemoryStore::new()),
        MockSource::new(250.0),
        MockSource::new(0.8),
    );
    let handle = engine.start();
    settled(&mut engine.current_price(), |p| *p == 250.0).await;

    let sender = handle.sender();
    drop(handle);
    tokio::time::timeout(std::time::Duration::from_secs(3), sender.closed())
        .await
        .expect("loop should exit once the handle is gone");
}

#[test_log::test(tokio::test)]
async fn offline_suppresses_forced_refresh() {
    let quotes = MockSource::new(250.0);
    let engine = engine_with(Arc::new(MemoryStore::new()), quotes.clone(), MockSource::new(0.8));
    let handle = engine.start();
    settled(&mut engine.current_price(), |p| *p == 250.0).await;

    handle.send(LifecycleEvent::Offline).await.unwrap();
    settled(&mut engine.is_online(), |online| !*online).await;
    let before = quotes.calls();
    assert!(engine.force_refresh_all().is_empty());
    assert_eq!(quotes.calls(), before);

    handle.send(LifecycleEvent::Online).await.unwrap();
    settled(&mut engine.is_online(), |online| *online).await;
    handle.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn deleted_scenario_stream_yields_none() {
    let engine = engine_with(
        Arc::new(MemoryStore::new()),
        MockSource::new(250.0),
        MockSource::new(0.8),
    );
    engine.set_shares(2);
    force_all(&engine).await;
    settled(&mut engine.current_price(), |p| *p == 250.0).await;

    let scenario = engine.add_scenario().unwrap();
    let mut stream = engine.scenario_valuation(scenario.id);
    assert_eq!(*stream.borrow_and_update(), Some(Valuation::compute(250.0, 0.8, 2)));

    engine.delete_scenario(scenario.id).unwrap();
    assert_eq!(settled(&mut stream, |v| v.is_none()).await, None);
    assert!(matches!(
        engine.delete_scenario(scenario.id),
        Err(CoreError::ScenarioNotFound(_))
    ));
}

#[test_log::test(tokio::test)]
async fn scenario_commands_keep_order() {
    let engine = engine_with(
        Arc::new(MemoryStore::new()),
        MockSource::new(250.0),
        MockSource::new(0.8),
    );
    let a = engine.add_scenario().unwrap();
    let b = engine.add_scenario().unwrap();
    engine.reorder_scenarios(&[b.id, a.id]).unwrap();

    let list = engine.scenario_list().borrow().clone();
    assert_eq!(list.iter().map(|s| (s.id, s.order)).collect::<Vec<_>>(), vec![(b.id, 0), (a.id, 1)]);

    engine.clear_scenarios();
    assert!(engine.scenario_list().borrow().is_empty());
}

#[test_log::test(tokio::test)]
async fn historical_chart_in_range() {
    let store = Arc::new(MemoryStore::new());
    let quotes = MockSource::with_series(
        250.0,
        vec![
            TimePoint::on_date(days_ago(400), 150.0),
            TimePoint::on_date(days_ago(3), 240.0),
        ],
    );
    let rates = MockSource::with_series(0.8, vec![TimePoint::on_date(days_ago(3), 0.8)]);
    let engine = engine_with(store, quotes, rates);
    engine.set_shares(10);
    force_all(&engine).await;

    let all = settled(&mut engine.historical_series(), |s| s.len() == 2).await;
    assert_eq!(all[1].usd_value, 2400.0);

    let month = settled(&mut engine.historical_series_in(ChartRange::OneMonth), |s| !s.is_empty()).await;
    assert_eq!(month.len(), 1);
    assert_eq!(month[0].price, 240.0);
}

#[test_log::test(tokio::test)]
async fn clear_shares_resets_valuation() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(store.clone(), MockSource::new(250.0), MockSource::new(0.8));
    engine.set_shares(10);
    force_all(&engine).await;
    settled(&mut engine.current_usd(), |v| *v == 2500.0).await;

    engine.clear_shares();
    settled(&mut engine.current_usd(), |v| *v == 0.0).await;
    assert_eq!(store.get("share-valuation-shares").unwrap(), None);
}

#[test_log::test(tokio::test)]
async fn default_providers_need_api_key() {
    let err = ValuationEngine::with_default_providers(Settings::default(), Arc::new(MemoryStore::new()))
        .unwrap_err();
    assert!(matches!(err, CoreError::Config(_)), "{err:?}");
}

#[test_log::test(tokio::test)]
async fn invalid_settings_are_rejected() {
    let settings = Settings {
        symbol: String::new(),
        ..Settings::default()
    };
    let err = ValuationEngine::new(
        settings,
        Arc::new(MemoryStore::new()),
        MockSource::new(1.0),
        MockSource::new(1.0),
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::Config(_)));
}
