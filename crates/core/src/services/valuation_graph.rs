use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::scenario::WhatIfScenario;
use crate::models::series::{TimePoint, TimeSeries};
use crate::models::sync::SyncState;
use crate::models::valuation::{ChartRange, Valuation, ValuationPoint};
use crate::services::join::join_nearest;
use crate::services::reactive::{spawn_derived, Dependencies};

/// How often a ranged chart re-cuts its window without new data.
const RANGE_TICK: Duration = Duration::from_secs(60 * 60);

/// Valuation of every price sample, priced with the nearest rate sample.
pub fn valuation_series(prices: &[TimePoint], rates: &[TimePoint], shares: u64) -> Vec<ValuationPoint> {
    join_nearest(prices, rates)
        .into_iter()
        .map(|joined| {
            let valuation = Valuation::compute(joined.a, joined.b, shares);
            ValuationPoint {
                timestamp: joined.timestamp,
                price: joined.a,
                rate: joined.b,
                usd_value: valuation.usd_value,
                gbp_value: valuation.gbp_value,
            }
        })
        .collect()
}

/// A scenario's valuation, with its overrides applied over the live values.
pub fn scenario_valuation(
    scenario: &WhatIfScenario,
    live_price: f64,
    live_rate: f64,
    shares: u64,
) -> Valuation {
    Valuation::compute(
        scenario.effective_price(live_price),
        scenario.effective_rate(live_rate),
        shares,
    )
}

/// Streams the graph is built from.
#[derive(Clone)]
pub struct ValuationInputs {
    pub price: watch::Receiver<SyncState<f64>>,
    pub rate: watch::Receiver<SyncState<f64>>,
    pub intraday_prices: watch::Receiver<SyncState<TimeSeries>>,
    pub intraday_rates: watch::Receiver<SyncState<TimeSeries>>,
    pub historical_prices: watch::Receiver<SyncState<TimeSeries>>,
    pub historical_rates: watch::Receiver<SyncState<TimeSeries>>,
    pub shares: watch::Receiver<u64>,
    pub scenarios: watch::Receiver<Vec<WhatIfScenario>>,
}

/// Derived valuations over live values, chart series and scenarios.
///
/// The three fixed streams are built once and shared; scenario and ranged
/// streams are built per request and end with their last subscriber.
pub struct ValuationGraph {
    inputs: ValuationInputs,
    current: watch::Receiver<Valuation>,
    daily: watch::Receiver<Vec<ValuationPoint>>,
    historical: watch::Receiver<Vec<ValuationPoint>>,
}

impl ValuationGraph {
    /// Must be called inside a tokio runtime.
    pub fn new(inputs: ValuationInputs) -> Self {
        let current = {
            let (price, rate, shares) = (
                inputs.price.clone(),
                inputs.rate.clone(),
                inputs.shares.clone(),
            );
            let deps = Dependencies::new()
                .watch(inputs.price.clone())
                .watch(inputs.rate.clone())
                .watch(inputs.shares.clone());
            spawn_derived(deps, move || {
                Valuation::compute(price.borrow().value, rate.borrow().value, *shares.borrow())
            })
        };

        let daily = Self::series_stream(
            &inputs.intraday_prices,
            &inputs.intraday_rates,
            &inputs.shares,
        );
        let historical = Self::series_stream(
            &inputs.historical_prices,
            &inputs.historical_rates,
            &inputs.shares,
        );

        Self {
            inputs,
            current,
            daily,
            historical,
        }
    }

    fn series_stream(
        prices: &watch::Receiver<SyncState<TimeSeries>>,
        rates: &watch::Receiver<SyncState<TimeSeries>>,
        shares: &watch::Receiver<u64>,
    ) -> watch::Receiver<Vec<ValuationPoint>> {
        let deps = Dependencies::new()
            .watch(prices.clone())
            .watch(rates.clone())
            .watch(shares.clone());
        let (prices, rates, shares) = (prices.clone(), rates.clone(), shares.clone());
        spawn_derived(deps, move || {
            let shares = *shares.borrow();
            let prices = prices.borrow();
            let rates = rates.borrow();
            valuation_series(&prices.value, &rates.value, shares)
        })
    }

    pub fn current(&self) -> watch::Receiver<Valuation> {
        self.current.clone()
    }

    pub fn daily(&self) -> watch::Receiver<Vec<ValuationPoint>> {
        self.daily.clone()
    }

    pub fn historical(&self) -> watch::Receiver<Vec<ValuationPoint>> {
        self.historical.clone()
    }

    /// Historical chart cut to `range`, counted back from the time of each
    /// recomputation. The window also moves on its own every `RANGE_TICK`.
    pub fn historical_in(&self, range: ChartRange) -> watch::Receiver<Vec<ValuationPoint>> {
        let source = self.historical.clone();
        let deps = Dependencies::new()
            .watch(self.historical.clone())
            .every(RANGE_TICK);
        spawn_derived(deps, move || range.filter(&source.borrow(), Utc::now()))
    }

    /// Valuation of scenario `id`; `None` while no such scenario exists.
    pub fn scenario(&self, id: Uuid) -> watch::Receiver<Option<Valuation>> {
        let inputs = self.inputs.clone();
        let deps = Dependencies::new()
            .watch(self.inputs.price.clone())
            .watch(self.inputs.rate.clone())
            .watch(self.inputs.shares.clone())
            .watch(self.inputs.scenarios.clone());
        spawn_derived(deps, move || {
            let price = inputs.price.borrow().value;
            let rate = inputs.rate.borrow().value;
            let shares = *inputs.shares.borrow();
            inputs
                .scenarios
                .borrow()
                .iter()
                .find(|s| s.id == id)
                .map(|s| scenario_valuation(s, price, rate, shares))
        })
    }
}
