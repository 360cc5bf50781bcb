use async_trait::async_trait;
use chrono::{DateTime, DurationRound, NaiveDate, TimeDelta, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::traits::MarketDataSource;
use crate::errors::CoreError;
use crate::models::series::{TimePoint, TimeSeries};

const BASE_URL: &str = "https://api.frankfurter.dev/v1";
const PROVIDER: &str = "Frankfurter";

/// Frankfurter source for a fiat exchange rate (USD→GBP by default).
///
/// - **Free**: No API key, no rate limits, open-source.
/// - **Source**: European Central Bank (ECB) data, one fixing per working day.
/// - **Endpoints**: `/latest`, `/{start}..{end}`
///
/// There is no intraday endpoint. `get_intraday` answers with the latest
/// rate stamped at the current minute, so regular polling builds up the
/// intraday series one point at a time.
pub struct FrankfurterProvider {
    client: Client,
    base_url: String,
    base: String,
    target: String,
}

impl FrankfurterProvider {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            base: "USD".to_string(),
            target: "GBP".to_string(),
        }
    }

    pub fn with_pair(mut self, base: &str, target: &str) -> Self {
        self.base = base.to_uppercase();
        self.target = target.to_uppercase();
        self
    }

    async fn fetch<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, CoreError> {
        let url = format!(
            "{}/{path}?base={}&symbols={}",
            self.base_url, self.base, self.target
        );
        self.client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| CoreError::Api {
                provider: PROVIDER.into(),
                message: format!(
                    "Failed to parse response for {}/{}: {e}",
                    self.base, self.target
                ),
            })
    }
}

impl Default for FrankfurterProvider {
    fn default() -> Self {
        Self::new()
    }
}

// ── Frankfurter API response types ──────────────────────────────────

#[derive(Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

#[derive(Deserialize)]
struct TimeSeriesResponse {
    rates: HashMap<String, HashMap<String, f64>>,
}

#[async_trait]
impl MarketDataSource for FrankfurterProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn get_current(&self) -> Result<f64, CoreError> {
        if self.base == self.target {
            return Ok(1.0);
        }

        let resp: RatesResponse = self.fetch("latest").await?;
        resp.rates.get(&self.target).copied().ok_or_else(|| CoreError::Api {
            provider: PROVIDER.into(),
            message: format!("No rate found for {} → {}", self.base, self.target),
        })
    }

    async fn get_intraday(&self, _since: DateTime<Utc>) -> Result<TimeSeries, CoreError> {
        let rate = self.get_current().await?;
        let now = Utc::now();
        let minute = now.duration_trunc(TimeDelta::minutes(1)).unwrap_or(now);
        Ok(vec![TimePoint::new(minute, rate)])
    }

    async fn get_historical(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<TimeSeries, CoreError> {
        if self.base == self.target {
            return Ok(from
                .iter_days()
                .take_while(|d| *d <= to)
                .map(|d| TimePoint::on_date(d, 1.0))
                .collect());
        }

        let path = format!("{}..{}", from.format("%Y-%m-%d"), to.format("%Y-%m-%d"));
        let resp: TimeSeriesResponse = self.fetch(&path).await?;

        let mut points: TimeSeries = resp
            .rates
            .iter()
            .filter_map(|(date_str, rates)| {
                let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()?;
                let rate = rates.get(&self.target)?;
                Some(TimePoint::on_date(date, *rate))
            })
            .collect();

        points.sort_by_key(|p| p.timestamp);
        debug!(pair = %format!("{}/{}", self.base, self.target), points = points.len(), "Fetched daily rates");
        Ok(points)
    }
}
