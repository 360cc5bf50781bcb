use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::traits::MarketDataSource;
use crate::errors::CoreError;
use crate::models::series::{TimePoint, TimeSeries};

const BASE_URL: &str = "https://www.alphavantage.co";
const PROVIDER: &str = "Alpha Vantage";

/// `TIME_SERIES_DAILY` in compact mode returns the last 100 trading days.
const COMPACT_DAYS: i64 = 100;

/// Alpha Vantage source for the stock quote.
///
/// - **Free tier**: 25 requests/day (across ALL endpoints).
/// - **Requires**: API key (set via settings as "alphavantage").
/// - **Intraday**: 5-minute bars stamped in exchange-local time; converted
///   to UTC with a fixed offset.
/// - **Daily**: closes stamped at 00:00 UTC of each trading date.
///
/// When the key is over quota the service answers 200 with a "Note" or
/// "Information" field instead of data; that surfaces as `CoreError::Api`.
pub struct AlphaVantageProvider {
    client: Client,
    base_url: String,
    api_key: String,
    symbol: String,
    exchange_offset: FixedOffset,
}

impl AlphaVantageProvider {
    pub fn new(api_key: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::with_base_url(BASE_URL, api_key, symbol)
    }

    pub fn with_base_url(
        base_url: &str,
        api_key: impl Into<String>,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            symbol: symbol.into().to_uppercase(),
            exchange_offset: default_exchange_offset(),
        }
    }

    /// UTC offset of the exchange clock, in minutes (US Eastern: -300).
    /// Out-of-range values keep the current offset.
    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        if let Some(offset) = minutes.checked_mul(60).and_then(FixedOffset::east_opt) {
            self.exchange_offset = offset;
        }
        self
    }

    async fn query<T: DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<T, CoreError> {
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("symbol", &self.symbol));
        query.push(("apikey", &self.api_key));

        self.client
            .get(format!("{}/query", self.base_url))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| CoreError::Api {
                provider: PROVIDER.into(),
                message: format!("Failed to parse response for {}: {e}", self.symbol),
            })
    }

    fn missing_data(&self, what: &str, notice: Notice) -> CoreError {
        CoreError::Api {
            provider: PROVIDER.into(),
            message: match notice.text() {
                Some(text) => format!("No {what} for {}: {text}", self.symbol),
                None => format!("No {what} for {}. API limit may be exceeded.", self.symbol),
            },
        }
    }
}

fn default_exchange_offset() -> FixedOffset {
    FixedOffset::west_opt(5 * 3600).unwrap_or_else(|| Utc.fix())
}

// ── Alpha Vantage API response types ────────────────────────────────

/// Quota or usage messages the service puts in place of data.
#[derive(Deserialize, Default)]
struct Notice {
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

impl Notice {
    fn text(self) -> Option<String> {
        self.note.or(self.information)
    }
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(flatten)]
    notice: Notice,
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "05. price")]
    price: Option<String>,
}

#[derive(Deserialize)]
struct IntradayResponse {
    #[serde(rename = "Time Series (5min)")]
    time_series: Option<HashMap<String, Bar>>,
    #[serde(flatten)]
    notice: Notice,
}

#[derive(Deserialize)]
struct DailyResponse {
    #[serde(rename = "Time Series (Daily)")]
    time_series: Option<HashMap<String, Bar>>,
    #[serde(flatten)]
    notice: Notice,
}

#[derive(Deserialize)]
struct Bar {
    #[serde(rename = "4. close")]
    close: String,
}

#[async_trait]
impl MarketDataSource for AlphaVantageProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn get_current(&self) -> Result<f64, CoreError> {
        let resp: GlobalQuoteResponse = self.query(&[("function", "GLOBAL_QUOTE")]).await?;

        let price_str = match resp.global_quote.and_then(|q| q.price) {
            Some(price) => price,
            None => return Err(self.missing_data("quote data", resp.notice)),
        };

        price_str.trim().parse().map_err(|e| CoreError::Api {
            provider: PROVIDER.into(),
            message: format!("Invalid price format for {}: {e}", self.symbol),
        })
    }

    async fn get_intraday(&self, since: DateTime<Utc>) -> Result<TimeSeries, CoreError> {
        let resp: IntradayResponse = self
            .query(&[("function", "TIME_SERIES_INTRADAY"), ("interval", "5min")])
            .await?;
        let bars = match resp.time_series {
            Some(bars) => bars,
            None => return Err(self.missing_data("intraday data", resp.notice)),
        };

        let mut points: TimeSeries = bars
            .iter()
            .filter_map(|(stamp, bar)| {
                let local = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S").ok()?;
                let timestamp = self
                    .exchange_offset
                    .from_local_datetime(&local)
                    .single()?
                    .with_timezone(&Utc);
                let value = bar.close.trim().parse().ok()?;
                (timestamp >= since).then_some(TimePoint::new(timestamp, value))
            })
            .collect();

        points.sort_by_key(|p| p.timestamp);
        debug!(symbol = %self.symbol, points = points.len(), "Fetched intraday bars");
        Ok(points)
    }

    async fn get_historical(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<TimeSeries, CoreError> {
        let output_size = if (to - from).num_days() <= COMPACT_DAYS {
            "compact"
        } else {
            "full"
        };
        let resp: DailyResponse = self
            .query(&[("function", "TIME_SERIES_DAILY"), ("outputsize", output_size)])
            .await?;
        let days = match resp.time_series {
            Some(days) => days,
            None => return Err(self.missing_data("time series data", resp.notice)),
        };

        let mut points: TimeSeries = days
            .iter()
            .filter_map(|(date_str, bar)| {
                let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()?;
                if date < from || date > to {
                    return None;
                }
                let value = bar.close.trim().parse().ok()?;
                Some(TimePoint::on_date(date, value))
            })
            .collect();

        points.sort_by_key(|p| p.timestamp);
        debug!(symbol = %self.symbol, %from, %to, output_size, points = points.len(), "Fetched daily closes");
        Ok(points)
    }
}
