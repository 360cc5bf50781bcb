use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::errors::CoreError;
use crate::models::series::TimeSeries;

/// Remote feed of one quantity (the stock quote or the USD→GBP rate).
///
/// The engine only ever talks to this trait. Swapping Alpha Vantage or
/// Frankfurter for another service means writing one more implementation;
/// the sync units and everything downstream stay as they are.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Human-readable name of this source (for logs/errors).
    fn name(&self) -> &str;

    /// Latest value.
    async fn get_current(&self) -> Result<f64, CoreError>;

    /// Today's samples at or after `since`.
    async fn get_intraday(&self, since: DateTime<Utc>) -> Result<TimeSeries, CoreError>;

    /// One sample per day for `from..=to`, stamped 00:00 UTC.
    async fn get_historical(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<TimeSeries, CoreError>;
}
