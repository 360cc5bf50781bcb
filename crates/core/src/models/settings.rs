use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::errors::CoreError;

/// Upper bound for `history_days` (one hundred years).
pub const MAX_HISTORY_DAYS: i64 = 36_500;

/// Upper bound for every refresh period (one year).
pub const MAX_PERIOD_SECS: u64 = 366 * 24 * 60 * 60;

/// Exchange offsets must stay strictly inside one day.
const MINUTES_PER_DAY: u32 = 24 * 60;

/// Engine configuration. Every field has a default, so a partial JSON file
/// (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Ticker of the single tracked holding.
    pub symbol: String,

    /// Prefix for every persisted key (e.g., "share-valuation-current-price").
    pub storage_namespace: String,

    /// Optional API keys for providers that require them.
    /// Keys: provider name (e.g., "alphavantage").
    pub api_keys: HashMap<String, String>,

    /// Price emitted when the quote source fails and nothing is cached.
    pub default_price: f64,

    /// USD→GBP rate emitted when the rate source fails and nothing is cached.
    pub default_rate: f64,

    /// Staleness window and timer period for current and intraday data.
    pub live_refresh_secs: u64,

    /// Staleness window and timer period for historical series.
    pub historical_refresh_secs: u64,

    /// After this long, historical series are re-fetched over the full window.
    pub revalidation_secs: u64,

    /// Length of the historical window kept in cache.
    pub history_days: i64,

    /// UTC offset of the exchange clock used in intraday timestamps.
    pub exchange_utc_offset_minutes: i32,

    /// Directory for the file-backed store (front ends only).
    pub data_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbol: "TSLA".to_string(),
            storage_namespace: "share-valuation".to_string(),
            api_keys: HashMap::new(),
            default_price: 0.0,
            default_rate: 0.78,
            live_refresh_secs: 5 * 60,
            historical_refresh_secs: 24 * 60 * 60,
            revalidation_secs: 7 * 24 * 60 * 60,
            history_days: 730,
            exchange_utc_offset_minutes: -300,
            data_path: None,
        }
    }
}

impl Settings {
    /// Read and validate a JSON settings file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        let settings: Self = serde_json::from_str(&raw).map_err(|e| {
            CoreError::Config(format!("Failed to parse config file {}: {e}", path.display()))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.symbol.trim().is_empty() {
            return Err(CoreError::Config("symbol must not be empty".into()));
        }
        if self.storage_namespace.trim().is_empty() {
            return Err(CoreError::Config("storage_namespace must not be empty".into()));
        }
        for (name, secs) in [
            ("live_refresh_secs", self.live_refresh_secs),
            ("historical_refresh_secs", self.historical_refresh_secs),
            ("revalidation_secs", self.revalidation_secs),
        ] {
            if secs == 0 {
                return Err(CoreError::Config(format!("{name} must be positive")));
            }
            if secs > MAX_PERIOD_SECS {
                return Err(CoreError::Config(format!(
                    "{name} must be at most {MAX_PERIOD_SECS}, got {secs}"
                )));
            }
        }
        if self.history_days <= 0 {
            return Err(CoreError::Config("history_days must be positive".into()));
        }
        if self.history_days > MAX_HISTORY_DAYS {
            return Err(CoreError::Config(format!(
                "history_days must be at most {MAX_HISTORY_DAYS}, got {}",
                self.history_days
            )));
        }
        if self.exchange_utc_offset_minutes.unsigned_abs() >= MINUTES_PER_DAY {
            return Err(CoreError::Config(format!(
                "exchange_utc_offset_minutes must be within one day, got {}",
                self.exchange_utc_offset_minutes
            )));
        }
        for (name, value) in [
            ("default_price", self.default_price),
            ("default_rate", self.default_rate),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::Config(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn live_refresh(&self) -> Duration {
        Duration::from_secs(self.live_refresh_secs)
    }

    pub fn historical_refresh(&self) -> Duration {
        Duration::from_secs(self.historical_refresh_secs)
    }

    pub fn revalidation(&self) -> Duration {
        Duration::from_secs(self.revalidation_secs)
    }

    pub fn history_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.history_days)
    }

    pub fn api_key(&self, provider: &str) -> Option<&str> {
        self.api_keys
            .get(provider)
            .map(String::as_str)
            .filter(|k| !k.trim().is_empty())
    }
}
