use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user-defined "what if" configuration: the live price and/or rate can be
/// swapped for custom values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhatIfScenario {
    /// Unique identifier
    pub id: Uuid,

    pub name: String,

    /// 0-based display position; contiguous across the collection.
    pub order: usize,

    pub use_live_price: bool,
    pub use_live_rate: bool,

    #[serde(default)]
    pub custom_price: Option<f64>,
    #[serde(default)]
    pub custom_rate: Option<f64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WhatIfScenario {
    /// A scenario that tracks live values until edited.
    pub fn new(name: impl Into<String>, order: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            order,
            use_live_price: true,
            use_live_rate: true,
            custom_price: None,
            custom_rate: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Price used for this scenario's valuation.
    ///
    /// A blank custom price counts as 0 rather than falling back to the live
    /// price.
    pub fn effective_price(&self, live_price: f64) -> f64 {
        if self.use_live_price {
            live_price
        } else {
            custom_or_zero(self.custom_price)
        }
    }

    /// Rate used for this scenario's valuation. Same blank-means-zero rule.
    pub fn effective_rate(&self, live_rate: f64) -> f64 {
        if self.use_live_rate {
            live_rate
        } else {
            custom_or_zero(self.custom_rate)
        }
    }
}

fn custom_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}
