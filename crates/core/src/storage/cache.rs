use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::sync::DataKind;

use super::kv::KeyValueStore;

/// Logical record names. Each sync unit owns the keys of its own `DataKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Scalar or series value of a data stream.
    Data(DataKind),
    /// Instant the stream was last confirmed by its source.
    LastUpdated(DataKind),
    /// Instant of the last full-window historical fetch.
    LastValidated(DataKind),
    Shares,
    Scenarios,
}

impl CacheKey {
    fn suffix(&self) -> String {
        match self {
            CacheKey::Data(kind) => kind.slug().to_string(),
            CacheKey::LastUpdated(kind) => format!("{}-last-update", kind.slug()),
            CacheKey::LastValidated(kind) => format!("{}-last-validated", kind.slug()),
            CacheKey::Shares => "shares".to_string(),
            CacheKey::Scenarios => "what-if-scenarios".to_string(),
        }
    }
}

/// JSON layer over a `KeyValueStore` with fault containment: reads that fail
/// or do not parse behave like a miss, writes that fail are logged and
/// reported as `false`. Nothing here returns an error.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn KeyValueStore>,
    namespace: String,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl CacheStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    /// Full storage key, e.g. `share-valuation-current-price`.
    pub fn key(&self, key: CacheKey) -> String {
        format!("{}-{}", self.namespace, key.suffix())
    }

    pub fn get<T: DeserializeOwned>(&self, key: CacheKey) -> Option<T> {
        let full_key = self.key(key);
        let raw = match self.backend.get(&full_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %full_key, "Cache MISS");
                return None;
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key = %full_key, "Cache HIT");
                Some(value)
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Discarding unparsable cache record");
                None
            }
        }
    }

    /// Persist `value`; returns whether the write reached the backend.
    pub fn set<T: Serialize + ?Sized>(&self, key: CacheKey, value: &T) -> bool {
        let full_key = self.key(key);
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Failed to serialize cache record");
                return false;
            }
        };

        match self.backend.set(&full_key, &json) {
            Ok(()) => {
                debug!(key = %full_key, "Cache PUT");
                true
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache write failed; keeping in-memory state only");
                false
            }
        }
    }

    pub fn clear(&self, key: CacheKey) -> bool {
        let full_key = self.key(key);
        match self.backend.remove(&full_key) {
            Ok(()) => {
                debug!(key = %full_key, "Cache REMOVE");
                true
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache remove failed");
                false
            }
        }
    }
}
