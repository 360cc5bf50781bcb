use tokio::sync::watch;
use tracing::{debug, info};

use crate::storage::{CacheKey, CacheStore};

/// The number of shares held. Persisted on every change.
pub struct ShareHolding {
    cache: CacheStore,
    shares: watch::Sender<u64>,
}

impl ShareHolding {
    /// Missing or unparsable records start at 0.
    pub fn new(cache: CacheStore) -> Self {
        let initial = cache.get::<u64>(CacheKey::Shares).unwrap_or(0);
        debug!(shares = initial, "Loaded share count");
        let (shares, _) = watch::channel(initial);
        Self { cache, shares }
    }

    pub fn get(&self) -> u64 {
        *self.shares.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shares.subscribe()
    }

    pub fn set(&self, shares: u64) {
        let changed = self.shares.send_if_modified(|current| {
            if *current == shares {
                false
            } else {
                *current = shares;
                true
            }
        });
        if changed {
            self.cache.set(CacheKey::Shares, &shares);
            info!(shares, "Share count updated");
        }
    }

    pub fn clear(&self) {
        self.shares.send_if_modified(|current| {
            let changed = *current != 0;
            *current = 0;
            changed
        });
        self.cache.clear(CacheKey::Shares);
    }
}
