use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::trace;

/// Change notifications of a derived value's inputs, merged into one wakeup.
///
/// Each watched receiver gets a small forwarder task that pokes a shared
/// `Notify`. `Notify` keeps at most one pending permit, so a burst of input
/// changes that lands before the consumer wakes is seen as a single change.
/// Forwarders are aborted when this is dropped.
pub struct Dependencies {
    notify: Arc<Notify>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            forwarders: Vec::new(),
        }
    }

    /// Add an input. Must be called inside a tokio runtime.
    pub fn watch<T>(mut self, mut rx: watch::Receiver<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        let notify = Arc::clone(&self.notify);
        self.forwarders.push(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                notify.notify_one();
            }
        }));
        self
    }

    /// Also wake every `period`, for values that depend on the clock.
    pub fn every(mut self, period: Duration) -> Self {
        let notify = Arc::clone(&self.notify);
        self.forwarders.push(tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick is immediate; the initial value is already computed.
            ticks.tick().await;
            loop {
                ticks.tick().await;
                notify.notify_one();
            }
        }));
        self
    }

    pub async fn changed(&self) {
        self.notify.notified().await
    }
}

impl Default for Dependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Dependencies {
    fn drop(&mut self) {
        for handle in &self.forwarders {
            handle.abort();
        }
    }
}

/// Publish `compute()` on a watch channel and recompute it whenever one of
/// `deps` changes. Subscribers are notified only when the result differs from
/// the last published value. The task ends once every receiver is dropped.
pub fn spawn_derived<O, F>(deps: Dependencies, mut compute: F) -> watch::Receiver<O>
where
    O: PartialEq + Send + Sync + 'static,
    F: FnMut() -> O + Send + 'static,
{
    let (tx, rx) = watch::channel(compute());

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = deps.changed() => {
                    let next = compute();
                    tx.send_if_modified(|current| {
                        if *current == next {
                            false
                        } else {
                            *current = next;
                            true
                        }
                    });
                }
            }
        }
        trace!("Derived stream lost its last subscriber");
    });

    rx
}
