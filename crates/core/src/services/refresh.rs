use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::sync::RefreshOutcome;

use super::sync_unit::{request_refresh, Refreshable};

/// Timer group a unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Current and intraday units.
    Live,
    /// Historical units.
    Daily,
}

/// Host events the coordinator listens to. Hosts without a notion of
/// visibility or focus simply never send those.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    VisibilityChanged(bool),
    FocusChanged(bool),
    Online,
    Offline,
}

/// Why a refresh round was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Tick(Cadence),
    Resumed,
    CameOnline,
    Forced,
}

/// Merges visibility and focus into one "resumed" signal.
///
/// Each input is de-duplicated on its own, then the merged sequence of
/// booleans is de-duplicated again. A resume fires when the merged value
/// turns `true`.
#[derive(Debug, Default)]
pub struct ResumeDetector {
    visible: Option<bool>,
    focused: Option<bool>,
    last: Option<bool>,
}

impl ResumeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector that already knows the host's current state, so the first
    /// matching event is not mistaken for a resume.
    pub fn with_initial(visible: bool, focused: bool) -> Self {
        let mut detector = Self::new();
        detector.observe(LifecycleEvent::VisibilityChanged(visible));
        detector.observe(LifecycleEvent::FocusChanged(focused));
        detector
    }

    /// Feed one event; returns whether the app just resumed.
    pub fn observe(&mut self, event: LifecycleEvent) -> bool {
        let (slot, value) = match event {
            LifecycleEvent::VisibilityChanged(v) => (&mut self.visible, v),
            LifecycleEvent::FocusChanged(f) => (&mut self.focused, f),
            LifecycleEvent::Online | LifecycleEvent::Offline => return false,
        };
        if *slot == Some(value) {
            return false;
        }
        *slot = Some(value);

        if self.last == Some(value) {
            return false;
        }
        self.last = Some(value);
        value
    }
}

/// Decides when the sync units get asked to refresh.
///
/// Timer ticks and resumes go through each unit's staleness gate; coming
/// back online and explicit forcing bypass it. While offline nothing but
/// the online transition itself reaches the units.
pub struct RefreshCoordinator {
    live_units: Vec<Arc<dyn Refreshable>>,
    daily_units: Vec<Arc<dyn Refreshable>>,
    online: watch::Sender<bool>,
    resume: Mutex<ResumeDetector>,
    live_period: Duration,
    daily_period: Duration,
}

impl RefreshCoordinator {
    pub fn new(
        live_units: Vec<Arc<dyn Refreshable>>,
        daily_units: Vec<Arc<dyn Refreshable>>,
        live_period: Duration,
        daily_period: Duration,
    ) -> Self {
        let (online, _) = watch::channel(true);
        Self {
            live_units,
            daily_units,
            online,
            resume: Mutex::new(ResumeDetector::new()),
            live_period,
            daily_period,
        }
    }

    /// Seed the resume detector with the host's state at startup.
    pub fn set_initial_visibility(&self, visible: bool, focused: bool) {
        if let Ok(mut detector) = self.resume.lock() {
            *detector = ResumeDetector::with_initial(visible, focused);
        }
    }

    pub fn is_online(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Dispatch one trigger. Returns the handles of the refreshes started.
    pub fn handle(&self, trigger: Trigger) -> Vec<JoinHandle<RefreshOutcome>> {
        if !*self.online.borrow() && trigger != Trigger::CameOnline {
            debug!(?trigger, "Offline, refresh suppressed");
            return Vec::new();
        }

        let (units, force): (Vec<&Arc<dyn Refreshable>>, bool) = match trigger {
            Trigger::Tick(Cadence::Live) => (self.live_units.iter().collect(), false),
            Trigger::Tick(Cadence::Daily) => (self.daily_units.iter().collect(), false),
            Trigger::Resumed => (self.all_units().collect(), false),
            Trigger::CameOnline | Trigger::Forced => (self.all_units().collect(), true),
        };

        debug!(?trigger, units = units.len(), force, "Requesting refresh");
        units
            .into_iter()
            .map(|unit| request_refresh(unit, force))
            .collect()
    }

    /// Force every unit, unless offline.
    pub fn force_refresh_all(&self) -> Vec<JoinHandle<RefreshOutcome>> {
        self.handle(Trigger::Forced)
    }

    pub fn on_lifecycle(&self, event: LifecycleEvent) -> Vec<JoinHandle<RefreshOutcome>> {
        match event {
            LifecycleEvent::Online => {
                let came_online = self.online.send_if_modified(|online| {
                    let changed = !*online;
                    *online = true;
                    changed
                });
                if came_online {
                    info!("Back online, refreshing everything");
                    self.handle(Trigger::CameOnline)
                } else {
                    Vec::new()
                }
            }
            LifecycleEvent::Offline => {
                let went_offline = self.online.send_if_modified(|online| {
                    let changed = *online;
                    *online = false;
                    changed
                });
                if went_offline {
                    info!("Offline, refreshes suspended");
                }
                Vec::new()
            }
            LifecycleEvent::VisibilityChanged(_) | LifecycleEvent::FocusChanged(_) => {
                let resumed = self
                    .resume
                    .lock()
                    .map(|mut detector| detector.observe(event))
                    .unwrap_or(false);
                if resumed {
                    self.handle(Trigger::Resumed)
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Drive the timers and host events until `cancel` fires or the event
    /// channel closes. Both timers fire immediately, which performs the
    /// startup load.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<LifecycleEvent>,
        cancel: CancellationToken,
    ) {
        let mut live = interval(self.live_period);
        let mut daily = interval(self.daily_period);
        live.set_missed_tick_behavior(MissedTickBehavior::Delay);
        daily.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            live_secs = self.live_period.as_secs(),
            daily_secs = self.daily_period.as_secs(),
            "Refresh coordinator started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = live.tick() => {
                    self.handle(Trigger::Tick(Cadence::Live));
                }
                _ = daily.tick() => {
                    self.handle(Trigger::Tick(Cadence::Daily));
                }
                event = events.recv() => match event {
                    Some(event) => {
                        debug!(?event, "Lifecycle event");
                        self.on_lifecycle(event);
                    }
                    None => break,
                },
            }
        }

        info!("Refresh coordinator stopped");
    }

    fn all_units(&self) -> impl Iterator<Item = &Arc<dyn Refreshable>> {
        self.live_units.iter().chain(self.daily_units.iter())
    }
}
