use chrono::Utc;
use std::collections::HashSet;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::scenario::WhatIfScenario;
use crate::storage::{CacheKey, CacheStore};

/// Ordered collection of what-if scenarios.
///
/// The list is kept sorted by `order`, and `order` always runs `0..n`.
/// Each successful mutation publishes the new list once and persists it in
/// a single write. A rejected mutation changes nothing.
pub struct ScenarioStore {
    cache: CacheStore,
    scenarios: watch::Sender<Vec<WhatIfScenario>>,
}

impl ScenarioStore {
    /// Load the persisted collection, normalising its order.
    pub fn new(cache: CacheStore) -> Self {
        let mut loaded: Vec<WhatIfScenario> = cache.get(CacheKey::Scenarios).unwrap_or_default();
        normalise(&mut loaded);
        debug!(count = loaded.len(), "Loaded scenarios");
        let (scenarios, _) = watch::channel(loaded);
        Self { cache, scenarios }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<WhatIfScenario>> {
        self.scenarios.subscribe()
    }

    pub fn list(&self) -> Vec<WhatIfScenario> {
        self.scenarios.borrow().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<WhatIfScenario> {
        self.scenarios.borrow().iter().find(|s| s.id == id).cloned()
    }

    /// Append a scenario that tracks live values.
    pub fn add(&self) -> Result<WhatIfScenario, CoreError> {
        self.mutate(|list| {
            let n = list.len();
            let scenario = WhatIfScenario::new(format!("What If Scenario {}", n + 1), n);
            list.push(scenario.clone());
            Ok(scenario)
        })
    }

    pub fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        self.mutate(|list| {
            let idx = position(list, id)?;
            list.remove(idx);
            renumber(list);
            Ok(())
        })
    }

    /// Replace a scenario's editable fields. `id`, `order` and `created_at`
    /// stay as stored; `updated_at` is set to now.
    pub fn update(&self, scenario: WhatIfScenario) -> Result<WhatIfScenario, CoreError> {
        self.mutate(|list| {
            let idx = position(list, scenario.id)?;
            let stored = &list[idx];
            let updated = WhatIfScenario {
                order: stored.order,
                created_at: stored.created_at,
                updated_at: Utc::now(),
                ..scenario
            };
            list[idx] = updated.clone();
            Ok(updated)
        })
    }

    /// Put the scenarios in the order of `ids`, which must name every
    /// scenario exactly once.
    pub fn reorder(&self, ids: &[Uuid]) -> Result<(), CoreError> {
        self.mutate(|list| {
            if ids.len() != list.len() {
                return Err(CoreError::InvalidReorder(format!(
                    "expected {} ids, got {}",
                    list.len(),
                    ids.len()
                )));
            }
            let mut seen = HashSet::with_capacity(ids.len());
            for id in ids {
                if !seen.insert(*id) {
                    return Err(CoreError::InvalidReorder(format!("duplicate id {id}")));
                }
            }

            let mut reordered = Vec::with_capacity(ids.len());
            for id in ids {
                let scenario = list
                    .iter()
                    .find(|s| s.id == *id)
                    .ok_or_else(|| CoreError::InvalidReorder(format!("unknown id {id}")))?;
                reordered.push(scenario.clone());
            }
            renumber(&mut reordered);
            *list = reordered;
            Ok(())
        })
    }

    /// Remove every scenario and the persisted record.
    pub fn clear(&self) {
        self.scenarios.send_if_modified(|list| {
            let had_any = !list.is_empty();
            list.clear();
            had_any
        });
        self.cache.clear(CacheKey::Scenarios);
        info!("Cleared scenarios");
    }

    /// Apply `f` to a working copy; commit, notify and persist only on `Ok`.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Vec<WhatIfScenario>) -> Result<R, CoreError>,
    ) -> Result<R, CoreError> {
        let mut outcome = None;
        let mut committed = None;
        self.scenarios.send_if_modified(|list| {
            let mut working = list.clone();
            match f(&mut working) {
                Ok(result) => {
                    committed = Some(working.clone());
                    *list = working;
                    outcome = Some(Ok(result));
                    true
                }
                Err(e) => {
                    outcome = Some(Err(e));
                    false
                }
            }
        });

        if let Some(list) = committed {
            self.cache.set(CacheKey::Scenarios, &list);
        }
        outcome.unwrap_or_else(|| Err(CoreError::Storage("scenario mutation did not run".into())))
    }
}

fn position(list: &[WhatIfScenario], id: Uuid) -> Result<usize, CoreError> {
    list.iter()
        .position(|s| s.id == id)
        .ok_or_else(|| CoreError::ScenarioNotFound(id.to_string()))
}

fn renumber(list: &mut [WhatIfScenario]) {
    for (idx, scenario) in list.iter_mut().enumerate() {
        scenario.order = idx;
    }
}

fn normalise(list: &mut Vec<WhatIfScenario>) {
    list.sort_by_key(|s| s.order);
    let mut seen = HashSet::new();
    list.retain(|s| seen.insert(s.id));
    renumber(list);
}
