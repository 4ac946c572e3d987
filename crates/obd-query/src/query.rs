//! Query orchestrator: holds the single active strategy

use crate::settings::{QuerySettings, ScreenFilter};
use crate::strategy::{QueryStrategy, QueryStrategyType};
use obd_metrics::PidId;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

struct QueryState {
    active: QueryStrategyType,
    settings: QuerySettings,
    strategies: HashMap<QueryStrategyType, Box<dyn QueryStrategy>>,
}

impl QueryState {
    fn strategy(&self, kind: QueryStrategyType) -> Option<&dyn QueryStrategy> {
        self.strategies.get(&kind).map(|s| &**s)
    }

    fn ids(&self) -> BTreeSet<PidId> {
        self.strategy(self.active)
            .map(|s| s.pids(&self.settings))
            .unwrap_or_default()
    }

    fn switch(&mut self, kind: QueryStrategyType) {
        if self.active != kind {
            debug!("Switching query strategy {} -> {}", self.active, kind);
            self.active = kind;
        }
    }

    fn apply(&mut self, desired: &BTreeSet<PidId>) -> BTreeSet<PidId> {
        if self.settings.individual_per_view {
            self.switch(QueryStrategyType::Individual);
            if let Some(strategy) = self.strategies.get_mut(&QueryStrategyType::Individual) {
                strategy.update(desired.clone());
            }
            desired.clone()
        } else {
            self.switch(QueryStrategyType::Shared);
            let shared = self.ids();
            desired.intersection(&shared).copied().collect()
        }
    }
}

/// Routes id queries to the active strategy.
///
/// Every operation runs under one lock, so a strategy switch is atomic with
/// respect to concurrent `get_ids()` callers.
pub struct Query {
    state: Mutex<QueryState>,
}

impl Query {
    /// Create a query with the Shared strategy active
    pub fn new(settings: QuerySettings) -> Self {
        info!(
            "Creating query (individual per view: {})",
            settings.individual_per_view
        );
        let strategies = QueryStrategyType::ALL
            .into_iter()
            .map(|kind| (kind, kind.build()))
            .collect();
        Self {
            state: Mutex::new(QueryState {
                active: QueryStrategyType::Shared,
                settings,
                strategies,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Active strategy type
    pub fn strategy(&self) -> QueryStrategyType {
        self.lock().active
    }

    /// Make `kind` the active strategy
    pub fn set_strategy(&self, kind: QueryStrategyType) {
        self.lock().switch(kind);
    }

    /// PIDs of the active strategy
    pub fn get_ids(&self) -> BTreeSet<PidId> {
        self.lock().ids()
    }

    /// Built-in defaults of the active strategy
    pub fn get_defaults(&self) -> BTreeSet<PidId> {
        let state = self.lock();
        state
            .strategy(state.active)
            .map(|s| s.defaults())
            .unwrap_or_default()
    }

    /// Replace the caller-maintained selection of the active strategy
    pub fn update(&self, pids: BTreeSet<PidId>) {
        let mut state = self.lock();
        let active = state.active;
        if let Some(strategy) = state.strategies.get_mut(&active) {
            strategy.update(pids);
        }
    }

    /// Adopt the persisted selection of `screen`.
    ///
    /// In shared mode only the part of the selection already covered by the
    /// shared lists is returned; in individual mode the whole selection
    /// becomes the active query.
    pub fn apply(&self, screen: &str) -> BTreeSet<PidId> {
        let mut state = self.lock();
        let desired = state
            .settings
            .screen(screen)
            .map(|f| f.pids.clone())
            .unwrap_or_default();
        if desired.is_empty() {
            debug!("No persisted selection for screen {}", screen);
        }
        state.apply(&desired)
    }

    /// Same as [`Query::apply`] for an explicit id set
    pub fn apply_ids(&self, pids: &BTreeSet<PidId>) -> BTreeSet<PidId> {
        self.lock().apply(pids)
    }

    /// Persisted filter of `screen`
    pub fn screen_filter(&self, screen: &str) -> Option<ScreenFilter> {
        self.lock().settings.screen(screen).cloned()
    }

    /// Snapshot of the current settings
    pub fn settings(&self) -> QuerySettings {
        self.lock().settings.clone()
    }

    /// Adopt refreshed settings
    pub fn reload(&self, settings: QuerySettings) {
        debug!("Reloading query settings");
        self.lock().settings = settings;
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::new(QuerySettings::default())
    }
}
