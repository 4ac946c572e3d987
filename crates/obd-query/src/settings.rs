//! Persisted query selections

use crate::pids;
use obd_metrics::PidId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Per-screen PID selection and display order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenFilter {
    /// PIDs the screen wants
    pub pids: BTreeSet<PidId>,
    /// Display order; ids not listed follow in id order
    pub order: Vec<PidId>,
}

impl ScreenFilter {
    /// Create a filter without explicit order
    pub fn new(pids: impl IntoIterator<Item = PidId>) -> Self {
        Self {
            pids: pids.into_iter().collect(),
            order: Vec::new(),
        }
    }

    /// Position map for the collector, `None` when no order is configured
    pub fn order_map(&self) -> Option<HashMap<PidId, usize>> {
        if self.order.is_empty() {
            return None;
        }
        Some(
            self.order
                .iter()
                .enumerate()
                .map(|(position, &pid)| (pid, position))
                .collect(),
        )
    }
}

/// Query-related configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Query each screen's own selection instead of the shared list (default: false)
    pub individual_per_view: bool,
    /// Shared selection polled every cycle (default: RPM, speed)
    pub fast_pids: BTreeSet<PidId>,
    /// Shared selection polled less often (default: coolant, intake air temp)
    pub slow_pids: BTreeSet<PidId>,
    /// Per-screen selections keyed by screen name (default: none)
    pub screens: HashMap<String, ScreenFilter>,
    /// Performance screen override; empty uses the built-in set (default: empty)
    pub performance_pids: BTreeSet<PidId>,
    /// Trip-info screen override; empty uses the built-in set (default: empty)
    pub trip_info_pids: BTreeSet<PidId>,
    /// Baseline of the dynamic selector (default: empty)
    pub dynamic_pids: BTreeSet<PidId>,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            individual_per_view: false,
            fast_pids: [pids::ENGINE_SPEED, pids::VEHICLE_SPEED].into_iter().collect(),
            slow_pids: [pids::COOLANT_TEMP, pids::INTAKE_AIR_TEMP].into_iter().collect(),
            screens: HashMap::new(),
            performance_pids: BTreeSet::new(),
            trip_info_pids: BTreeSet::new(),
            dynamic_pids: BTreeSet::new(),
        }
    }
}

impl QuerySettings {
    /// Union of the fast and slow lists
    pub fn shared_pids(&self) -> BTreeSet<PidId> {
        self.fast_pids.union(&self.slow_pids).copied().collect()
    }

    /// Selection persisted for `screen`
    pub fn screen(&self, screen: &str) -> Option<&ScreenFilter> {
        self.screens.get(screen)
    }
}
