//! Query strategy variants

use crate::pids;
use crate::settings::QuerySettings;
use crate::QueryError;
use obd_metrics::PidId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStrategyType {
    /// Union of the persisted fast/slow lists
    Shared,
    /// Each screen's own persisted selection
    Individual,
    /// RPM and vehicle speed only
    DragRace,
    Performance,
    TripInfo,
    /// Caller-maintained selection on top of a persisted baseline
    Dynamic,
}

impl QueryStrategyType {
    pub const ALL: [QueryStrategyType; 6] = [
        QueryStrategyType::Shared,
        QueryStrategyType::Individual,
        QueryStrategyType::DragRace,
        QueryStrategyType::Performance,
        QueryStrategyType::TripInfo,
        QueryStrategyType::Dynamic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStrategyType::Shared => "shared",
            QueryStrategyType::Individual => "individual",
            QueryStrategyType::DragRace => "drag_race",
            QueryStrategyType::Performance => "performance",
            QueryStrategyType::TripInfo => "trip_info",
            QueryStrategyType::Dynamic => "dynamic",
        }
    }

    /// Build a fresh strategy of this type
    pub fn build(&self) -> Box<dyn QueryStrategy> {
        match self {
            QueryStrategyType::Shared => Box::new(SharedQuery),
            QueryStrategyType::Individual => Box::new(IndividualQuery::default()),
            QueryStrategyType::DragRace => Box::new(DragRaceQuery),
            QueryStrategyType::Performance => Box::new(PerformanceQuery),
            QueryStrategyType::TripInfo => Box::new(TripInfoQuery),
            QueryStrategyType::Dynamic => Box::new(DynamicQuery::default()),
        }
    }
}

impl fmt::Display for QueryStrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryStrategyType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryStrategyType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| QueryError::UnknownStrategy(s.to_string()))
    }
}

/// Computes the active PID set for one feature
pub trait QueryStrategy: Send + Sync {
    /// PIDs to request, given the persisted settings
    fn pids(&self, settings: &QuerySettings) -> BTreeSet<PidId>;

    /// Built-in set used when nothing is persisted
    fn defaults(&self) -> BTreeSet<PidId> {
        BTreeSet::new()
    }

    /// Replace the caller-maintained selection, where the strategy has one
    fn update(&mut self, _pids: BTreeSet<PidId>) {}
}

/// Persisted override if present, built-in defaults otherwise
fn overridable(persisted: &BTreeSet<PidId>, defaults: BTreeSet<PidId>) -> BTreeSet<PidId> {
    if persisted.is_empty() {
        defaults
    } else {
        persisted.clone()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SharedQuery;

impl QueryStrategy for SharedQuery {
    fn pids(&self, settings: &QuerySettings) -> BTreeSet<PidId> {
        settings.shared_pids()
    }
}

#[derive(Debug, Default, Clone)]
pub struct IndividualQuery {
    selected: BTreeSet<PidId>,
}

impl QueryStrategy for IndividualQuery {
    fn pids(&self, _settings: &QuerySettings) -> BTreeSet<PidId> {
        self.selected.clone()
    }

    fn update(&mut self, pids: BTreeSet<PidId>) {
        self.selected = pids;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DragRaceQuery;

impl QueryStrategy for DragRaceQuery {
    fn pids(&self, _settings: &QuerySettings) -> BTreeSet<PidId> {
        self.defaults()
    }

    fn defaults(&self) -> BTreeSet<PidId> {
        [pids::ENGINE_SPEED, pids::VEHICLE_SPEED].into_iter().collect()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PerformanceQuery;

impl QueryStrategy for PerformanceQuery {
    fn pids(&self, settings: &QuerySettings) -> BTreeSet<PidId> {
        overridable(&settings.performance_pids, self.defaults())
    }

    fn defaults(&self) -> BTreeSet<PidId> {
        [
            pids::ENGINE_SPEED,
            pids::VEHICLE_SPEED,
            pids::ENGINE_LOAD,
            pids::THROTTLE_POSITION,
            pids::INTAKE_PRESSURE,
            pids::INTAKE_AIR_TEMP,
            pids::COOLANT_TEMP,
        ]
        .into_iter()
        .collect()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TripInfoQuery;

impl QueryStrategy for TripInfoQuery {
    fn pids(&self, settings: &QuerySettings) -> BTreeSet<PidId> {
        overridable(&settings.trip_info_pids, self.defaults())
    }

    fn defaults(&self) -> BTreeSet<PidId> {
        [
            pids::VEHICLE_SPEED,
            pids::FUEL_LEVEL,
            pids::COOLANT_TEMP,
            pids::ENGINE_OIL_TEMP,
            pids::AMBIENT_AIR_TEMP,
            pids::MAF,
        ]
        .into_iter()
        .collect()
    }
}

#[derive(Debug, Default, Clone)]
pub struct DynamicQuery {
    selected: BTreeSet<PidId>,
}

impl QueryStrategy for DynamicQuery {
    fn pids(&self, settings: &QuerySettings) -> BTreeSet<PidId> {
        settings.dynamic_pids.union(&self.selected).copied().collect()
    }

    fn update(&mut self, pids: BTreeSet<PidId>) {
        self.selected = pids;
    }
}
