//! Query Strategies
//!
//! Decides which parameter ids the engine actively requests. One strategy is
//! active per [`Query`] at a time; screens switch it through
//! [`Query::apply`] / [`Query::apply_ids`].

mod query;
mod settings;
mod strategy;

pub use query::Query;
pub use settings::{QuerySettings, ScreenFilter};
pub use strategy::{
    DragRaceQuery, DynamicQuery, IndividualQuery, PerformanceQuery, QueryStrategy,
    QueryStrategyType, SharedQuery, TripInfoQuery,
};

use thiserror::Error;

/// Query errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Unknown query strategy: {0}")]
    UnknownStrategy(String),
}

/// Well-known parameter ids (Mode 01 PID numbers)
pub mod pids {
    use obd_metrics::PidId;

    /// Calculated engine load
    pub const ENGINE_LOAD: PidId = 0x04;
    /// Engine coolant temperature
    pub const COOLANT_TEMP: PidId = 0x05;
    /// Intake manifold absolute pressure
    pub const INTAKE_PRESSURE: PidId = 0x0B;
    /// Engine RPM
    pub const ENGINE_SPEED: PidId = 0x0C;
    /// Vehicle speed
    pub const VEHICLE_SPEED: PidId = 0x0D;
    /// Intake air temperature
    pub const INTAKE_AIR_TEMP: PidId = 0x0F;
    /// Mass air flow rate
    pub const MAF: PidId = 0x10;
    /// Throttle position
    pub const THROTTLE_POSITION: PidId = 0x11;
    /// Fuel tank level
    pub const FUEL_LEVEL: PidId = 0x2F;
    /// Ambient air temperature
    pub const AMBIENT_AIR_TEMP: PidId = 0x46;
    /// Engine oil temperature
    pub const ENGINE_OIL_TEMP: PidId = 0x5C;
}
