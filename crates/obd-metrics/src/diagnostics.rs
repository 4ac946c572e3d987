//! Contracts of the external telemetry library
//!
//! PID metadata, readings and per-session statistics are owned by the query
//! engine. The collector only consumes them through these narrow interfaces.

use crate::PidId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of value a PID decodes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    Double,
    Int,
    Short,
}

/// Parameter metadata from the PID definition registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidDefinition {
    pub id: PidId,
    pub description: String,
    pub units: String,
    #[serde(default)]
    pub value_type: ValueType,
    pub min: f64,
    pub max: f64,
    /// Readings below this raise the low alert
    #[serde(default)]
    pub alert_lower: Option<f64>,
    /// Readings above this raise the upper alert
    #[serde(default)]
    pub alert_upper: Option<f64>,
}

impl PidDefinition {
    /// Placeholder for ids the registry does not know
    pub fn unknown(id: PidId) -> Self {
        Self {
            id,
            description: format!("PID {}", id),
            units: String::new(),
            value_type: ValueType::Double,
            min: 0.0,
            max: 0.0,
            alert_lower: None,
            alert_upper: None,
        }
    }
}

/// One reading accepted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub pid: PidId,
    /// Decoded value; `None` when the adapter answered without data
    pub value: Option<f64>,
    /// Timestamp when the response was received (Unix ms)
    pub timestamp_ms: u64,
    /// Raw adapter response, e.g. `"41 05 73"`
    pub raw_response: String,
}

/// Running statistics for one PID in the current session
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HistogramStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub latest: Option<f64>,
}

/// Histogram and sampling-rate supplier
pub trait Diagnostics: Send + Sync {
    /// Session min/max/mean for `pid`
    fn histogram(&self, pid: PidId) -> Option<HistogramStats>;

    /// Current sampling rate for `pid` in Hz
    fn rate(&self, pid: PidId) -> Option<f64>;
}

/// PID definition registry
pub trait PidRegistry: Send + Sync {
    fn find_by(&self, pid: PidId) -> Option<PidDefinition>;
}

/// Registry over a fixed set of definitions
#[derive(Debug, Clone, Default)]
pub struct StaticPidRegistry {
    definitions: HashMap<PidId, PidDefinition>,
}

impl StaticPidRegistry {
    /// Build a registry from definitions; later duplicates win
    pub fn new(definitions: impl IntoIterator<Item = PidDefinition>) -> Self {
        Self {
            definitions: definitions.into_iter().map(|d| (d.id, d)).collect(),
        }
    }

    /// Number of known definitions
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl PidRegistry for StaticPidRegistry {
    fn find_by(&self, pid: PidId) -> Option<PidDefinition> {
        self.definitions.get(&pid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_defaults_from_json() {
        let json = r#"{"id": 6, "description": "Coolant", "units": "°C", "min": -40, "max": 215}"#;
        let def: PidDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.value_type, ValueType::Double);
        assert_eq!(def.alert_upper, None);
        assert_eq!(def.max, 215.0);
    }

    #[test]
    fn test_static_registry_lookup() {
        let registry = StaticPidRegistry::new([PidDefinition::unknown(13), PidDefinition::unknown(14)]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find_by(13).map(|d| d.id), Some(13));
        assert!(registry.find_by(99).is_none());
    }
}
