//! Metric: one PID's latest reading plus mirrored statistics

use crate::diagnostics::{HistogramStats, PidDefinition, Reading};
use crate::PidId;
use serde::Serialize;

/// Stat-annotated view of one parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub pid: PidId,
    pub definition: PidDefinition,
    /// Latest reading, if any arrived yet
    pub reading: Option<Reading>,
    /// Latest decoded value (0 until data arrives)
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sampling rate in Hz
    pub rate: Option<f64>,
    /// Visible on the current screen
    pub enabled: bool,
    pub in_low_alert: bool,
    pub in_upper_alert: bool,
}

impl Metric {
    /// Create an empty metric, seeded from existing statistics if the
    /// session already has some
    pub fn new(definition: PidDefinition, stats: Option<HistogramStats>) -> Self {
        let stats = stats.unwrap_or_default();
        Self {
            pid: definition.id,
            definition,
            reading: None,
            value: stats.latest.unwrap_or(0.0),
            min: stats.min,
            max: stats.max,
            mean: stats.mean,
            rate: None,
            enabled: false,
            in_low_alert: false,
            in_upper_alert: false,
        }
    }

    /// Apply a reading and refreshed statistics. Does not touch `enabled`.
    pub fn update(&mut self, reading: Reading, stats: Option<HistogramStats>, rate: Option<f64>) {
        if let Some(value) = reading.value {
            self.value = value;
        }
        if let Some(stats) = stats {
            self.min = stats.min;
            self.max = stats.max;
            self.mean = stats.mean;
        }
        if rate.is_some() {
            self.rate = rate;
        }
        self.reading = Some(reading);
        self.refresh_alerts();
    }

    /// Whether either alert threshold is crossed
    pub fn in_alert(&self) -> bool {
        self.in_low_alert || self.in_upper_alert
    }

    fn refresh_alerts(&mut self) {
        let has_value = self.reading.as_ref().is_some_and(|r| r.value.is_some());
        self.in_low_alert = has_value
            && self
                .definition
                .alert_lower
                .is_some_and(|limit| self.value < limit);
        self.in_upper_alert = has_value
            && self
                .definition
                .alert_upper
                .is_some_and(|limit| self.value > limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coolant() -> PidDefinition {
        PidDefinition {
            alert_upper: Some(105.0),
            alert_lower: Some(-10.0),
            ..PidDefinition::unknown(6)
        }
    }

    fn reading(value: Option<f64>) -> Reading {
        Reading {
            pid: 6,
            value,
            timestamp_ms: 1000,
            raw_response: "41 05 73".to_string(),
        }
    }

    #[test]
    fn test_new_metric_defaults_to_zero() {
        let metric = Metric::new(coolant(), None);
        assert_eq!(metric.value, 0.0);
        assert_eq!(metric.mean, 0.0);
        assert!(metric.reading.is_none());
        assert!(!metric.enabled);
    }

    #[test]
    fn test_update_mirrors_stats() {
        let mut metric = Metric::new(coolant(), None);
        let stats = HistogramStats {
            min: 70.0,
            max: 90.0,
            mean: 82.5,
            latest: Some(75.0),
        };
        metric.update(reading(Some(75.0)), Some(stats), Some(4.8));
        assert_eq!(metric.value, 75.0);
        assert_eq!(metric.min, 70.0);
        assert_eq!(metric.max, 90.0);
        assert_eq!(metric.mean, 82.5);
        assert_eq!(metric.rate, Some(4.8));
        assert!(!metric.in_alert());
    }

    #[test]
    fn test_upper_alert() {
        let mut metric = Metric::new(coolant(), None);
        metric.update(reading(Some(110.0)), None, None);
        assert!(metric.in_upper_alert);
        assert!(!metric.in_low_alert);
    }

    #[test]
    fn test_no_data_keeps_previous_value() {
        let mut metric = Metric::new(coolant(), None);
        metric.update(reading(Some(88.0)), None, None);
        metric.update(reading(None), None, None);
        assert_eq!(metric.value, 88.0);
        assert!(!metric.in_alert());
    }
}
