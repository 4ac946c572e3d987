//! Metrics Collector Implementation

use crate::diagnostics::{Diagnostics, PidDefinition, PidRegistry, Reading};
use crate::metric::Metric;
use crate::PidId;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Transient per-session counters, cleared when a session stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Readings accepted since the session started
    pub readings: u64,
    /// Timestamp of the last accepted reading (Unix ms)
    pub last_timestamp_ms: Option<u64>,
    /// Times a metric crossed into an alert threshold
    pub alerts: u64,
}

/// In-memory map from PID to [`Metric`], shared by all screens.
///
/// Entries are created lazily and never removed; switching screens only
/// toggles `enabled`. All mutation happens under one write lock, readers get
/// cloned snapshots.
pub struct MetricsCollector {
    metrics: RwLock<IndexMap<PidId, Metric>>,
    registry: Arc<dyn PidRegistry>,
    diagnostics: Arc<dyn Diagnostics>,
    session: Mutex<SessionStats>,
    /// Ids the registry could not resolve; not looked up again
    unresolved: Mutex<BTreeSet<PidId>>,
}

impl MetricsCollector {
    /// Create an empty collector
    pub fn new(registry: Arc<dyn PidRegistry>, diagnostics: Arc<dyn Diagnostics>) -> Self {
        info!("Creating metrics collector");
        Self {
            metrics: RwLock::new(IndexMap::new()),
            registry,
            diagnostics,
            session: Mutex::new(SessionStats::default()),
            unresolved: Mutex::new(BTreeSet::new()),
        }
    }

    fn read_map(&self) -> RwLockReadGuard<'_, IndexMap<PidId, Metric>> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, IndexMap<PidId, Metric>> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `enabled` the visible set, creating missing entries and
    /// optionally re-sorting by `order` (id → position; ids without a
    /// position follow in id order).
    ///
    /// Returns the number of entries created.
    pub fn apply_filter(
        &self,
        enabled: &BTreeSet<PidId>,
        order: Option<&HashMap<PidId, usize>>,
    ) -> usize {
        let mut metrics = self.write_map();

        let mut created = 0;
        let mut unresolved = self.unresolved.lock().unwrap_or_else(PoisonError::into_inner);
        let missing: Vec<PidId> = enabled
            .iter()
            .copied()
            .filter(|pid| !metrics.contains_key(pid) && !unresolved.contains(pid))
            .collect();
        if !missing.is_empty() {
            for pid in missing {
                match self.registry.find_by(pid) {
                    Some(definition) => {
                        let stats = self.diagnostics.histogram(pid);
                        metrics.insert(pid, Metric::new(definition, stats));
                        created += 1;
                    }
                    None => {
                        warn!("No PID definition for {}, not tracked", pid);
                        unresolved.insert(pid);
                    }
                }
            }
            debug!("Metrics map rebuilt, {} entries created", created);
        }
        drop(unresolved);

        if let Some(order) = order {
            metrics.sort_by(|a, _, b, _| {
                let pa = order.get(a).copied().unwrap_or(usize::MAX);
                let pb = order.get(b).copied().unwrap_or(usize::MAX);
                pa.cmp(&pb).then(a.cmp(b))
            });
        }

        for (pid, metric) in metrics.iter_mut() {
            metric.enabled = enabled.contains(pid);
        }

        created
    }

    /// Apply one reading. Unknown ids are only tracked when `force_append`
    /// is set. Returns whether the reading was stored.
    pub fn append(&self, reading: Reading, force_append: bool) -> bool {
        let pid = reading.pid;
        let timestamp_ms = reading.timestamp_ms;
        let stats = self.diagnostics.histogram(pid);
        let rate = self.diagnostics.rate(pid);

        let mut alerted = false;
        {
            let mut metrics = self.write_map();
            if !metrics.contains_key(&pid) {
                if !force_append {
                    return false;
                }
                let definition = self
                    .registry
                    .find_by(pid)
                    .unwrap_or_else(|| PidDefinition::unknown(pid));
                let mut metric = Metric::new(definition, None);
                metric.enabled = true;
                debug!("Force-tracking PID {}", pid);
                metrics.insert(pid, metric);
            }
            if let Some(metric) = metrics.get_mut(&pid) {
                let was_alert = metric.in_alert();
                metric.update(reading, stats, rate);
                if !was_alert && metric.in_alert() {
                    warn!(
                        "{} out of range: {} {}",
                        metric.definition.description, metric.value, metric.definition.units
                    );
                    alerted = true;
                }
            }
        }

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        session.readings += 1;
        session.last_timestamp_ms = Some(timestamp_ms);
        if alerted {
            session.alerts += 1;
        }
        true
    }

    /// Snapshot of one metric whose `enabled` flag equals `enabled`
    pub fn get_metric(&self, pid: PidId, enabled: bool) -> Option<Metric> {
        self.read_map()
            .get(&pid)
            .filter(|m| m.enabled == enabled)
            .cloned()
    }

    /// Snapshot of all metrics whose `enabled` flag equals `enabled`, in map order
    pub fn get_metrics(&self, enabled: bool) -> Vec<Metric> {
        self.read_map()
            .values()
            .filter(|m| m.enabled == enabled)
            .cloned()
            .collect()
    }

    /// Ids of all tracked metrics, in map order
    pub fn pids(&self) -> Vec<PidId> {
        self.read_map().keys().copied().collect()
    }

    /// Number of tracked metrics
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    /// Check if no metric is tracked yet
    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    /// Per-session counters
    pub fn session_stats(&self) -> SessionStats {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear per-session state; the metric map is kept
    pub fn reset_session(&self) {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Resetting session stats after {} readings", session.readings);
        *session = SessionStats::default();
    }
}
