use std::cell::RefCell;
use std::rc::Rc;

use memory::{CycleReport, EvictionCounters, GcCycleStats, PassOutcome, ResourceKind};
use serde::Serialize;
use tier::{Classification, Tier, TierProfile};

/// Point-in-time view of the governor for debugging.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub tier: Tier,
    pub profile: TierProfile,
    pub classification: Classification,
    /// Tier before a jank escalation, if one happened.
    pub escalated_from: Option<Tier>,
    pub hidden: bool,
    pub cycles: u64,
    pub evicted: EvictionCounters,
    pub restored: EvictionCounters,
    /// Trackers skipped after failing, across all passes.
    pub tracker_failures: u64,
    pub emergencies: u64,
    /// Total from the most recent accurate memory measurement.
    pub measured_mb: Option<u64>,
    pub last_stats: Option<GcCycleStats>,
}

impl Telemetry {
    fn new(classification: Classification) -> Self {
        Self {
            tier: classification.tier,
            profile: classification.tier.profile(),
            classification,
            escalated_from: None,
            hidden: false,
            cycles: 0,
            evicted: EvictionCounters::default(),
            restored: EvictionCounters::default(),
            tracker_failures: 0,
            emergencies: 0,
            measured_mb: None,
            last_stats: None,
        }
    }
}

/// Read-only handle to the governor's published state. Clones observe the
/// same governor; nothing on the handle feeds back into control.
#[derive(Debug, Clone)]
pub struct GovernorHandle {
    inner: Rc<RefCell<Telemetry>>,
}

impl GovernorHandle {
    pub(crate) fn new(classification: Classification) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Telemetry::new(classification))),
        }
    }

    pub fn snapshot(&self) -> Telemetry {
        self.inner.borrow().clone()
    }

    pub fn tier(&self) -> Tier {
        self.inner.borrow().tier
    }

    pub fn profile(&self) -> TierProfile {
        self.inner.borrow().profile
    }

    pub fn cycles(&self) -> u64 {
        self.inner.borrow().cycles
    }

    pub fn evicted(&self) -> EvictionCounters {
        self.inner.borrow().evicted
    }

    pub fn restored(&self) -> EvictionCounters {
        self.inner.borrow().restored
    }

    pub fn last_stats(&self) -> Option<GcCycleStats> {
        self.inner.borrow().last_stats
    }

    pub fn escalated_from(&self) -> Option<Tier> {
        self.inner.borrow().escalated_from
    }

    pub fn is_hidden(&self) -> bool {
        self.inner.borrow().hidden
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.inner.borrow())
    }

    pub(crate) fn record_cycle(&self, report: &CycleReport) {
        let mut telemetry = self.inner.borrow_mut();
        telemetry.cycles = report.stats.cycle_count;
        telemetry.evicted.merge(&report.evicted);
        telemetry.restored.merge(&report.restored);
        telemetry.tracker_failures += report.failures as u64;
        telemetry.last_stats = Some(report.stats);
    }

    pub(crate) fn record_sweep(&self, outcome: &PassOutcome) {
        let mut telemetry = self.inner.borrow_mut();
        telemetry.evicted.merge(&outcome.counts);
        telemetry.tracker_failures += outcome.failures as u64;
    }

    pub(crate) fn record_restore(&self, outcome: &PassOutcome) {
        let mut telemetry = self.inner.borrow_mut();
        telemetry.restored.merge(&outcome.counts);
        telemetry.tracker_failures += outcome.failures as u64;
    }

    pub(crate) fn record_escalation(&self, from: Tier, to: Tier) {
        let mut telemetry = self.inner.borrow_mut();
        telemetry.escalated_from = Some(from);
        telemetry.tier = to;
        telemetry.profile = to.profile();
    }

    pub(crate) fn record_hidden(&self, hidden: bool) {
        self.inner.borrow_mut().hidden = hidden;
    }

    pub(crate) fn record_emergency(&self) {
        self.inner.borrow_mut().emergencies += 1;
    }

    pub(crate) fn record_evicted(&self, kind: ResourceKind, count: usize) {
        self.inner.borrow_mut().evicted.add(kind, count as u64);
    }

    pub(crate) fn record_measured(&self, total_mb: u64) {
        self.inner.borrow_mut().measured_mb = Some(total_mb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tier::{classify, DeviceSignals};

    #[test]
    fn clones_share_state() {
        let handle = GovernorHandle::new(classify(&DeviceSignals::default()));
        let observer = handle.clone();
        handle.record_escalation(Tier::Mid, Tier::Low);
        handle.record_emergency();

        assert_eq!(observer.tier(), Tier::Low);
        assert_eq!(observer.escalated_from(), Some(Tier::Mid));
        assert_eq!(observer.profile().max_tree_nodes, 1_500);
        assert_eq!(observer.snapshot().emergencies, 1);
    }

    #[test]
    fn json_uses_camel_case() {
        let handle = GovernorHandle::new(classify(&DeviceSignals::default()));
        let json: serde_json::Value = serde_json::from_str(&handle.to_json().unwrap()).unwrap();
        assert_eq!(json["tier"], "mid");
        assert_eq!(json["escalatedFrom"], serde_json::Value::Null);
        assert_eq!(json["evicted"]["images"], 0);
    }
}
