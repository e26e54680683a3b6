use host::{ElementKind, Page};
use scheduler::Timestamp;
use serde::Serialize;
use tier::{Classification, Platform, Tier, TierProfile};
use tracing::{debug, info};

use crate::pressure::{HeuristicEstimate, PressureLevel, PressureSignals};
use crate::set::{PassOutcome, TrackerSet, RESTORABLE};
use crate::trackers::FrameTracker;
use crate::tracker::SweepContext;
use crate::{EvictionCounters, ResourceKind};

/// Kinds swept on every cycle.
const CYCLE_SWEEP: [ResourceKind; 7] = [
    ResourceKind::Image,
    ResourceKind::Frame,
    ResourceKind::Canvas,
    ResourceKind::Video,
    ResourceKind::Fragment,
    ResourceKind::Socket,
    ResourceKind::Blob,
];

/// Extra kinds swept only under critical pressure.
const CRITICAL_SWEEP: [ResourceKind; 2] = [ResourceKind::StoreItem, ResourceKind::SessionEntry];

/// Snapshot published after every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcCycleStats {
    pub heap_used_mb: u64,
    pub heap_pct: u8,
    pub tree_node_count: usize,
    pub level: PressureLevel,
    pub tier: Tier,
    pub cycle_count: u64,
    /// Open sockets as sampled before the sweep.
    pub active_sockets: usize,
    /// Live frames left by the sweep.
    pub active_frames: usize,
    /// Heuristic footprint estimate, where it applies.
    pub heuristic_mb: Option<u64>,
    pub timestamp_ms: u64,
}

/// Everything one cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub stats: GcCycleStats,
    pub restored: EvictionCounters,
    pub evicted: EvictionCounters,
    /// Trackers that failed and were skipped.
    pub failures: usize,
    pub collection_requested: bool,
}

/// Samples pressure signals and drives the trackers on the tier's interval.
///
/// Every entry point, periodic or not, goes through the same
/// time-since-last-run guard, so the full cycle never runs more than once
/// per interval.
#[derive(Debug)]
pub struct PressureMonitor {
    tier: Tier,
    profile: TierProfile,
    platform: Platform,
    heuristic_ceiling_mb: Option<u32>,
    last_run: Option<Timestamp>,
    cycles: u64,
    last_stats: Option<GcCycleStats>,
}

impl PressureMonitor {
    pub fn new(classification: &Classification) -> Self {
        Self {
            tier: classification.tier,
            profile: classification.tier.profile(),
            platform: classification.platform,
            heuristic_ceiling_mb: classification.heuristic_ceiling_mb,
            last_run: None,
            cycles: 0,
            last_stats: None,
        }
    }

    /// Tier the thresholds are currently derived from. Changes only through
    /// [`PressureMonitor::retier`].
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Thresholds for the current tier.
    pub fn profile(&self) -> &TierProfile {
        &self.profile
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Completed cycles since creation.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Stats of the most recent cycle, `None` before the first one.
    pub fn last_stats(&self) -> Option<&GcCycleStats> {
        self.last_stats.as_ref()
    }

    /// Switches to a new tier; the next cycle uses its profile.
    pub fn retier(&mut self, tier: Tier) {
        if tier != self.tier {
            info!(from = %self.tier, to = %tier, "pressure monitor re-tiered");
        }
        self.tier = tier;
        self.profile = tier.profile();
    }

    /// True when the guard would let a cycle run at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        match self.last_run {
            Some(last) => now.saturating_since(last) >= self.profile.gc_interval(),
            None => true,
        }
    }

    /// Context with this monitor's tier, platform and margin.
    pub fn context(&self, now: Timestamp) -> SweepContext {
        SweepContext::new(self.tier, self.platform, now)
    }

    /// Samples every signal. Sampling failures count as zero.
    pub fn sample(&self, page: &dyn Page, trackers: &TrackerSet) -> PressureSignals {
        let heap = page.heap();
        let tree_nodes = page.tree_node_count().unwrap_or_else(|err| {
            debug!(error = %err, "tree size unavailable");
            0
        });
        let heuristic = match (heap, self.heuristic_ceiling_mb) {
            (None, Some(ceiling_mb)) => {
                let frames = FrameTracker::live_in(page).unwrap_or_else(|err| {
                    debug!(error = %err, "frame count unavailable");
                    0
                });
                let canvases = page
                    .elements(ElementKind::Canvas)
                    .map(|ids| ids.len())
                    .unwrap_or(0);
                Some(HeuristicEstimate::from_counts(tree_nodes, frames, canvases, ceiling_mb))
            }
            _ => None,
        };
        PressureSignals {
            heap,
            tree_nodes,
            active_sockets: trackers.active_sockets(),
            heuristic,
        }
    }

    /// Runs one guarded cycle. Returns `None` when the previous cycle ran
    /// less than one interval ago.
    pub fn run_cycle(
        &mut self,
        page: &mut dyn Page,
        trackers: &mut TrackerSet,
        now: Timestamp,
        hidden: bool,
    ) -> Option<CycleReport> {
        if !self.is_due(now) {
            return None;
        }
        self.last_run = Some(now);
        self.cycles += 1;

        let signals = self.sample(page, trackers);
        let level = signals.level(&self.profile);
        let ctx = self.context(now).with_level(level).hidden(hidden);

        // Restore first so self-healing is not starved by eviction. A hidden
        // page keeps everything released.
        let restored = if hidden {
            PassOutcome::default()
        } else {
            trackers.restore(page, &ctx, &RESTORABLE)
        };
        let mut kinds = CYCLE_SWEEP.to_vec();
        if level == PressureLevel::Critical {
            kinds.extend_from_slice(&CRITICAL_SWEEP);
        }
        let evicted = trackers.sweep(page, &ctx, &kinds);

        let collection_requested = level == PressureLevel::Critical && page.request_collection();

        let stats = GcCycleStats {
            heap_used_mb: signals.heap.map(|heap| heap.used_mb()).unwrap_or(0),
            heap_pct: signals.heap.map(|heap| heap.percent()).unwrap_or(0),
            tree_node_count: signals.tree_nodes,
            level,
            tier: self.tier,
            cycle_count: self.cycles,
            active_sockets: signals.active_sockets,
            active_frames: trackers.active_frames(),
            heuristic_mb: signals
                .heuristic
                .map(|estimate| estimate.estimated_mb.round() as u64),
            timestamp_ms: now.as_millis(),
        };
        self.last_stats = Some(stats);

        debug!(
            cycle = self.cycles,
            level = level.as_str(),
            heap_mb = stats.heap_used_mb,
            tree_nodes = stats.tree_node_count,
            sockets = stats.active_sockets,
            frames = stats.active_frames,
            evicted = evicted.counts.total(),
            restored = restored.counts.total(),
            "gc cycle"
        );
        if level == PressureLevel::Critical {
            info!(
                heap_mb = stats.heap_used_mb,
                tree_nodes = stats.tree_node_count,
                sockets = stats.active_sockets,
                "critical memory cleanup"
            );
        }

        Some(CycleReport {
            stats,
            restored: restored.counts,
            evicted: evicted.counts,
            failures: restored.failures + evicted.failures,
            collection_requested,
        })
    }
}
