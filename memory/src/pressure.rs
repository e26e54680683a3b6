use serde::{Deserialize, Serialize};
use tier::TierProfile;

use host::HeapSample;

/// Open duplex sockets above this count raise a warning.
pub const SOCKET_WARN_COUNT: usize = 6;
/// Open duplex sockets above this count are critical.
pub const SOCKET_CRIT_COUNT: usize = 10;

/// Graded assessment of resource strain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl PressureLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            PressureLevel::Normal => "normal",
            PressureLevel::Warning => "warning",
            PressureLevel::Critical => "critical",
        }
    }
}

/// Raw signals sampled at the start of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PressureSignals {
    pub heap: Option<HeapSample>,
    pub tree_nodes: usize,
    pub active_sockets: usize,
    /// Heuristic estimate in MB with the ceiling it is judged against.
    /// Only present when the host has no heap introspection.
    pub heuristic: Option<HeuristicEstimate>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicEstimate {
    pub estimated_mb: f64,
    pub ceiling_mb: u32,
}

impl HeuristicEstimate {
    /// Rough footprint: every 500 tree nodes ~1 MB, every live frame ~10 MB,
    /// every canvas ~5 MB.
    pub fn from_counts(tree_nodes: usize, active_frames: usize, canvases: usize, ceiling_mb: u32) -> Self {
        let estimated_mb =
            tree_nodes as f64 / 500.0 + active_frames as f64 * 10.0 + canvases as f64 * 5.0;
        Self {
            estimated_mb,
            ceiling_mb,
        }
    }

    pub fn level(&self) -> PressureLevel {
        let ceiling = f64::from(self.ceiling_mb);
        if self.estimated_mb > ceiling * 0.9 {
            PressureLevel::Critical
        } else if self.estimated_mb > ceiling * 0.7 {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }
}

impl PressureSignals {
    /// Worst level across every available signal.
    pub fn level(&self, profile: &TierProfile) -> PressureLevel {
        let heap = self
            .heap
            .map(|sample| heap_level(sample.percent(), profile))
            .unwrap_or_default();
        let heuristic = self.heuristic.map(|estimate| estimate.level()).unwrap_or_default();
        heap.max(heuristic)
            .max(tree_level(self.tree_nodes, profile))
            .max(socket_level(self.active_sockets))
    }
}

pub fn heap_level(percent: u8, profile: &TierProfile) -> PressureLevel {
    if percent >= profile.heap_crit_pct {
        PressureLevel::Critical
    } else if percent >= profile.heap_warn_pct {
        PressureLevel::Warning
    } else {
        PressureLevel::Normal
    }
}

/// Critical from 1.3x the profile limit, inclusive.
pub fn tree_level(nodes: usize, profile: &TierProfile) -> PressureLevel {
    let max = profile.max_tree_nodes as usize;
    if nodes.saturating_mul(10) >= max.saturating_mul(13) {
        PressureLevel::Critical
    } else if nodes > max {
        PressureLevel::Warning
    } else {
        PressureLevel::Normal
    }
}

pub fn socket_level(open: usize) -> PressureLevel {
    if open > SOCKET_CRIT_COUNT {
        PressureLevel::Critical
    } else if open > SOCKET_WARN_COUNT {
        PressureLevel::Warning
    } else {
        PressureLevel::Normal
    }
}
