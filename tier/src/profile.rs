use std::time::Duration;

use serde::Serialize;

use crate::Tier;

/// Immutable bundle of numeric limits for one tier.
///
/// Every field is non-decreasing from `UltraLow` to `High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierProfile {
    pub max_tree_nodes: u32,
    pub max_images: u32,
    pub max_canvases: u32,
    pub max_frames: u32,
    pub gc_interval_ms: u64,
    pub heap_warn_pct: u8,
    pub heap_crit_pct: u8,
    pub max_concurrent_timers: u32,
    pub viewport_margin_px: u32,
}

const ULTRA_LOW: TierProfile = TierProfile {
    max_tree_nodes: 800,
    max_images: 12,
    max_canvases: 2,
    max_frames: 1,
    gc_interval_ms: 3_000,
    heap_warn_pct: 55,
    heap_crit_pct: 70,
    max_concurrent_timers: 8,
    viewport_margin_px: 200,
};

const LOW: TierProfile = TierProfile {
    max_tree_nodes: 1_500,
    max_images: 25,
    max_canvases: 3,
    max_frames: 2,
    gc_interval_ms: 4_500,
    heap_warn_pct: 62,
    heap_crit_pct: 78,
    max_concurrent_timers: 15,
    viewport_margin_px: 350,
};

const MID: TierProfile = TierProfile {
    max_tree_nodes: 3_000,
    max_images: 50,
    max_canvases: 6,
    max_frames: 4,
    gc_interval_ms: 8_000,
    heap_warn_pct: 72,
    heap_crit_pct: 85,
    max_concurrent_timers: 30,
    viewport_margin_px: 500,
};

const HIGH: TierProfile = TierProfile {
    max_tree_nodes: 6_000,
    max_images: 100,
    max_canvases: 12,
    max_frames: 8,
    gc_interval_ms: 12_000,
    heap_warn_pct: 80,
    heap_crit_pct: 90,
    max_concurrent_timers: 60,
    viewport_margin_px: 700,
};

impl TierProfile {
    pub const fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::UltraLow => ULTRA_LOW,
            Tier::Low => LOW,
            Tier::Mid => MID,
            Tier::High => HIGH,
        }
    }

    /// Period of the pressure cycle.
    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    /// Viewport margin in pixels. Resources closer than this to the visible
    /// area are never evicted.
    pub fn margin(&self) -> f64 {
        f64::from(self.viewport_margin_px)
    }

    /// Numeric fields in declaration order, widened for comparison.
    pub fn fields(&self) -> [u64; 9] {
        [
            u64::from(self.max_tree_nodes),
            u64::from(self.max_images),
            u64::from(self.max_canvases),
            u64::from(self.max_frames),
            self.gc_interval_ms,
            u64::from(self.heap_warn_pct),
            u64::from(self.heap_crit_pct),
            u64::from(self.max_concurrent_timers),
            u64::from(self.viewport_margin_px),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_are_monotonic_in_tier_order() {
        for pair in Tier::ALL.windows(2) {
            let weaker = TierProfile::for_tier(pair[0]).fields();
            let stronger = TierProfile::for_tier(pair[1]).fields();
            for (index, (w, s)) in weaker.iter().zip(stronger.iter()).enumerate() {
                assert!(w <= s, "field {index} decreases from {:?} to {:?}", pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn critical_heap_is_above_warning_for_every_tier() {
        for tier in Tier::ALL {
            let profile = tier.profile();
            assert!(profile.heap_warn_pct < profile.heap_crit_pct);
        }
    }
}
