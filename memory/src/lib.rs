use serde::{Deserialize, Serialize};

pub mod monitor;
pub mod pressure;
pub mod set;
pub mod tracker;
pub mod trackers;

pub use monitor::{CycleReport, GcCycleStats, PressureMonitor};
pub use pressure::{PressureLevel, PressureSignals};
pub use set::{PassOutcome, TrackerSet};
pub use tracker::{EvictionLedger, ResourceTracker, SweepContext, SweepError, TrackedResource};

/// Resource families the governor releases, used to key counters and to
/// select which trackers take part in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Image,
    Frame,
    Canvas,
    Video,
    Fragment,
    Socket,
    Blob,
    StoreItem,
    SessionEntry,
    Timer,
}

impl ResourceKind {
    pub fn all() -> [ResourceKind; 10] {
        [
            ResourceKind::Image,
            ResourceKind::Frame,
            ResourceKind::Canvas,
            ResourceKind::Video,
            ResourceKind::Fragment,
            ResourceKind::Socket,
            ResourceKind::Blob,
            ResourceKind::StoreItem,
            ResourceKind::SessionEntry,
            ResourceKind::Timer,
        ]
    }
}

/// Per-kind resource counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionCounters {
    pub images: u64,
    pub frames: u64,
    pub canvases: u64,
    pub videos: u64,
    pub fragments: u64,
    pub sockets: u64,
    pub blobs: u64,
    pub store_items: u64,
    pub session_entries: u64,
    pub timers: u64,
}

impl EvictionCounters {
    pub fn total(self) -> u64 {
        ResourceKind::all().iter().map(|kind| self.get(*kind)).sum()
    }

    pub fn get(self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Image => self.images,
            ResourceKind::Frame => self.frames,
            ResourceKind::Canvas => self.canvases,
            ResourceKind::Video => self.videos,
            ResourceKind::Fragment => self.fragments,
            ResourceKind::Socket => self.sockets,
            ResourceKind::Blob => self.blobs,
            ResourceKind::StoreItem => self.store_items,
            ResourceKind::SessionEntry => self.session_entries,
            ResourceKind::Timer => self.timers,
        }
    }

    pub fn add(&mut self, kind: ResourceKind, count: u64) {
        let slot = match kind {
            ResourceKind::Image => &mut self.images,
            ResourceKind::Frame => &mut self.frames,
            ResourceKind::Canvas => &mut self.canvases,
            ResourceKind::Video => &mut self.videos,
            ResourceKind::Fragment => &mut self.fragments,
            ResourceKind::Socket => &mut self.sockets,
            ResourceKind::Blob => &mut self.blobs,
            ResourceKind::StoreItem => &mut self.store_items,
            ResourceKind::SessionEntry => &mut self.session_entries,
            ResourceKind::Timer => &mut self.timers,
        };
        *slot = slot.saturating_add(count);
    }

    /// Adds every count of `other` into `self`.
    pub fn merge(&mut self, other: &EvictionCounters) {
        for kind in ResourceKind::all() {
            self.add(kind, other.get(kind));
        }
    }
}
