use std::collections::BTreeMap;

use host::{ElementId, HostError, Page};
use scheduler::Timestamp;
use storage::StorageError;
use tier::{Platform, Tier};

use crate::pressure::PressureLevel;
use crate::ResourceKind;

/// Failure inside one tracker's pass. Never escapes the tracker set.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0} is borrowed elsewhere")]
    Busy(String),
}

/// Everything a tracker needs to judge one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepContext {
    pub level: PressureLevel,
    /// Base viewport margin in CSS pixels; trackers may tighten it.
    pub margin_px: f64,
    pub now: Timestamp,
    /// True while the page is hidden or being torn down.
    pub hidden: bool,
    pub tier: Tier,
    pub platform: Platform,
}

impl SweepContext {
    pub fn new(tier: Tier, platform: Platform, now: Timestamp) -> Self {
        Self {
            level: PressureLevel::Normal,
            margin_px: tier.profile().margin(),
            now,
            hidden: false,
            tier,
            platform,
        }
    }

    pub fn with_level(mut self, level: PressureLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_margin(mut self, margin_px: f64) -> Self {
        self.margin_px = margin_px;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    /// Margin for trackers that tighten to 50px under critical pressure.
    pub fn critical_margin(&self) -> f64 {
        if self.level == PressureLevel::Critical {
            self.margin_px.min(50.0)
        } else {
            self.margin_px
        }
    }
}

/// Uniform contract implemented by every resource tracker.
pub trait ResourceTracker {
    fn kind(&self) -> ResourceKind;

    /// Releases what the context allows. Returns the number of resources
    /// released by this pass; resources already released are not counted.
    fn sweep(&mut self, page: &mut dyn Page, ctx: &SweepContext) -> Result<usize, SweepError>;

    /// Brings previously released resources back where the context allows.
    fn restore(&mut self, _page: &mut dyn Page, _ctx: &SweepContext) -> Result<usize, SweepError> {
        Ok(0)
    }

    /// Number of entries the tracker currently holds.
    fn tracked(&self) -> usize;
}

/// A released resource and the state needed to bring it back.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedResource<S> {
    pub id: ElementId,
    pub original: S,
    pub captured_at: Timestamp,
}

/// Released resources keyed by element, in document order.
///
/// An element has at most one entry, so a second sweep cannot overwrite the
/// original snapshot with the placeholder state.
#[derive(Debug, Clone)]
pub struct EvictionLedger<S> {
    entries: BTreeMap<ElementId, TrackedResource<S>>,
}

impl<S> EvictionLedger<S> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Records `original` for `id`. Returns false if `id` is already held.
    pub fn insert(&mut self, id: ElementId, original: S, now: Timestamp) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(
            id,
            TrackedResource {
                id,
                original,
                captured_at: now,
            },
        );
        true
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: ElementId) -> Option<&TrackedResource<S>> {
        self.entries.get(&id)
    }

    pub fn take(&mut self, id: ElementId) -> Option<TrackedResource<S>> {
        self.entries.remove(&id)
    }

    pub fn ids(&self) -> Vec<ElementId> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S> Default for EvictionLedger<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Treats a detached element as absent instead of as a failure.
pub(crate) fn attached<T>(result: Result<T, HostError>) -> Result<Option<T>, SweepError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(HostError::Detached(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
