use std::cell::RefCell;
use std::rc::Rc;

use host::{Blob, HostError, ObjectUrlAllocator, Page, SocketConnector};
use scheduler::Timestamp;
use storage::SessionStore;
use tracing::debug;

use crate::tracker::{ResourceTracker, SweepContext};
use crate::trackers::{
    BlobAllocation, BlobTracker, CanvasTracker, FrameTracker, HistoryCollection, ImageTracker,
    LeakSweepTracker, SessionEntryTracker, SocketHandle, SocketTracker, StoreArrayTracker,
    VideoTracker,
};
use crate::{EvictionCounters, ResourceKind};

/// Trackers with a restore half, in pass order.
pub const RESTORABLE: [ResourceKind; 4] = [
    ResourceKind::Image,
    ResourceKind::Frame,
    ResourceKind::Canvas,
    ResourceKind::Video,
];

/// Counts and failures from one pass over the trackers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub counts: EvictionCounters,
    /// Trackers whose pass failed and was skipped.
    pub failures: usize,
}

/// Every resource tracker, owned together so passes run in a fixed order:
/// image, frame, canvas, video, leak sweep, socket, blob, store arrays,
/// session entries.
pub struct TrackerSet {
    images: ImageTracker,
    frames: FrameTracker,
    canvases: CanvasTracker,
    videos: VideoTracker,
    fragments: LeakSweepTracker,
    sockets: SocketTracker,
    blobs: BlobTracker,
    stores: StoreArrayTracker,
    session: SessionEntryTracker,
}

impl TrackerSet {
    pub fn new(
        connector: Box<dyn SocketConnector>,
        allocator: Box<dyn ObjectUrlAllocator>,
        blob_capacity: usize,
        session: Box<dyn SessionStore>,
    ) -> Self {
        Self {
            images: ImageTracker::new(),
            frames: FrameTracker::new(),
            canvases: CanvasTracker::new(),
            videos: VideoTracker::new(),
            fragments: LeakSweepTracker::new(),
            sockets: SocketTracker::new(connector),
            blobs: BlobTracker::new(allocator, blob_capacity),
            stores: StoreArrayTracker::new(),
            session: SessionEntryTracker::new(session),
        }
    }

    fn ordered(&mut self) -> [&mut dyn ResourceTracker; 9] {
        [
            &mut self.images,
            &mut self.frames,
            &mut self.canvases,
            &mut self.videos,
            &mut self.fragments,
            &mut self.sockets,
            &mut self.blobs,
            &mut self.stores,
            &mut self.session,
        ]
    }

    /// Runs `sweep` on every tracker whose kind is in `kinds`. A failing
    /// tracker is logged and skipped; the others still run.
    pub fn sweep(
        &mut self,
        page: &mut dyn Page,
        ctx: &SweepContext,
        kinds: &[ResourceKind],
    ) -> PassOutcome {
        let mut outcome = PassOutcome::default();
        for tracker in self.ordered() {
            let kind = tracker.kind();
            if !kinds.contains(&kind) {
                continue;
            }
            match tracker.sweep(page, ctx) {
                Ok(count) => outcome.counts.add(kind, count as u64),
                Err(err) => {
                    debug!(?kind, error = %err, "sweep failed");
                    outcome.failures += 1;
                }
            }
        }
        outcome
    }

    /// Runs `restore` on every selected tracker, with the same isolation as
    /// [`TrackerSet::sweep`].
    pub fn restore(
        &mut self,
        page: &mut dyn Page,
        ctx: &SweepContext,
        kinds: &[ResourceKind],
    ) -> PassOutcome {
        let mut outcome = PassOutcome::default();
        for tracker in self.ordered() {
            let kind = tracker.kind();
            if !kinds.contains(&kind) {
                continue;
            }
            match tracker.restore(page, ctx) {
                Ok(count) => outcome.counts.add(kind, count as u64),
                Err(err) => {
                    debug!(?kind, error = %err, "restore failed");
                    outcome.failures += 1;
                }
            }
        }
        outcome
    }

    pub fn open_socket(
        &mut self,
        url: &str,
        protocols: &[String],
        now: Timestamp,
    ) -> Result<SocketHandle, HostError> {
        self.sockets.open(url, protocols, now)
    }

    pub fn allocate_blob(&mut self, blob: &Blob, now: Timestamp) -> Result<BlobAllocation, HostError> {
        self.blobs.allocate(blob, now)
    }

    pub fn revoke_blob(&mut self, url: &str) -> Result<bool, HostError> {
        self.blobs.revoke(url)
    }

    pub fn pin_blob(&mut self, url: &str) -> bool {
        self.blobs.pin(url)
    }

    pub fn unpin_blob(&mut self, url: &str) -> bool {
        self.blobs.unpin(url)
    }

    pub fn register_history<C>(&mut self, name: impl Into<String>, collection: &Rc<RefCell<C>>)
    where
        C: HistoryCollection + 'static,
    {
        self.stores.register(name, collection);
    }

    pub fn active_sockets(&self) -> usize {
        self.sockets.active_count()
    }

    pub fn active_frames(&self) -> usize {
        self.frames.active_count()
    }

    pub fn blobs(&self) -> &BlobTracker {
        &self.blobs
    }

    pub fn images(&self) -> &ImageTracker {
        &self.images
    }

    pub fn frames(&self) -> &FrameTracker {
        &self.frames
    }

    pub fn session_store(&self) -> &dyn SessionStore {
        self.session.store()
    }

    pub fn session_store_mut(&mut self) -> &mut dyn SessionStore {
        self.session.store_mut()
    }

    /// Held entries per kind, for debugging.
    pub fn tracked(&mut self) -> Vec<(ResourceKind, usize)> {
        self.ordered()
            .iter()
            .map(|tracker| (tracker.kind(), tracker.tracked()))
            .collect()
    }
}
