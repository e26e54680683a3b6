use std::collections::VecDeque;
use std::fmt;

use host::{Blob, HostError, ObjectUrlAllocator, Page};
use scheduler::Timestamp;
use tracing::debug;

use crate::tracker::{ResourceTracker, SweepContext, SweepError};
use crate::ResourceKind;

/// Default number of object URLs tracked before the oldest is revoked.
pub const DEFAULT_BLOB_CAPACITY: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedBlob {
    pub url: String,
    pub created_at: Timestamp,
    /// Pinned URLs are still referenced and never revoked by the tracker.
    pub pinned: bool,
}

/// Result of an allocation through [`BlobTracker::allocate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobAllocation {
    pub url: String,
    /// Older URLs revoked to stay within capacity.
    pub revoked: Vec<String>,
}

/// Object URLs allocated through the governor, oldest first.
pub struct BlobTracker {
    allocator: Box<dyn ObjectUrlAllocator>,
    entries: VecDeque<TrackedBlob>,
    capacity: usize,
}

impl BlobTracker {
    pub fn new(allocator: Box<dyn ObjectUrlAllocator>, capacity: usize) -> Self {
        Self {
            allocator,
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> impl Iterator<Item = &TrackedBlob> {
        self.entries.iter()
    }

    /// Allocates an object URL, revoking the oldest unpinned URLs once the
    /// capacity is exceeded.
    pub fn allocate(&mut self, blob: &Blob, now: Timestamp) -> Result<BlobAllocation, HostError> {
        let url = self.allocator.create(blob)?;
        self.entries.push_back(TrackedBlob {
            url: url.clone(),
            created_at: now,
            pinned: false,
        });

        let mut revoked = Vec::new();
        while self.entries.len() > self.capacity {
            let Some(index) = self.entries.iter().position(|entry| !entry.pinned) else {
                break;
            };
            if let Some(oldest) = self.entries.remove(index) {
                self.revoke_quietly(&oldest.url);
                revoked.push(oldest.url);
            }
        }
        Ok(BlobAllocation { url, revoked })
    }

    /// Revokes a URL on behalf of the application. Returns whether it was
    /// tracked; untracked URLs are still passed to the host.
    pub fn revoke(&mut self, url: &str) -> Result<bool, HostError> {
        let tracked = match self.entries.iter().position(|entry| entry.url == url) {
            Some(index) => self.entries.remove(index).is_some(),
            None => false,
        };
        self.allocator.revoke(url)?;
        Ok(tracked)
    }

    /// Marks a URL as in use. Returns false if it is not tracked.
    pub fn pin(&mut self, url: &str) -> bool {
        self.set_pinned(url, true)
    }

    pub fn unpin(&mut self, url: &str) -> bool {
        self.set_pinned(url, false)
    }

    fn set_pinned(&mut self, url: &str, pinned: bool) -> bool {
        match self.entries.iter_mut().find(|entry| entry.url == url) {
            Some(entry) => {
                entry.pinned = pinned;
                true
            }
            None => false,
        }
    }

    fn revoke_quietly(&mut self, url: &str) {
        if let Err(err) = self.allocator.revoke(url) {
            debug!(url, error = %err, "object URL revoke failed");
        }
    }
}

impl ResourceTracker for BlobTracker {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Blob
    }

    /// Revokes every unpinned URL older than the tier's age cutoff.
    fn sweep(&mut self, _page: &mut dyn Page, ctx: &SweepContext) -> Result<usize, SweepError> {
        let cutoff = ctx.tier.blob_max_age();
        let (stale, kept): (VecDeque<_>, VecDeque<_>) = self
            .entries
            .drain(..)
            .partition(|entry| !entry.pinned && ctx.now.saturating_since(entry.created_at) > cutoff);
        self.entries = kept;
        for entry in &stale {
            self.revoke_quietly(&entry.url);
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "revoked stale object URLs");
        }
        Ok(stale.len())
    }

    fn tracked(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for BlobTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobTracker")
            .field("entries", &self.entries)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use host::sim::{SimObjectUrls, SimPage};
    use tier::{Platform, Tier};

    fn tracker(urls: &SimObjectUrls) -> BlobTracker {
        BlobTracker::new(Box::new(urls.clone()), DEFAULT_BLOB_CAPACITY)
    }

    #[test]
    fn twenty_first_allocation_revokes_the_first() {
        let urls = SimObjectUrls::new();
        let mut blobs = tracker(&urls);
        let created: Vec<_> = (0..21)
            .map(|n| blobs.allocate(&Blob::default(), Timestamp::from_millis(n)).unwrap())
            .collect();

        assert_eq!(created[20].revoked, vec![created[0].url.clone()]);
        assert_eq!(blobs.tracked(), 20);
        let kept: Vec<_> = blobs.entries().map(|entry| entry.url.clone()).collect();
        let newest: Vec<_> = created[1..].iter().map(|alloc| alloc.url.clone()).collect();
        assert_eq!(kept, newest);
        assert!(!urls.is_live(&created[0].url));
    }

    #[test]
    fn pinned_urls_survive_capacity_and_age() {
        let urls = SimObjectUrls::new();
        let mut blobs = tracker(&urls);
        let first = blobs.allocate(&Blob::default(), Timestamp::ZERO).unwrap().url;
        assert!(blobs.pin(&first));
        for n in 1..=20 {
            blobs.allocate(&Blob::default(), Timestamp::from_millis(n)).unwrap();
        }
        assert!(urls.is_live(&first));
        assert_eq!(blobs.tracked(), 20);

        let mut page = SimPage::default();
        let ctx = SweepContext::new(Tier::Mid, Platform::Desktop, Timestamp::from_millis(60_000));
        assert_eq!(blobs.sweep(&mut page, &ctx).unwrap(), 19);
        assert_eq!(blobs.tracked(), 1);
        assert!(urls.is_live(&first));
    }

    #[test]
    fn age_cutoff_is_tier_scaled() {
        let urls = SimObjectUrls::new();
        let mut blobs = tracker(&urls);
        blobs.allocate(&Blob::default(), Timestamp::ZERO).unwrap();
        let mut page = SimPage::default();
        let at = Timestamp::from_millis(20_000);

        let mid = SweepContext::new(Tier::Mid, Platform::Desktop, at);
        assert_eq!(blobs.sweep(&mut page, &mid).unwrap(), 0);
        let ultra = SweepContext::new(Tier::UltraLow, Platform::Desktop, at);
        assert_eq!(blobs.sweep(&mut page, &ultra).unwrap(), 1);
    }

    #[test]
    fn app_revoke_untracks() {
        let urls = SimObjectUrls::new();
        let mut blobs = tracker(&urls);
        let url = blobs.allocate(&Blob::default(), Timestamp::ZERO).unwrap().url;
        assert!(blobs.revoke(&url).unwrap());
        assert!(!blobs.revoke(&url).unwrap());
        assert_eq!(blobs.tracked(), 0);
    }
}
