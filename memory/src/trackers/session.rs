use host::Page;
use storage::SessionStore;
use tracing::debug;

use crate::tracker::{ResourceTracker, SweepContext, SweepError};
use crate::ResourceKind;

/// Caps transient session storage to the tier's entry limit, evicting the
/// oldest keys by insertion order.
pub struct SessionEntryTracker {
    store: Box<dyn SessionStore>,
}

impl SessionEntryTracker {
    pub fn new(store: Box<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn SessionStore {
        self.store.as_mut()
    }
}

impl ResourceTracker for SessionEntryTracker {
    fn kind(&self) -> ResourceKind {
        ResourceKind::SessionEntry
    }

    fn sweep(&mut self, _page: &mut dyn Page, ctx: &SweepContext) -> Result<usize, SweepError> {
        let Some(cap) = ctx.tier.session_entry_cap() else {
            return Ok(0);
        };
        let keys = self.store.keys()?;
        let excess = keys.len().saturating_sub(cap);
        let mut removed = 0;
        for key in keys.iter().take(excess) {
            if self.store.remove(key)? {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, cap, "pruned session entries");
        }
        Ok(removed)
    }

    fn tracked(&self) -> usize {
        self.store.len().unwrap_or(0)
    }
}

impl std::fmt::Debug for SessionEntryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntryTracker").finish_non_exhaustive()
    }
}
