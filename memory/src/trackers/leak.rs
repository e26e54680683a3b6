use host::{HostError, Page};
use tracing::debug;

use crate::tracker::{ResourceTracker, SweepContext, SweepError};
use crate::ResourceKind;

/// Removes overlay, tooltip, toast and backdrop fragments a view framework
/// left behind after closing.
#[derive(Debug, Default)]
pub struct LeakSweepTracker {
    removed_total: u64,
}

impl LeakSweepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removed_total(&self) -> u64 {
        self.removed_total
    }
}

impl ResourceTracker for LeakSweepTracker {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Fragment
    }

    fn sweep(&mut self, page: &mut dyn Page, _ctx: &SweepContext) -> Result<usize, SweepError> {
        let mut count = 0;
        for (id, kind) in page.orphaned_fragments()? {
            if page.is_protected(id) {
                continue;
            }
            match page.remove_element(id) {
                Ok(()) => count += 1,
                Err(HostError::Detached(_)) => {}
                Err(err) => {
                    debug!(element = %id, ?kind, error = %err, "fragment removal failed");
                }
            }
        }
        self.removed_total += count as u64;
        if count > 0 {
            debug!(count, "pruned orphaned fragments");
        }
        Ok(count)
    }

    fn tracked(&self) -> usize {
        0
    }
}
