use host::{ElementId, ElementKind, ImageSource, Page};
use tracing::debug;

use crate::tracker::{attached, EvictionLedger, ResourceTracker, SweepContext, SweepError};
use crate::ResourceKind;

/// Images smaller than this on both axes are left alone.
const ICON_MAX_PX: u32 = 40;

/// Source attributes captured before the placeholder swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSnapshot {
    pub source: ImageSource,
}

/// Swaps off-screen images for a placeholder and swaps them back when they
/// come near the viewport again.
#[derive(Debug, Default)]
pub struct ImageTracker {
    evicted: EvictionLedger<ImageSnapshot>,
}

impl ImageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_evicted(&self, id: ElementId) -> bool {
        self.evicted.contains(id)
    }

    fn evict_one(
        &mut self,
        page: &mut dyn Page,
        id: ElementId,
        ctx: &SweepContext,
        margin: f64,
    ) -> Result<bool, SweepError> {
        if self.evicted.contains(id) || page.is_protected(id) {
            return Ok(false);
        }
        let Some(info) = attached(page.image(id))? else {
            return Ok(false);
        };
        if info.width > 0 && info.width < ICON_MAX_PX && info.height < ICON_MAX_PX {
            return Ok(false);
        }
        if info.source.src.is_empty() || info.source.is_inline() {
            return Ok(false);
        }
        let Some(rect) = attached(page.bounds(id))? else {
            return Ok(false);
        };
        if !page.viewport().is_outside(&rect, margin) {
            return Ok(false);
        }
        page.set_image_source(id, ImageSource::placeholder())?;
        self.evicted.insert(
            id,
            ImageSnapshot {
                source: info.source,
            },
            ctx.now,
        );
        Ok(true)
    }
}

impl ResourceTracker for ImageTracker {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Image
    }

    fn sweep(&mut self, page: &mut dyn Page, ctx: &SweepContext) -> Result<usize, SweepError> {
        let margin = ctx.critical_margin();
        let mut count = 0;
        for id in page.elements(ElementKind::Image)? {
            match self.evict_one(page, id, ctx, margin) {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(err) => debug!(element = %id, error = %err, "image kept its source"),
            }
        }
        if count > 0 {
            debug!(count, margin, "unloaded off-screen images");
        }
        Ok(count)
    }

    fn restore(&mut self, page: &mut dyn Page, ctx: &SweepContext) -> Result<usize, SweepError> {
        let margin = ctx.critical_margin();
        let viewport = page.viewport();
        let mut count = 0;
        for id in self.evicted.ids() {
            let rect = match attached(page.bounds(id)) {
                Ok(Some(rect)) => rect,
                Ok(None) => {
                    self.evicted.take(id);
                    continue;
                }
                Err(err) => {
                    debug!(element = %id, error = %err, "could not measure evicted image");
                    continue;
                }
            };
            if !viewport.is_near(&rect, margin) {
                continue;
            }
            let Some(entry) = self.evicted.take(id) else {
                continue;
            };
            match page.set_image_source(id, entry.original.source.clone()) {
                Ok(()) => count += 1,
                Err(host::HostError::Detached(_)) => {}
                Err(err) => {
                    debug!(element = %id, error = %err, "image restore refused");
                    self.evicted.insert(id, entry.original, entry.captured_at);
                }
            }
        }
        Ok(count)
    }

    fn tracked(&self) -> usize {
        self.evicted.len()
    }
}
