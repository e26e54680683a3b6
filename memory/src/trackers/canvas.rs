use host::{ElementId, ElementKind, Page};
use tracing::debug;

use crate::tracker::{attached, EvictionLedger, ResourceTracker, SweepContext, SweepError};
use crate::ResourceKind;

/// Canvases are judged against at most this margin.
const CANVAS_MARGIN_PX: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasSnapshot {
    pub width: u32,
    pub height: u32,
}

/// Shrinks off-screen canvases to a 1x1 backing store.
#[derive(Debug, Default)]
pub struct CanvasTracker {
    shrunk: EvictionLedger<CanvasSnapshot>,
}

impl CanvasTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shrunk(&self, id: ElementId) -> bool {
        self.shrunk.contains(id)
    }

    fn margin(ctx: &SweepContext) -> f64 {
        ctx.margin_px.min(CANVAS_MARGIN_PX)
    }

    fn shrink_one(
        &mut self,
        page: &mut dyn Page,
        id: ElementId,
        ctx: &SweepContext,
        margin: f64,
    ) -> Result<bool, SweepError> {
        if self.shrunk.contains(id) || page.is_protected(id) {
            return Ok(false);
        }
        let Some(rect) = attached(page.bounds(id))? else {
            return Ok(false);
        };
        if !page.viewport().is_outside(&rect, margin) {
            return Ok(false);
        }
        let Some((width, height)) = attached(page.canvas_size(id))? else {
            return Ok(false);
        };
        if width <= 2 && height <= 2 {
            return Ok(false);
        }
        // On record before any mutation lands.
        self.shrunk.insert(id, CanvasSnapshot { width, height }, ctx.now);
        if let Err(err) = page.clear_canvas(id) {
            self.shrunk.take(id);
            return Err(err.into());
        }
        page.set_canvas_size(id, 1, 1)?;
        Ok(true)
    }
}

impl ResourceTracker for CanvasTracker {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Canvas
    }

    fn sweep(&mut self, page: &mut dyn Page, ctx: &SweepContext) -> Result<usize, SweepError> {
        let margin = Self::margin(ctx);
        let mut count = 0;
        for id in page.elements(ElementKind::Canvas)? {
            match self.shrink_one(page, id, ctx, margin) {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(err) => debug!(element = %id, error = %err, "canvas not shrunk"),
            }
        }
        if count > 0 {
            debug!(count, margin, "shrank off-screen canvases");
        }
        Ok(count)
    }

    fn restore(&mut self, page: &mut dyn Page, ctx: &SweepContext) -> Result<usize, SweepError> {
        let margin = Self::margin(ctx);
        let viewport = page.viewport();
        let mut count = 0;
        for id in self.shrunk.ids() {
            let rect = match attached(page.bounds(id)) {
                Ok(Some(rect)) => rect,
                Ok(None) => {
                    self.shrunk.take(id);
                    continue;
                }
                Err(err) => {
                    debug!(element = %id, error = %err, "could not measure shrunk canvas");
                    continue;
                }
            };
            if !viewport.is_near(&rect, margin) {
                continue;
            }
            let Some(entry) = self.shrunk.get(id) else {
                continue;
            };
            let CanvasSnapshot { width, height } = entry.original;
            match attached(page.set_canvas_size(id, width, height)) {
                Ok(Some(())) => count += 1,
                Ok(None) => {}
                Err(err) => {
                    debug!(element = %id, error = %err, "canvas restore refused");
                    continue;
                }
            }
            self.shrunk.take(id);
        }
        Ok(count)
    }

    fn tracked(&self) -> usize {
        self.shrunk.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use host::sim::{Mutation, SimPage};
    use scheduler::Timestamp;
    use tier::{Platform, Tier};
    use util::Rect;

    #[test]
    fn shrinks_after_clearing_and_restores_dimensions() {
        let mut page = SimPage::default();
        let id = page.add_canvas(Rect::new(0.0, 3_000.0, 390.0, 400.0), 780, 800);
        let ctx = SweepContext::new(Tier::Mid, Platform::Desktop, Timestamp::ZERO);
        let mut tracker = CanvasTracker::new();

        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 1);
        assert_eq!(page.canvas_dims(id), Some((1, 1)));
        assert_eq!(page.canvas_clears(id), 1);
        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 0);

        page.scroll_to(2_900.0);
        assert_eq!(tracker.restore(&mut page, &ctx).unwrap(), 1);
        assert_eq!(page.canvas_dims(id), Some((780, 800)));
    }

    #[test]
    fn protected_canvases_are_untouched() {
        let mut page = SimPage::default();
        let scene = page.add_canvas(Rect::new(0.0, 5_000.0, 390.0, 400.0), 1_024, 1_024);
        page.protect(scene);
        let ctx = SweepContext::new(Tier::UltraLow, Platform::Ios, Timestamp::ZERO).with_margin(0.0);
        let mut tracker = CanvasTracker::new();

        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 0);
        assert_eq!(page.canvas_dims(scene), Some((1_024, 1_024)));
        assert_eq!(page.canvas_clears(scene), 0);
    }

    #[test]
    fn margin_is_capped_at_three_hundred() {
        let mut page = SimPage::new(util::Viewport::new(390.0, 800.0));
        // 350px below the fold: inside High's 700px margin, outside 300px.
        page.add_canvas(Rect::new(0.0, 1_150.0, 390.0, 100.0), 300, 150);
        let ctx = SweepContext::new(Tier::High, Platform::Desktop, Timestamp::ZERO);
        let mut tracker = CanvasTracker::new();
        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 1);
    }

    #[test]
    fn failed_resize_keeps_snapshot_and_siblings_still_shrink() {
        let mut page = SimPage::default();
        let stuck = page.add_canvas(Rect::new(0.0, 3_000.0, 390.0, 400.0), 780, 800);
        let other = page.add_canvas(Rect::new(0.0, 3_500.0, 390.0, 400.0), 780, 800);
        page.fail_mutation(stuck, Mutation::CanvasSize);
        let ctx = SweepContext::new(Tier::Mid, Platform::Desktop, Timestamp::ZERO);
        let mut tracker = CanvasTracker::new();

        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 1);
        assert_eq!(page.canvas_dims(other), Some((1, 1)));
        assert_eq!(page.canvas_clears(stuck), 1);
        assert!(tracker.is_shrunk(stuck));

        page.scroll_to(3_200.0);
        assert_eq!(tracker.restore(&mut page, &ctx).unwrap(), 1);
        assert_eq!(page.canvas_dims(other), Some((780, 800)));
        assert!(tracker.is_shrunk(stuck));
        assert!(!tracker.is_shrunk(other));
    }

    #[test]
    fn failed_clear_leaves_canvas_untracked() {
        let mut page = SimPage::default();
        let id = page.add_canvas(Rect::new(0.0, 3_000.0, 390.0, 400.0), 780, 800);
        page.fail_mutation(id, Mutation::ClearCanvas);
        let ctx = SweepContext::new(Tier::Mid, Platform::Desktop, Timestamp::ZERO);
        let mut tracker = CanvasTracker::new();

        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 0);
        assert_eq!(page.canvas_dims(id), Some((780, 800)));
        assert_eq!(tracker.tracked(), 0);
    }
}
