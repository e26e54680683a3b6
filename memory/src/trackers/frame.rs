use host::{ElementId, ElementKind, Page};
use tracing::debug;
use util::Rect;

use crate::tracker::{attached, EvictionLedger, ResourceTracker, SweepContext, SweepError};
use crate::ResourceKind;

const BLANK: &str = "about:blank";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub src: String,
}

/// Keeps only the nearest embedded frames live, blanking the rest.
#[derive(Debug, Default)]
pub struct FrameTracker {
    evicted: EvictionLedger<FrameSnapshot>,
    active: usize,
}

struct Ranked {
    id: ElementId,
    rect: Rect,
    distance: f64,
    src: Option<String>,
}

fn is_live(src: &Option<String>) -> bool {
    matches!(src.as_deref(), Some(src) if !src.is_empty() && src != BLANK)
}

impl FrameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames left live by the most recent pass.
    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn is_evicted(&self, id: ElementId) -> bool {
        self.evicted.contains(id)
    }

    /// Live frames currently in the page, whether or not they were ranked.
    pub fn live_in(page: &dyn Page) -> Result<usize, SweepError> {
        let mut live = 0;
        for id in page.elements(ElementKind::Frame)? {
            if let Ok(Some(src)) = attached(page.frame_source(id)) {
                if is_live(&src) {
                    live += 1;
                }
            }
        }
        Ok(live)
    }

    /// Unprotected frames sorted by distance from the viewport, nearest
    /// first. Ties keep document order.
    fn rank(&self, page: &dyn Page) -> Result<Vec<Ranked>, SweepError> {
        let viewport = page.viewport();
        let mut ranked = Vec::new();
        for id in page.elements(ElementKind::Frame)? {
            if page.is_protected(id) {
                continue;
            }
            let measured = attached(page.bounds(id)).and_then(|rect| {
                Ok(rect.zip(attached(page.frame_source(id))?))
            });
            let (rect, src) = match measured {
                Ok(Some(found)) => found,
                Ok(None) => continue,
                Err(err) => {
                    debug!(element = %id, error = %err, "frame skipped while ranking");
                    continue;
                }
            };
            ranked.push(Ranked {
                id,
                rect,
                distance: viewport.distance(&rect),
                src,
            });
        }
        ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(ranked)
    }
}

impl ResourceTracker for FrameTracker {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Frame
    }

    fn sweep(&mut self, page: &mut dyn Page, ctx: &SweepContext) -> Result<usize, SweepError> {
        let margin = ctx.critical_margin();
        let cap = ctx.tier.max_active_frames(ctx.platform);
        let viewport = page.viewport();
        let mut active = 0;
        let mut count = 0;

        for item in self.rank(page)? {
            let live = is_live(&item.src) && !self.evicted.contains(item.id);
            if viewport.is_outside(&item.rect, margin) || active >= cap {
                let Some(src) = item.src.filter(|_| live) else {
                    continue;
                };
                if let Err(err) = page.set_frame_source(item.id, None) {
                    debug!(element = %item.id, error = %err, "frame kept its source");
                    continue;
                }
                self.evicted.insert(item.id, FrameSnapshot { src }, ctx.now);
                count += 1;
            } else if live {
                active += 1;
            }
        }

        self.active = active;
        if count > 0 {
            debug!(count, active, cap, "blanked embedded frames");
        }
        Ok(count)
    }

    /// Reactivates blanked frames in distance order, never past the cap.
    fn restore(&mut self, page: &mut dyn Page, ctx: &SweepContext) -> Result<usize, SweepError> {
        if self.evicted.is_empty() {
            return Ok(0);
        }
        let margin = ctx.critical_margin();
        let cap = ctx.tier.max_active_frames(ctx.platform);
        let viewport = page.viewport();
        let mut active = 0;
        let mut count = 0;

        for item in self.rank(page)? {
            if active >= cap {
                break;
            }
            if viewport.is_outside(&item.rect, margin) {
                continue;
            }
            if let Some(entry) = self.evicted.take(item.id) {
                // The page navigated the frame itself; its new source wins.
                if is_live(&item.src) {
                    active += 1;
                    continue;
                }
                match page.set_frame_source(item.id, Some(entry.original.src.clone())) {
                    Ok(()) => {
                        active += 1;
                        count += 1;
                    }
                    Err(host::HostError::Detached(_)) => {}
                    Err(err) => {
                        debug!(element = %item.id, error = %err, "frame restore refused");
                        self.evicted.insert(item.id, entry.original, entry.captured_at);
                    }
                }
            } else if is_live(&item.src) {
                active += 1;
            }
        }

        // Frames removed from the tree can never come back.
        for id in self.evicted.ids() {
            if matches!(attached(page.bounds(id)), Ok(None)) {
                self.evicted.take(id);
            }
        }
        self.active = active;
        Ok(count)
    }

    fn tracked(&self) -> usize {
        self.evicted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use host::sim::{Mutation, SimPage};
    use scheduler::Timestamp;
    use tier::{Platform, Tier};
    use util::Viewport;

    fn frames(page: &SimPage, count: usize, spacing: f64) -> Vec<ElementId> {
        (0..count)
            .map(|n| {
                page.add_frame(
                    Rect::new(0.0, n as f64 * spacing, 390.0, 300.0),
                    format!("https://charts.example/widget/{n}"),
                )
            })
            .collect()
    }

    #[test]
    fn constrained_platform_keeps_two_nearest() {
        let mut page = SimPage::new(Viewport::new(390.0, 844.0));
        let ids = frames(&page, 25, 40.0);
        let ctx = SweepContext::new(Tier::Low, Platform::Ios, Timestamp::ZERO);
        let mut tracker = FrameTracker::new();

        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 23);
        let live: Vec<_> = ids.iter().filter(|id| page.frame_src(**id).is_some()).collect();
        assert_eq!(live, vec![&ids[0], &ids[1]]);
        assert_eq!(tracker.tracked(), 23);
        assert_eq!(tracker.active_count(), 2);
    }

    #[test]
    fn restore_respects_cap() {
        let mut page = SimPage::new(Viewport::new(390.0, 844.0));
        let ids = frames(&page, 6, 1_000.0);
        let ctx = SweepContext::new(Tier::Mid, Platform::Desktop, Timestamp::ZERO);
        let mut tracker = FrameTracker::new();

        tracker.sweep(&mut page, &ctx).unwrap();
        assert!(page.frame_src(ids[0]).is_some());
        assert_eq!(page.frame_src(ids[3]), None);

        // Every frame sits inside a huge margin; only the cap limits reactivation.
        let wide = ctx.with_margin(10_000.0);
        tracker.restore(&mut page, &wide).unwrap();
        let live = ids.iter().filter(|id| page.frame_src(**id).is_some()).count();
        assert_eq!(live, Tier::Mid.max_active_frames(Platform::Desktop));
        assert_eq!(FrameTracker::live_in(&page).unwrap(), live);
    }

    #[test]
    fn restored_frames_get_original_source() {
        let mut page = SimPage::default();
        let ids = frames(&page, 1, 0.0);
        page.scroll_to(5_000.0);
        let ctx = SweepContext::new(Tier::High, Platform::Desktop, Timestamp::ZERO);
        let mut tracker = FrameTracker::new();

        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 1);
        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 0);
        page.scroll_to(0.0);
        assert_eq!(tracker.restore(&mut page, &ctx).unwrap(), 1);
        assert_eq!(
            page.frame_src(ids[0]).as_deref(),
            Some("https://charts.example/widget/0")
        );
    }

    #[test]
    fn rejected_frame_does_not_block_siblings() {
        let mut page = SimPage::new(Viewport::new(390.0, 844.0));
        let ids = frames(&page, 5, 40.0);
        page.fail_mutation(ids[3], Mutation::FrameSource);
        let ctx = SweepContext::new(Tier::Low, Platform::Ios, Timestamp::ZERO);
        let mut tracker = FrameTracker::new();

        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 2);
        assert!(tracker.is_evicted(ids[2]));
        assert!(tracker.is_evicted(ids[4]));
        assert!(!tracker.is_evicted(ids[3]));
        assert!(page.frame_src(ids[3]).is_some());
    }

    #[test]
    fn refused_restore_keeps_entry_and_restores_the_rest() {
        let mut page = SimPage::default();
        let ids = frames(&page, 2, 0.0);
        page.scroll_to(5_000.0);
        let ctx = SweepContext::new(Tier::High, Platform::Desktop, Timestamp::ZERO);
        let mut tracker = FrameTracker::new();
        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 2);

        page.fail_mutation(ids[0], Mutation::FrameSource);
        page.scroll_to(0.0);
        assert_eq!(tracker.restore(&mut page, &ctx).unwrap(), 1);
        assert!(tracker.is_evicted(ids[0]));
        assert!(page.frame_src(ids[1]).is_some());
    }

    #[test]
    fn page_assigned_source_is_not_overwritten() {
        let mut page = SimPage::default();
        let ids = frames(&page, 1, 0.0);
        page.scroll_to(5_000.0);
        let ctx = SweepContext::new(Tier::High, Platform::Desktop, Timestamp::ZERO);
        let mut tracker = FrameTracker::new();
        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 1);

        page.set_frame_source(ids[0], Some("https://charts.example/next".into()))
            .unwrap();
        page.scroll_to(0.0);
        assert_eq!(tracker.restore(&mut page, &ctx).unwrap(), 0);
        assert_eq!(page.frame_src(ids[0]).as_deref(), Some("https://charts.example/next"));
        assert_eq!(tracker.tracked(), 0);
    }
}
