use host::{ElementId, ElementKind, Page};
use scheduler::Timestamp;
use tracing::debug;

use crate::pressure::PressureLevel;
use crate::tracker::{attached, EvictionLedger, ResourceTracker, SweepContext, SweepError};
use crate::ResourceKind;

const VIDEO_MARGIN_PX: f64 = 200.0;

/// What the governor changed on a video element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VideoSnapshot {
    /// Source removed to release the media buffer.
    pub detached_src: Option<String>,
    /// Playback the governor paused and should resume.
    pub paused_by_governor: bool,
}

/// Pauses off-screen video and, under critical pressure, detaches its
/// source.
#[derive(Debug, Default)]
pub struct VideoTracker {
    changed: EvictionLedger<VideoSnapshot>,
}

impl VideoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, id: ElementId) -> Option<&VideoSnapshot> {
        self.changed.get(id).map(|entry| &entry.original)
    }

    fn margin(ctx: &SweepContext) -> f64 {
        ctx.margin_px.min(VIDEO_MARGIN_PX)
    }

    fn record(&mut self, id: ElementId, snapshot: VideoSnapshot, now: Timestamp) {
        let captured_at = self.changed.take(id).map(|entry| entry.captured_at);
        self.changed.insert(id, snapshot, captured_at.unwrap_or(now));
    }

    fn release(
        &mut self,
        page: &mut dyn Page,
        id: ElementId,
        ctx: &SweepContext,
    ) -> Result<bool, SweepError> {
        let Some(info) = attached(page.video(id))? else {
            return Ok(false);
        };
        let mut snapshot = self.snapshot(id).cloned().unwrap_or_default();
        let mut changed = false;

        if !info.paused {
            page.pause_video(id)?;
            snapshot.paused_by_governor = true;
            changed = true;
            // The pause stays on record even if the detach below fails.
            self.record(id, snapshot.clone(), ctx.now);
        }
        if ctx.level == PressureLevel::Critical && snapshot.detached_src.is_none() {
            if let Some(src) = info.src {
                page.set_video_source(id, None)?;
                snapshot.detached_src = Some(src);
                changed = true;
            }
        }

        if changed {
            self.record(id, snapshot, ctx.now);
        }
        Ok(changed)
    }
}

impl ResourceTracker for VideoTracker {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Video
    }

    fn sweep(&mut self, page: &mut dyn Page, ctx: &SweepContext) -> Result<usize, SweepError> {
        let margin = Self::margin(ctx);
        let viewport = page.viewport();
        let mut count = 0;
        for id in page.elements(ElementKind::Video)? {
            if page.is_protected(id) {
                continue;
            }
            let released = attached(page.bounds(id)).and_then(|rect| match rect {
                Some(rect) if viewport.is_outside(&rect, margin) => self.release(page, id, ctx),
                _ => Ok(false),
            });
            match released {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(err) => debug!(element = %id, error = %err, "video not released"),
            }
        }
        if count > 0 {
            debug!(count, level = ctx.level.as_str(), "released off-screen video");
        }
        Ok(count)
    }

    fn restore(&mut self, page: &mut dyn Page, ctx: &SweepContext) -> Result<usize, SweepError> {
        let margin = Self::margin(ctx);
        let viewport = page.viewport();
        let mut count = 0;
        for id in self.changed.ids() {
            let rect = match attached(page.bounds(id)) {
                Ok(Some(rect)) => rect,
                Ok(None) => {
                    self.changed.take(id);
                    continue;
                }
                Err(err) => {
                    debug!(element = %id, error = %err, "could not measure released video");
                    continue;
                }
            };
            if !viewport.is_near(&rect, margin) {
                continue;
            }
            let Some(snapshot) = self.snapshot(id).cloned() else {
                continue;
            };
            if let Some(src) = snapshot.detached_src {
                match attached(page.set_video_source(id, Some(src))) {
                    Ok(Some(())) => {}
                    Ok(None) => {
                        self.changed.take(id);
                        continue;
                    }
                    Err(err) => {
                        debug!(element = %id, error = %err, "video source not reattached");
                        continue;
                    }
                }
            }
            self.changed.take(id);
            if snapshot.paused_by_governor {
                // Autoplay may be refused by the host; the source is back
                // either way.
                if let Err(err) = page.play_video(id) {
                    debug!(element = %id, error = %err, "video did not resume");
                }
            }
            count += 1;
        }
        Ok(count)
    }

    fn tracked(&self) -> usize {
        self.changed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use host::sim::{Mutation, SimPage};
    use scheduler::Timestamp;
    use tier::{Platform, Tier};
    use util::Rect;

    fn setup() -> (SimPage, ElementId, SweepContext) {
        let page = SimPage::default();
        let id = page.add_video(Rect::new(0.0, 2_000.0, 390.0, 220.0), "https://cdn.example/promo.mp4", true);
        let ctx = SweepContext::new(Tier::Mid, Platform::Desktop, Timestamp::ZERO);
        (page, id, ctx)
    }

    #[test]
    fn pauses_off_screen_and_resumes_in_range() {
        let (mut page, id, ctx) = setup();
        let mut tracker = VideoTracker::new();

        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 1);
        let info = page.video_info(id).unwrap();
        assert!(info.paused);
        assert!(info.src.is_some());
        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 0);

        page.scroll_to(1_900.0);
        assert_eq!(tracker.restore(&mut page, &ctx).unwrap(), 1);
        assert!(!page.video_info(id).unwrap().paused);
    }

    #[test]
    fn critical_detaches_source_and_restore_reattaches() {
        let (mut page, id, ctx) = setup();
        let mut tracker = VideoTracker::new();

        tracker.sweep(&mut page, &ctx).unwrap();
        let critical = ctx.with_level(PressureLevel::Critical);
        assert_eq!(tracker.sweep(&mut page, &critical).unwrap(), 1);
        assert_eq!(page.video_info(id).unwrap().src, None);
        assert_eq!(
            tracker.snapshot(id),
            Some(&VideoSnapshot {
                detached_src: Some("https://cdn.example/promo.mp4".into()),
                paused_by_governor: true,
            })
        );

        page.scroll_to(1_900.0);
        tracker.restore(&mut page, &ctx).unwrap();
        let info = page.video_info(id).unwrap();
        assert_eq!(info.src.as_deref(), Some("https://cdn.example/promo.mp4"));
        assert!(!info.paused);
    }

    #[test]
    fn user_paused_video_stays_paused() {
        let mut page = SimPage::default();
        let id = page.add_video(Rect::new(0.0, 2_000.0, 390.0, 220.0), "clip.mp4", false);
        let ctx = SweepContext::new(Tier::Mid, Platform::Desktop, Timestamp::ZERO)
            .with_level(PressureLevel::Critical);
        let mut tracker = VideoTracker::new();

        tracker.sweep(&mut page, &ctx).unwrap();
        page.scroll_to(1_900.0);
        tracker.restore(&mut page, &ctx).unwrap();
        assert!(page.video_info(id).unwrap().paused);
    }

    #[test]
    fn refused_detach_still_resumes_paused_video() {
        let (mut page, id, ctx) = setup();
        page.fail_mutation(id, Mutation::VideoSource);
        let critical = ctx.with_level(PressureLevel::Critical);
        let mut tracker = VideoTracker::new();

        assert_eq!(tracker.sweep(&mut page, &critical).unwrap(), 0);
        assert!(page.video_info(id).unwrap().paused);
        assert_eq!(
            tracker.snapshot(id),
            Some(&VideoSnapshot {
                detached_src: None,
                paused_by_governor: true,
            })
        );

        page.scroll_to(1_900.0);
        assert_eq!(tracker.restore(&mut page, &ctx).unwrap(), 1);
        assert!(!page.video_info(id).unwrap().paused);
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn rejected_video_does_not_block_siblings() {
        let (mut page, stuck, ctx) = setup();
        let other = page.add_video(Rect::new(0.0, 2_400.0, 390.0, 220.0), "clip.mp4", true);
        page.fail_mutation(stuck, Mutation::PauseVideo);
        let mut tracker = VideoTracker::new();

        assert_eq!(tracker.sweep(&mut page, &ctx).unwrap(), 1);
        assert!(!page.video_info(stuck).unwrap().paused);
        assert!(page.video_info(other).unwrap().paused);
        assert_eq!(tracker.snapshot(stuck), None);
    }
}
