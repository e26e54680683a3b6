use std::time::Duration;

use memory::ResourceKind;
use scheduler::{TimerId, Timestamp};
use tier::TierProfile;

use crate::config::VisibilityConfig;

/// Margin of the first restore phase: only the immediate viewport.
const VIEWPORT_PHASE_MARGIN_PX: f64 = 100.0;
const CANVAS_PHASE_MARGIN_PX: f64 = 200.0;

/// Kinds pruned by the deep cleanup after a long absence.
pub const DEEP_CLEANUP: [ResourceKind; 2] = [ResourceKind::Fragment, ResourceKind::StoreItem];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// One step of the graduated restore, in firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    /// Images in the immediate viewport.
    Viewport,
    /// Canvases back to their original size.
    Canvases,
    /// Everything within the tier margin, followed by a guarded cycle.
    Wide,
}

impl RestorePhase {
    pub fn kinds(self) -> &'static [ResourceKind] {
        match self {
            RestorePhase::Viewport => &[ResourceKind::Image],
            RestorePhase::Canvases => &[ResourceKind::Canvas],
            RestorePhase::Wide => &[ResourceKind::Image, ResourceKind::Frame, ResourceKind::Video],
        }
    }

    pub fn margin(self, profile: &TierProfile) -> f64 {
        match self {
            RestorePhase::Viewport => VIEWPORT_PHASE_MARGIN_PX,
            RestorePhase::Canvases => CANVAS_PHASE_MARGIN_PX,
            RestorePhase::Wide => profile.margin(),
        }
    }

    pub fn runs_cycle(self) -> bool {
        matches!(self, RestorePhase::Wide)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStep {
    Phase(RestorePhase),
    DeepCleanup,
}

/// Delayed steps to schedule after the page becomes visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePlan {
    pub hidden_for: Duration,
    pub steps: Vec<(Duration, RestoreStep)>,
}

/// Tracks document visibility and plans the graduated restore.
///
/// The controller never touches resources; the governor performs the
/// release and schedules the planned steps. Restore timers still pending
/// when the page hides again are handed back for cancellation so a late
/// phase cannot undo a fresh release.
#[derive(Debug)]
pub struct VisibilityController {
    config: VisibilityConfig,
    state: Visibility,
    hidden_at: Option<Timestamp>,
    pending: Vec<TimerId>,
}

impl VisibilityController {
    pub fn new(config: VisibilityConfig) -> Self {
        Self {
            config,
            state: Visibility::Visible,
            hidden_at: None,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> Visibility {
        self.state
    }

    pub fn is_hidden(&self) -> bool {
        self.state == Visibility::Hidden
    }

    pub fn hidden_at(&self) -> Option<Timestamp> {
        self.hidden_at
    }

    /// Visible to hidden. Returns the restore timers to cancel, or `None`
    /// when the page was already hidden.
    pub fn hide(&mut self, now: Timestamp) -> Option<Vec<TimerId>> {
        if self.is_hidden() {
            return None;
        }
        self.state = Visibility::Hidden;
        self.hidden_at = Some(now);
        Some(std::mem::take(&mut self.pending))
    }

    /// Hidden to visible. Returns `None` when the page was already visible.
    pub fn show(&mut self, now: Timestamp) -> Option<RestorePlan> {
        if !self.is_hidden() {
            return None;
        }
        self.state = Visibility::Visible;
        let hidden_for = self
            .hidden_at
            .take()
            .map(|at| now.saturating_since(at))
            .unwrap_or_default();

        let mut steps = vec![
            (
                self.config.viewport_phase(),
                RestoreStep::Phase(RestorePhase::Viewport),
            ),
            (
                self.config.canvas_phase(),
                RestoreStep::Phase(RestorePhase::Canvases),
            ),
            (
                self.config.wide_phase(hidden_for),
                RestoreStep::Phase(RestorePhase::Wide),
            ),
        ];
        if self.config.needs_deep_cleanup(hidden_for) {
            steps.push((self.config.deep_cleanup_delay(), RestoreStep::DeepCleanup));
        }
        Some(RestorePlan { hidden_for, steps })
    }

    /// Remembers a scheduled restore timer.
    pub fn track(&mut self, id: TimerId) {
        self.pending.push(id);
    }

    /// Forgets a restore timer once it fired.
    pub fn complete(&mut self, id: TimerId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|pending| *pending != id);
        self.pending.len() != before
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler::TimerQueue;
    use tier::Tier;

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn short_absence_has_three_phases() {
        let mut controller = VisibilityController::new(VisibilityConfig::default());
        assert_eq!(controller.hide(at(1_000)), Some(Vec::new()));
        assert!(controller.hide(at(2_000)).is_none());

        let plan = controller.show(at(6_000)).unwrap();
        assert_eq!(plan.hidden_for, Duration::from_secs(5));
        let delays: Vec<u64> = plan
            .steps
            .iter()
            .map(|(delay, _)| delay.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![200, 600, 800]);
        assert!(controller.show(at(7_000)).is_none());
    }

    #[test]
    fn long_absence_adds_deep_cleanup() {
        let mut controller = VisibilityController::new(VisibilityConfig::default());
        controller.hide(Timestamp::ZERO);
        let plan = controller.show(at(121_000)).unwrap();
        assert_eq!(plan.steps.len(), 4);
        assert_eq!(
            plan.steps[2],
            (Duration::from_millis(1_200), RestoreStep::Phase(RestorePhase::Wide))
        );
        assert_eq!(plan.steps[3], (Duration::from_secs(2), RestoreStep::DeepCleanup));
    }

    #[test]
    fn hiding_again_hands_back_pending_timers() {
        let mut queue: TimerQueue<()> = TimerQueue::new();
        let mut controller = VisibilityController::new(VisibilityConfig::default());
        controller.hide(Timestamp::ZERO);
        let plan = controller.show(at(1_000)).unwrap();
        for (delay, _) in &plan.steps {
            controller.track(queue.schedule_once(at(1_000), *delay, ()));
        }
        let first = queue.pop_due(at(1_200)).unwrap();
        assert!(controller.complete(first.id));
        assert_eq!(controller.pending(), 2);

        let cancel = controller.hide(at(1_300)).unwrap();
        assert_eq!(cancel.len(), 2);
        assert_eq!(controller.pending(), 0);
    }

    #[test]
    fn phase_margins_widen() {
        let profile = Tier::Mid.profile();
        let margins: Vec<f64> = [RestorePhase::Viewport, RestorePhase::Canvases, RestorePhase::Wide]
            .iter()
            .map(|phase| phase.margin(&profile))
            .collect();
        assert_eq!(margins, vec![100.0, 200.0, 500.0]);
        assert!(RestorePhase::Wide.runs_cycle());
    }
}
