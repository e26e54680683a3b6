use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use host::{
    Blob, ElementId, HostError, NoObjectUrls, NoSockets, ObjectUrlAllocator, Page, SocketConnector,
};
use memory::trackers::{HistoryCollection, SocketHandle};
use memory::{
    CycleReport, PassOutcome, PressureLevel, PressureMonitor, ResourceKind, SweepContext,
    TrackerSet,
};
use scheduler::{
    Clock, IntervalGrant, MonotonicClock, TimerGovernor, TimerId, TimerQueue, Timestamp,
};
use storage::{MemorySessionStore, SessionStore};
use tier::{classify, Classification, DeviceSignals, Tier, TierProfile};
use tracing::{debug, info, warn};
use ui::{NoopUiBridge, UiBridge, UiMessage};

use crate::config::GovernorConfig;
use crate::deferral::DeferredActivations;
use crate::jank::{Escalation, JankDetector};
use crate::signals::{GovernorSignal, InboundCommand};
use crate::telemetry::GovernorHandle;
use crate::visibility::{RestoreStep, Visibility, VisibilityController, DEEP_CLEANUP};

/// Long tasks above this correlate with memory pressure on the constrained
/// platform.
const LONG_TASK_THRESHOLD: Duration = Duration::from_millis(200);
/// Measured total above `memory_gb` times this, in MB, is an emergency.
const MEASURED_MB_PER_GB: f64 = 600.0;
const ROUTE_CLEANUP_DELAY: Duration = Duration::from_millis(500);
/// Grace period before a new deferred activation is first checked.
const DEFERRAL_IDLE_DELAY: Duration = Duration::from_millis(300);
const BFCACHE_MARGIN_PX: f64 = 100.0;

/// Released when the page hides: everything but application store arrays.
const HIDE_RELEASE: [ResourceKind; 8] = [
    ResourceKind::Image,
    ResourceKind::Frame,
    ResourceKind::Canvas,
    ResourceKind::Video,
    ResourceKind::Fragment,
    ResourceKind::Socket,
    ResourceKind::Blob,
    ResourceKind::SessionEntry,
];

const EMERGENCY_RELEASE: [ResourceKind; 9] = [
    ResourceKind::Image,
    ResourceKind::Frame,
    ResourceKind::Canvas,
    ResourceKind::Video,
    ResourceKind::Fragment,
    ResourceKind::Socket,
    ResourceKind::Blob,
    ResourceKind::StoreItem,
    ResourceKind::SessionEntry,
];

const ROUTE_CLEANUP: [ResourceKind; 6] = [
    ResourceKind::Fragment,
    ResourceKind::Socket,
    ResourceKind::Image,
    ResourceKind::Frame,
    ResourceKind::Canvas,
    ResourceKind::Blob,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    GcCycle,
    InitialCycle,
    ScrollSettled,
    Restore(RestoreStep),
    BfcacheRestore,
    RouteCleanup,
    JankStart,
    JankStop,
    AppInterval,
    DeferralCheck,
}

type IntervalCallback = Box<dyn FnMut()>;

/// Builder for [`Governor`]. Only the page is required; every other
/// collaborator has an inert default.
pub struct GovernorBuilder {
    page: Box<dyn Page>,
    config: GovernorConfig,
    signals: DeviceSignals,
    clock: Option<Rc<dyn Clock>>,
    connector: Option<Box<dyn SocketConnector>>,
    allocator: Option<Box<dyn ObjectUrlAllocator>>,
    session: Option<Box<dyn SessionStore>>,
    bridge: Option<Box<dyn UiBridge>>,
}

impl GovernorBuilder {
    pub fn config(mut self, config: GovernorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn signals(mut self, signals: DeviceSignals) -> Self {
        self.signals = signals;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Rc::new(clock));
        self
    }

    pub fn sockets(mut self, connector: impl SocketConnector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    pub fn object_urls(mut self, allocator: impl ObjectUrlAllocator + 'static) -> Self {
        self.allocator = Some(Box::new(allocator));
        self
    }

    pub fn session_store(mut self, store: impl SessionStore + 'static) -> Self {
        self.session = Some(Box::new(store));
        self
    }

    pub fn bridge(mut self, bridge: impl UiBridge + 'static) -> Self {
        self.bridge = Some(Box::new(bridge));
        self
    }

    pub fn build(self) -> Governor {
        let mut classification = classify(&self.signals);
        if let Some(forced) = self.config.tier {
            if forced != classification.tier {
                info!(classified = %classification.tier, forced = %forced, "tier forced by config");
            }
            classification.tier = forced;
        }
        let tier = classification.tier;

        let trackers = TrackerSet::new(
            self.connector.unwrap_or_else(|| Box::new(NoSockets)),
            self.allocator.unwrap_or_else(|| Box::new(NoObjectUrls)),
            self.config.blob_capacity,
            self.session
                .unwrap_or_else(|| Box::new(MemorySessionStore::new())),
        );

        Governor {
            clock: self.clock.unwrap_or_else(|| Rc::new(MonotonicClock::new())),
            page: self.page,
            bridge: self.bridge.unwrap_or_else(|| Box::new(NoopUiBridge)),
            monitor: PressureMonitor::new(&classification),
            trackers,
            queue: TimerQueue::new(),
            timers: TimerGovernor::new(tier),
            visibility: VisibilityController::new(self.config.visibility.clone()),
            jank: JankDetector::new(tier, self.config.jank.clone()),
            deferrals: DeferredActivations::new(),
            intervals: BTreeMap::new(),
            telemetry: GovernorHandle::new(classification),
            classification,
            config: self.config,
            gc_timer: None,
            scroll_pending: None,
            route: None,
            started: false,
        }
    }
}

/// The single resource governor for one page.
///
/// Owns every tracker, the pressure monitor and all timers. Nothing runs on
/// its own: the host forwards lifecycle events through the `on_*` methods
/// and calls [`Governor::tick`] to run whatever is due on the clock.
pub struct Governor {
    config: GovernorConfig,
    clock: Rc<dyn Clock>,
    page: Box<dyn Page>,
    bridge: Box<dyn UiBridge>,
    classification: Classification,
    monitor: PressureMonitor,
    trackers: TrackerSet,
    queue: TimerQueue<Task>,
    timers: TimerGovernor,
    visibility: VisibilityController,
    jank: JankDetector,
    deferrals: DeferredActivations,
    intervals: BTreeMap<TimerId, IntervalCallback>,
    telemetry: GovernorHandle,
    gc_timer: Option<TimerId>,
    scroll_pending: Option<TimerId>,
    route: Option<String>,
    started: bool,
}

impl Governor {
    pub fn builder(page: impl Page + 'static) -> GovernorBuilder {
        GovernorBuilder {
            page: Box::new(page),
            config: GovernorConfig::default(),
            signals: DeviceSignals::default(),
            clock: None,
            connector: None,
            allocator: None,
            session: None,
            bridge: None,
        }
    }

    /// Starts the periodic cycle, the settle-time initial cycle and, where
    /// the tier can escalate, the frame-timing window.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let now = self.now();
        let tier = self.tier();
        self.gc_timer = Some(self.queue.schedule_every(
            now,
            self.monitor.profile().gc_interval(),
            Task::GcCycle,
        ));
        self.queue
            .schedule_once(now, tier.initial_cycle_delay(), Task::InitialCycle);
        if self.jank.is_armed() {
            self.queue
                .schedule_once(now, self.config.jank.start_delay(), Task::JankStart);
        }
        info!(
            tier = %tier,
            platform = ?self.classification.platform,
            memory_gb = self.classification.memory_gb,
            cores = self.classification.cores,
            "resource governor active"
        );
    }

    /// True once [`Governor::start`] has scheduled the cycles.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Runs every task due at the clock's current time. Returns how many ran.
    pub fn tick(&mut self) -> usize {
        let now = self.now();
        let mut ran = 0;
        while let Some(fired) = self.queue.pop_due(now) {
            self.dispatch(fired.id, fired.task, now);
            ran += 1;
        }
        ran
    }

    /// Earliest time a scheduled task becomes due.
    pub fn next_due(&self) -> Option<Timestamp> {
        self.queue.next_due()
    }

    /// Out-of-cycle pressure check, subject to the interval guard.
    pub fn run_cycle(&mut self) -> Option<CycleReport> {
        let now = self.now();
        self.cycle(now)
    }

    pub fn on_visibility_change(&mut self, hidden: bool) {
        let now = self.now();
        if hidden {
            let Some(stale) = self.visibility.hide(now) else {
                return;
            };
            for id in stale {
                self.queue.cancel(id);
            }
            self.telemetry.record_hidden(true);
            let outcome = self.full_release(now);
            self.emit(GovernorSignal::PauseAnimations {
                reason: "tab-hidden",
            });
            info!(released = outcome.counts.total(), "page hidden, resources released");
            return;
        }

        let Some(plan) = self.visibility.show(now) else {
            return;
        };
        self.telemetry.record_hidden(false);
        let hidden_ms = u64::try_from(plan.hidden_for.as_millis()).unwrap_or(u64::MAX);
        self.emit(GovernorSignal::ResumeAnimations { hidden_ms });
        for (delay, step) in plan.steps {
            if step == RestoreStep::DeepCleanup {
                info!(hidden_s = hidden_ms / 1_000, "long absence, deep cleanup scheduled");
            }
            let id = self.queue.schedule_once(now, delay, Task::Restore(step));
            self.visibility.track(id);
        }
        debug!(hidden_ms, "page visible, graduated restore scheduled");
    }

    /// Page teardown. Runs the full release synchronously since nothing is
    /// guaranteed to run afterwards.
    pub fn on_page_hide(&mut self) {
        let now = self.now();
        let outcome = self.full_release(now);
        let collected = self.page.request_collection();
        self.emit(GovernorSignal::PauseAnimations {
            reason: "page-hide",
        });
        info!(
            released = outcome.counts.total(),
            collected, "page hide, emergency release"
        );
    }

    /// Page show. A page restored from the back/forward cache gets a
    /// viewport restore and a fresh cycle shortly after.
    pub fn on_page_show(&mut self, persisted: bool) {
        if !persisted {
            return;
        }
        let now = self.now();
        self.queue.schedule_once(
            now,
            self.config.visibility.bfcache_restore(),
            Task::BfcacheRestore,
        );
    }

    /// Scroll notification, debounced to one pending settle task.
    pub fn on_scroll(&mut self) {
        if let Some(id) = self.scroll_pending {
            if self.queue.is_scheduled(id) {
                return;
            }
        }
        let now = self.now();
        let delay = self.tier().scroll_debounce();
        self.scroll_pending = Some(self.queue.schedule_once(now, delay, Task::ScrollSettled));
    }

    pub fn on_route_change(&mut self, path: &str) {
        if self.route.as_deref() == Some(path) {
            return;
        }
        info!(path, "route change");
        self.route = Some(path.to_string());
        let now = self.now();
        self.queue
            .schedule_once(now, ROUTE_CLEANUP_DELAY, Task::RouteCleanup);
    }

    /// Animation-frame callback used for jank sampling.
    pub fn on_animation_frame(&mut self) {
        let now = self.now();
        if let Some(escalation) = self.jank.on_frame(now) {
            self.escalate(escalation, now);
        }
    }

    pub fn report_long_task(&mut self, duration: Duration) {
        if self.classification.platform.is_constrained() && duration > LONG_TASK_THRESHOLD {
            self.emergency("long-task");
        }
    }

    /// Reports an accurate memory measurement of the whole page.
    pub fn report_measured_memory(&mut self, total_bytes: u64) {
        let total_mb = (total_bytes as f64 / 1_048_576.0).round() as u64;
        if total_mb == 0 {
            return;
        }
        self.telemetry.record_measured(total_mb);
        let budget_mb = self.classification.memory_gb * MEASURED_MB_PER_GB;
        if self.tier().is_constrained() && total_mb as f64 > budget_mb {
            self.emergency("measured-memory");
        }
    }

    /// Pressure reported by another collaborator.
    pub fn report_external_pressure(&mut self, level: PressureLevel) {
        if level == PressureLevel::Critical {
            self.emergency("external");
        }
    }

    /// Handles an inbound message. Returns false when it was not understood.
    pub fn handle_message(&mut self, message: &UiMessage) -> bool {
        match InboundCommand::parse(message) {
            Ok(InboundCommand::Pressure(level)) => {
                self.report_external_pressure(level);
                true
            }
            Ok(InboundCommand::RouteChanged(path)) => {
                self.on_route_change(&path);
                true
            }
            Err(err) => {
                debug!(error = %err, "inbound message ignored");
                false
            }
        }
    }

    pub fn open_socket(
        &mut self,
        url: &str,
        protocols: &[String],
    ) -> Result<SocketHandle, HostError> {
        let now = self.now();
        self.trackers.open_socket(url, protocols, now)
    }

    pub fn create_object_url(&mut self, blob: &Blob) -> Result<String, HostError> {
        let now = self.now();
        let allocation = self.trackers.allocate_blob(blob, now)?;
        if !allocation.revoked.is_empty() {
            debug!(revoked = allocation.revoked.len(), "blob capacity reached");
            self.telemetry
                .record_evicted(ResourceKind::Blob, allocation.revoked.len());
        }
        Ok(allocation.url)
    }

    pub fn revoke_object_url(&mut self, url: &str) -> Result<bool, HostError> {
        self.trackers.revoke_blob(url)
    }

    /// Marks an object URL as in use; pinned URLs are never revoked by the
    /// governor.
    pub fn pin_object_url(&mut self, url: &str) -> bool {
        self.trackers.pin_blob(url)
    }

    pub fn unpin_object_url(&mut self, url: &str) -> bool {
        self.trackers.unpin_blob(url)
    }

    /// Registers a periodic callback through the timer governor.
    pub fn set_interval(
        &mut self,
        period: Duration,
        callback: impl FnMut() + 'static,
    ) -> IntervalGrant {
        let now = self.now();
        let grant = self
            .timers
            .set_interval(&mut self.queue, now, period, Task::AppInterval);
        self.intervals.insert(grant.id, Box::new(callback));
        self.forget_intervals(&grant.evicted);
        grant
    }

    pub fn clear_interval(&mut self, id: TimerId) -> bool {
        self.intervals.remove(&id);
        self.timers.clear_interval(&mut self.queue, id)
    }

    /// Runs `activate` once `element` comes within `margin_px` of the
    /// viewport, or the tier's deferral margin when `None`.
    pub fn defer_until_near(
        &mut self,
        element: ElementId,
        margin_px: Option<f64>,
        activate: impl FnOnce() + 'static,
    ) {
        let margin = margin_px.unwrap_or_else(|| self.tier().deferral_margin_px());
        self.deferrals.register(element, margin, Box::new(activate));
        let now = self.now();
        self.queue
            .schedule_once(now, DEFERRAL_IDLE_DELAY, Task::DeferralCheck);
    }

    pub fn register_history<C>(&mut self, name: impl Into<String>, collection: &Rc<RefCell<C>>)
    where
        C: HistoryCollection + 'static,
    {
        self.trackers.register_history(name, collection);
    }

    /// Shared read-only view of the latest stats and counters. Stays valid
    /// after the governor is dropped.
    pub fn handle(&self) -> GovernorHandle {
        self.telemetry.clone()
    }

    /// Effective tier, including any escalation since startup.
    pub fn tier(&self) -> Tier {
        self.monitor.tier()
    }

    pub fn profile(&self) -> &TierProfile {
        self.monitor.profile()
    }

    /// Classification made at construction. Escalation does not rewrite it.
    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility.state()
    }

    pub fn page(&self) -> &dyn Page {
        self.page.as_ref()
    }

    pub fn trackers(&self) -> &TrackerSet {
        &self.trackers
    }

    pub fn session_store_mut(&mut self) -> &mut dyn SessionStore {
        self.trackers.session_store_mut()
    }

    /// Registry of application intervals throttled by tier and visibility.
    pub fn timers(&self) -> &TimerGovernor {
        &self.timers
    }

    pub fn pending_deferrals(&self) -> usize {
        self.deferrals.len()
    }

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn dispatch(&mut self, id: TimerId, task: Task, now: Timestamp) {
        match task {
            Task::GcCycle | Task::InitialCycle => {
                self.cycle(now);
            }
            Task::ScrollSettled => self.scroll_settled(now),
            Task::Restore(step) => {
                self.visibility.complete(id);
                self.restore_step(step, now);
            }
            Task::BfcacheRestore => {
                let ctx = self.context(now).with_margin(BFCACHE_MARGIN_PX);
                self.restore_pass(&ctx, &[ResourceKind::Image]);
                self.cycle(now);
            }
            Task::RouteCleanup => self.route_cleanup(now),
            Task::JankStart => {
                self.jank.start();
                self.queue
                    .schedule_once(now, self.config.jank.window(), Task::JankStop);
            }
            Task::JankStop => self.jank.stop(),
            Task::AppInterval => {
                if let Some(callback) = self.intervals.get_mut(&id) {
                    callback();
                }
            }
            Task::DeferralCheck => self.run_deferrals(),
        }
    }

    fn context(&self, now: Timestamp) -> SweepContext {
        self.monitor.context(now).hidden(self.visibility.is_hidden())
    }

    fn cycle(&mut self, now: Timestamp) -> Option<CycleReport> {
        let report = self.monitor.run_cycle(
            self.page.as_mut(),
            &mut self.trackers,
            now,
            self.visibility.is_hidden(),
        )?;
        self.telemetry.record_cycle(&report);
        self.emit(GovernorSignal::CycleCompleted(report.stats));
        Some(report)
    }

    fn sweep_pass(&mut self, ctx: &SweepContext, kinds: &[ResourceKind]) -> PassOutcome {
        let outcome = self.trackers.sweep(self.page.as_mut(), ctx, kinds);
        self.telemetry.record_sweep(&outcome);
        outcome
    }

    fn restore_pass(&mut self, ctx: &SweepContext, kinds: &[ResourceKind]) -> PassOutcome {
        let outcome = self.trackers.restore(self.page.as_mut(), ctx, kinds);
        self.telemetry.record_restore(&outcome);
        outcome
    }

    /// Zero-margin release treating nothing as nearly visible.
    fn full_release(&mut self, now: Timestamp) -> PassOutcome {
        let ctx = self
            .monitor
            .context(now)
            .with_level(PressureLevel::Critical)
            .with_margin(0.0)
            .hidden(true);
        self.sweep_pass(&ctx, &HIDE_RELEASE)
    }

    fn restore_step(&mut self, step: RestoreStep, now: Timestamp) {
        match step {
            RestoreStep::Phase(phase) => {
                let margin = phase.margin(self.monitor.profile());
                let ctx = self.context(now).with_margin(margin);
                let outcome = self.restore_pass(&ctx, phase.kinds());
                debug!(?phase, margin, restored = outcome.counts.total(), "restore phase");
                if phase.runs_cycle() {
                    self.cycle(now);
                }
            }
            RestoreStep::DeepCleanup => {
                let ctx = self.context(now);
                let outcome = self.sweep_pass(&ctx, &DEEP_CLEANUP);
                info!(pruned = outcome.counts.total(), "deep cleanup after long absence");
            }
        }
    }

    fn scroll_settled(&mut self, now: Timestamp) {
        self.scroll_pending = None;
        let ctx = self.context(now);
        self.restore_pass(&ctx, &[ResourceKind::Image]);
        if self.tier().is_constrained() {
            self.sweep_pass(&ctx, &[ResourceKind::Image]);
        }
        self.run_deferrals();
    }

    fn route_cleanup(&mut self, now: Timestamp) {
        let mut kinds = ROUTE_CLEANUP.to_vec();
        if self.tier().is_constrained() {
            kinds.push(ResourceKind::StoreItem);
        }
        let ctx = self.context(now);
        let outcome = self.sweep_pass(&ctx, &kinds);
        debug!(released = outcome.counts.total(), "route cleanup");
    }

    fn run_deferrals(&mut self) {
        for activate in self.deferrals.take_ready(self.page.as_ref()) {
            activate();
        }
    }

    fn emergency(&mut self, reason: &'static str) {
        let now = self.now();
        let tier = self.tier();
        warn!(reason, tier = %tier, "low memory, emergency release");
        let ctx = self
            .context(now)
            .with_level(PressureLevel::Critical)
            .with_margin(0.0);
        self.sweep_pass(&ctx, &EMERGENCY_RELEASE);
        self.page.request_collection();
        self.telemetry.record_emergency();
        self.emit(GovernorSignal::LowMemory {
            tier,
            reason,
            stats: self.monitor.last_stats().copied(),
        });
    }

    fn escalate(&mut self, escalation: Escalation, now: Timestamp) {
        let Escalation {
            from,
            to,
            slow_ratio,
        } = escalation;
        self.monitor.retier(to);
        let cancelled = self.timers.retier(&mut self.queue, to);
        self.forget_intervals(&cancelled);
        if let Some(previous) = self.gc_timer.take() {
            self.queue.cancel(previous);
            self.gc_timer = Some(self.queue.schedule_every(
                now,
                to.profile().gc_interval(),
                Task::GcCycle,
            ));
        }
        self.telemetry.record_escalation(from, to);
        self.emit(GovernorSignal::TierEscalated {
            from,
            to,
            slow_ratio,
        });
    }

    fn forget_intervals(&mut self, ids: &[TimerId]) {
        for id in ids {
            self.intervals.remove(id);
        }
        if !ids.is_empty() {
            self.telemetry.record_evicted(ResourceKind::Timer, ids.len());
        }
    }

    fn emit(&self, signal: GovernorSignal) {
        match signal.to_message() {
            Ok(message) => self.bridge.send(message),
            Err(err) => debug!(signal = signal.name(), error = %err, "signal encoding failed"),
        }
    }
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("tier", &self.tier())
            .field("visibility", &self.visibility.state())
            .field("cycles", &self.monitor.cycles())
            .field("pending_tasks", &self.queue.len())
            .finish_non_exhaustive()
    }
}
