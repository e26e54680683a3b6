use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use ebb_governor::{Governor, GovernorConfig, Visibility};
use host::sim::{SimObjectUrls, SimPage, SimSockets};
use host::{Blob, ElementId, FragmentKind, ImageSource, Page, ReadyState};
use memory::PressureLevel;
use scheduler::ManualClock;
use tier::{DeviceSignals, Tier};
use ui::RecordingBridge;
use util::Rect;

const IPHONE: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 16_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148";

struct Harness {
    page: SimPage,
    clock: ManualClock,
    sockets: SimSockets,
    urls: SimObjectUrls,
    bridge: RecordingBridge,
    governor: Governor,
}

impl Harness {
    fn new(tier: Tier) -> Self {
        Self::with_signals(DeviceSignals::default(), Some(tier))
    }

    fn with_signals(signals: DeviceSignals, tier: Option<Tier>) -> Self {
        Self::on_page(SimPage::default(), signals, tier)
    }

    fn on_page(page: SimPage, signals: DeviceSignals, tier: Option<Tier>) -> Self {
        let clock = ManualClock::new();
        let sockets = SimSockets::new();
        let urls = SimObjectUrls::new();
        let bridge = RecordingBridge::new();
        let governor = Governor::builder(page.clone())
            .config(GovernorConfig {
                tier,
                ..GovernorConfig::default()
            })
            .signals(signals)
            .clock(clock.clone())
            .sockets(sockets.clone())
            .object_urls(urls.clone())
            .bridge(bridge.clone())
            .build();
        Self {
            page,
            clock,
            sockets,
            urls,
            bridge,
            governor,
        }
    }

    fn advance(&mut self, ms: u64) -> usize {
        self.clock.advance(Duration::from_millis(ms));
        self.governor.tick()
    }

    /// Delivers `count` animation frames `every_ms` apart without ticking.
    fn frames(&mut self, count: usize, every_ms: u64) {
        for _ in 0..count {
            self.clock.advance(Duration::from_millis(every_ms));
            self.governor.on_animation_frame();
        }
    }

    fn photo(&self, top: f64, src: &str) -> ElementId {
        self.page
            .add_image(Rect::new(0.0, top, 300.0, 200.0), ImageSource::new(src))
    }
}

fn iphone() -> DeviceSignals {
    DeviceSignals {
        user_agent: Some(IPHONE.to_string()),
        max_touch_points: 5,
        ..DeviceSignals::default()
    }
}

#[test]
fn oversized_tree_is_critical_and_requests_collection() {
    let mut h = Harness::new(Tier::Low);
    h.page.set_tree_nodes(1_950);
    h.governor.start();
    h.advance(1_500);

    let stats = h.governor.handle().last_stats().unwrap();
    assert_eq!(stats.level, PressureLevel::Critical);
    assert_eq!(stats.tree_node_count, 1_950);
    assert_eq!(stats.cycle_count, 1);
    assert_eq!(h.page.collections(), 1);

    let published = h.bridge.named("memory.gc");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].payload["level"], "critical");
    assert_eq!(published[0].payload["treeNodeCount"], 1_950);
}

#[test]
fn startup_jank_escalates_to_low_and_tightens_margins() {
    let mut h = Harness::with_signals(DeviceSignals::default(), None);
    assert_eq!(h.governor.tier(), Tier::Mid);
    // 400px below the fold: inside Mid's margin, outside Low's.
    let chart = h.photo(1_244.0, "https://cdn.example/chart.png");
    h.governor.start();
    h.advance(3_000);
    assert_eq!(h.page.image_source(chart), Some(ImageSource::new("https://cdn.example/chart.png")));

    h.frames(61, 80);
    assert_eq!(h.governor.tier(), Tier::Low);
    assert_eq!(h.governor.handle().tier(), Tier::Low);
    assert_eq!(h.governor.handle().escalated_from(), Some(Tier::Mid));
    let escalations = h.bridge.named("tier.escalated");
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].payload["from"], "mid");
    assert_eq!(escalations[0].payload["to"], "low");

    // The rescheduled cycle uses the Low interval and margin.
    h.advance(4_500);
    assert_eq!(h.page.image_source(chart), Some(ImageSource::placeholder()));

    // Later jank never escalates again.
    h.frames(120, 200);
    assert_eq!(h.bridge.named("tier.escalated").len(), 1);
}

#[test]
fn rejecting_image_does_not_starve_later_images() {
    let mut h = Harness::new(Tier::Mid);
    let stuck = h.photo(5_000.0, "https://cdn.example/stuck.jpg");
    h.page.fail_mutations(stuck);
    let healthy: Vec<ElementId> = (1..=5)
        .map(|n| h.photo(5_000.0 + n as f64 * 300.0, &format!("https://cdn.example/{n}.jpg")))
        .collect();
    h.governor.start();
    h.advance(3_000);
    let interval = Tier::Mid.profile().gc_interval().as_millis() as u64;
    h.advance(interval);
    h.advance(interval);

    for id in &healthy {
        assert_eq!(h.page.image_source(*id), Some(ImageSource::placeholder()));
    }
    assert_eq!(
        h.page.image_source(stuck).map(|source| source.src),
        Some("https://cdn.example/stuck.jpg".to_string())
    );
    assert!(!h.governor.trackers().images().is_evicted(stuck));
    assert!(h.governor.handle().last_stats().unwrap().cycle_count >= 3);
}

#[test]
fn constrained_platform_keeps_two_nearest_frames() {
    let page = SimPage::default();
    let widgets: Vec<ElementId> = (0..25)
        .map(|n| {
            page.add_frame(
                Rect::new(0.0, n as f64 * 420.0, 390.0, 400.0),
                format!("https://widgets.example/{n}"),
            )
        })
        .collect();
    let mut h = Harness::on_page(page, iphone(), Some(Tier::Low));
    h.governor.start();
    h.advance(1_500);

    assert!(h.page.frame_src(widgets[0]).is_some());
    assert!(h.page.frame_src(widgets[1]).is_some());
    for id in &widgets[2..] {
        assert_eq!(h.page.frame_src(*id), None, "frame {id} should be blank");
        assert!(h.governor.trackers().frames().is_evicted(*id));
    }
    let stats = h.governor.handle().last_stats().unwrap();
    assert_eq!(stats.active_frames, 2);
    assert!(stats.heuristic_mb.is_some());
}

#[test]
fn sockets_survive_while_young_and_close_when_hidden() {
    let mut h = Harness::new(Tier::Mid);
    h.governor.open_socket("wss://feed.example/a", &[]).unwrap();
    h.governor.start();
    h.advance(8_000);
    assert_eq!(h.sockets.state(0), Some(ReadyState::Open));

    h.advance(2_000);
    h.governor.on_visibility_change(true);
    assert_eq!(h.sockets.state(0), Some(ReadyState::Closed));
    assert_eq!(h.bridge.named("animations.pause")[0].payload["reason"], "tab-hidden");

    h.governor.open_socket("wss://feed.example/b", &[]).unwrap();
    assert_eq!(h.governor.trackers().active_sockets(), 1);
    h.advance(6_000);
    assert_eq!(h.sockets.state(1), Some(ReadyState::Closed));
    assert_eq!(h.sockets.open_count(), 0);
    assert_eq!(h.governor.trackers().active_sockets(), 0);
}

#[test]
fn closed_sockets_leave_the_active_count() {
    let mut h = Harness::new(Tier::Mid);
    let first = h.governor.open_socket("wss://feed.example/a", &[]).unwrap();
    h.governor.open_socket("wss://feed.example/b", &[]).unwrap();
    assert_eq!(h.governor.trackers().active_sockets(), 2);

    first.close().unwrap();
    assert!(first.is_closed());
    assert_eq!(h.governor.trackers().active_sockets(), 1);

    h.sockets.drop_remote(1);
    assert_eq!(h.governor.trackers().active_sockets(), 0);
}

#[test]
fn blob_capacity_revokes_the_oldest_url() {
    let mut h = Harness::new(Tier::Mid);
    let urls: Vec<String> = (0..21u8)
        .map(|n| {
            h.governor
                .create_object_url(&Blob::new("image/png", vec![n; 8]))
                .unwrap()
        })
        .collect();

    assert_eq!(h.urls.revoked(), vec![urls[0].clone()]);
    let tracked: Vec<String> = h
        .governor
        .trackers()
        .blobs()
        .entries()
        .map(|entry| entry.url.clone())
        .collect();
    assert_eq!(tracked, urls[1..].to_vec());
    assert_eq!(h.governor.handle().evicted().blobs, 1);
}

#[test]
fn pinned_urls_outlive_capacity_and_age() {
    let mut h = Harness::new(Tier::Mid);
    let avatar = h
        .governor
        .create_object_url(&Blob::new("image/png", vec![1; 8]))
        .unwrap();
    assert!(h.governor.pin_object_url(&avatar));
    for n in 0..25u8 {
        h.governor
            .create_object_url(&Blob::new("image/png", vec![n; 8]))
            .unwrap();
    }
    assert!(h.urls.is_live(&avatar));

    h.governor.start();
    h.advance(40_000);
    assert!(h.urls.is_live(&avatar));
    assert_eq!(h.governor.trackers().blobs().entries().count(), 1);
}

#[test]
fn graduated_restore_brings_resources_back_in_phases() {
    let mut h = Harness::new(Tier::Mid);
    let near = h.page.add_image(
        Rect::new(0.0, 900.0, 300.0, 200.0),
        ImageSource::new("near.jpg").with_srcset("near.jpg 1x, near@2x.jpg 2x"),
    );
    let further = h.photo(1_000.0, "further.jpg");
    let chart = h.page.add_canvas(Rect::new(0.0, 1_000.0, 390.0, 300.0), 780, 600);

    h.governor.on_visibility_change(true);
    assert_eq!(h.governor.visibility(), Visibility::Hidden);
    assert!(h.governor.handle().is_hidden());
    assert_eq!(h.page.image_source(near), Some(ImageSource::placeholder()));
    assert_eq!(h.page.image_source(further), Some(ImageSource::placeholder()));
    assert_eq!(h.page.canvas_dims(chart), Some((1, 1)));

    h.clock.advance(Duration::from_millis(5_000));
    h.governor.on_visibility_change(false);
    assert_eq!(h.bridge.named("animations.resume")[0].payload["hiddenMs"], 5_000);

    h.advance(200);
    assert_eq!(
        h.page.image_source(near),
        Some(ImageSource::new("near.jpg").with_srcset("near.jpg 1x, near@2x.jpg 2x"))
    );
    assert_eq!(h.page.image_source(further), Some(ImageSource::placeholder()));
    assert_eq!(h.page.canvas_dims(chart), Some((1, 1)));

    h.advance(400);
    assert_eq!(h.page.canvas_dims(chart), Some((780, 600)));
    assert_eq!(h.page.image_source(further), Some(ImageSource::placeholder()));

    h.advance(200);
    assert_eq!(h.page.image_source(further), Some(ImageSource::new("further.jpg")));
    assert_eq!(h.governor.handle().cycles(), 1);
}

#[test]
fn hiding_again_cancels_pending_restore_phases() {
    let mut h = Harness::new(Tier::Mid);
    let near = h.photo(900.0, "near.jpg");

    h.governor.on_visibility_change(true);
    h.clock.advance(Duration::from_millis(1_000));
    h.governor.on_visibility_change(false);
    h.clock.advance(Duration::from_millis(100));
    h.governor.on_visibility_change(true);

    assert_eq!(h.advance(3_000), 0);
    assert_eq!(h.page.image_source(near), Some(ImageSource::placeholder()));
    assert_eq!(h.governor.next_due(), None);
}

#[test]
fn repeated_visibility_events_are_ignored() {
    let mut h = Harness::new(Tier::Mid);
    h.governor.on_visibility_change(false);
    assert!(h.bridge.messages().is_empty());

    h.governor.on_visibility_change(true);
    h.governor.on_visibility_change(true);
    assert_eq!(h.bridge.named("animations.pause").len(), 1);
}

#[test]
fn long_absence_runs_deep_cleanup() {
    let mut h = Harness::new(Tier::Mid);
    let history = Rc::new(RefCell::new((0..100u32).collect::<Vec<_>>()));
    h.governor.register_history("feed.trades", &history);

    h.governor.on_visibility_change(true);
    let tooltip = h.page.add_fragment(FragmentKind::Tooltip);
    h.clock.advance(Duration::from_secs(130));
    h.governor.on_visibility_change(false);

    h.advance(1_200);
    assert_eq!(history.borrow().len(), 100);

    h.advance(800);
    assert_eq!(history.borrow().len(), 50);
    assert_eq!(history.borrow()[0], 50);
    assert!(!h.page.contains(tooltip));
}

#[test]
fn route_change_on_low_tier_trims_store_arrays() {
    let mut h = Harness::new(Tier::Low);
    let history = Rc::new(RefCell::new((0..80u32).collect::<Vec<_>>()));
    h.governor.register_history("chat.messages", &history);
    let backdrop = h.page.add_fragment(FragmentKind::Backdrop);

    assert!(h.governor.handle_message(&ui::UiMessage::new(
        "route.changed",
        serde_json::json!({"path": "/community"}),
    )));
    h.advance(499);
    assert_eq!(history.borrow().len(), 80);

    h.advance(1);
    assert_eq!(history.borrow().len(), 20);
    assert_eq!(history.borrow()[0], 60);
    assert!(!h.page.contains(backdrop));
}

#[test]
fn long_tasks_matter_only_on_the_constrained_platform() {
    let mut ios = Harness::with_signals(iphone(), None);
    ios.governor.report_long_task(Duration::from_millis(150));
    assert_eq!(ios.page.collections(), 0);
    ios.governor.report_long_task(Duration::from_millis(250));
    assert_eq!(ios.page.collections(), 1);
    let low = ios.bridge.named("memory.low");
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].payload["reason"], "long-task");
    assert_eq!(low[0].payload["emergency"], true);

    let mut desktop = Harness::with_signals(DeviceSignals::default(), None);
    desktop.governor.report_long_task(Duration::from_millis(500));
    assert_eq!(desktop.page.collections(), 0);
    assert!(desktop.bridge.named("memory.low").is_empty());
}

#[test]
fn measured_memory_over_budget_is_an_emergency_on_low_tiers() {
    let mut low = Harness::with_signals(
        DeviceSignals {
            memory_gb: Some(2.0),
            ..DeviceSignals::default()
        },
        None,
    );
    assert_eq!(low.governor.tier(), Tier::Low);
    low.governor.report_measured_memory(1_000 * 1_048_576);
    assert_eq!(low.governor.handle().snapshot().emergencies, 0);
    low.governor.report_measured_memory(1_300 * 1_048_576);
    let snapshot = low.governor.handle().snapshot();
    assert_eq!(snapshot.emergencies, 1);
    assert_eq!(snapshot.measured_mb, Some(1_300));
    assert_eq!(low.page.collections(), 1);

    let mut mid = Harness::new(Tier::Mid);
    mid.governor.report_measured_memory(3_000 * 1_048_576);
    assert_eq!(mid.governor.handle().snapshot().emergencies, 0);
}

#[test]
fn low_tier_caps_periodic_callbacks() {
    let mut h = Harness::new(Tier::Low);
    let fired: Vec<Rc<Cell<u32>>> = (0..40).map(|_| Rc::new(Cell::new(0))).collect();
    for counter in &fired {
        let counter = Rc::clone(counter);
        let grant = h
            .governor
            .set_interval(Duration::from_millis(100), move || counter.set(counter.get() + 1));
        assert_eq!(grant.interval, Duration::from_millis(1_000));
    }
    assert_eq!(h.governor.timers().live_count(), 15);
    assert_eq!(h.governor.handle().evicted().timers, 25);

    h.advance(1_000);
    assert!(fired[..25].iter().all(|counter| counter.get() == 0));
    assert!(fired[25..].iter().all(|counter| counter.get() == 1));
}

#[test]
fn escalation_trims_existing_callbacks() {
    let mut h = Harness::with_signals(DeviceSignals::default(), None);
    for _ in 0..20 {
        h.governor.set_interval(Duration::from_millis(250), || {});
    }
    assert_eq!(h.governor.timers().live_count(), 20);

    h.governor.start();
    h.advance(2_000);
    h.frames(61, 80);

    assert_eq!(h.governor.tier(), Tier::Low);
    assert_eq!(h.governor.timers().live_count(), 15);
    assert_eq!(h.governor.handle().evicted().timers, 5);
}

#[test]
fn second_cycle_releases_nothing_new() {
    let mut h = Harness::new(Tier::Mid);
    h.photo(3_000.0, "far.jpg");
    h.page.add_canvas(Rect::new(0.0, 3_000.0, 390.0, 300.0), 780, 600);
    let clip = h.page.add_video(Rect::new(0.0, 3_400.0, 390.0, 220.0), "clip.mp4", true);

    let first = h.governor.run_cycle().unwrap();
    assert_eq!(first.evicted.images, 1);
    assert_eq!(first.evicted.canvases, 1);
    assert_eq!(first.evicted.videos, 1);
    assert!(h.page.video_info(clip).unwrap().paused);
    assert!(h.governor.run_cycle().is_none());

    h.clock.advance(Duration::from_millis(8_000));
    let second = h.governor.run_cycle().unwrap();
    assert_eq!(second.evicted.total(), 0);
    assert_eq!(second.restored.total(), 0);
}

#[test]
fn page_hide_releases_and_bfcache_show_restores() {
    let mut h = Harness::new(Tier::Mid);
    let near = h.photo(900.0, "near.jpg");

    h.governor.on_page_hide();
    assert_eq!(h.page.image_source(near), Some(ImageSource::placeholder()));
    assert_eq!(h.page.collections(), 1);
    assert_eq!(h.bridge.named("animations.pause")[0].payload["reason"], "page-hide");

    h.governor.on_page_show(false);
    assert_eq!(h.governor.next_due(), None);

    h.governor.on_page_show(true);
    h.advance(499);
    assert_eq!(h.page.image_source(near), Some(ImageSource::placeholder()));
    h.advance(1);
    assert_eq!(h.page.image_source(near), Some(ImageSource::new("near.jpg")));
    assert_eq!(h.governor.handle().cycles(), 1);
}

#[test]
fn detached_elements_do_not_break_the_cycle() {
    let mut h = Harness::new(Tier::Mid);
    let gone = h.photo(3_000.0, "gone.jpg");
    let kept = h.photo(3_200.0, "kept.jpg");
    h.governor.run_cycle().unwrap();
    h.page.detach(gone);

    h.page.scroll_to(3_000.0);
    h.clock.advance(Duration::from_millis(8_000));
    let report = h.governor.run_cycle().unwrap();
    assert_eq!(report.failures, 0);
    assert_eq!(report.restored.images, 1);
    assert_eq!(h.page.image_source(kept), Some(ImageSource::new("kept.jpg")));
    assert!(h.page.bounds(gone).is_err());
}
