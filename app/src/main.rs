use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use ebb_governor::{Governor, GovernorConfig};
use host::sim::{SimObjectUrls, SimPage, SimSockets};
use host::{Blob, FragmentKind, ImageSource};
use scheduler::{Clock, ManualClock};
use tier::DeviceSignals;
use tracing_subscriber::EnvFilter;
use ui::LogUiBridge;
use util::{Rect, Viewport};

const USER_AGENT: &str =
    "Mozilla/5.0 (Linux; Android 13; Pixel 6a) AppleWebKit/537.36 Chrome/124.0 Mobile Safari/537.36";
const FRAME_WIDGETS: usize = 25;

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => GovernorConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => GovernorConfig::default(),
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let clock = ManualClock::new();
    let page = dashboard();
    let sockets = SimSockets::new();
    let urls = SimObjectUrls::new();
    let mut governor = Governor::builder(page.clone())
        .config(config)
        .signals(DeviceSignals {
            memory_gb: None,
            logical_cores: Some(6),
            screen: Some((390, 844)),
            user_agent: Some(USER_AGENT.to_string()),
            max_touch_points: 5,
        })
        .clock(clock.clone())
        .sockets(sockets.clone())
        .object_urls(urls.clone())
        .bridge(LogUiBridge)
        .build();
    governor.start();

    let trades = Rc::new(RefCell::new(Vec::<u64>::new()));
    governor.register_history("feed.trades", &trades);
    let ticks = Rc::new(Cell::new(0u64));
    for _ in 0..4 {
        let ticks = Rc::clone(&ticks);
        let trades = Rc::clone(&trades);
        governor.set_interval(Duration::from_millis(250), move || {
            ticks.set(ticks.get() + 1);
            trades.borrow_mut().push(ticks.get());
        });
    }

    let streams = ["btcusdt@trade", "ethusdt@trade", "solusdt@kline_1m"];
    for stream in streams {
        governor
            .open_socket(&format!("wss://stream.example/ws/{stream}"), &[])
            .with_context(|| format!("opening {stream}"))?;
    }
    for n in 0..24u8 {
        let url = governor
            .create_object_url(&Blob::new("image/png", vec![n; 64]))
            .context("allocating object url")?;
        // The account avatar stays referenced for the whole session.
        if n == 0 {
            governor.pin_object_url(&url);
        }
    }

    // Startup with janky frames: every third frame is slow.
    run(&mut governor, &clock, Duration::from_secs(8), &[16, 16, 90]);

    page.scroll_to(1_800.0);
    governor.on_scroll();
    run(&mut governor, &clock, Duration::from_secs(4), &[16]);

    governor.on_visibility_change(true);
    run(&mut governor, &clock, Duration::from_secs(45), &[]);
    governor.on_visibility_change(false);
    run(&mut governor, &clock, Duration::from_secs(3), &[16]);

    governor.on_route_change("/community");
    page.add_fragment(FragmentKind::Tooltip);
    page.add_fragment(FragmentKind::Backdrop);
    run(&mut governor, &clock, Duration::from_secs(2), &[16]);

    governor.report_long_task(Duration::from_millis(320));
    governor.report_measured_memory(2_900 * 1024 * 1024);
    run(&mut governor, &clock, Duration::from_secs(10), &[16]);

    tracing::info!(
        ticks = ticks.get(),
        live_sockets = sockets.open_count(),
        live_urls = urls.live().len(),
        trades = trades.borrow().len(),
        at_ms = clock.now().as_millis(),
        "session finished"
    );
    println!("{}", governor.handle().to_json()?);
    Ok(())
}

/// Advances the clock in frame-sized steps, ticking the governor and
/// delivering animation frames. An empty pattern means no frames are drawn.
fn run(governor: &mut Governor, clock: &ManualClock, length: Duration, frame_pattern_ms: &[u64]) {
    let end = clock.now() + length;
    let mut frame = 0usize;
    while clock.now() < end {
        let step = frame_pattern_ms
            .get(frame % frame_pattern_ms.len().max(1))
            .copied()
            .unwrap_or(100);
        clock.advance(Duration::from_millis(step));
        governor.tick();
        if !frame_pattern_ms.is_empty() {
            governor.on_animation_frame();
        }
        frame += 1;
    }
}

/// A trading dashboard: hero chart, thumbnail grid, embedded widgets,
/// canvases, videos and a few fragments left behind by closed popovers.
fn dashboard() -> SimPage {
    let page = SimPage::new(Viewport::new(390.0, 844.0));
    page.add_image(
        Rect::new(0.0, 0.0, 390.0, 220.0),
        ImageSource::new("https://cdn.example/hero.avif")
            .with_srcset("https://cdn.example/hero@2x.avif 2x"),
    );
    for n in 0..24 {
        let top = 260.0 + (n / 2) as f64 * 180.0;
        let left = (n % 2) as f64 * 195.0;
        page.add_image(
            Rect::new(left, top, 190.0, 170.0),
            ImageSource::new(format!("https://cdn.example/pairs/{n}.webp")),
        );
        page.add_image(
            Rect::new(left + 4.0, top + 4.0, 24.0, 24.0),
            ImageSource::new(format!("https://cdn.example/icons/{n}.svg")),
        );
    }
    for n in 0..FRAME_WIDGETS {
        page.add_frame(
            Rect::new(0.0, 2_500.0 + n as f64 * 420.0, 390.0, 400.0),
            format!("https://widgets.example/chart?symbol={n}"),
        );
    }
    let scene = page.add_canvas(Rect::new(0.0, 300.0, 390.0, 300.0), 780, 600);
    page.protect(scene);
    for n in 0..3 {
        page.add_canvas(Rect::new(0.0, 1_400.0 + n as f64 * 900.0, 390.0, 260.0), 780, 520);
    }
    page.add_video(Rect::new(0.0, 900.0, 390.0, 220.0), "https://cdn.example/promo.mp4", true);
    page.add_video(Rect::new(0.0, 4_000.0, 390.0, 220.0), "https://cdn.example/recap.mp4", true);
    page.add_fragment(FragmentKind::Portal);
    page.add_fragment(FragmentKind::Toast);
    page
}
