use std::time::Duration;

use scheduler::Timestamp;
use tier::Tier;
use tracing::{debug, info};

use crate::config::JankConfig;

/// A one-way tier reclassification caused by observed frame timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Escalation {
    pub from: Tier,
    pub to: Tier,
    pub slow_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JankState {
    Idle,
    Sampling,
    Done,
}

/// Samples frame-to-frame deltas during a bounded startup window.
///
/// Every `sample_frames` deltas the slow fraction is checked; above
/// `slow_ratio` the detector reports an escalation and stops for good.
/// Tiers without an escalation target never sample.
#[derive(Debug)]
pub struct JankDetector {
    config: JankConfig,
    tier: Tier,
    target: Option<Tier>,
    state: JankState,
    last_frame: Option<Timestamp>,
    samples: usize,
    slow: usize,
}

impl JankDetector {
    pub fn new(tier: Tier, config: JankConfig) -> Self {
        Self {
            config,
            tier,
            target: tier.escalation_target(),
            state: JankState::Idle,
            last_frame: None,
            samples: 0,
            slow: 0,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.target.is_some() && self.state != JankState::Done
    }

    pub fn is_sampling(&self) -> bool {
        self.state == JankState::Sampling
    }

    pub fn start(&mut self) {
        if self.state == JankState::Idle && self.target.is_some() {
            debug!(tier = %self.tier, "frame sampling started");
            self.state = JankState::Sampling;
        }
    }

    /// Ends the sampling window.
    pub fn stop(&mut self) {
        if self.state == JankState::Sampling {
            debug!(samples = self.samples, "frame sampling window closed");
        }
        self.state = JankState::Done;
        self.last_frame = None;
    }

    /// Records one animation frame.
    pub fn on_frame(&mut self, now: Timestamp) -> Option<Escalation> {
        if self.state != JankState::Sampling {
            return None;
        }
        let Some(previous) = self.last_frame.replace(now) else {
            return None;
        };
        self.samples += 1;
        if now.saturating_since(previous) > Duration::from_millis(self.config.slow_frame_ms) {
            self.slow += 1;
        }
        if self.samples < self.config.sample_frames.max(1) {
            return None;
        }

        let slow_ratio = self.slow as f64 / self.samples as f64;
        self.samples = 0;
        self.slow = 0;
        if slow_ratio <= self.config.slow_ratio {
            return None;
        }
        let to = self.target?;
        info!(
            from = %self.tier,
            to = %to,
            slow_pct = (slow_ratio * 100.0).round() as u32,
            "jank detected, escalating tier"
        );
        self.stop();
        Some(Escalation {
            from: self.tier,
            to,
            slow_ratio,
        })
    }
}
