use std::time::Duration;

use crate::{Platform, Tier};

impl Tier {
    /// Sockets older than this are force-closed by the socket sweep.
    pub fn socket_max_age(self) -> Duration {
        if self.is_constrained() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(60)
        }
    }

    /// Object URLs older than this are revoked by the blob sweep.
    pub fn blob_max_age(self) -> Duration {
        match self {
            Tier::UltraLow => Duration::from_secs(15),
            _ => Duration::from_secs(30),
        }
    }

    /// Maximum length kept for application history collections.
    pub fn store_array_cap(self) -> usize {
        if self.is_constrained() {
            20
        } else {
            50
        }
    }

    /// Maximum number of transient session entries, if capped at all.
    pub fn session_entry_cap(self) -> Option<usize> {
        match self {
            Tier::UltraLow => Some(15),
            Tier::Low => Some(30),
            Tier::Mid | Tier::High => None,
        }
    }

    /// Minimum interval for periodic callbacks. `None` means the timer
    /// governor does not intercept registrations on this tier.
    pub fn timer_floor(self) -> Option<Duration> {
        match self {
            Tier::UltraLow => Some(Duration::from_millis(2_000)),
            Tier::Low => Some(Duration::from_millis(1_000)),
            Tier::Mid | Tier::High => None,
        }
    }

    pub fn scroll_debounce(self) -> Duration {
        if self.is_constrained() {
            Duration::from_millis(150)
        } else {
            Duration::from_millis(300)
        }
    }

    /// Default look-ahead margin for deferred activations.
    pub fn deferral_margin_px(self) -> f64 {
        if self.is_constrained() {
            100.0
        } else {
            300.0
        }
    }

    /// Delay before the first pressure cycle after startup.
    pub fn initial_cycle_delay(self) -> Duration {
        if self.is_constrained() {
            Duration::from_millis(1_500)
        } else {
            Duration::from_millis(3_000)
        }
    }

    /// Number of embedded frames allowed to keep a live source.
    /// Constrained platforms get a fixed budget; elsewhere constrained tiers
    /// share a floor of four and the rest use their profile.
    pub fn max_active_frames(self, platform: Platform) -> usize {
        match (platform.is_constrained(), self.is_constrained()) {
            (true, true) => 2,
            (true, false) | (false, true) => 4,
            (false, false) => self.profile().max_frames as usize,
        }
    }
}
