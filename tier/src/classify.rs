use serde::Serialize;

use crate::Tier;

const DEFAULT_MEMORY_GB: f64 = 4.0;
const DEFAULT_CORES: u32 = 4;
const DEFAULT_SCREEN: (u32, u32) = (375, 667);

/// Host platform family, derived from user-agent class hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Ios,
    Android,
    OtherMobile,
    Desktop,
}

impl Platform {
    /// Detects the platform from a user-agent string.
    ///
    /// Desktop-class iPads report a Macintosh user agent; they are told apart
    /// by having more than one touch point.
    pub fn detect(user_agent: &str, max_touch_points: u32) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ["iphone", "ipad", "ipod"].iter().any(|needle| ua.contains(needle))
            || (ua.contains("macintosh") && max_touch_points > 1)
        {
            Platform::Ios
        } else if ua.contains("android") {
            Platform::Android
        } else if ua.contains("mobi") {
            Platform::OtherMobile
        } else {
            Platform::Desktop
        }
    }

    pub fn is_mobile(self) -> bool {
        !matches!(self, Platform::Desktop)
    }

    /// Platforms that kill tabs aggressively and expose no heap introspection.
    pub fn is_constrained(self) -> bool {
        matches!(self, Platform::Ios)
    }
}

/// Raw signals available at startup. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct DeviceSignals {
    /// Platform-reported memory hint in GB.
    pub memory_gb: Option<f64>,
    pub logical_cores: Option<u32>,
    /// Screen size in CSS pixels (width, height).
    pub screen: Option<(u32, u32)>,
    pub user_agent: Option<String>,
    pub max_touch_points: u32,
}

/// Where the memory estimate behind a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    Reported,
    Heuristic,
    Default,
}

/// Result of device classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub tier: Tier,
    pub platform: Platform,
    pub memory_gb: f64,
    pub cores: u32,
    pub source: MemorySource,
    /// Memory budget for the heuristic pressure estimate, where the
    /// platform offers no heap introspection.
    pub heuristic_ceiling_mb: Option<u32>,
}

/// Classifies the device. Never fails; missing signals fall back to a
/// mid-tier desktop.
pub fn classify(signals: &DeviceSignals) -> Classification {
    let platform = signals
        .user_agent
        .as_deref()
        .map(|ua| Platform::detect(ua, signals.max_touch_points))
        .unwrap_or(Platform::Desktop);
    let cores = signals
        .logical_cores
        .filter(|cores| *cores > 0)
        .unwrap_or(DEFAULT_CORES);

    let (memory_gb, source) = match signals.memory_gb.filter(|gb| gb.is_finite() && *gb > 0.0) {
        Some(gb) => (gb, MemorySource::Reported),
        None => match estimate_memory_gb(platform, cores, signals.screen) {
            Some(gb) => (gb, MemorySource::Heuristic),
            None => (DEFAULT_MEMORY_GB, MemorySource::Default),
        },
    };

    Classification {
        tier: Tier::from_memory_gb(memory_gb),
        platform,
        memory_gb,
        cores,
        source,
        heuristic_ceiling_mb: heuristic_ceiling_mb(platform, memory_gb),
    }
}

fn estimate_memory_gb(platform: Platform, cores: u32, screen: Option<(u32, u32)>) -> Option<f64> {
    match platform {
        Platform::Ios => {
            let (width, height) = screen.unwrap_or(DEFAULT_SCREEN);
            let longest = width.max(height);
            let gb = if longest <= 667 && cores <= 2 {
                2.0
            } else if longest <= 812 && cores <= 4 {
                3.0
            } else if longest >= 926 {
                6.0
            } else {
                4.0
            };
            Some(gb)
        }
        Platform::Android if cores <= 2 => Some(2.0),
        Platform::Android if cores <= 4 => Some(3.0),
        _ => None,
    }
}

fn heuristic_ceiling_mb(platform: Platform, memory_gb: f64) -> Option<u32> {
    if !platform.is_constrained() {
        return None;
    }
    let ceiling = if memory_gb <= 3.0 {
        80
    } else if memory_gb <= 4.0 {
        120
    } else {
        200
    };
    Some(ceiling)
}
