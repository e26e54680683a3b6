use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod classify;
pub mod policy;
pub mod profile;

pub use classify::{classify, Classification, DeviceSignals, Platform};
pub use profile::TierProfile;

/// Discrete device-capability class driving every threshold selection.
///
/// Ordered by capability: `UltraLow < Low < Mid < High`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    UltraLow,
    Low,
    Mid,
    High,
}

impl Tier {
    /// All tiers from least to most capable.
    pub const ALL: [Tier; 4] = [Tier::UltraLow, Tier::Low, Tier::Mid, Tier::High];

    /// Maps an estimated RAM size to a tier using the fixed breakpoints.
    pub fn from_memory_gb(gb: f64) -> Self {
        if gb <= 1.0 {
            Tier::UltraLow
        } else if gb <= 2.0 {
            Tier::Low
        } else if gb <= 4.0 {
            Tier::Mid
        } else {
            Tier::High
        }
    }

    /// Constrained tiers get proactive eviction and timer interception.
    pub fn is_constrained(self) -> bool {
        matches!(self, Tier::UltraLow | Tier::Low)
    }

    /// Tier the jank detector moves to when real frame timing is worse
    /// than classified. Constrained tiers have nowhere further to go.
    pub fn escalation_target(self) -> Option<Tier> {
        match self {
            Tier::Mid | Tier::High => Some(Tier::Low),
            Tier::Low | Tier::UltraLow => None,
        }
    }

    /// Limits associated with this tier.
    pub fn profile(self) -> TierProfile {
        TierProfile::for_tier(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::UltraLow => "ultra-low",
            Tier::Low => "low",
            Tier::Mid => "mid",
            Tier::High => "high",
        }
    }
}

impl Default for Tier {
    fn default() -> Self {
        Self::Mid
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a tier name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown device tier `{0}` (expected ultra-low, low, mid or high)")]
pub struct ParseTierError(String);

impl FromStr for Tier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ultra-low" | "ultralow" | "ultra_low" => Ok(Tier::UltraLow),
            "low" => Ok(Tier::Low),
            "mid" | "medium" => Ok(Tier::Mid),
            "high" => Ok(Tier::High),
            other => Err(ParseTierError(other.to_string())),
        }
    }
}
