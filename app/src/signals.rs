use memory::{GcCycleStats, PressureLevel};
use serde::{Deserialize, Serialize};
use tier::Tier;
use ui::UiMessage;

pub const MEMORY_GC: &str = "memory.gc";
pub const ANIMATIONS_PAUSE: &str = "animations.pause";
pub const ANIMATIONS_RESUME: &str = "animations.resume";
pub const MEMORY_LOW: &str = "memory.low";
pub const TIER_ESCALATED: &str = "tier.escalated";

pub const MEMORY_PRESSURE: &str = "memory.pressure";
pub const ROUTE_CHANGED: &str = "route.changed";

/// Outbound signal for the view layer.
#[derive(Debug, Clone, PartialEq)]
pub enum GovernorSignal {
    CycleCompleted(GcCycleStats),
    PauseAnimations { reason: &'static str },
    ResumeAnimations { hidden_ms: u64 },
    LowMemory {
        tier: Tier,
        reason: &'static str,
        stats: Option<GcCycleStats>,
    },
    TierEscalated {
        from: Tier,
        to: Tier,
        slow_ratio: f64,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PausePayload {
    reason: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResumePayload {
    hidden_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LowMemoryPayload<'a> {
    tier: Tier,
    reason: &'static str,
    emergency: bool,
    stats: Option<&'a GcCycleStats>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EscalationPayload {
    from: Tier,
    to: Tier,
    slow_ratio: f64,
}

impl GovernorSignal {
    pub fn name(&self) -> &'static str {
        match self {
            GovernorSignal::CycleCompleted(_) => MEMORY_GC,
            GovernorSignal::PauseAnimations { .. } => ANIMATIONS_PAUSE,
            GovernorSignal::ResumeAnimations { .. } => ANIMATIONS_RESUME,
            GovernorSignal::LowMemory { .. } => MEMORY_LOW,
            GovernorSignal::TierEscalated { .. } => TIER_ESCALATED,
        }
    }

    pub fn to_message(&self) -> serde_json::Result<UiMessage> {
        let name = self.name();
        match self {
            GovernorSignal::CycleCompleted(stats) => UiMessage::encode(name, stats),
            GovernorSignal::PauseAnimations { reason } => {
                UiMessage::encode(name, &PausePayload { reason: *reason })
            }
            GovernorSignal::ResumeAnimations { hidden_ms } => {
                UiMessage::encode(name, &ResumePayload { hidden_ms: *hidden_ms })
            }
            GovernorSignal::LowMemory {
                tier,
                reason,
                stats,
            } => UiMessage::encode(
                name,
                &LowMemoryPayload {
                    tier: *tier,
                    reason: *reason,
                    emergency: true,
                    stats: stats.as_ref(),
                },
            ),
            GovernorSignal::TierEscalated {
                from,
                to,
                slow_ratio,
            } => UiMessage::encode(
                name,
                &EscalationPayload {
                    from: *from,
                    to: *to,
                    slow_ratio: *slow_ratio,
                },
            ),
        }
    }
}

/// Inbound command from a collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    Pressure(PressureLevel),
    RouteChanged(String),
}

#[derive(Deserialize)]
struct PressureRequest {
    level: PressureLevel,
}

#[derive(Deserialize)]
struct RouteRequest {
    path: String,
}

/// Why an inbound message was not understood.
#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("unknown message {0}")]
    Unknown(String),
    #[error("malformed {name} payload: {source}")]
    Malformed {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl InboundCommand {
    pub fn parse(message: &UiMessage) -> Result<Self, InboundError> {
        let malformed = |source: serde_json::Error| InboundError::Malformed {
            name: message.name.clone(),
            source,
        };
        match message.name.as_str() {
            MEMORY_PRESSURE => message
                .decode::<PressureRequest>()
                .map(|request| InboundCommand::Pressure(request.level))
                .map_err(malformed),
            ROUTE_CHANGED => message
                .decode::<RouteRequest>()
                .map(|request| InboundCommand::RouteChanged(request.path))
                .map_err(malformed),
            other => Err(InboundError::Unknown(other.to_string())),
        }
    }
}
