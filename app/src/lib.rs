pub mod config;
pub mod deferral;
pub mod governor;
pub mod jank;
pub mod signals;
pub mod telemetry;
pub mod visibility;

pub use config::{ConfigError, GovernorConfig, JankConfig, VisibilityConfig};
pub use governor::{Governor, GovernorBuilder};
pub use jank::{Escalation, JankDetector};
pub use signals::{GovernorSignal, InboundCommand, InboundError};
pub use telemetry::{GovernorHandle, Telemetry};
pub use visibility::{RestorePhase, RestorePlan, RestoreStep, Visibility, VisibilityController};
