pub mod clock;
pub mod queue;
pub mod timers;

pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use queue::{Fired, TimerId, TimerQueue};
pub use timers::{IntervalGrant, TimerGovernor, TimerPolicy};
