use std::collections::VecDeque;
use std::time::Duration;

use tier::Tier;
use tracing::debug;

use crate::clock::Timestamp;
use crate::queue::{TimerId, TimerQueue};

/// Interception limits for periodic callbacks on a constrained tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerPolicy {
    pub min_interval: Duration,
    pub max_live: usize,
}

impl TimerPolicy {
    /// Returns `None` for tiers that bypass interception.
    pub fn for_tier(tier: Tier) -> Option<Self> {
        let min_interval = tier.timer_floor()?;
        Some(Self {
            min_interval,
            max_live: tier.profile().max_concurrent_timers as usize,
        })
    }
}

/// Outcome of a periodic-callback registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalGrant {
    pub id: TimerId,
    /// Interval actually applied after the floor.
    pub interval: Duration,
    /// Callbacks cancelled to make room, oldest first.
    pub evicted: Vec<TimerId>,
}

/// Gatekeeper for periodic callbacks.
///
/// On constrained tiers it raises requested intervals to the tier floor and
/// keeps at most `max_live` periodic callbacks registered, cancelling the
/// oldest first. Unconstrained tiers pass requests through untouched; live
/// ids are still remembered so a later tier escalation can apply the cap.
#[derive(Debug)]
pub struct TimerGovernor {
    policy: Option<TimerPolicy>,
    live: VecDeque<TimerId>,
    evicted_total: u64,
}

impl TimerGovernor {
    pub fn new(tier: Tier) -> Self {
        Self {
            policy: TimerPolicy::for_tier(tier),
            live: VecDeque::new(),
            evicted_total: 0,
        }
    }

    pub fn policy(&self) -> Option<TimerPolicy> {
        self.policy
    }

    pub fn is_intercepting(&self) -> bool {
        self.policy.is_some()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Total callbacks cancelled by the cap since construction.
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    /// Registers a periodic callback on `queue`.
    pub fn set_interval<T: Clone>(
        &mut self,
        queue: &mut TimerQueue<T>,
        now: Timestamp,
        requested: Duration,
        task: T,
    ) -> IntervalGrant {
        let interval = match self.policy {
            Some(policy) => requested.max(policy.min_interval),
            None => requested,
        };
        let id = queue.schedule_every(now, interval, task);
        self.live.push_back(id);
        let evicted = self.enforce_cap(queue);
        IntervalGrant {
            id,
            interval,
            evicted,
        }
    }

    /// Cancels a periodic callback. Returns false if it was not live.
    pub fn clear_interval<T: Clone>(&mut self, queue: &mut TimerQueue<T>, id: TimerId) -> bool {
        let known = self.forget(id);
        queue.cancel(id) || known
    }

    /// Applies a new tier; an escalation to a constrained tier trims the live
    /// set immediately.
    pub fn retier<T: Clone>(&mut self, queue: &mut TimerQueue<T>, tier: Tier) -> Vec<TimerId> {
        self.policy = TimerPolicy::for_tier(tier);
        self.enforce_cap(queue)
    }

    fn forget(&mut self, id: TimerId) -> bool {
        let before = self.live.len();
        self.live.retain(|live| *live != id);
        self.live.len() != before
    }

    fn enforce_cap<T: Clone>(&mut self, queue: &mut TimerQueue<T>) -> Vec<TimerId> {
        let Some(policy) = self.policy else {
            return Vec::new();
        };
        let mut evicted = Vec::new();
        while self.live.len() > policy.max_live {
            let Some(oldest) = self.live.pop_front() else {
                break;
            };
            queue.cancel(oldest);
            self.evicted_total += 1;
            debug!(timer = %oldest, max_live = policy.max_live, "cancelled oldest periodic callback");
            evicted.push(oldest);
        }
        evicted
    }
}
