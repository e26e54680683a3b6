use std::fmt;
use std::time::Duration;

use util::IdGenerator;

use crate::clock::Timestamp;

/// Handle for a scheduled task; doubles as its cancellation token.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TimerId(u64);

impl TimerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

#[derive(Debug)]
struct Entry<T> {
    id: TimerId,
    due: Timestamp,
    period: Option<Duration>,
    task: T,
}

/// A task whose due time has been reached.
#[derive(Debug, Clone, PartialEq)]
pub struct Fired<T> {
    pub id: TimerId,
    /// Scheduled time, which may be earlier than the time it was drained.
    pub due: Timestamp,
    pub task: T,
}

/// Single-threaded timer queue driven by an external clock.
///
/// Nothing runs on its own: the owner drains due tasks with
/// [`TimerQueue::pop_due`] and dispatches them. Tasks due at the same time
/// fire in registration order.
#[derive(Debug)]
pub struct TimerQueue<T> {
    ids: IdGenerator,
    entries: Vec<Entry<T>>,
}

impl<T: Clone> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            ids: IdGenerator::new(1),
            entries: Vec::new(),
        }
    }

    /// Runs `task` once, `delay` after `now`.
    pub fn schedule_once(&mut self, now: Timestamp, delay: Duration, task: T) -> TimerId {
        self.push(now + delay, None, task)
    }

    /// Runs `task` every `period`, first at `now + period`.
    pub fn schedule_every(&mut self, now: Timestamp, period: Duration, task: T) -> TimerId {
        let period = period.max(Duration::from_millis(1));
        self.push(now + period, Some(period), task)
    }

    /// Cancels a pending task. Returns false if it already fired or was
    /// never scheduled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest pending due time.
    pub fn next_due(&self) -> Option<Timestamp> {
        self.entries.iter().map(|entry| entry.due).min()
    }

    /// Removes and returns the earliest task due at or before `now`.
    /// Periodic tasks are re-armed one period after their due time.
    pub fn pop_due(&mut self, now: Timestamp) -> Option<Fired<T>> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.due <= now)
            .min_by_key(|(_, entry)| (entry.due, entry.id))
            .map(|(index, _)| index)?;

        let entry = &mut self.entries[index];
        let fired = Fired {
            id: entry.id,
            due: entry.due,
            task: entry.task.clone(),
        };
        match entry.period {
            Some(period) => entry.due = entry.due + period,
            None => {
                self.entries.swap_remove(index);
            }
        }
        Some(fired)
    }

    fn push(&mut self, due: Timestamp, period: Option<Duration>, task: T) -> TimerId {
        let id = TimerId(self.ids.next());
        self.entries.push(Entry {
            id,
            due,
            period,
            task,
        });
        id
    }
}

impl<T: Clone> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
