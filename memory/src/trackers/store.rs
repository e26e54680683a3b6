use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use host::Page;
use tracing::debug;

use crate::tracker::{ResourceTracker, SweepContext, SweepError};
use crate::ResourceKind;

/// An append-only, history-like collection owned by the application.
pub trait HistoryCollection {
    fn len(&self) -> usize;

    /// Drops the oldest items until at most `keep` remain. Returns how many
    /// were dropped.
    fn trim_oldest(&mut self, keep: usize) -> usize;
}

impl<T> HistoryCollection for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn trim_oldest(&mut self, keep: usize) -> usize {
        let excess = self.len().saturating_sub(keep);
        self.drain(..excess);
        excess
    }
}

impl<T> HistoryCollection for VecDeque<T> {
    fn len(&self) -> usize {
        VecDeque::len(self)
    }

    fn trim_oldest(&mut self, keep: usize) -> usize {
        let excess = self.len().saturating_sub(keep);
        self.drain(..excess);
        excess
    }
}

struct Registered {
    name: String,
    collection: Weak<RefCell<dyn HistoryCollection>>,
}

/// Caps registered application collections to the tier's length limit.
///
/// Only weak references are held; a collection dropped by the application
/// is forgotten on the next sweep.
#[derive(Default)]
pub struct StoreArrayTracker {
    registered: Vec<Registered>,
}

impl StoreArrayTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C>(&mut self, name: impl Into<String>, collection: &Rc<RefCell<C>>)
    where
        C: HistoryCollection + 'static,
    {
        let collection: Rc<RefCell<dyn HistoryCollection>> = collection.clone();
        self.registered.push(Registered {
            name: name.into(),
            collection: Rc::downgrade(&collection),
        });
    }

    pub fn names(&self) -> Vec<String> {
        self.registered.iter().map(|entry| entry.name.clone()).collect()
    }
}

impl ResourceTracker for StoreArrayTracker {
    fn kind(&self) -> ResourceKind {
        ResourceKind::StoreItem
    }

    fn sweep(&mut self, _page: &mut dyn Page, ctx: &SweepContext) -> Result<usize, SweepError> {
        let cap = ctx.tier.store_array_cap();
        self.registered.retain(|entry| entry.collection.strong_count() > 0);

        let mut trimmed = 0;
        let mut busy = None;
        for entry in &self.registered {
            let Some(collection) = entry.collection.upgrade() else {
                continue;
            };
            let Ok(mut items) = collection.try_borrow_mut() else {
                busy.get_or_insert_with(|| entry.name.clone());
                continue;
            };
            let dropped = items.trim_oldest(cap);
            if dropped > 0 {
                debug!(store = %entry.name, dropped, cap, "trimmed store history");
            }
            trimmed += dropped;
        }
        match busy {
            Some(name) if trimmed == 0 => Err(SweepError::Busy(name)),
            _ => Ok(trimmed),
        }
    }

    fn tracked(&self) -> usize {
        self.registered.len()
    }
}

impl fmt::Debug for StoreArrayTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreArrayTracker")
            .field("registered", &self.names())
            .finish()
    }
}
