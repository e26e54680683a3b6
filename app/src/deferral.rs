use host::{ElementId, HostError, Page};
use tracing::debug;

type Activation = Box<dyn FnOnce()>;

struct Deferred {
    element: ElementId,
    margin_px: f64,
    activate: Activation,
}

/// Callbacks waiting for an element to come within a margin of the
/// viewport. Each runs at most once.
#[derive(Default)]
pub struct DeferredActivations {
    waiting: Vec<Deferred>,
}

impl DeferredActivations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, element: ElementId, margin_px: f64, activate: Activation) {
        self.waiting.push(Deferred {
            element,
            margin_px,
            activate,
        });
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Removes and returns the callbacks whose element is now near the
    /// viewport. Detached elements are dropped without running.
    pub fn take_ready(&mut self, page: &dyn Page) -> Vec<Activation> {
        let viewport = page.viewport();
        let mut ready = Vec::new();
        let mut waiting = Vec::with_capacity(self.waiting.len());
        for deferred in self.waiting.drain(..) {
            match page.bounds(deferred.element) {
                Ok(rect) if viewport.is_near(&rect, deferred.margin_px) => {
                    ready.push(deferred.activate)
                }
                Ok(_) => waiting.push(deferred),
                Err(HostError::Detached(id)) => {
                    debug!(element = %id, "deferred activation dropped, element detached");
                }
                Err(err) => {
                    debug!(element = %deferred.element, error = %err, "deferred activation check failed");
                    waiting.push(deferred);
                }
            }
        }
        self.waiting = waiting;
        ready
    }
}

impl std::fmt::Debug for DeferredActivations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredActivations")
            .field("waiting", &self.waiting.len())
            .finish()
    }
}
