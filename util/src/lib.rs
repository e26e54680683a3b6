use std::cell::Cell;

pub mod geometry;

pub use geometry::{Rect, Viewport};

/// Monotonic id generator for in-process identifiers.
///
/// Ids are never reused within one generator, so a cancelled timer or a
/// removed element can never be confused with a later one.
#[derive(Debug)]
pub struct IdGenerator {
    next: Cell<u64>,
}

impl IdGenerator {
    /// Creates a new generator starting at the provided value.
    pub fn new(start: u64) -> Self {
        Self {
            next: Cell::new(start),
        }
    }

    /// Returns the next id in sequence.
    pub fn next(&self) -> u64 {
        let id = self.next.get();
        self.next.set(id.wrapping_add(1));
        id
    }

    /// Returns the id the next call to [`IdGenerator::next`] will hand out.
    pub fn peek(&self) -> u64 {
        self.next.get()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}
