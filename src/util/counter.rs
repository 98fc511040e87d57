//! Single-threaded 64-bit counter

use std::cell::Cell;
use std::fmt;

/// A counter with atomic-style accessors but no synchronization.
///
/// Backed by a [`Cell`], so it is `Send` but not `Sync`: it can move between
/// threads but never be shared by them. Arithmetic wraps at the `i64` bounds.
///
/// ```
/// use rust_pool_system::util::LongCounter;
///
/// let counter = LongCounter::new(5);
/// assert_eq!(counter.get_and_increment(), 5);
/// assert_eq!(counter.add_and_get(4), 10);
/// assert_eq!(counter.to_string(), "10");
/// ```
#[derive(Debug, Default, Clone)]
pub struct LongCounter {
    value: Cell<i64>,
}

impl LongCounter {
    /// Create a counter starting at `initial`
    pub fn new(initial: i64) -> Self {
        Self {
            value: Cell::new(initial),
        }
    }

    /// Current value
    pub fn get(&self) -> i64 {
        self.value.get()
    }

    /// Store `value`
    pub fn set(&self, value: i64) {
        self.value.set(value);
    }

    /// Store `value` and return the previous one
    pub fn get_and_set(&self, value: i64) -> i64 {
        self.value.replace(value)
    }

    /// Store `update` only if the current value equals `expected`
    pub fn compare_and_set(&self, expected: i64, update: i64) -> bool {
        if self.value.get() != expected {
            return false;
        }
        self.value.set(update);
        true
    }

    /// Add one and return the previous value
    pub fn get_and_increment(&self) -> i64 {
        self.get_and_add(1)
    }

    /// Subtract one and return the previous value
    pub fn get_and_decrement(&self) -> i64 {
        self.get_and_add(-1)
    }

    /// Add `delta` and return the previous value
    pub fn get_and_add(&self, delta: i64) -> i64 {
        let previous = self.value.get();
        self.value.set(previous.wrapping_add(delta));
        previous
    }

    /// Add one and return the new value
    pub fn increment_and_get(&self) -> i64 {
        self.add_and_get(1)
    }

    /// Subtract one and return the new value
    pub fn decrement_and_get(&self) -> i64 {
        self.add_and_get(-1)
    }

    /// Add `delta` and return the new value
    pub fn add_and_get(&self, delta: i64) -> i64 {
        let next = self.value.get().wrapping_add(delta);
        self.value.set(next);
        next
    }

    /// Consume the counter, returning its value
    pub fn into_inner(self) -> i64 {
        self.value.into_inner()
    }
}

impl From<i64> for LongCounter {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for LongCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value.get())
    }
}
