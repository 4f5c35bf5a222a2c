//! # Concurrent Id Stack
//!
//! LIFO of recyclable ids shared by every thread allocating from one node.
//!
//! Slots are claimed through a single atomic top counter, so push and pop
//! never take a lock. The only blocking path is growth, which swaps the slot
//! buffer under an exclusive lock.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Deserialize;

/// Marker for a slot that holds no value.
const EMPTY: u64 = u64::MAX;

/// What a full [`IntStack`] does on push.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackGrowth {
    /// Reallocate to 1.5x capacity. Push never fails.
    #[default]
    Growable,
    /// Keep the initial capacity. Overflowing pushes are logged and declined.
    Bounded,
}

/// Thread-safe stack of `u32` ids.
///
/// # Example
///
/// ```rust
/// use strata_core::IntStack;
///
/// let stack = IntStack::new(16);
/// stack.push(7);
/// assert_eq!(stack.pop(), Some(7));
/// assert_eq!(stack.pop(), None);
/// ```
pub struct IntStack {
    /// Index of the top slot, -1 when empty.
    top: AtomicI64,
    slots: RwLock<Box<[AtomicU64]>>,
    growth: StackGrowth,
}

impl IntStack {
    /// Creates a growable stack with room for `initial_capacity` ids.
    #[must_use]
    pub fn new(initial_capacity: usize) -> Self {
        Self::with_growth(initial_capacity, StackGrowth::Growable)
    }

    /// Creates a stack that never grows past `capacity` ids.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self::with_growth(capacity, StackGrowth::Bounded)
    }

    /// Creates a stack with an explicit growth policy.
    #[must_use]
    pub fn with_growth(capacity: usize, growth: StackGrowth) -> Self {
        Self {
            top: AtomicI64::new(-1),
            slots: RwLock::new(empty_slots(capacity)),
            growth,
        }
    }

    /// Pushes an id.
    ///
    /// # Returns
    ///
    /// `false` only for a bounded stack that is full; the id is then dropped.
    pub fn push(&self, id: u32) -> bool {
        let Some(index) = self.reserve(id) else {
            return false;
        };

        loop {
            {
                let slots = self.slots.read();
                if let Some(slot) = slots.get(index) {
                    // A popper may have claimed this slot without having taken
                    // its previous value yet.
                    if slot
                        .compare_exchange(EMPTY, u64::from(id), Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return true;
                    }
                    drop(slots);
                    std::hint::spin_loop();
                    continue;
                }
            }
            self.grow(index);
        }
    }

    fn reserve(&self, id: u32) -> Option<usize> {
        match self.growth {
            StackGrowth::Growable => {
                let index = self.top.fetch_add(1, Ordering::AcqRel) + 1;
                usize::try_from(index).ok()
            }
            StackGrowth::Bounded => {
                let capacity = self.capacity();
                let mut top = self.top.load(Ordering::Acquire);
                loop {
                    let index = usize::try_from(top + 1).ok()?;
                    if index >= capacity {
                        tracing::warn!(
                            "IntStack overflow on value {}: {}/{} slots used",
                            id,
                            index,
                            capacity
                        );
                        return None;
                    }
                    match self.top.compare_exchange_weak(
                        top,
                        top + 1,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return Some(index),
                        Err(current) => top = current,
                    }
                }
            }
        }
    }

    #[cold]
    fn grow(&self, required: usize) {
        let mut slots = self.slots.write();
        let current = slots.len();
        if required < current {
            return;
        }

        let mut new_len = current.max(1);
        while new_len <= required {
            new_len += (new_len >> 1).max(1);
        }

        let grown: Box<[AtomicU64]> = slots
            .iter()
            .map(|slot| AtomicU64::new(slot.load(Ordering::Relaxed)))
            .chain((current..new_len).map(|_| AtomicU64::new(EMPTY)))
            .collect();
        *slots = grown;
    }

    /// Pops the most recently pushed id.
    ///
    /// # Returns
    ///
    /// `None` when the stack is empty **or** when another thread popped the
    /// same top concurrently. Treat `None` as "retry or empty".
    pub fn pop(&self) -> Option<u32> {
        let top = self.top.load(Ordering::Acquire);
        if top < 0 {
            return None;
        }
        if self
            .top
            .compare_exchange(top, top - 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let index = usize::try_from(top).ok()?;
        loop {
            {
                let slots = self.slots.read();
                // A missing slot was reserved by a pusher that has not grown
                // the buffer yet.
                if let Some(slot) = slots.get(index) {
                    let value = slot.swap(EMPTY, Ordering::AcqRel);
                    if value != EMPTY {
                        // Only u32 values are ever stored.
                        return u32::try_from(value).ok();
                    }
                }
            }
            // The pusher that reserved this slot has not written it yet.
            std::hint::spin_loop();
        }
    }

    /// Number of ids currently on the stack.
    #[must_use]
    pub fn size(&self) -> usize {
        usize::try_from(self.top.load(Ordering::Acquire) + 1).unwrap_or(0)
    }

    /// Checks if the stack holds no ids.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of slots in the current buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }

    /// The growth policy chosen at construction.
    #[must_use]
    pub const fn growth(&self) -> StackGrowth {
        self.growth
    }

    /// Removes every id. Must not race with `push` or `pop`.
    pub fn clear(&self) {
        let slots = self.slots.write();
        for slot in slots.iter() {
            slot.store(EMPTY, Ordering::Relaxed);
        }
        self.top.store(-1, Ordering::Release);
    }

    /// Releases the slot buffer. The stack is empty afterwards. Must not race
    /// with `push` or `pop`.
    pub fn close(&self) {
        let mut slots = self.slots.write();
        *slots = empty_slots(0);
        self.top.store(-1, Ordering::Release);
    }
}

impl std::fmt::Debug for IntStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntStack")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("growth", &self.growth)
            .finish()
    }
}

fn empty_slots(len: usize) -> Box<[AtomicU64]> {
    (0..len).map(|_| AtomicU64::new(EMPTY)).collect()
}
