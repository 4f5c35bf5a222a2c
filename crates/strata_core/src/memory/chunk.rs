//! # Linked Chunk
//!
//! One fixed-capacity arena segment of a [`ChunkedPool`](super::ChunkedPool).
//!
//! The cursor (`index`) always points at the node's *prepared* slot: every
//! slot below it has been handed out, the slot itself is reserved for the
//! next allocation. A chunk whose successor has been appended is *sealed* and
//! reports its full capacity from then on.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use arc_swap::ArcSwapOption;

use super::id_schema::IdSchema;
use super::Identifiable;

/// Fixed-capacity segment of pooled entries.
pub struct LinkedChunk<T> {
    id: u32,
    schema: IdSchema,
    slots: Box<[ArcSwapOption<T>]>,
    /// Prepared slot, -1 until the chunk is primed.
    index: AtomicI32,
    /// Becomes 1 once, when the successor is appended.
    size_offset: AtomicI32,
    /// Slots freed without compaction and not yet reused.
    holes: AtomicI32,
    previous: Weak<LinkedChunk<T>>,
    next: OnceLock<Arc<LinkedChunk<T>>>,
}

impl<T: Identifiable> LinkedChunk<T> {
    /// Creates an empty chunk.
    ///
    /// # Arguments
    ///
    /// * `id` - Chunk id, encoded into every entry id of this chunk
    /// * `schema` - Id layout of the owning pool
    /// * `previous` - Chunk this one follows in its node, if any
    #[must_use]
    pub fn new(id: u32, schema: IdSchema, previous: Option<&Arc<Self>>) -> Self {
        let slots = (0..schema.chunk_capacity())
            .map(|_| ArcSwapOption::empty())
            .collect();
        Self {
            id,
            schema,
            slots,
            index: AtomicI32::new(-1),
            size_offset: AtomicI32::new(0),
            holes: AtomicI32::new(0),
            previous: previous.map_or_else(Weak::new, Arc::downgrade),
            next: OnceLock::new(),
        }
    }

    /// Chunk id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.schema.chunk_capacity()
    }

    fn last_slot(&self) -> i32 {
        i32::try_from(self.capacity()).unwrap_or(i32::MAX) - 1
    }

    /// Advances the cursor by one and returns the new value.
    pub fn increment_index(&self) -> i32 {
        self.index.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Hands out the prepared slot and prepares the next one.
    ///
    /// # Returns
    ///
    /// The object id that was prepared, or `None` if the prepared slot is
    /// the last one of the chunk.
    pub fn try_bump(&self) -> Option<u32> {
        let last = self.last_slot();
        let mut current = self.index.load(Ordering::Acquire);
        loop {
            if current < 0 || current >= last {
                return None;
            }
            match self.index.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return u32::try_from(current).ok(),
                Err(actual) => current = actual,
            }
        }
    }

    /// Claims the last slot of a full chunk. Exactly one caller wins.
    ///
    /// The winner must append a successor or call [`Self::unseal`].
    pub(crate) fn seal(&self) -> bool {
        self.index.load(Ordering::Acquire) == self.last_slot()
            && self
                .size_offset
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Reverts a [`Self::seal`] whose successor could not be created.
    pub(crate) fn unseal(&self) {
        self.size_offset.store(0, Ordering::Release);
    }

    /// Checks if the last slot has been handed out.
    #[inline]
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.size_offset.load(Ordering::Acquire) != 0
    }

    /// Frees the entry at `id`.
    ///
    /// With `do_not_update_index == false` the chunk is the node's active
    /// chunk: the cursor steps back, the last handed-out entry moves into the
    /// freed slot and is re-stamped with its new id. The vacated slot becomes
    /// the prepared slot and its id is returned.
    ///
    /// With `do_not_update_index == true` the slot is only cleared and its id
    /// returned for the node's free stack. Entries of a closed chunk never
    /// move: the freed slot stays a hole until its id is reissued, so every
    /// free returns a distinct id and iteration skips the hole.
    pub fn remove(&self, id: u32, do_not_update_index: bool) -> u32 {
        let freed = self.schema.fetch_object_id(id);

        if do_not_update_index {
            if let Some(slot) = self.slot(freed) {
                slot.store(None);
            }
            self.holes.fetch_add(1, Ordering::AcqRel);
            return self.schema.merge_id(id, freed);
        }

        let last = self.index.fetch_sub(1, Ordering::AcqRel) - 1;
        let Ok(last) = u32::try_from(last) else {
            self.index.fetch_add(1, Ordering::AcqRel);
            return self.schema.merge_id(id, freed);
        };

        let moved = self.slot(last).and_then(|slot| slot.swap(None));
        if freed != last {
            if let Some(entry) = &moved {
                entry.set_id(self.schema.generate_id(self.id, freed));
            }
            if let Some(slot) = self.slot(freed) {
                slot.store(moved);
            }
        }
        tracing::trace!(
            "chunk {} compacted: slot {} -> {}",
            self.id,
            last,
            freed
        );
        self.schema.merge_id(id, last)
    }

    /// Marks one hole as reused.
    pub(crate) fn fill_hole(&self) {
        let _ = self
            .holes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |holes| {
                (holes > 0).then_some(holes - 1)
            });
    }

    #[inline]
    fn slot(&self, object_id: u32) -> Option<&ArcSwapOption<T>> {
        self.slots.get(usize::try_from(object_id).ok()?)
    }

    /// Returns the entry at `id`.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<Arc<T>> {
        self.slot(self.schema.fetch_object_id(id))?.load_full()
    }

    /// Stores `value` at `id`, returning the previous entry.
    pub fn set(&self, id: u32, value: Arc<T>) -> Option<Arc<T>> {
        self.slot(self.schema.fetch_object_id(id))?.swap(Some(value))
    }

    /// Checks if the cursor can still advance.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.index.load(Ordering::Acquire) < self.last_slot()
    }

    /// Slots handed out so far. A sealed chunk reports its full capacity.
    #[must_use]
    pub fn size(&self) -> u32 {
        let size = self.index.load(Ordering::Acquire) + self.size_offset.load(Ordering::Acquire);
        u32::try_from(size).unwrap_or(0)
    }

    /// Live entries: [`Self::size`] minus slots freed without compaction.
    #[must_use]
    pub fn len(&self) -> u32 {
        let holes = u32::try_from(self.holes.load(Ordering::Acquire)).unwrap_or(0);
        self.size().saturating_sub(holes)
    }

    /// Checks if the chunk holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The chunk this one follows.
    #[must_use]
    pub fn previous(&self) -> Option<Arc<Self>> {
        self.previous.upgrade()
    }

    /// The chunk appended after this one.
    #[must_use]
    pub fn next(&self) -> Option<&Arc<Self>> {
        self.next.get()
    }

    pub(crate) fn set_next(&self, next: Arc<Self>) {
        if self.next.set(next).is_err() {
            tracing::warn!("chunk {} already has a successor", self.id);
        }
    }

    /// One past the highest slot that may hold an entry.
    pub(crate) fn slot_bound(&self) -> usize {
        usize::try_from(self.index.load(Ordering::Acquire) + 1)
            .unwrap_or(0)
            .min(self.slots.len())
    }

    pub(crate) fn entry_at(&self, position: usize) -> Option<Arc<T>> {
        self.slots.get(position)?.load_full()
    }

    /// Registered entries in slot order.
    pub fn entries(&self) -> impl Iterator<Item = Arc<T>> + '_ {
        self.slots[..self.slot_bound()]
            .iter()
            .filter_map(ArcSwapOption::load_full)
    }
}

impl<T> fmt::Debug for LinkedChunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedChunk")
            .field("id", &self.id)
            .field("capacity", &self.schema.chunk_capacity())
            .field("index", &self.index.load(Ordering::Relaxed))
            .field("previous", &self.previous.upgrade().map(|chunk| chunk.id))
            .field("next", &self.next.get().map(|chunk| chunk.id))
            .finish()
    }
}
