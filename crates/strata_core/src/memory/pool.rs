//! # Chunked Pool
//!
//! Shared table of [`LinkedChunk`]s plus independent allocation streams
//! ([`PooledNode`]), typically one per composition.
//!
//! ## Allocation
//!
//! A node hands out ids in this order:
//! 1. an id popped from its free stack
//! 2. the prepared slot of its active chunk
//! 3. the last slot of a full chunk, after appending a successor
//!
//! The id returned by [`PooledNode::next_id`] is always the one prepared by the
//! previous call, so the first call after construction already has a value.
//!
//! ## Thread Safety
//!
//! Allocation and registration run under a shared guard. Freeing takes the
//! node's exclusive guard, because compaction moves an entry and re-stamps its
//! id.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::{Mutex, RwLock};

use super::chunk::LinkedChunk;
use super::id_schema::IdSchema;
use super::int_stack::{IntStack, StackGrowth};
use super::Identifiable;
use crate::config::DEFAULT_ID_STACK_CAPACITY;
use crate::error::{StoreError, StoreResult};

struct PoolShared<T> {
    schema: IdSchema,
    /// Id of the most recently created chunk, -1 before the first.
    chunk_index: AtomicI32,
    chunks: Box<[ArcSwapOption<LinkedChunk<T>>]>,
}

impl<T: Identifiable> PoolShared<T> {
    fn chunk(&self, id: u32) -> Option<Arc<LinkedChunk<T>>> {
        let chunk_id = usize::try_from(self.schema.fetch_chunk_id(id)).ok()?;
        self.chunks.get(chunk_id)?.load_full()
    }

    /// Appends a chunk after `previous` and publishes it in the table.
    fn new_chunk(
        &self,
        previous: Option<&Arc<LinkedChunk<T>>>,
    ) -> StoreResult<Arc<LinkedChunk<T>>> {
        let chunk_count = self.schema.chunk_count();
        let limit = i32::try_from(chunk_count).unwrap_or(i32::MAX);

        let mut current = self.chunk_index.load(Ordering::Acquire);
        let id = loop {
            let next = current + 1;
            if next >= limit {
                tracing::error!(
                    "cannot create a new memory chunk: all {} chunks are allocated",
                    chunk_count
                );
                return Err(StoreError::ChunkLimitExceeded { chunk_count });
            }
            match self.chunk_index.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break next.unsigned_abs(),
                Err(actual) => current = actual,
            }
        };

        let chunk = Arc::new(LinkedChunk::new(id, self.schema, previous));
        chunk.increment_index();

        if let Some(slot) = usize::try_from(id).ok().and_then(|i| self.chunks.get(i)) {
            slot.store(Some(Arc::clone(&chunk)));
        }
        if let Some(previous) = previous {
            previous.set_next(Arc::clone(&chunk));
        }

        tracing::debug!(
            "created chunk {}/{} ({} slots)",
            id,
            chunk_count,
            self.schema.chunk_capacity()
        );
        Ok(chunk)
    }
}

/// Pool of [`Identifiable`] entries stored in chunks.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
/// use strata_core::{ChunkedPool, IdSchema, Identifiable};
///
/// struct Particle(AtomicU32);
///
/// impl Identifiable for Particle {
///     fn id(&self) -> u32 {
///         self.0.load(Ordering::Acquire)
///     }
///     fn set_id(&self, id: u32) {
///         self.0.store(id, Ordering::Release);
///     }
/// }
///
/// let pool: ChunkedPool<Particle> = ChunkedPool::new(IdSchema::new(14, 16)?);
/// let node = pool.new_node()?;
///
/// let particle = node.insert_with(|id| Arc::new(Particle(AtomicU32::new(id))))?;
/// assert!(pool.get(particle.id()).is_some());
/// # Ok::<(), strata_core::StoreError>(())
/// ```
pub struct ChunkedPool<T> {
    shared: Arc<PoolShared<T>>,
    nodes: Mutex<Vec<Arc<PooledNode<T>>>>,
    stack_capacity: usize,
    stack_growth: StackGrowth,
}

impl<T: Identifiable> ChunkedPool<T> {
    /// Creates an empty pool. No chunk exists until the first node.
    #[must_use]
    pub fn new(schema: IdSchema) -> Self {
        Self::with_id_stack(schema, DEFAULT_ID_STACK_CAPACITY, StackGrowth::Growable)
    }

    /// Creates an empty pool whose nodes use the given free-stack sizing.
    #[must_use]
    pub fn with_id_stack(schema: IdSchema, capacity: usize, growth: StackGrowth) -> Self {
        let chunks = (0..schema.chunk_count())
            .map(|_| ArcSwapOption::empty())
            .collect();
        Self {
            shared: Arc::new(PoolShared {
                schema,
                chunk_index: AtomicI32::new(-1),
                chunks,
            }),
            nodes: Mutex::new(Vec::new()),
            stack_capacity: capacity,
            stack_growth: growth,
        }
    }

    /// Creates a new allocation stream with its own first chunk.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ChunkLimitExceeded`] if no chunk id is left.
    pub fn new_node(&self) -> StoreResult<Arc<PooledNode<T>>> {
        let first = self.shared.new_chunk(None)?;
        let node = Arc::new(PooledNode {
            shared: Arc::clone(&self.shared),
            stack: IntStack::with_growth(self.stack_capacity, self.stack_growth),
            current: ArcSwap::new(Arc::clone(&first)),
            first,
            compaction: RwLock::new(()),
        });
        self.nodes.lock().push(Arc::clone(&node));
        Ok(node)
    }

    /// Returns the entry at `id`, whichever node allocated it.
    #[inline]
    #[must_use]
    pub fn get(&self, id: u32) -> Option<Arc<T>> {
        self.shared.chunk(id)?.get(id)
    }

    /// Live entries across every chunk.
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared
            .chunks
            .iter()
            .filter_map(ArcSwapOption::load_full)
            .map(|chunk| chunk.len() as usize)
            .sum()
    }

    /// Number of chunks created so far.
    #[must_use]
    pub fn chunk_count(&self) -> u32 {
        u32::try_from(self.shared.chunk_index.load(Ordering::Acquire) + 1).unwrap_or(0)
    }

    /// The id layout of this pool.
    #[inline]
    #[must_use]
    pub fn schema(&self) -> IdSchema {
        self.shared.schema
    }

    /// Drops every chunk and forgets every node.
    ///
    /// Nodes created before the call must not be used afterwards.
    pub fn clear(&self) {
        for slot in self.shared.chunks.iter() {
            slot.store(None);
        }
        self.shared.chunk_index.store(-1, Ordering::Release);
        self.nodes.lock().clear();
    }

    /// Releases the free stack of every node.
    pub fn close(&self) {
        for node in self.nodes.lock().iter() {
            node.close();
        }
    }
}

impl<T> fmt::Debug for ChunkedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedPool")
            .field("schema", &self.shared.schema)
            .field("chunk_index", &self.shared.chunk_index.load(Ordering::Relaxed))
            .field("nodes", &self.nodes.lock().len())
            .finish_non_exhaustive()
    }
}

/// One allocation stream of a [`ChunkedPool`].
pub struct PooledNode<T> {
    shared: Arc<PoolShared<T>>,
    stack: IntStack,
    first: Arc<LinkedChunk<T>>,
    current: ArcSwap<LinkedChunk<T>>,
    compaction: RwLock<()>,
}

impl<T: Identifiable> PooledNode<T> {
    /// Returns the prepared id and prepares the next one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ChunkLimitExceeded`] when the active chunk is
    /// full and the pool cannot create another chunk.
    pub fn next_id(&self) -> StoreResult<u32> {
        let _guard = self.compaction.read();
        self.next_id_locked()
    }

    fn next_id_locked(&self) -> StoreResult<u32> {
        let schema = self.shared.schema;
        loop {
            if let Some(id) = self.stack.pop() {
                if let Some(chunk) = self.shared.chunk(id) {
                    chunk.fill_hole();
                }
                return Ok(id);
            }

            let chunk = self.current.load_full();
            if let Some(object_id) = chunk.try_bump() {
                return Ok(schema.generate_id(chunk.id(), object_id));
            }

            if chunk.seal() {
                return match self.shared.new_chunk(Some(&chunk)) {
                    Ok(next) => {
                        self.current.store(next);
                        Ok(schema.generate_id(chunk.id(), chunk.capacity() - 1))
                    }
                    Err(error) => {
                        chunk.unseal();
                        Err(error)
                    }
                };
            }

            // Another thread is appending the successor.
            while chunk.is_sealed() && Arc::ptr_eq(&*self.current.load(), &chunk) {
                std::hint::spin_loop();
            }
        }
    }

    /// Allocates an id, builds the entry for it and registers it, with no
    /// compaction in between.
    ///
    /// `build` must not call back into this node.
    ///
    /// # Errors
    ///
    /// Propagates [`PooledNode::next_id`] failures.
    pub fn insert_with<F>(&self, build: F) -> StoreResult<Arc<T>>
    where
        F: FnOnce(u32) -> Arc<T>,
    {
        let _guard = self.compaction.read();
        let id = self.next_id_locked()?;
        let entry = build(id);
        if let Some(chunk) = self.shared.chunk(id) {
            chunk.set(id, Arc::clone(&entry));
        }
        Ok(entry)
    }

    /// Stores `entry` at `id`, returning the previous entry.
    pub fn register(&self, id: u32, entry: Arc<T>) -> Option<Arc<T>> {
        let _guard = self.compaction.read();
        self.shared.chunk(id)?.set(id, entry)
    }

    /// Frees `id`.
    ///
    /// # Returns
    ///
    /// The id that became reusable, or `None` if `id` names no chunk.
    pub fn free_id(&self, id: u32) -> Option<u32> {
        let _guard = self.compaction.write();
        self.free_locked(id)
    }

    /// Frees the slot `entry` currently occupies.
    ///
    /// The id is read under the compaction guard, so it is never stale.
    pub fn free_entry(&self, entry: &T) -> Option<u32> {
        let _guard = self.compaction.write();
        self.free_locked(entry.id())
    }

    fn free_locked(&self, id: u32) -> Option<u32> {
        let chunk = self.shared.chunk(id)?;
        if chunk.is_empty() {
            self.stack.push(id);
            return Some(id);
        }

        let active = Arc::ptr_eq(&chunk, &*self.current.load());
        let reusable = chunk.remove(id, !active);
        if !active {
            self.stack.push(reusable);
        }
        Some(reusable)
    }

    /// Returns the entry at `id`.
    #[inline]
    #[must_use]
    pub fn get(&self, id: u32) -> Option<Arc<T>> {
        self.shared.chunk(id)?.get(id)
    }

    /// Iterates over this node's entries in allocation order.
    #[must_use]
    pub fn iter(&self) -> NodeIter<T> {
        NodeIter {
            chunk: Some(Arc::clone(&self.first)),
            position: 0,
        }
    }

    /// Live entries in this node's chunks.
    #[must_use]
    pub fn size(&self) -> usize {
        let mut size = 0;
        let mut chunk = Some(Arc::clone(&self.first));
        while let Some(current) = chunk {
            size += current.len() as usize;
            chunk = current.next().cloned();
        }
        size
    }

    /// Handed-out slots of the active chunk.
    #[must_use]
    pub fn current_chunk_size(&self) -> u32 {
        self.current.load().size()
    }

    /// Ids waiting on the free stack.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.stack.size()
    }

    /// The id layout of the owning pool.
    #[inline]
    #[must_use]
    pub fn schema(&self) -> IdSchema {
        self.shared.schema
    }

    /// Releases the free stack.
    pub fn close(&self) {
        self.stack.close();
    }
}

impl<T> fmt::Debug for PooledNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledNode")
            .field("stack", &self.stack)
            .field("first", &self.first)
            .field("current", &self.current.load_full())
            .finish_non_exhaustive()
    }
}

impl<'a, T: Identifiable> IntoIterator for &'a PooledNode<T> {
    type Item = Arc<T>;
    type IntoIter = NodeIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Allocation-order iterator over a [`PooledNode`].
///
/// Empty slots are skipped. Entries freed or moved during iteration may be
/// missed or seen twice.
pub struct NodeIter<T> {
    chunk: Option<Arc<LinkedChunk<T>>>,
    position: usize,
}

impl<T: Identifiable> Iterator for NodeIter<T> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let chunk = self.chunk.as_ref()?;
            while self.position < chunk.slot_bound() {
                let entry = chunk.entry_at(self.position);
                self.position += 1;
                if entry.is_some() {
                    return entry;
                }
            }
            self.chunk = chunk.next().cloned();
            self.position = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug)]
    struct Item {
        id: AtomicU32,
        value: u32,
    }

    impl Item {
        fn new(id: u32, value: u32) -> Arc<Self> {
            Arc::new(Self {
                id: AtomicU32::new(id),
                value,
            })
        }
    }

    impl Identifiable for Item {
        fn id(&self) -> u32 {
            self.id.load(Ordering::Acquire)
        }

        fn set_id(&self, id: u32) {
            self.id.store(id, Ordering::Release);
        }
    }

    fn small_pool() -> ChunkedPool<Item> {
        ChunkedPool::new(IdSchema::new(10, 6).unwrap())
    }

    #[test]
    fn test_first_id_is_ready() {
        let pool = small_pool();
        let node = pool.new_node().unwrap();
        let schema = pool.schema();

        assert_eq!(node.next_id().unwrap(), schema.generate_id(0, 0));
        assert_eq!(node.next_id().unwrap(), schema.generate_id(0, 1));
        assert_eq!(node.current_chunk_size(), 2);
    }

    #[test]
    fn test_chunk_growth() {
        let pool = small_pool();
        let node = pool.new_node().unwrap();
        let schema = pool.schema();

        let ids: Vec<u32> = (0..1025).map(|_| node.next_id().unwrap()).collect();
        for id in &ids[..1024] {
            assert_eq!(schema.fetch_chunk_id(*id), 0);
        }
        assert_eq!(ids[1023], schema.generate_id(0, 1023));
        assert_eq!(schema.fetch_chunk_id(ids[1024]), 1);
        assert_eq!(pool.chunk_count(), 2);
        assert_eq!(pool.size(), 1025);
    }

    #[test]
    fn test_chunk_limit_exceeded() {
        let pool = small_pool();
        for _ in 0..64 {
            pool.new_node().unwrap();
        }
        assert_eq!(
            pool.new_node().unwrap_err(),
            StoreError::ChunkLimitExceeded { chunk_count: 64 }
        );
    }

    #[test]
    fn test_full_node_reports_chunk_limit() {
        let pool = small_pool();
        let node = pool.new_node().unwrap();
        for _ in 1..64 {
            pool.new_node().unwrap();
        }
        for _ in 0..1023 {
            node.next_id().unwrap();
        }
        assert!(node.next_id().is_err());
        assert!(node.next_id().is_err());
    }

    #[test]
    fn test_recycled_id_keeps_chunk() {
        let pool = small_pool();
        let node = pool.new_node().unwrap();
        let schema = pool.schema();

        let ids: Vec<u32> = (0..1100)
            .map(|value| node.insert_with(|id| Item::new(id, value)).unwrap().id())
            .collect();

        let freed = ids[5];
        assert_eq!(node.free_id(freed), Some(freed));
        assert!(pool.get(freed).is_none());
        assert_eq!(pool.size(), 1099);

        let reused = node.next_id().unwrap();
        assert_eq!(reused, freed);
        assert_eq!(schema.fetch_chunk_id(reused), schema.fetch_chunk_id(freed));
        assert_eq!(pool.size(), 1100);
    }

    #[test]
    fn test_free_in_active_chunk_compacts() {
        let pool = small_pool();
        let node = pool.new_node().unwrap();

        let items: Vec<Arc<Item>> = (0..4)
            .map(|value| node.insert_with(|id| Item::new(id, value)).unwrap())
            .collect();

        let schema = pool.schema();
        let reusable = node.free_entry(&items[1]).unwrap();
        assert_eq!(reusable, schema.generate_id(0, 3));
        // The last entry moved into the freed slot.
        assert_eq!(items[3].id(), schema.generate_id(0, 1));
        assert_eq!(pool.get(items[3].id()).unwrap().value, 3);
        assert_eq!(node.free_count(), 0);

        // The vacated slot is handed out next.
        assert_eq!(node.next_id().unwrap(), schema.generate_id(0, 3));
    }

    #[test]
    fn test_iter_allocation_order() {
        let pool = small_pool();
        let node = pool.new_node().unwrap();
        let other = pool.new_node().unwrap();

        for value in 0..1030 {
            node.insert_with(|id| Item::new(id, value)).unwrap();
        }
        other.insert_with(|id| Item::new(id, 9999)).unwrap();

        let values: Vec<u32> = node.iter().map(|item| item.value).collect();
        assert_eq!(values, (0..1030).collect::<Vec<_>>());
        assert_eq!(node.size(), 1030);
        assert_eq!(other.iter().count(), 1);
        assert_eq!(pool.size(), 1031);
    }

    #[test]
    fn test_register_replaces() {
        let pool = small_pool();
        let node = pool.new_node().unwrap();
        let id = node.next_id().unwrap();

        assert!(node.register(id, Item::new(id, 1)).is_none());
        let previous = node.register(id, Item::new(id, 2)).unwrap();
        assert_eq!(previous.value, 1);
        assert_eq!(node.get(id).unwrap().value, 2);
    }

    #[test]
    fn test_clear_and_close() {
        let pool = small_pool();
        let node = pool.new_node().unwrap();
        let item = node.insert_with(|id| Item::new(id, 1)).unwrap();
        node.close();

        pool.clear();
        assert!(pool.get(item.id()).is_none());
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.chunk_count(), 0);

        let node = pool.new_node().unwrap();
        assert_eq!(node.next_id().unwrap(), 0);
    }
}
