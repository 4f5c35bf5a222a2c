//! # Class Index
//!
//! Dense, stable `u32` indices for component types.
//!
//! Lookups normally hit a direct-mapped table of `2^hash_bit` atomic slots
//! addressed by the top bits of the type's identity hash. The first genuine
//! slot collision switches the whole index, permanently, to a map backend.
//! Indices are always issued by that map, so both backends agree.

use std::any::TypeId;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;

use super::component::Component;
use crate::error::{StoreError, StoreResult};

/// Types that can be registered in a [`ClassIndex`].
pub trait TypeKey: Copy + Eq + Hash + Send + Sync + fmt::Debug + 'static {
    /// Hash used to pick the table slot. Must be stable for the process
    /// lifetime.
    fn identity_hash(&self) -> u32;
}

impl TypeKey for TypeId {
    fn identity_hash(&self) -> u32 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        let hash = hasher.finish();
        (hash ^ (hash >> 32)) as u32
    }
}

/// Backend currently serving lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassIndexMode {
    /// Direct-mapped slot table.
    Table,
    /// Per-type map, after a collision or [`ClassIndex::close`].
    Fallback,
}

const MODE_TABLE: u8 = 0;
const MODE_FALLBACK: u8 = 1;

/// Slot value: identity hash in the high half, index in the low half.
#[inline]
const fn pack(hash: u32, index: u32) -> u64 {
    ((hash as u64) << 32) | index as u64
}

#[inline]
const fn unpack(slot: u64) -> (u32, u32) {
    ((slot >> 32) as u32, slot as u32)
}

/// Registry of type indices. See the module docs.
pub struct ClassIndex<K = TypeId> {
    hash_bit: u32,
    mode: AtomicU8,
    table: ArcSwapOption<Box<[AtomicU64]>>,
    control: RwLock<HashMap<K, u32>>,
    /// Issues every index; the authoritative key -> index map.
    fallback: RwLock<HashMap<K, u32>>,
}

impl<K: TypeKey> ClassIndex<K> {
    /// Default table width: 2^20 slots.
    pub const DEFAULT_HASH_BIT: u32 = 20;
    /// Smallest table width.
    pub const MIN_HASH_BIT: u32 = 14;
    /// Largest table width.
    pub const MAX_HASH_BIT: u32 = 24;

    /// Creates an index with the default table width.
    #[must_use]
    pub fn new() -> Self {
        Self::with_hash_bit(Self::DEFAULT_HASH_BIT)
    }

    /// Creates an index with `2^hash_bit` slots. `hash_bit` is clamped to
    /// `[14, 24]`.
    #[must_use]
    pub fn with_hash_bit(hash_bit: u32) -> Self {
        let hash_bit = hash_bit.clamp(Self::MIN_HASH_BIT, Self::MAX_HASH_BIT);
        let table: Box<[AtomicU64]> = (0..1usize << hash_bit).map(|_| AtomicU64::new(0)).collect();
        Self {
            hash_bit,
            mode: AtomicU8::new(MODE_TABLE),
            table: ArcSwapOption::from_pointee(table),
            control: RwLock::new(HashMap::with_capacity(1 << 10)),
            fallback: RwLock::new(HashMap::new()),
        }
    }

    /// Table width in bits.
    #[inline]
    #[must_use]
    pub const fn hash_bit(&self) -> u32 {
        self.hash_bit
    }

    /// Backend currently in use.
    #[must_use]
    pub fn mode(&self) -> ClassIndexMode {
        if self.mode.load(Ordering::Acquire) == MODE_TABLE {
            ClassIndexMode::Table
        } else {
            ClassIndexMode::Fallback
        }
    }

    /// Number of registered types.
    #[must_use]
    pub fn size(&self) -> usize {
        self.fallback.read().len()
    }

    #[inline]
    fn slot_of(&self, hash: u32) -> usize {
        (hash >> (32 - self.hash_bit)) as usize
    }

    fn switch_to_fallback(&self) {
        self.mode.store(MODE_FALLBACK, Ordering::Release);
    }

    /// Index from the authoritative map, issuing the next one if absent.
    fn issue(&self, key: K) -> u32 {
        if let Some(index) = self.fallback.read().get(&key) {
            return *index;
        }
        let mut map = self.fallback.write();
        let next = u32::try_from(map.len() + 1).unwrap_or(u32::MAX);
        *map.entry(key).or_insert(next)
    }

    /// Registers `key` and returns its index.
    pub fn add_key(&self, key: K) -> u32 {
        if self.mode() == ClassIndexMode::Fallback {
            return self.issue(key);
        }
        let guard = self.table.load();
        let Some(table) = guard.as_ref() else {
            return self.issue(key);
        };

        let hash = key.identity_hash();
        let slot_index = self.slot_of(hash);
        let Some(slot) = table.get(slot_index) else {
            return self.issue(key);
        };

        let mut current = slot.load(Ordering::Acquire);
        if current == 0 {
            let index = self.issue(key);
            self.control.write().insert(key, index);
            match slot.compare_exchange(0, pack(hash, index), Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return index,
                Err(actual) => current = actual,
            }
        }

        let (_, slot_value) = unpack(current);
        if self.control.read().get(&key) == Some(&slot_value) {
            return slot_value;
        }

        tracing::warn!(
            "class index collision for {:?} at slot {} (hash_bit {}): switching to fallback map",
            key,
            slot_index,
            self.hash_bit
        );
        self.switch_to_fallback();
        self.issue(key)
    }

    /// Index of `key`, or 0 if it was never registered.
    #[must_use]
    pub fn get_index(&self, key: K) -> u32 {
        if self.mode() == ClassIndexMode::Fallback {
            return self.fallback.read().get(&key).copied().unwrap_or(0);
        }
        let guard = self.table.load();
        let Some(table) = guard.as_ref() else {
            return self.fallback.read().get(&key).copied().unwrap_or(0);
        };

        let hash = key.identity_hash();
        match table.get(self.slot_of(hash)).map(|slot| unpack(slot.load(Ordering::Acquire))) {
            Some((tag, index))
                if index != 0
                    && tag == hash
                    && self.control.read().get(&key) == Some(&index) =>
            {
                index
            }
            _ => 0,
        }
    }

    /// Index of `key`, registering it first if needed.
    pub fn get_index_or_add(&self, key: K) -> u32 {
        match self.get_index(key) {
            0 => self.add_key(key),
            index => index,
        }
    }

    /// [`Self::get_index_or_add`] for every key, in order.
    pub fn get_index_or_add_batch(&self, keys: &[K]) -> Vec<u32> {
        keys.iter().map(|key| self.get_index_or_add(*key)).collect()
    }

    /// Builds the signature of a set of types.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateComponentType`] if a type appears
    /// twice.
    pub fn index_key_by_type(&self, keys: &[K]) -> StoreResult<IndexKey> {
        let indices = self.get_index_or_add_batch(keys);
        IndexKey::from_indices(&indices)
    }

    /// Clears the control map and drops the slot table. Lookups keep
    /// working through the fallback map.
    pub fn close(&self) {
        self.switch_to_fallback();
        self.table.store(None);
        self.control.write().clear();
    }
}

impl ClassIndex<TypeId> {
    /// Registers the type `T`.
    pub fn add_class<T: 'static>(&self) -> u32 {
        self.add_key(TypeId::of::<T>())
    }

    /// Index of `T`, or 0 if unknown.
    #[must_use]
    pub fn index_of<T: 'static>(&self) -> u32 {
        self.get_index(TypeId::of::<T>())
    }

    /// Builds the signature of the types of `components`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateComponentType`] if two components share
    /// a type.
    pub fn index_key(&self, components: &[Arc<dyn Component>]) -> StoreResult<IndexKey> {
        let types: Vec<TypeId> = components
            .iter()
            .map(|component| component.component_type())
            .collect();
        self.index_key_by_type(&types)
    }
}

impl<K: TypeKey> Default for ClassIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for ClassIndex<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassIndex")
            .field("hash_bit", &self.hash_bit)
            .field("fallback", &(self.mode.load(Ordering::Relaxed) == MODE_FALLBACK))
            .finish_non_exhaustive()
    }
}

/// Sorted set of type indices identifying a composition.
#[derive(Clone, PartialEq, Eq)]
pub struct IndexKey {
    hash: u32,
    members: Box<[u32]>,
}

impl IndexKey {
    /// Builds a key from unordered indices.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateComponentType`] on a repeated index.
    pub fn from_indices(indices: &[u32]) -> StoreResult<Self> {
        let max = indices.iter().copied().max().unwrap_or(0);
        let mut check = vec![false; max as usize + 1];
        for &index in indices {
            let seen = &mut check[index as usize];
            if *seen {
                return Err(StoreError::DuplicateComponentType { index });
            }
            *seen = true;
        }
        let min = indices.iter().copied().min().unwrap_or(u32::MAX);
        Ok(Self::from_membership(&check, min, max))
    }

    /// Builds a key from a membership array restricted to `min..=max`.
    #[must_use]
    pub fn from_membership(check: &[bool], min: u32, max: u32) -> Self {
        let mut result: i64 = 1;
        let mut members = Vec::new();
        for index in min..=max {
            if check.get(index as usize).copied().unwrap_or(false) {
                result = result.wrapping_mul(31).wrapping_add(i64::from(index));
                members.push(index);
            }
        }
        Self {
            hash: (result ^ (result >> 32)) as u32,
            members: members.into_boxed_slice(),
        }
    }

    /// Member indices, ascending.
    #[inline]
    #[must_use]
    pub fn members(&self) -> &[u32] {
        &self.members
    }

    /// Number of member types.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Checks if the key has no members.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Checks if `index` is a member.
    #[must_use]
    pub fn contains(&self, index: u32) -> bool {
        self.members.binary_search(&index).is_ok()
    }

    /// Checks if every member of `other` is a member of `self`.
    #[must_use]
    pub fn is_superset_of(&self, other: &Self) -> bool {
        other.members.iter().all(|index| self.contains(*index))
    }
}

impl Default for IndexKey {
    /// The key without members.
    fn default() -> Self {
        Self::from_membership(&[], 1, 0)
    }
}

impl Hash for IndexKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

impl fmt::Debug for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "|{}:{:?}|", self.hash, self.members)
    }
}
