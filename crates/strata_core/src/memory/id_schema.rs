//! # Packed Identifier Layout
//!
//! Every pooled entry is addressed by a single `u32`:
//!
//! ```text
//! | 31       | 30          | 29 .. chunk_bit | chunk_bit-1 .. 0 |
//! | detached | pooled flag | chunk id        | object id        |
//! ```
//!
//! The widths are fixed per pool. All operations here are plain arithmetic.

use std::fmt;

use crate::error::{StoreError, StoreResult};

/// Bit layout of a packed entry id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdSchema {
    chunk_bit: u32,
    chunk_count_bit: u32,
    chunk_count: u32,
    chunk_id_mask: u32,
    chunk_id_mask_shifted: u32,
    chunk_capacity: u32,
    object_id_mask: u32,
}

impl IdSchema {
    /// Bits available for chunk id and object id together.
    pub const BIT_LENGTH: u32 = 30;
    /// Smallest allowed object-id width.
    pub const MIN_CHUNK_BIT: u32 = 10;
    /// Smallest allowed chunk-count width.
    pub const MIN_CHUNK_COUNT_BIT: u32 = 6;
    /// Largest allowed object-id width.
    pub const MAX_CHUNK_BIT: u32 = Self::BIT_LENGTH - Self::MIN_CHUNK_COUNT_BIT;
    /// Largest allowed chunk-count width.
    pub const MAX_CHUNK_COUNT_BIT: u32 = Self::BIT_LENGTH - Self::MIN_CHUNK_BIT;
    /// Bit index of the detached flag.
    pub const DETACHED_BIT_IDX: u32 = 31;
    /// Detached flag.
    pub const DETACHED_BIT: u32 = 1 << Self::DETACHED_BIT_IDX;
    /// Bit index of the pooled-array flag.
    pub const FLAG_BIT_IDX: u32 = 30;
    /// Pooled-array flag.
    pub const FLAG_BIT: u32 = 1 << Self::FLAG_BIT_IDX;

    /// Creates a schema, rejecting widths outside the supported ranges.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidSchema`] if `chunk_bit` is outside
    /// `[10, 24]`, `chunk_count_bit` is outside `[6, 20]`, or the two together
    /// exceed the 30 available bits.
    pub fn new(chunk_bit: u32, chunk_count_bit: u32) -> StoreResult<Self> {
        let in_range = (Self::MIN_CHUNK_BIT..=Self::MAX_CHUNK_BIT).contains(&chunk_bit)
            && (Self::MIN_CHUNK_COUNT_BIT..=Self::MAX_CHUNK_COUNT_BIT).contains(&chunk_count_bit)
            && chunk_bit + chunk_count_bit <= Self::BIT_LENGTH;
        if !in_range {
            return Err(StoreError::InvalidSchema {
                chunk_bit,
                chunk_count_bit,
            });
        }
        Ok(Self::build(chunk_bit, chunk_count_bit))
    }

    /// Creates a schema, clamping both widths into the supported ranges.
    ///
    /// The chunk-count width is additionally limited to the bits left over
    /// by the object-id width.
    #[must_use]
    pub fn clamped(chunk_bit: u32, chunk_count_bit: u32) -> Self {
        let chunk_bit = chunk_bit.clamp(Self::MIN_CHUNK_BIT, Self::MAX_CHUNK_BIT);
        let reserved = Self::BIT_LENGTH - chunk_bit;
        let chunk_count_bit = chunk_count_bit
            .min(reserved.min(Self::MAX_CHUNK_COUNT_BIT))
            .max(Self::MIN_CHUNK_COUNT_BIT);
        Self::build(chunk_bit, chunk_count_bit)
    }

    const fn build(chunk_bit: u32, chunk_count_bit: u32) -> Self {
        let chunk_id_mask = (1 << (Self::BIT_LENGTH - chunk_bit)) - 1;
        let capacity_bit = if chunk_bit < Self::MAX_CHUNK_BIT {
            chunk_bit
        } else {
            Self::MAX_CHUNK_BIT
        };
        Self {
            chunk_bit,
            chunk_count_bit,
            chunk_count: 1 << chunk_count_bit,
            chunk_id_mask,
            chunk_id_mask_shifted: chunk_id_mask << chunk_bit,
            chunk_capacity: 1 << capacity_bit,
            object_id_mask: (1 << chunk_bit) - 1,
        }
    }

    /// Width of the object-id field.
    #[inline]
    #[must_use]
    pub const fn chunk_bit(&self) -> u32 {
        self.chunk_bit
    }

    /// Width of the chunk-count field.
    #[inline]
    #[must_use]
    pub const fn chunk_count_bit(&self) -> u32 {
        self.chunk_count_bit
    }

    /// Maximum number of chunks a pool may create.
    #[inline]
    #[must_use]
    pub const fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Number of slots in one chunk.
    #[inline]
    #[must_use]
    pub const fn chunk_capacity(&self) -> u32 {
        self.chunk_capacity
    }

    /// Packs a chunk id and an object id.
    #[inline]
    #[must_use]
    pub const fn generate_id(&self, chunk_id: u32, object_id: u32) -> u32 {
        debug_assert!(chunk_id < self.chunk_count);
        debug_assert!(object_id < self.chunk_capacity);
        ((chunk_id & self.chunk_id_mask) << self.chunk_bit) | (object_id & self.object_id_mask)
    }

    /// Replaces the object id of `id`.
    ///
    /// Only the chunk bits of `id` survive: detached and pooled-array flags
    /// are dropped.
    #[inline]
    #[must_use]
    pub const fn merge_id(&self, id: u32, object_id: u32) -> u32 {
        (id & self.chunk_id_mask_shifted) | object_id
    }

    /// Extracts the chunk id.
    #[inline]
    #[must_use]
    pub const fn fetch_chunk_id(&self, id: u32) -> u32 {
        (id >> self.chunk_bit) & self.chunk_id_mask
    }

    /// Extracts the object id.
    #[inline]
    #[must_use]
    pub const fn fetch_object_id(&self, id: u32) -> u32 {
        id & self.object_id_mask
    }

    /// Returns a displayable `|detached:flag:chunk:object|` view of `id`.
    #[must_use]
    pub const fn describe(&self, id: u32) -> DescribedId {
        DescribedId { schema: *self, id }
    }
}

/// Display adapter returned by [`IdSchema::describe`].
#[derive(Clone, Copy, Debug)]
pub struct DescribedId {
    schema: IdSchema,
    id: u32,
}

impl fmt::Display for DescribedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "|{}:{}:{}:{}|",
            (self.id & IdSchema::DETACHED_BIT) >> IdSchema::DETACHED_BIT_IDX,
            (self.id & IdSchema::FLAG_BIT) >> IdSchema::FLAG_BIT_IDX,
            self.schema.fetch_chunk_id(self.id),
            self.schema.fetch_object_id(self.id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_widths() {
        let schema = IdSchema::new(10, 6).unwrap();
        assert_eq!(schema.chunk_capacity(), 1024);
        assert_eq!(schema.chunk_count(), 64);
    }

    #[test]
    fn test_schema_rejects_out_of_range() {
        assert!(IdSchema::new(9, 6).is_err());
        assert!(IdSchema::new(10, 5).is_err());
        assert!(IdSchema::new(25, 6).is_err());
        assert_eq!(
            IdSchema::new(20, 16),
            Err(StoreError::InvalidSchema {
                chunk_bit: 20,
                chunk_count_bit: 16
            })
        );
    }

    #[test]
    fn test_clamped_limits_chunk_count() {
        let schema = IdSchema::clamped(24, 20);
        assert_eq!(schema.chunk_bit(), 24);
        assert_eq!(schema.chunk_count_bit(), 6);

        let schema = IdSchema::clamped(2, 2);
        assert_eq!(schema.chunk_bit(), 10);
        assert_eq!(schema.chunk_count_bit(), 6);
    }

    #[test]
    fn test_generate_and_fetch() {
        let schema = IdSchema::new(14, 16).unwrap();
        let id = schema.generate_id(37, 16_000);
        assert_eq!(schema.fetch_chunk_id(id), 37);
        assert_eq!(schema.fetch_object_id(id), 16_000);
    }

    #[test]
    fn test_fetch_ignores_flags() {
        let schema = IdSchema::new(12, 8).unwrap();
        let id = schema.generate_id(5, 9) | IdSchema::DETACHED_BIT | IdSchema::FLAG_BIT;
        assert_eq!(schema.fetch_chunk_id(id), 5);
        assert_eq!(schema.fetch_object_id(id), 9);
    }

    #[test]
    fn test_merge_drops_flags() {
        let schema = IdSchema::new(12, 8).unwrap();
        let id = schema.generate_id(3, 100) | IdSchema::DETACHED_BIT | IdSchema::FLAG_BIT;
        let merged = schema.merge_id(id, 7);
        assert_eq!(merged, schema.generate_id(3, 7));
        assert_eq!(merged & (IdSchema::DETACHED_BIT | IdSchema::FLAG_BIT), 0);
    }

    #[test]
    fn test_describe() {
        let schema = IdSchema::new(10, 6).unwrap();
        let id = schema.generate_id(2, 5) | IdSchema::DETACHED_BIT;
        assert_eq!(schema.describe(id).to_string(), "|1:0:2:5|");
    }
}
