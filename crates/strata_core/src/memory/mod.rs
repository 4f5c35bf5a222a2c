//! # Memory Management
//!
//! Chunked arenas addressed by packed `u32` ids.
//!
//! ## Layout
//!
//! - [`IdSchema`] packs chunk id and object id into one integer
//! - [`LinkedChunk`] is one fixed-capacity segment
//! - [`ChunkedPool`] owns the shared chunk table
//! - [`PooledNode`] is one allocation stream with its own [`IntStack`] of
//!   recyclable ids

mod chunk;
mod id_schema;
mod int_stack;
mod pool;

pub use chunk::LinkedChunk;
pub use id_schema::{DescribedId, IdSchema};
pub use int_stack::{IntStack, StackGrowth};
pub use pool::{ChunkedPool, NodeIter, PooledNode};

/// Entries stored in a [`ChunkedPool`] know their own packed id.
///
/// The pool re-stamps an entry through [`Identifiable::set_id`] when
/// compaction moves it to another slot, so the id must be interior-mutable.
pub trait Identifiable: Send + Sync {
    /// Current packed id.
    fn id(&self) -> u32;

    /// Replaces the packed id.
    fn set_id(&self, id: u32);
}
