//! # Strata Core
//!
//! Concurrent archetype storage for an Entity Component System:
//! - Entities addressed by packed 32-bit ids (chunk id + object id)
//! - Chunked, linked pools that recycle ids through lock-free stacks
//! - A type registry handing out dense indices per component type
//! - Compositions (archetypes) that entities move between as they gain or
//!   lose component types
//!
//! ## Architecture Rules
//!
//! 1. **Ids are stable until freed** - compaction re-stamps moved entities
//! 2. **Snapshots, not locks, for reads** - component reads never block
//! 3. **One structural change per entity at a time** - guarded per entity
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_core::{Component, CompositionRepository, StoreConfig};
//!
//! #[derive(Debug, PartialEq)]
//! struct Health(u32);
//!
//! let repository = CompositionRepository::new(StoreConfig::default())?;
//! let components: Vec<Arc<dyn Component>> = vec![Arc::new(Health(100))];
//! let entity = repository.create_entity(components)?;
//!
//! assert_eq!(entity.get::<Health>().map(|h| h.0), Some(100));
//! # Ok::<(), strata_core::StoreError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod ecs;
pub mod error;
pub mod memory;

pub use config::StoreConfig;
pub use ecs::{
    ClassIndex, ClassIndexMode, Component, ComponentData, Composition, CompositionRepository,
    DataComposition, Entity, IndexKey, Repository, TypeKey,
};
pub use error::{StoreError, StoreResult};
pub use memory::{
    ChunkedPool, DescribedId, IdSchema, Identifiable, IntStack, LinkedChunk, PooledNode,
    StackGrowth,
};
