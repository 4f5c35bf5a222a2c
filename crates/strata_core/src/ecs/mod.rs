//! # Entity Component System
//!
//! Archetype storage: entities with the same set of component types live in
//! the same [`DataComposition`], backed by one [`PooledNode`](crate::memory::PooledNode).
//!
//! ## Design
//!
//! - Component types get dense indices from the [`ClassIndex`]
//! - A composition is identified by the sorted [`IndexKey`] of its types
//! - Entities hold an immutable [`ComponentData`] snapshot, swapped whole
//! - Adding or removing a type relocates the entity to another composition

mod class_index;
mod component;
mod composition;
mod entity;
mod repository;

pub use class_index::{ClassIndex, ClassIndexMode, IndexKey, TypeKey};
pub use component::Component;
pub use composition::{ComponentData, Composition, Repository};
pub use entity::Entity;
pub use repository::{CompositionRepository, DataComposition};
