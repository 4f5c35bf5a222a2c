//! # Composition Contracts
//!
//! An entity delegates structural changes to the composition (archetype) it
//! currently belongs to, and through it to the owning repository.

use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, Weak};

use super::component::Component;
use super::entity::Entity;
use crate::error::StoreResult;
use crate::memory::IdSchema;

/// Immutable snapshot of an entity's archetype and component values.
///
/// Replaced as a whole on every structural change, so readers never see a
/// half-updated component array. The composition is held weakly: the
/// repository owns its compositions, and a snapshot must not keep them alive.
pub struct ComponentData {
    composition: Weak<dyn Composition>,
    components: Box<[Arc<dyn Component>]>,
}

impl ComponentData {
    /// Creates a snapshot.
    #[must_use]
    pub fn new(composition: Weak<dyn Composition>, components: Vec<Arc<dyn Component>>) -> Self {
        Self {
            composition,
            components: components.into_boxed_slice(),
        }
    }

    /// The composition the entity belongs to, `None` once its repository is
    /// gone.
    #[inline]
    #[must_use]
    pub fn composition(&self) -> Option<Arc<dyn Composition>> {
        self.composition.upgrade()
    }

    /// Checks if this snapshot belongs to `composition`.
    #[must_use]
    pub fn belongs_to(&self, composition: &Arc<dyn Composition>) -> bool {
        self.composition.as_ptr().cast::<()>() == Arc::as_ptr(composition).cast::<()>()
    }

    /// Component values, in the composition's order.
    #[inline]
    #[must_use]
    pub fn components(&self) -> &[Arc<dyn Component>] {
        &self.components
    }
}

impl fmt::Debug for ComponentData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentData")
            .field("composition", &self.composition.upgrade())
            .field("components", &self.components)
            .finish()
    }
}

/// Archetype-level operations an [`Entity`] relies on.
///
/// Every method that takes an entity is called with that entity's structural
/// lock held.
pub trait Composition: Send + Sync + fmt::Debug {
    /// The repository that performs add/remove relocation, if still alive.
    fn repository(&self) -> Option<Arc<dyn Repository>>;

    /// Frees the entity's slot and drops its components.
    fn delete_entity(&self, entity: &Arc<Entity>) -> bool;

    /// Frees the entity's slot and marks it detached. Components are kept.
    fn detach_entity(&self, entity: &Arc<Entity>);

    /// Gives a detached entity a fresh slot.
    ///
    /// # Errors
    ///
    /// Fails if no slot can be allocated.
    fn reattach_entity(&self, entity: &Arc<Entity>) -> StoreResult<()>;

    /// Position of `component_type` in this composition's component array.
    fn component_index(&self, component_type: TypeId) -> Option<usize>;

    /// Checks if the composition has more than one component type.
    fn is_multi_component(&self) -> bool;

    /// Id layout of the pool holding this composition's entities.
    fn id_schema(&self) -> IdSchema;
}

/// Structural changes that move an entity between compositions.
pub trait Repository: Send + Sync {
    /// Adds `component` to `entity`, replacing a value of the same type.
    ///
    /// # Errors
    ///
    /// Fails if the target composition cannot be created or allocated from.
    fn add_component(&self, entity: &Arc<Entity>, component: Arc<dyn Component>)
        -> StoreResult<bool>;

    /// Removes the component of `component_type` from `entity`.
    ///
    /// # Returns
    ///
    /// `Ok(false)` if the entity has no such component.
    ///
    /// # Errors
    ///
    /// Fails if the target composition cannot be created or allocated from.
    fn remove_component_type(&self, entity: &Arc<Entity>, component_type: TypeId)
        -> StoreResult<bool>;
}
