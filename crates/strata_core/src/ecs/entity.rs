//! # Entity Handle
//!
//! An entity is a packed id plus an atomically swapped [`ComponentData`]
//! snapshot.
//!
//! ## Locking
//!
//! - Structural changes (`add`, `remove`, `destroy`, `set_enabled`) take a
//!   per-entity mutex, created on first use.
//! - Reads (`has`, `contains`, `get`) take no lock and observe either the old
//!   or the new snapshot, never a mix.
//!
//! ## States
//!
//! ```text
//! LIVE --set_enabled(false)--> DETACHED --set_enabled(true)--> LIVE
//! LIVE --destroy()--> destroyed
//! ```

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, MutexGuard};

use super::component::{downcast_arc, Component};
use super::composition::{ComponentData, Composition, Repository};
use crate::error::{StoreError, StoreResult};
use crate::memory::{IdSchema, Identifiable};

/// Client-facing entity handle. Always shared as `Arc<Entity>`.
pub struct Entity {
    id: AtomicU32,
    data: ArcSwapOption<ComponentData>,
    lock: OnceLock<Mutex<()>>,
}

impl Entity {
    /// Creates an entity with packed `id` and initial `data`.
    #[must_use]
    pub fn new(id: u32, data: ComponentData) -> Self {
        Self {
            id: AtomicU32::new(id),
            data: ArcSwapOption::from_pointee(data),
            lock: OnceLock::new(),
        }
    }

    fn structural_lock(&self) -> MutexGuard<'_, ()> {
        self.lock.get_or_init(|| Mutex::new(())).lock()
    }

    /// Adds `component`, moving the entity to the matching composition. A
    /// value of the same type is replaced.
    ///
    /// # Returns
    ///
    /// `Ok(false)` if the entity is detached or destroyed.
    ///
    /// # Errors
    ///
    /// [`StoreError::RepositoryClosed`] if the repository is gone, or any
    /// relocation failure.
    pub fn add<C: Component>(self: &Arc<Self>, component: C) -> StoreResult<bool> {
        self.add_shared(Arc::new(component))
    }

    /// [`Self::add`] for an already shared component.
    ///
    /// # Errors
    ///
    /// As [`Self::add`].
    pub fn add_shared(self: &Arc<Self>, component: Arc<dyn Component>) -> StoreResult<bool> {
        let _guard = self.structural_lock();
        let Some(data) = self.live_data() else {
            return Ok(false);
        };
        repository_of(&data)?.add_component(self, component)
    }

    /// Removes the component with the same type as `component`.
    ///
    /// # Errors
    ///
    /// As [`Self::remove_type`].
    pub fn remove<C: Component>(self: &Arc<Self>, component: &C) -> StoreResult<bool> {
        self.remove_type(component.component_type())
    }

    /// Removes the component of `component_type`.
    ///
    /// # Returns
    ///
    /// `Ok(false)` if the entity is detached, destroyed, or lacks the type.
    ///
    /// # Errors
    ///
    /// [`StoreError::RepositoryClosed`] if the repository is gone, or any
    /// relocation failure.
    pub fn remove_type(self: &Arc<Self>, component_type: TypeId) -> StoreResult<bool> {
        let _guard = self.structural_lock();
        let Some(data) = self.live_data() else {
            return Ok(false);
        };
        repository_of(&data)?.remove_component_type(self, component_type)
    }

    fn live_data(&self) -> Option<Arc<ComponentData>> {
        if self.is_detached_id() {
            return None;
        }
        self.data()
    }

    /// Destroys the entity. Its slot may be reissued to another entity.
    ///
    /// # Returns
    ///
    /// `false` if the entity is detached, already destroyed, or its
    /// repository is gone.
    pub fn destroy(self: &Arc<Self>) -> bool {
        let _guard = self.structural_lock();
        match self.live_data().and_then(|data| data.composition()) {
            Some(composition) => composition.delete_entity(self),
            None => false,
        }
    }

    /// Detaches (`false`) or reattaches (`true`) the entity. Components are
    /// kept while detached.
    ///
    /// # Errors
    ///
    /// [`StoreError::RepositoryClosed`] if the repository is gone, or a
    /// reattach allocation failure.
    pub fn set_enabled(self: &Arc<Self>, enabled: bool) -> StoreResult<()> {
        let _guard = self.structural_lock();
        let Some(data) = self.data() else {
            return Ok(());
        };
        let composition = data.composition().ok_or(StoreError::RepositoryClosed)?;
        if enabled && self.is_detached_id() {
            composition.reattach_entity(self)?;
        } else if !enabled && self.is_enabled() {
            composition.detach_entity(self);
        }
        Ok(())
    }

    /// Checks if the entity is not detached.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.is_detached_id()
    }

    /// Checks if the entity has a component of type `T`.
    #[must_use]
    pub fn has<T: Component>(&self) -> bool {
        self.has_type(TypeId::of::<T>())
    }

    /// Checks if the entity has a component of `component_type`.
    #[must_use]
    pub fn has_type(&self, component_type: TypeId) -> bool {
        let Some(data) = self.data() else {
            return false;
        };
        match data.composition() {
            Some(composition) if composition.is_multi_component() => {
                composition.component_index(component_type).is_some()
            }
            _ => data
                .components()
                .iter()
                .any(|component| component.component_type() == component_type),
        }
    }

    /// Checks if the entity holds a component equal to `component`.
    #[must_use]
    pub fn contains(&self, component: &dyn Component) -> bool {
        let Some(data) = self.data() else {
            return false;
        };
        match data.composition() {
            Some(composition) if composition.is_multi_component() => composition
                .component_index(component.component_type())
                .and_then(|index| data.components().get(index))
                .is_some_and(|held| held.dyn_eq(component)),
            _ => data
                .components()
                .iter()
                .any(|held| held.dyn_eq(component)),
        }
    }

    /// Returns the component of type `T`.
    #[must_use]
    pub fn get<T: Component>(&self) -> Option<Arc<T>> {
        let data = self.data()?;
        let wanted = TypeId::of::<T>();
        data.components()
            .iter()
            .find(|component| component.component_type() == wanted)
            .and_then(downcast_arc::<T>)
    }

    /// Current snapshot, `None` once destroyed.
    #[must_use]
    pub fn data(&self) -> Option<Arc<ComponentData>> {
        self.data.load_full()
    }

    /// Replaces the snapshot.
    pub fn set_data(&self, data: Option<Arc<ComponentData>>) {
        self.data.store(data);
    }

    /// Current composition, `None` once destroyed or orphaned.
    #[must_use]
    pub fn composition(&self) -> Option<Arc<dyn Composition>> {
        self.data()?.composition()
    }

    /// Current component values, empty once destroyed.
    #[must_use]
    pub fn components(&self) -> Vec<Arc<dyn Component>> {
        self.data()
            .map(|data| data.components().to_vec())
            .unwrap_or_default()
    }

    /// Checks the detached flag of the id.
    #[inline]
    #[must_use]
    pub fn is_detached_id(&self) -> bool {
        self.id.load(Ordering::Acquire) & IdSchema::DETACHED_BIT != 0
    }

    /// Sets the detached flag. Call with the structural lock held.
    pub fn flag_detached_id(&self) {
        self.id.fetch_or(IdSchema::DETACHED_BIT, Ordering::AcqRel);
    }

    /// Checks the pooled-array flag of the id.
    #[inline]
    #[must_use]
    pub fn is_pooled_array(&self) -> bool {
        self.id.load(Ordering::Acquire) & IdSchema::FLAG_BIT != 0
    }

    /// Sets the pooled-array flag. Call with the structural lock held.
    pub fn flag_pooled_array(&self) {
        self.id.fetch_or(IdSchema::FLAG_BIT, Ordering::AcqRel);
    }
}

fn repository_of(data: &ComponentData) -> StoreResult<Arc<dyn Repository>> {
    data.composition()
        .and_then(|composition| composition.repository())
        .ok_or(StoreError::RepositoryClosed)
}

impl Identifiable for Entity {
    #[inline]
    fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    /// Replaces the id. The pooled-array flag survives, the detached flag
    /// does not.
    fn set_id(&self, id: u32) {
        let _ = self
            .id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(id | (current & IdSchema::FLAG_BIT))
            });
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.id.load(Ordering::Relaxed);
        match self.composition() {
            Some(composition) => f
                .debug_struct("Entity")
                .field("id", &format_args!("{}", composition.id_schema().describe(id)))
                .field("composition", &composition)
                .finish(),
            None => f
                .debug_struct("Entity")
                .field("id", &id)
                .field("destroyed", &true)
                .finish(),
        }
    }
}
