//! # Composition Repository
//!
//! Owns the archetype graph: one [`DataComposition`] per distinct set of
//! component types, each backed by its own [`PooledNode`] of a shared
//! [`ChunkedPool`].
//!
//! Adding or removing a component type relocates the entity: its slot in the
//! old composition is freed and a new one is allocated in the target
//! composition. Replacing a value of a type the entity already has stays in
//! place.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::class_index::{ClassIndex, IndexKey};
use super::component::Component;
use super::composition::{ComponentData, Composition, Repository};
use super::entity::Entity;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::memory::{ChunkedPool, IdSchema, Identifiable, PooledNode};

/// Entities sharing one set of component types.
pub struct DataComposition {
    repository: Weak<CompositionRepository>,
    node: Arc<PooledNode<Entity>>,
    schema: IdSchema,
    key: IndexKey,
    /// Sorted by class index.
    component_types: Box<[TypeId]>,
    component_indices: HashMap<TypeId, usize>,
}

impl DataComposition {
    fn new(
        repository: Weak<CompositionRepository>,
        node: Arc<PooledNode<Entity>>,
        schema: IdSchema,
        key: IndexKey,
        mut typed: Vec<(u32, TypeId)>,
    ) -> Self {
        typed.sort_unstable_by_key(|(index, _)| *index);
        let component_types: Box<[TypeId]> = typed.iter().map(|(_, ty)| *ty).collect();
        let component_indices = component_types
            .iter()
            .enumerate()
            .map(|(position, ty)| (*ty, position))
            .collect();
        Self {
            repository,
            node,
            schema,
            key,
            component_types,
            component_indices,
        }
    }

    /// Signature of this composition.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &IndexKey {
        &self.key
    }

    /// Component types, sorted by class index.
    #[inline]
    #[must_use]
    pub fn component_types(&self) -> &[TypeId] {
        &self.component_types
    }

    /// Number of component types.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.component_types.len()
    }

    /// Checks if this is the composition without components.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.component_types.is_empty()
    }

    /// Live entities, in allocation order.
    pub fn entities(&self) -> impl Iterator<Item = Arc<Entity>> {
        self.node.iter()
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.node.size()
    }

    /// The allocation stream backing this composition.
    #[must_use]
    pub fn node(&self) -> &Arc<PooledNode<Entity>> {
        &self.node
    }

    fn as_weak(self: &Arc<Self>) -> Weak<dyn Composition> {
        let weak: Weak<Self> = Arc::downgrade(self);
        weak
    }

    fn sort_components(&self, mut components: Vec<Arc<dyn Component>>) -> Vec<Arc<dyn Component>> {
        if self.is_multi_component() {
            components.sort_by_key(|component| {
                self.component_indices
                    .get(&component.component_type())
                    .copied()
                    .unwrap_or(usize::MAX)
            });
        }
        components
    }

    /// Allocates a slot and creates an entity holding `components`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ChunkLimitExceeded`] when the pool is full.
    pub fn create_entity(
        self: &Arc<Self>,
        components: Vec<Arc<dyn Component>>,
    ) -> StoreResult<Arc<Entity>> {
        let data = ComponentData::new(self.as_weak(), self.sort_components(components));
        self.node.insert_with(|id| Arc::new(Entity::new(id, data)))
    }

    /// Moves a detached `entity` into this composition with `components`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ChunkLimitExceeded`] when the pool is full.
    pub fn attach_entity(
        self: &Arc<Self>,
        entity: &Arc<Entity>,
        components: Vec<Arc<dyn Component>>,
    ) -> StoreResult<()> {
        let data = ComponentData::new(self.as_weak(), self.sort_components(components));
        entity.set_data(Some(Arc::new(data)));
        self.node
            .insert_with(|id| {
                entity.set_id(id);
                Arc::clone(entity)
            })
            .map(|_| ())
    }
}

impl Composition for DataComposition {
    fn repository(&self) -> Option<Arc<dyn Repository>> {
        self.repository
            .upgrade()
            .map(|repository| repository as Arc<dyn Repository>)
    }

    fn delete_entity(&self, entity: &Arc<Entity>) -> bool {
        self.detach_entity(entity);
        entity.set_data(None);
        true
    }

    fn detach_entity(&self, entity: &Arc<Entity>) {
        self.node.free_entry(entity);
        entity.flag_detached_id();
    }

    fn reattach_entity(&self, entity: &Arc<Entity>) -> StoreResult<()> {
        self.node
            .insert_with(|id| {
                entity.set_id(id);
                Arc::clone(entity)
            })
            .map(|_| ())
    }

    fn component_index(&self, component_type: TypeId) -> Option<usize> {
        self.component_indices.get(&component_type).copied()
    }

    fn is_multi_component(&self) -> bool {
        self.component_types.len() > 1
    }

    fn id_schema(&self) -> IdSchema {
        self.schema
    }
}

impl fmt::Debug for DataComposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Composition={:?}", self.key.members())
    }
}

/// The archetype graph and its entity pool.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use strata_core::{Component, CompositionRepository, StoreConfig};
///
/// #[derive(Debug, PartialEq)]
/// struct Position(f32, f32);
///
/// #[derive(Debug, PartialEq)]
/// struct Velocity(f32, f32);
///
/// let repository = CompositionRepository::new(StoreConfig::default())?;
/// let components: Vec<Arc<dyn Component>> = vec![Arc::new(Position(0.0, 0.0))];
/// let entity = repository.create_entity(components)?;
///
/// entity.add(Velocity(1.0, 0.0))?;
/// assert!(entity.has::<Velocity>());
/// # Ok::<(), strata_core::StoreError>(())
/// ```
pub struct CompositionRepository {
    me: Weak<CompositionRepository>,
    schema: IdSchema,
    class_index: ClassIndex,
    pool: ChunkedPool<Entity>,
    compositions: RwLock<HashMap<IndexKey, Arc<DataComposition>>>,
    root: Arc<DataComposition>,
    closed: AtomicBool,
}

impl CompositionRepository {
    /// Creates a repository with an empty root composition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidSchema`] if the config's bit widths are
    /// out of range.
    pub fn new(config: StoreConfig) -> StoreResult<Arc<Self>> {
        let schema = config.id_schema()?;
        let pool = ChunkedPool::with_id_stack(
            schema,
            config.id_stack_capacity,
            config.id_stack_growth,
        );
        let root_node = pool.new_node()?;
        let class_index = ClassIndex::with_hash_bit(config.class_index_bit);

        tracing::debug!(
            "composition repository: {} chunks of {} entities, class index 2^{}",
            schema.chunk_count(),
            schema.chunk_capacity(),
            class_index.hash_bit()
        );

        Ok(Arc::new_cyclic(|me: &Weak<Self>| {
            let root = Arc::new(DataComposition::new(
                me.clone(),
                root_node,
                schema,
                IndexKey::default(),
                Vec::new(),
            ));
            let mut compositions = HashMap::new();
            compositions.insert(IndexKey::default(), Arc::clone(&root));
            Self {
                me: me.clone(),
                schema,
                class_index,
                pool,
                compositions: RwLock::new(compositions),
                root,
                closed: AtomicBool::new(false),
            }
        }))
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::RepositoryClosed);
        }
        Ok(())
    }

    /// Creates an entity holding `components`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateComponentType`] if two components share
    /// a type, [`StoreError::ChunkLimitExceeded`] when the pool is full, or
    /// [`StoreError::RepositoryClosed`] after [`Self::close`].
    pub fn create_entity(&self, components: Vec<Arc<dyn Component>>) -> StoreResult<Arc<Entity>> {
        let composition = self.composition_for(&components)?;
        composition.create_entity(components)
    }

    fn composition_for(
        &self,
        components: &[Arc<dyn Component>],
    ) -> StoreResult<Arc<DataComposition>> {
        let types: Vec<TypeId> = components
            .iter()
            .map(|component| component.component_type())
            .collect();
        self.get_or_create(&types)
    }

    /// Returns the composition for exactly `types`, creating it if needed.
    ///
    /// # Errors
    ///
    /// As [`Self::create_entity`].
    pub fn get_or_create(&self, types: &[TypeId]) -> StoreResult<Arc<DataComposition>> {
        self.ensure_open()?;
        if types.is_empty() {
            return Ok(Arc::clone(&self.root));
        }

        let indices = self.class_index.get_index_or_add_batch(types);
        let key = IndexKey::from_indices(&indices)?;
        if let Some(composition) = self.compositions.read().get(&key) {
            return Ok(Arc::clone(composition));
        }

        let mut compositions = self.compositions.write();
        if let Some(composition) = compositions.get(&key) {
            return Ok(Arc::clone(composition));
        }

        let node = self.pool.new_node()?;
        let typed = indices.into_iter().zip(types.iter().copied()).collect();
        let composition = Arc::new(DataComposition::new(
            self.me.clone(),
            node,
            self.schema,
            key.clone(),
            typed,
        ));
        tracing::debug!("created {:?}", composition);
        compositions.insert(key, Arc::clone(&composition));
        Ok(composition)
    }

    /// Compositions whose types include all of `types`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateComponentType`] if `types` repeats a
    /// type.
    pub fn find(&self, types: &[TypeId]) -> StoreResult<Vec<Arc<DataComposition>>> {
        self.find_excluding(types, &[])
    }

    /// Compositions whose types include all of `include` and none of
    /// `exclude`. Unregistered excluded types match nothing and are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateComponentType`] if `include` repeats a
    /// type.
    pub fn find_excluding(
        &self,
        include: &[TypeId],
        exclude: &[TypeId],
    ) -> StoreResult<Vec<Arc<DataComposition>>> {
        let indices: Vec<u32> = include
            .iter()
            .map(|ty| self.class_index.get_index(*ty))
            .collect();
        if indices.contains(&0) {
            return Ok(Vec::new());
        }
        let wanted = IndexKey::from_indices(&indices)?;
        let unwanted: Vec<u32> = exclude
            .iter()
            .map(|ty| self.class_index.get_index(*ty))
            .filter(|index| *index != 0)
            .collect();

        Ok(self
            .compositions
            .read()
            .values()
            .filter(|composition| {
                let key = composition.key();
                key.is_superset_of(&wanted) && !unwanted.iter().any(|index| key.contains(*index))
            })
            .cloned()
            .collect())
    }

    /// Live entities having all of `types`.
    ///
    /// # Errors
    ///
    /// As [`Self::find`].
    pub fn query(&self, types: &[TypeId]) -> StoreResult<Vec<Arc<Entity>>> {
        self.query_excluding(types, &[])
    }

    /// Live entities having all of `include` and none of `exclude`.
    ///
    /// # Errors
    ///
    /// As [`Self::find_excluding`].
    pub fn query_excluding(
        &self,
        include: &[TypeId],
        exclude: &[TypeId],
    ) -> StoreResult<Vec<Arc<Entity>>> {
        Ok(self
            .find_excluding(include, exclude)?
            .iter()
            .flat_map(|composition| composition.entities())
            .filter(|entity| entity.is_enabled())
            .collect())
    }

    fn relocate(
        &self,
        entity: &Arc<Entity>,
        previous: &ComponentData,
        from: &Arc<dyn Composition>,
        to: &Arc<DataComposition>,
        components: Vec<Arc<dyn Component>>,
    ) -> StoreResult<()> {
        let old_id = entity.id();
        from.detach_entity(entity);
        if let Err(error) = to.attach_entity(entity, components) {
            entity.set_data(Some(Arc::new(ComponentData::new(
                Arc::downgrade(from),
                previous.components().to_vec(),
            ))));
            from.reattach_entity(entity)?;
            return Err(error);
        }
        tracing::trace!(
            "relocated entity {} -> {} into {:?}",
            self.schema.describe(old_id),
            self.schema.describe(entity.id()),
            to
        );
        Ok(())
    }

    /// The composition without components.
    #[must_use]
    pub fn root(&self) -> &Arc<DataComposition> {
        &self.root
    }

    /// The type registry.
    #[must_use]
    pub fn class_index(&self) -> &ClassIndex {
        &self.class_index
    }

    /// Id layout of the entity pool.
    #[must_use]
    pub fn schema(&self) -> IdSchema {
        self.schema
    }

    /// Number of compositions, root included.
    #[must_use]
    pub fn composition_count(&self) -> usize {
        self.compositions.read().len()
    }

    /// Returns the live entity at `id`.
    #[inline]
    #[must_use]
    pub fn entity(&self, id: u32) -> Option<Arc<Entity>> {
        self.pool.get(id)
    }

    /// Live entities across all compositions.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Drops every composition except the root and releases the pool's free
    /// stacks. Later calls fail with [`StoreError::RepositoryClosed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.compositions.write().clear();
        self.class_index.close();
        self.pool.close();
    }
}

impl Repository for CompositionRepository {
    fn add_component(
        &self,
        entity: &Arc<Entity>,
        component: Arc<dyn Component>,
    ) -> StoreResult<bool> {
        self.ensure_open()?;
        let Some(data) = entity.data() else {
            return Ok(false);
        };
        let current = data.composition().ok_or(StoreError::RepositoryClosed)?;

        let added = component.component_type();
        let mut components = data.components().to_vec();
        if let Some(held) = components
            .iter_mut()
            .find(|held| held.component_type() == added)
        {
            *held = component;
            entity.set_data(Some(Arc::new(ComponentData::new(
                Arc::downgrade(&current),
                components,
            ))));
            return Ok(true);
        }

        components.push(component);
        let target = self.composition_for(&components)?;
        self.relocate(entity, &data, &current, &target, components)?;
        Ok(true)
    }

    fn remove_component_type(
        &self,
        entity: &Arc<Entity>,
        component_type: TypeId,
    ) -> StoreResult<bool> {
        self.ensure_open()?;
        let Some(data) = entity.data() else {
            return Ok(false);
        };
        let current = data.composition().ok_or(StoreError::RepositoryClosed)?;

        let mut components = data.components().to_vec();
        let Some(position) = components
            .iter()
            .position(|held| held.component_type() == component_type)
        else {
            return Ok(false);
        };
        components.remove(position);

        let target = self.composition_for(&components)?;
        self.relocate(entity, &data, &current, &target, components)?;
        Ok(true)
    }
}

impl fmt::Debug for CompositionRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositionRepository")
            .field("schema", &self.schema)
            .field("class_index", &self.class_index)
            .field("compositions", &self.composition_count())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
