//! Property tests for the store.
//!
//! Random sequences of structural operations are applied to a repository
//! and checked against a plain model after each step.

use std::any::TypeId;
use std::sync::Arc;

use proptest::prelude::*;
use strata_core::{
    Component, CompositionRepository, Entity, IdSchema, Identifiable, IntStack, StoreConfig,
};

#[derive(Debug, PartialEq)]
struct Pos(i32);

#[derive(Debug, PartialEq)]
struct Vel(i32);

#[derive(Debug, Clone)]
enum StoreOp {
    SpawnPos(i32),
    SpawnPosVel(i32, i32),
    Destroy(usize),
    AddVel(usize, i32),
    RemoveVel(usize),
    RemovePos(usize),
    Toggle(usize),
}

fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        any::<i32>().prop_map(StoreOp::SpawnPos),
        (any::<i32>(), any::<i32>()).prop_map(|(p, v)| StoreOp::SpawnPosVel(p, v)),
        (0..64usize).prop_map(StoreOp::Destroy),
        (0..64usize, any::<i32>()).prop_map(|(i, v)| StoreOp::AddVel(i, v)),
        (0..64usize).prop_map(StoreOp::RemoveVel),
        (0..64usize).prop_map(StoreOp::RemovePos),
        (0..64usize).prop_map(StoreOp::Toggle),
    ]
}

/// Expected state of one entity.
struct Model {
    entity: Arc<Entity>,
    pos: Option<i32>,
    vel: Option<i32>,
    enabled: bool,
}

fn pick(alive: &[Model], i: usize) -> Option<usize> {
    (!alive.is_empty()).then(|| i % alive.len())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn store_random_ops_match_model(ops in prop::collection::vec(store_op_strategy(), 1..80)) {
        let config = StoreConfig {
            class_index_bit: 14,
            chunk_bit: 10,
            chunk_count_bit: 6,
            ..StoreConfig::default()
        };
        let repository = CompositionRepository::new(config).unwrap();
        let mut alive: Vec<Model> = Vec::new();

        for op in ops {
            match op {
                StoreOp::SpawnPos(p) => {
                    let components: Vec<Arc<dyn Component>> = vec![Arc::new(Pos(p))];
                    let entity = repository.create_entity(components).unwrap();
                    alive.push(Model { entity, pos: Some(p), vel: None, enabled: true });
                }
                StoreOp::SpawnPosVel(p, v) => {
                    let components: Vec<Arc<dyn Component>> =
                        vec![Arc::new(Vel(v)), Arc::new(Pos(p))];
                    let entity = repository.create_entity(components).unwrap();
                    alive.push(Model { entity, pos: Some(p), vel: Some(v), enabled: true });
                }
                StoreOp::Destroy(i) => {
                    if let Some(i) = pick(&alive, i) {
                        let model = &alive[i];
                        let destroyed = model.entity.destroy();
                        prop_assert_eq!(destroyed, model.enabled);
                        if destroyed {
                            alive.remove(i);
                        }
                    }
                }
                StoreOp::AddVel(i, v) => {
                    if let Some(i) = pick(&alive, i) {
                        let model = &mut alive[i];
                        let added = model.entity.add(Vel(v)).unwrap();
                        prop_assert_eq!(added, model.enabled);
                        if added {
                            model.vel = Some(v);
                        }
                    }
                }
                StoreOp::RemoveVel(i) => {
                    if let Some(i) = pick(&alive, i) {
                        let model = &mut alive[i];
                        let removed = model.entity.remove_type(TypeId::of::<Vel>()).unwrap();
                        prop_assert_eq!(removed, model.enabled && model.vel.is_some());
                        if removed {
                            model.vel = None;
                        }
                    }
                }
                StoreOp::RemovePos(i) => {
                    if let Some(i) = pick(&alive, i) {
                        let model = &mut alive[i];
                        let removed = model.entity.remove(&Pos(0)).unwrap();
                        prop_assert_eq!(removed, model.enabled && model.pos.is_some());
                        if removed {
                            model.pos = None;
                        }
                    }
                }
                StoreOp::Toggle(i) => {
                    if let Some(i) = pick(&alive, i) {
                        let model = &mut alive[i];
                        model.enabled = !model.enabled;
                        model.entity.set_enabled(model.enabled).unwrap();
                    }
                }
            }

            let enabled: Vec<&Model> = alive.iter().filter(|m| m.enabled).collect();
            prop_assert_eq!(repository.pool_size(), enabled.len());

            let with_pos = repository.query(&[TypeId::of::<Pos>()]).unwrap().len();
            prop_assert_eq!(with_pos, enabled.iter().filter(|m| m.pos.is_some()).count());
            let with_both = repository
                .query(&[TypeId::of::<Pos>(), TypeId::of::<Vel>()])
                .unwrap()
                .len();
            prop_assert_eq!(
                with_both,
                enabled.iter().filter(|m| m.pos.is_some() && m.vel.is_some()).count()
            );

            for model in &alive {
                prop_assert_eq!(model.entity.get::<Pos>().map(|p| p.0), model.pos);
                prop_assert_eq!(model.entity.get::<Vel>().map(|v| v.0), model.vel);
                prop_assert_eq!(model.entity.is_enabled(), model.enabled);
                if model.enabled {
                    let stored = repository.entity(model.entity.id()).unwrap();
                    prop_assert!(Arc::ptr_eq(&stored, &model.entity));
                }
            }
        }
    }

    #[test]
    fn int_stack_is_lifo(ops in prop::collection::vec(prop::option::of(any::<u32>()), 1..200)) {
        let stack = IntStack::new(4);
        let mut model: Vec<u32> = Vec::new();

        for op in ops {
            match op {
                Some(id) => {
                    prop_assert!(stack.push(id));
                    model.push(id);
                }
                None => prop_assert_eq!(stack.pop(), model.pop()),
            }
            prop_assert_eq!(stack.size(), model.len());
        }
    }

    #[test]
    fn id_schema_fields_are_independent(
        chunk_bit in 10u32..=20,
        chunk_count_bit in 6u32..=20,
        chunk in any::<u32>(),
        object in any::<u32>(),
        replacement in any::<u32>(),
    ) {
        prop_assume!(chunk_bit + chunk_count_bit <= IdSchema::BIT_LENGTH);
        let schema = IdSchema::new(chunk_bit, chunk_count_bit).unwrap();
        let chunk = chunk % schema.chunk_count();
        let object = object % schema.chunk_capacity();
        let replacement = replacement % schema.chunk_capacity();

        let id = schema.generate_id(chunk, object);
        prop_assert!(id < IdSchema::FLAG_BIT);

        let merged = schema.merge_id(id | IdSchema::DETACHED_BIT, replacement);
        prop_assert_eq!(schema.fetch_chunk_id(merged), chunk);
        prop_assert_eq!(schema.fetch_object_id(merged), replacement);
        prop_assert_eq!(merged & IdSchema::DETACHED_BIT, 0);
    }
}
