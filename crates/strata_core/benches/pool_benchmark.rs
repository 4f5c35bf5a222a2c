//! # Pool and Repository Benchmark
//!
//! Measures id allocation, recycling and archetype relocation.
//!
//! Run with: `cargo bench --package strata_core`

// Benchmarks don't need docs
#![allow(missing_docs)]

use std::any::TypeId;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use strata_core::{
    ChunkedPool, ClassIndex, Component, CompositionRepository, IdSchema, Identifiable, IntStack,
    StoreConfig,
};

#[derive(Debug)]
struct Slot(AtomicU32);

impl Identifiable for Slot {
    fn id(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    fn set_id(&self, id: u32) {
        self.0.store(id, Ordering::Release);
    }
}

#[derive(Debug, PartialEq)]
struct Position(f32, f32, f32);

#[derive(Debug, PartialEq)]
struct Velocity(f32, f32, f32);

/// Benchmark: Allocate ids into a fresh node.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_insert");

    for count in [10_000u32, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let pool = ChunkedPool::<Slot>::new(IdSchema::new(14, 16).unwrap());
                let node = pool.new_node().unwrap();
                for _ in 0..count {
                    black_box(
                        node.insert_with(|id| Arc::new(Slot(AtomicU32::new(id))))
                            .unwrap(),
                    );
                }
                pool.size()
            });
        });
    }

    group.finish();
}

/// Benchmark: Free and reallocate through the id stack.
fn bench_recycle(c: &mut Criterion) {
    let pool = ChunkedPool::<Slot>::new(IdSchema::new(14, 16).unwrap());
    let node = pool.new_node().unwrap();
    let slots: Vec<_> = (0..50_000)
        .map(|_| {
            node.insert_with(|id| Arc::new(Slot(AtomicU32::new(id))))
                .unwrap()
        })
        .collect();

    c.bench_function("pool_recycle_16k", |b| {
        b.iter(|| {
            for slot in &slots[..16_384] {
                node.free_entry(slot);
            }
            for slot in &slots[..16_384] {
                let id = node.next_id().unwrap();
                slot.set_id(id);
                node.register(id, Arc::clone(slot));
            }
        });
    });
}

/// Benchmark: Push/pop on the free-id stack.
fn bench_int_stack(c: &mut Criterion) {
    let stack = IntStack::new(1 << 14);
    c.bench_function("int_stack_push_pop_16k", |b| {
        b.iter(|| {
            for i in 0..16_384 {
                stack.push(i);
            }
            while let Some(id) = stack.pop() {
                black_box(id);
            }
        });
    });
}

/// Benchmark: Type index lookups.
fn bench_class_index(c: &mut Criterion) {
    let index: ClassIndex = ClassIndex::new();
    index.add_class::<Position>();
    index.add_class::<Velocity>();

    c.bench_function("class_index_lookup", |b| {
        b.iter(|| {
            black_box(index.get_index(black_box(TypeId::of::<Velocity>())))
        });
    });
}

/// Benchmark: Add then remove a component type.
fn bench_relocation(c: &mut Criterion) {
    let repository = CompositionRepository::new(StoreConfig::default()).unwrap();
    let entities: Vec<_> = (0..10_000)
        .map(|i| {
            let f = i as f32;
            let components: Vec<Arc<dyn Component>> = vec![Arc::new(Position(f, f, f))];
            repository.create_entity(components).unwrap()
        })
        .collect();

    c.bench_function("relocation_10k", |b| {
        b.iter(|| {
            for entity in &entities {
                entity.add(Velocity(0.1, 0.2, 0.3)).unwrap();
            }
            for entity in &entities {
                entity.remove_type(TypeId::of::<Velocity>()).unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_insert,
    bench_recycle,
    bench_int_stack,
    bench_class_index,
    bench_relocation,
);
criterion_main!(benches);
