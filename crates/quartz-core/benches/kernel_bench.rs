//! Criterion benchmarks for the Quartz kernel.
//!
//! Three benchmark groups:
//! - `scheduler`: 10k events over 64 ticks, scheduled and drained
//! - `dust`: settle a 32x32 conductor grid from one corner
//! - `engine`: 1000-component repeater chain run to quiescence

use criterion::{Criterion, criterion_group, criterion_main};
use quartz_core::component::Component;
use quartz_core::dust::csr::{DustCsrBuilder, DustPort};
use quartz_core::dust::propagator::{CpuDustPropagator, Source};
use quartz_core::engine::SimulationEngine;
use quartz_core::key::EventKind;
use quartz_core::network::RedstoneNetwork;
use quartz_core::scheduler::TickWheelScheduler;
use quartz_core::test_utils::*;

// ===========================================================================
// Builders
// ===========================================================================

fn fill_scheduler(count: i32) -> TickWheelScheduler {
    let mut scheduler = TickWheelScheduler::new();
    for i in 0..count {
        let tick = (i % 64) as u64;
        let event = block_event(tick, pos(i % 97, i % 13, i % 31), EventKind::ComponentEval);
        scheduler.schedule_at_tick(event, tick).unwrap();
    }
    scheduler
}

fn grid(side: i32) -> CpuDustPropagator {
    let mut builder = DustCsrBuilder::new();
    for x in 0..side {
        for z in 0..side {
            builder.add_conductor(pos(x, 0, z));
        }
    }
    builder.attach_port(DustPort::new(0, 0), pos(0, 0, 0)).unwrap();
    let graph = builder.build().unwrap();
    CpuDustPropagator::new(&graph)
}

fn repeater_chain(len: i32) -> SimulationEngine {
    let mut network = RedstoneNetwork::new();
    network.add_component(pos(0, 0, 0), Component::constant(0)).unwrap();
    for x in 1..len {
        network.add_component(pos(x, 0, 0), Component::max_input(1)).unwrap();
        network.connect(pos(x - 1, 0, 0), pos(x, 0, 0)).unwrap();
    }
    let mut engine = SimulationEngine::new(network).unwrap();
    engine.elapse(0).unwrap();
    engine
}

// ===========================================================================
// Benchmarks
// ===========================================================================

fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");
    group.bench_function("10k_events_64_ticks", |b| {
        b.iter(|| {
            let mut scheduler = fill_scheduler(10_000);
            let mut polled = 0;
            for tick in 0..64 {
                scheduler.drain_tick(tick);
                while scheduler.poll_micro().is_some() {
                    polled += 1;
                }
            }
            polled
        });
    });
    group.finish();
}

fn bench_dust(c: &mut Criterion) {
    let mut group = c.benchmark_group("dust");
    let mut propagator = grid(32);
    let corner = propagator.graph().node_for_port(DustPort::new(0, 0)).unwrap();
    group.bench_function("32x32_grid_toggle", |b| {
        b.iter(|| {
            propagator.propagate(&[Source::new(corner, 15)]).unwrap();
            propagator.propagate(&[Source::new(corner, 0)]).unwrap();
        });
    });
    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    group.bench_function("1000_repeater_chain", |b| {
        b.iter(|| {
            let mut engine = repeater_chain(1000);
            engine.network_mut().set_source_output(pos(0, 0, 0), 15).unwrap();
            engine.mark_dirty(pos(0, 0, 0)).unwrap();
            engine.elapse(1000).unwrap().changes.len()
        });
    });
    group.finish();
}

criterion_group!(benches, bench_scheduler, bench_dust, bench_engine);
criterion_main!(benches);
