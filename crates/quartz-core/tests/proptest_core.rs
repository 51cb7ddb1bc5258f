//! Property-based tests for the Quartz core kernel.
//!
//! Uses proptest to generate random keys, event sets, overlay edits and
//! conductor networks, then verify ordering, atomicity and fixed-point
//! invariants hold.

use std::collections::BTreeMap;

use proptest::prelude::*;
use quartz_core::dust::csr::{DustCsrBuilder, DustPort};
use quartz_core::dust::propagator::{CpuDustPropagator, Source};
use quartz_core::id::NodeId;
use quartz_core::key::{EventKind, OrderingKey};
use quartz_core::pos::Position;
use quartz_core::scheduler::TickWheelScheduler;
use quartz_core::shadow::ShadowOverlay;
use quartz_core::test_utils::*;

// ===========================================================================
// Generators
// ===========================================================================

fn arb_pos() -> impl Strategy<Value = Position> {
    (-64..64i32, -64..320i32, -64..64i32).prop_map(|(x, y, z)| Position::new(x, y, z))
}

fn arb_kind() -> impl Strategy<Value = EventKind> {
    (0..EventKind::ALL.len()).prop_map(|i| EventKind::ALL[i])
}

/// Events as `(tick, pos, kind)` on a small grid so collisions happen.
fn arb_events(max: usize) -> impl Strategy<Value = Vec<(u64, Position, EventKind)>> {
    proptest::collection::vec(
        (0..24u64, 0..4i32, 0..3i32, 0..4i32, arb_kind())
            .prop_map(|(t, x, y, z, k)| (t, Position::new(x, y, z), k)),
        1..=max,
    )
}

/// Run ticks `0..=last` and record what comes out, in order.
fn run_scheduler(events: &[(u64, Position, EventKind)], last: u64) -> Vec<(u64, Position, EventKind)> {
    let mut scheduler = TickWheelScheduler::with_wheel_size(8).unwrap();
    for &(tick, p, kind) in events {
        scheduler.schedule_at_tick(block_event(tick, p, kind), tick).unwrap();
    }
    let mut out = Vec::new();
    for tick in 0..=last {
        scheduler.drain_tick(tick);
        while let Some(event) = scheduler.poll_micro() {
            out.push((event.key().tick(), event.pos(), event.kind()));
        }
    }
    out
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Keys in one tick, phase and region order by position, then kind.
    #[test]
    fn key_order_is_position_then_kind(
        a in arb_pos(), ka in arb_kind(), b in arb_pos(), kb in arb_kind()
    ) {
        let key_a = OrderingKey::for_block(7, 0, 0, a, ka).unwrap();
        let key_b = OrderingKey::for_block(7, 0, 0, b, kb).unwrap();
        prop_assert_eq!(key_a.cmp(&key_b), (a, ka).cmp(&(b, kb)));
        prop_assert_eq!(key_a.cmp(&key_b), key_b.cmp(&key_a).reverse());
    }

    /// Insertion order never changes what the scheduler emits.
    #[test]
    fn scheduler_output_ignores_insertion_order(
        (events, shuffled) in arb_events(60)
            .prop_flat_map(|evs| (Just(evs.clone()), Just(evs).prop_shuffle()))
    ) {
        let a = run_scheduler(&events, 24);
        let b = run_scheduler(&shuffled, 24);
        prop_assert_eq!(a.len(), events.len());
        prop_assert_eq!(&a, &b);
        prop_assert!(a.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    /// A failing commit leaves every position at its seeded value; a clean
    /// one leaves the last value written.
    #[test]
    fn overlay_commit_is_atomic(
        seeds in proptest::collection::vec((arb_pos(), 0..4u32), 0..10),
        edits in proptest::collection::vec((arb_pos(), 0..4u32), 1..20),
        fail in any::<prop::sample::Index>(),
        should_fail in any::<bool>(),
    ) {
        let mut store = RecordingStore::new();
        for &(p, v) in &seeds {
            store.seed(p, v);
        }
        let before: BTreeMap<Position, u32> = edits
            .iter()
            .chain(&seeds)
            .map(|&(p, _)| (p, store.value(p)))
            .collect();

        // Dry run to learn how many writes survive pruning.
        let staged = {
            let mut overlay = ShadowOverlay::new(&mut store);
            for &(p, v) in &edits {
                overlay.set(p, v, None);
            }
            overlay.staged_len()
        };

        let mut expected_after = before.clone();
        for &(p, v) in &edits {
            expected_after.insert(p, v);
        }

        if should_fail && staged > 0 {
            store.fail_on_write(fail.index(staged) + 1);
        }
        let outcome = {
            let mut overlay = ShadowOverlay::new(&mut store);
            for &(p, v) in &edits {
                overlay.set(p, v, None);
            }
            let outcome = overlay.commit();
            prop_assert!(overlay.is_empty());
            outcome
        };

        let expected = if outcome.is_ok() { &expected_after } else { &before };
        prop_assert_eq!(outcome.is_err(), should_fail && staged > 0);
        for (p, v) in expected {
            prop_assert_eq!(store.value(*p), *v);
        }
    }

    /// Settling matches the closed form on a straight line, and applying the
    /// same batch twice changes nothing the second time.
    #[test]
    fn dust_settle_is_exact_and_idempotent(
        len in 2..24i32,
        sources in proptest::collection::vec((any::<prop::sample::Index>(), 0..=15u8), 1..6),
    ) {
        let mut builder = DustCsrBuilder::new();
        builder.add_conductors(line_of(len));
        for x in 0..len {
            builder.attach_port(DustPort::new(x as u32, 0), pos(x, 0, 0)).unwrap();
        }
        let graph = builder.build().unwrap();
        prop_assert_eq!(graph.node_count(), len as usize);

        let batch: Vec<Source> = sources
            .iter()
            .map(|(i, level)| {
                let x = i.index(len as usize) as i32;
                Source::new(graph.node_for_position(pos(x, 0, 0)).unwrap(), *level)
            })
            .collect();

        let mut final_levels: BTreeMap<NodeId, u8> = BTreeMap::new();
        for s in &batch {
            final_levels.insert(s.node, s.level);
        }

        let mut propagator = CpuDustPropagator::new(&graph);
        propagator.propagate(&batch).unwrap();
        for x in 0..len {
            let node = graph.node_for_position(pos(x, 0, 0)).unwrap();
            let expected = final_levels
                .iter()
                .map(|(n, level)| {
                    let sx = graph.node_position(*n).unwrap().x;
                    (*level as i32 - (x - sx).abs()).max(0)
                })
                .max()
                .unwrap_or(0);
            prop_assert_eq!(propagator.power_level(node).unwrap() as i32, expected);
        }

        let again = propagator.propagate(&batch).unwrap();
        prop_assert!(again.is_empty());
    }
}
