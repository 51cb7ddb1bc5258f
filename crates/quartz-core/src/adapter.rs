//! Deterministic wrappers around component behaviour.
//!
//! A [`ComponentAdapter`] runs component logic against a [`ComponentContext`]
//! so every read and write goes through the shadow overlay. Container reads
//! are memoised per pass, observer pulses are coalesced per tick, and mover
//! transactions are applied in canonical order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::event::ScheduledEvent;
use crate::key::{EventKind, KeyError, OrderingKey};
use crate::pos::Position;
use crate::power::{PowerLevel, Ticks};
use crate::router::TickRouter;
use crate::scheduler::{SchedulerError, TickWheelScheduler};
use crate::shadow::{ShadowError, ShadowView};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("mover transaction lists source {0} twice")]
    DuplicateMoveSource(Position),
    #[error("mover transaction lists destination {0} twice")]
    DuplicateMoveDestination(Position),
    #[error("{variant} adapter cannot be invoked through {call}")]
    NotApplicable {
        variant: &'static str,
        call: &'static str,
    },
    #[error("component at {pos} failed: {reason}")]
    Component { pos: Position, reason: String },
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Shadow(#[from] ShadowError),
}

impl AdapterError {
    pub fn component(pos: Position, reason: impl Into<String>) -> Self {
        Self::Component {
            pos,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Container snapshots
// ---------------------------------------------------------------------------

/// Memoises container signal reads until cleared. The first read of a
/// position wins for the rest of the pass.
#[derive(Debug, Clone, Default)]
pub struct ContainerSnapshotRegistry {
    snapshots: BTreeMap<Position, PowerLevel>,
}

impl ContainerSnapshotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached signal for `pos`, calling `reader` only on the first request.
    pub fn snapshot(&mut self, pos: Position, reader: impl FnOnce() -> PowerLevel) -> PowerLevel {
        *self.snapshots.entry(pos).or_insert_with(reader)
    }

    pub fn cached(&self, pos: Position) -> Option<PowerLevel> {
        self.snapshots.get(&pos).copied()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}

// ---------------------------------------------------------------------------
// Observer pulses
// ---------------------------------------------------------------------------

/// Allows at most one pulse per `(observer, source)` pair per tick.
#[derive(Debug, Clone, Default)]
pub struct ObserverPulseTracker {
    tick: Option<Ticks>,
    emitted: BTreeSet<(Position, Position)>,
}

impl ObserverPulseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time a pair is seen in `tick`. Moving to a different
    /// tick forgets everything recorded for the previous one.
    pub fn should_emit(&mut self, tick: Ticks, observer: Position, source: Position) -> bool {
        if self.tick != Some(tick) {
            self.tick = Some(tick);
            self.emitted.clear();
        }
        self.emitted.insert((observer, source))
    }

    pub fn reset(&mut self) {
        self.tick = None;
        self.emitted.clear();
    }
}

// ---------------------------------------------------------------------------
// Context and world access
// ---------------------------------------------------------------------------

/// Everything an adapter may touch while one event runs.
pub struct ComponentContext<'c, P = ()> {
    shadow: &'c mut dyn ShadowView,
    snapshots: &'c mut ContainerSnapshotRegistry,
    pulses: &'c mut ObserverPulseTracker,
    scheduler: &'c mut TickWheelScheduler<P>,
    router: TickRouter,
    tick: Ticks,
}

impl<'c, P> ComponentContext<'c, P> {
    pub fn new(
        shadow: &'c mut dyn ShadowView,
        snapshots: &'c mut ContainerSnapshotRegistry,
        pulses: &'c mut ObserverPulseTracker,
        scheduler: &'c mut TickWheelScheduler<P>,
        router: TickRouter,
        tick: Ticks,
    ) -> Self {
        Self {
            shadow,
            snapshots,
            pulses,
            scheduler,
            router,
            tick,
        }
    }

    pub fn tick(&self) -> Ticks {
        self.tick
    }

    pub fn shadow(&mut self) -> &mut dyn ShadowView {
        &mut *self.shadow
    }

    pub fn snapshots(&self) -> &ContainerSnapshotRegistry {
        &*self.snapshots
    }

    pub fn pulses(&mut self) -> &mut ObserverPulseTracker {
        &mut *self.pulses
    }

    /// World facade whose neighbour notifications default to `invoker`.
    pub fn world(&mut self, invoker: Position) -> WorldAccess<'_> {
        WorldAccess {
            shadow: &mut *self.shadow,
            snapshots: &mut *self.snapshots,
            default_source: invoker,
        }
    }

    /// Queue more work in the current tick. It runs in this pass, ordered by
    /// its key among whatever is still pending.
    pub fn schedule_now(
        &mut self,
        pos: Position,
        kind: EventKind,
        priority: i32,
        aux: i32,
    ) -> Result<OrderingKey, AdapterError> {
        let key = self.router.key_for(self.tick, pos, kind, priority)?;
        let event = ScheduledEvent::new(key, kind, pos, aux);
        self.scheduler.schedule_micro(event, key.micro())?;
        Ok(key)
    }
}

/// Per-invocation world facade handed to component logic.
pub struct WorldAccess<'a> {
    shadow: &'a mut dyn ShadowView,
    snapshots: &'a mut ContainerSnapshotRegistry,
    default_source: Position,
}

impl WorldAccess<'_> {
    pub fn get(&self, pos: Position) -> u32 {
        self.shadow.get(pos)
    }

    pub fn get_aux(&self, pos: Position) -> Option<Vec<u8>> {
        self.shadow.get_aux(pos)
    }

    pub fn set(&mut self, pos: Position, value: u32) {
        self.shadow.set(pos, value, None);
    }

    pub fn set_with_aux(&mut self, pos: Position, value: u32, aux: Vec<u8>) {
        self.shadow.set(pos, value, Some(aux));
    }

    /// Request a block tick `delay` ticks after this pass commits. A
    /// negative delay is rejected here.
    pub fn schedule_tick(
        &mut self,
        pos: Position,
        delay: i64,
        priority: i32,
    ) -> Result<(), AdapterError> {
        self.shadow.schedule_tick(pos, delay, priority)?;
        Ok(())
    }

    pub fn mark_neighbor_changed(&mut self, pos: Position) {
        self.shadow.mark_neighbor_changed(pos, self.default_source);
    }

    pub fn mark_neighbor_changed_from(&mut self, pos: Position, source: Position) {
        self.shadow.mark_neighbor_changed(pos, source);
    }

    /// Container signal at `pos`, memoised for the rest of the pass.
    pub fn read_signal(&mut self, pos: Position) -> PowerLevel {
        let shadow = &*self.shadow;
        self.snapshots.snapshot(pos, || shadow.read_signal(pos))
    }

    pub fn invoker(&self) -> Position {
        self.default_source
    }
}

// ---------------------------------------------------------------------------
// Mover transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub from: Position,
    pub to: Position,
    pub value: u32,
}

impl Move {
    pub fn new(from: Position, to: Position, value: u32) -> Self {
        Self { from, to, value }
    }
}

/// Block moves plus positions that must hear about them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveTransaction {
    pub moves: Vec<Move>,
    pub extra_neighbors: Vec<Position>,
}

impl MoveTransaction {
    pub fn new(moves: Vec<Move>) -> Self {
        Self {
            moves,
            extra_neighbors: Vec::new(),
        }
    }

    pub fn with_neighbors(mut self, neighbors: impl IntoIterator<Item = Position>) -> Self {
        self.extra_neighbors.extend(neighbors);
        self
    }

    /// Moves sorted by source, rejecting any repeated source or destination.
    fn ordered(&self) -> Result<Vec<Move>, AdapterError> {
        let mut moves = self.moves.clone();
        moves.sort_by(|a, b| a.from.cmp(&b.from));

        let mut seen_from = BTreeSet::new();
        let mut seen_to = BTreeSet::new();
        for mv in &moves {
            if !seen_from.insert(mv.from) {
                return Err(AdapterError::DuplicateMoveSource(mv.from));
            }
            if !seen_to.insert(mv.to) {
                return Err(AdapterError::DuplicateMoveDestination(mv.to));
            }
        }
        Ok(moves)
    }
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

pub type LogicFn = dyn Fn(&mut WorldAccess<'_>, Position, i32) -> Result<(), AdapterError>;
pub type LocatorFn = dyn Fn(Position, i32) -> Vec<Position>;
pub type ObserverFn =
    dyn Fn(&mut WorldAccess<'_>, Position, Position, u32, u32) -> Result<(), AdapterError>;
pub type MoverFn =
    dyn Fn(&mut WorldAccess<'_>, Position, i32) -> Result<MoveTransaction, AdapterError>;

pub enum ComponentAdapter {
    /// Torches, repeaters and other plain stateful components.
    Standard(Box<LogicFn>),
    /// Comparator-style components that read container signals. The located
    /// positions are snapshotted before the logic runs.
    Snapshotting {
        logic: Box<LogicFn>,
        locator: Box<LocatorFn>,
    },
    /// Observer-style components, invoked through
    /// [`ComponentAdapter::apply_pulse`].
    Pulse(Box<ObserverFn>),
    /// Piston-style components that emit a [`MoveTransaction`].
    Mover(Box<MoverFn>),
}

impl ComponentAdapter {
    pub fn standard<F>(logic: F) -> Self
    where
        F: Fn(&mut WorldAccess<'_>, Position, i32) -> Result<(), AdapterError> + 'static,
    {
        Self::Standard(Box::new(logic))
    }

    pub fn snapshotting<F, L>(logic: F, locator: L) -> Self
    where
        F: Fn(&mut WorldAccess<'_>, Position, i32) -> Result<(), AdapterError> + 'static,
        L: Fn(Position, i32) -> Vec<Position> + 'static,
    {
        Self::Snapshotting {
            logic: Box::new(logic),
            locator: Box::new(locator),
        }
    }

    pub fn pulse<F>(logic: F) -> Self
    where
        F: Fn(&mut WorldAccess<'_>, Position, Position, u32, u32) -> Result<(), AdapterError>
            + 'static,
    {
        Self::Pulse(Box::new(logic))
    }

    pub fn mover<F>(logic: F) -> Self
    where
        F: Fn(&mut WorldAccess<'_>, Position, i32) -> Result<MoveTransaction, AdapterError>
            + 'static,
    {
        Self::Mover(Box::new(logic))
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Standard(_) => "standard",
            Self::Snapshotting { .. } => "snapshotting",
            Self::Pulse(_) => "pulse",
            Self::Mover(_) => "mover",
        }
    }

    /// Run the component at `pos` with its auxiliary state.
    pub fn apply<P>(
        &self,
        ctx: &mut ComponentContext<'_, P>,
        pos: Position,
        state: i32,
    ) -> Result<(), AdapterError> {
        match self {
            Self::Standard(logic) => logic(&mut ctx.world(pos), pos, state),
            Self::Snapshotting { logic, locator } => {
                let mut world = ctx.world(pos);
                for located in locator(pos, state) {
                    world.read_signal(located);
                }
                logic(&mut world, pos, state)
            }
            Self::Pulse(_) => Err(AdapterError::NotApplicable {
                variant: self.variant_name(),
                call: "apply",
            }),
            Self::Mover(logic) => {
                let mut world = ctx.world(pos);
                let txn = logic(&mut world, pos, state)?;
                apply_moves(&mut world, pos, &txn)
            }
        }
    }

    /// Report that `observed` changed from `old` to `new`. Returns whether the
    /// observer logic actually ran.
    pub fn apply_pulse<P>(
        &self,
        ctx: &mut ComponentContext<'_, P>,
        observer: Position,
        observed: Position,
        old: u32,
        new: u32,
    ) -> Result<bool, AdapterError> {
        let Self::Pulse(logic) = self else {
            return Err(AdapterError::NotApplicable {
                variant: self.variant_name(),
                call: "apply_pulse",
            });
        };
        if old == new {
            return Ok(false);
        }
        let tick = ctx.tick();
        if !ctx.pulses().should_emit(tick, observer, observed) {
            return Ok(false);
        }
        logic(&mut ctx.world(observer), observer, observed, old, new)?;
        Ok(true)
    }
}

impl fmt::Debug for ComponentAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentAdapter")
            .field(&self.variant_name())
            .finish()
    }
}

/// Validate, clear every source, write every destination, then notify the
/// touched positions in canonical order.
fn apply_moves(
    world: &mut WorldAccess<'_>,
    mover: Position,
    txn: &MoveTransaction,
) -> Result<(), AdapterError> {
    let moves = txn.ordered()?;
    for mv in &moves {
        world.set(mv.from, 0);
    }
    for mv in &moves {
        world.set(mv.to, mv.value);
    }

    let touched: BTreeSet<Position> = moves
        .iter()
        .flat_map(|mv| [mv.from, mv.to])
        .chain(txn.extra_neighbors.iter().copied())
        .collect();
    for pos in touched {
        world.mark_neighbor_changed_from(pos, mover);
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
