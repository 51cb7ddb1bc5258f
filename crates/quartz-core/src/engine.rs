//! Tick-stepped simulation of a [`RedstoneNetwork`].
//!
//! Every pending evaluation is a `ComponentEval` event on a
//! [`TickWheelScheduler`]. Within a tick, events run in key order (position
//! order, then insertion order), so a zero-delay chain settles inside the
//! tick that started it while delayed components wait for their own tick.

use tracing::{debug, trace};

use crate::component::EvaluationContext;
use crate::config::SchedulerConfig;
use crate::event::ScheduledEvent;
use crate::key::{EventKind, OrderingKey};
use crate::network::{NetworkError, RedstoneNetwork};
use crate::pos::Position;
use crate::power::{MIN_POWER, PowerLevel, Ticks, clamp_power};
use crate::scheduler::TickWheelScheduler;
use crate::sim::{ElapseResult, StateChange, StateHash};

/// Evaluation view over the network. Unknown positions read as unpowered.
struct NetworkView<'a>(&'a RedstoneNetwork);

impl EvaluationContext for NetworkView<'_> {
    fn power_at(&self, pos: Position) -> PowerLevel {
        self.0.get(pos).map_or(MIN_POWER, |node| node.power)
    }

    fn inputs_of(&self, pos: Position) -> Vec<Position> {
        self.0
            .get(pos)
            .map(|node| node.inputs.iter().copied().collect())
            .unwrap_or_default()
    }
}

pub struct SimulationEngine {
    network: RedstoneNetwork,
    scheduler: TickWheelScheduler,
    current_tick: Ticks,
}

impl SimulationEngine {
    /// Take ownership of `network` and queue every component for tick 0.
    pub fn new(network: RedstoneNetwork) -> Result<Self, NetworkError> {
        Self::with_scheduler(network, TickWheelScheduler::new())
    }

    pub fn with_config(network: RedstoneNetwork, config: &SchedulerConfig) -> Result<Self, NetworkError> {
        let scheduler = TickWheelScheduler::with_capacity(config.wheel_size, config.micro_capacity)?;
        Self::with_scheduler(network, scheduler)
    }

    fn with_scheduler(
        network: RedstoneNetwork,
        scheduler: TickWheelScheduler,
    ) -> Result<Self, NetworkError> {
        let mut engine = Self {
            network,
            scheduler,
            current_tick: 0,
        };
        let positions: Vec<Position> = engine.network.positions().collect();
        for pos in positions {
            engine.enqueue(pos, 0)?;
        }
        Ok(engine)
    }

    pub fn current_tick(&self) -> Ticks {
        self.current_tick
    }

    pub fn network(&self) -> &RedstoneNetwork {
        &self.network
    }

    /// Mutable access for editing sources or topology between elapses.
    /// Call [`Self::mark_dirty`] for anything that should re-evaluate.
    pub fn network_mut(&mut self) -> &mut RedstoneNetwork {
        &mut self.network
    }

    /// Evaluations still queued.
    pub fn pending(&self) -> usize {
        self.scheduler.len()
    }

    pub fn scheduler(&self) -> &TickWheelScheduler {
        &self.scheduler
    }

    /// Re-evaluate `pos` after its own propagation delay.
    pub fn mark_dirty(&mut self, pos: Position) -> Result<(), NetworkError> {
        self.mark_dirty_after(pos, 0)
    }

    /// Re-evaluate `pos` after `extra` ticks plus its propagation delay.
    pub fn mark_dirty_after(&mut self, pos: Position, extra: Ticks) -> Result<(), NetworkError> {
        let delay = self.network.component(pos)?.propagation_delay();
        self.enqueue(pos, self.current_tick + extra + delay)
    }

    /// Run every evaluation due from the current tick through
    /// `current + ticks` inclusive, then move the clock to that tick. Ticks
    /// with nothing due are skipped.
    pub fn elapse(&mut self, ticks: Ticks) -> Result<ElapseResult, NetworkError> {
        let start_tick = self.current_tick;
        let end_tick = start_tick + ticks;
        let mut changes = Vec::new();

        let mut tick = start_tick;
        loop {
            self.scheduler.drain_tick(tick);
            let before = changes.len();
            while let Some(event) = self.scheduler.poll_micro() {
                self.evaluate(event.pos(), tick, &mut changes)?;
            }
            if changes.len() > before {
                trace!(tick, changes = changes.len() - before, "tick settled");
            }
            if tick == end_tick {
                break;
            }
            match self.scheduler.next_wheel_tick() {
                Some(next) if next <= end_tick => tick = next.max(tick + 1),
                _ => break,
            }
        }

        self.current_tick = end_tick;
        debug!(start_tick, end_tick, changes = changes.len(), "elapse");
        Ok(ElapseResult {
            start_tick,
            end_tick,
            changes,
        })
    }

    /// Hash of every position and its output, in canonical order.
    pub fn state_hash(&self) -> u64 {
        let mut hash = StateHash::new();
        hash.write_u64(self.current_tick);
        for (pos, node) in self.network.iter() {
            hash.write_position(*pos);
            hash.write(&[node.power]);
        }
        hash.finish()
    }

    fn evaluate(
        &mut self,
        pos: Position,
        tick: Ticks,
        changes: &mut Vec<StateChange>,
    ) -> Result<(), NetworkError> {
        let Some(node) = self.network.get(pos) else {
            return Ok(());
        };
        let computed = clamp_power(node.component.evaluate(pos, &NetworkView(&self.network)));
        let previous = node.power;
        if computed == previous {
            return Ok(());
        }

        let outputs: Vec<Position> = node.outputs.iter().copied().collect();
        if let Some(node) = self.network.get_mut(pos) {
            node.power = computed;
        }
        changes.push(StateChange {
            tick,
            position: pos,
            previous,
            new: computed,
        });

        for target in outputs {
            let Some(target_node) = self.network.get(target) else {
                continue;
            };
            let due = tick + target_node.component.propagation_delay();
            self.enqueue(target, due)?;
        }
        Ok(())
    }

    fn enqueue(&mut self, pos: Position, tick: Ticks) -> Result<(), NetworkError> {
        let key = OrderingKey::for_block(tick, 0, 0, pos, EventKind::ComponentEval)?;
        let event = ScheduledEvent::new(key, EventKind::ComponentEval, pos, 0);
        self.scheduler.schedule_at_tick(event, tick)?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
