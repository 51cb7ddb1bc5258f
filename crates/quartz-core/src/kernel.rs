//! One deterministic pass per tick over the event scheduler.
//!
//! [`Kernel::step`] drains the current tick, runs each event through a
//! caller-supplied handler against a fresh [`ShadowOverlay`], commits the
//! overlay, and routes the tick requests it carried back into the scheduler.
//! A failed pass leaves the store and the tick untouched.

use tracing::{debug, warn};

use crate::adapter::{AdapterError, ComponentContext, ContainerSnapshotRegistry, ObserverPulseTracker};
use crate::config::{ConfigError, KernelConfig};
use crate::dust::DustError;
use crate::event::ScheduledEvent;
use crate::key::{EventKind, KeyError, OrderingKey};
use crate::network::NetworkError;
use crate::pos::Position;
use crate::power::Ticks;
use crate::router::{RouteError, TickRouter};
use crate::scheduler::{SchedulerError, TickWheelScheduler};
use crate::shadow::{BackingStore, ShadowCommitStats, ShadowError, ShadowOverlay};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Shadow(#[from] ShadowError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Dust(#[from] DustError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Outcome of one successful [`Kernel::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub tick: Ticks,
    pub events_run: usize,
    /// Tick requests routed back into the scheduler after the commit.
    pub routed: usize,
    pub commit: ShadowCommitStats,
}

pub struct Kernel<P = ()> {
    scheduler: TickWheelScheduler<P>,
    router: TickRouter,
    snapshots: ContainerSnapshotRegistry,
    pulses: ObserverPulseTracker,
    tick: Ticks,
}

impl<P> Kernel<P> {
    pub fn new(config: &KernelConfig) -> Result<Self, KernelError> {
        config.validate()?;
        Ok(Self {
            scheduler: TickWheelScheduler::with_capacity(
                config.scheduler.wheel_size,
                config.scheduler.micro_capacity,
            )?,
            router: TickRouter::new(&config.router),
            snapshots: ContainerSnapshotRegistry::new(),
            pulses: ObserverPulseTracker::new(),
            tick: 0,
        })
    }

    /// The tick the next [`Kernel::step`] will run.
    pub fn tick(&self) -> Ticks {
        self.tick
    }

    pub fn scheduler(&self) -> &TickWheelScheduler<P> {
        &self.scheduler
    }

    pub fn router(&self) -> &TickRouter {
        &self.router
    }

    pub fn snapshots(&self) -> &ContainerSnapshotRegistry {
        &self.snapshots
    }

    /// Queue `kind` at `pos`, `delay` ticks from the current tick. The micro
    /// phase comes from `priority`.
    pub fn schedule(
        &mut self,
        pos: Position,
        kind: EventKind,
        delay: Ticks,
        priority: i32,
        aux: i32,
    ) -> Result<OrderingKey, KernelError> {
        let event = self.event_for(pos, kind, delay, priority, aux)?;
        let key = *event.key();
        self.scheduler.schedule_at_tick(event, key.tick())?;
        Ok(key)
    }

    pub fn schedule_with_payload(
        &mut self,
        pos: Position,
        kind: EventKind,
        delay: Ticks,
        priority: i32,
        payload: P,
    ) -> Result<OrderingKey, KernelError> {
        let event = self.event_for(pos, kind, delay, priority, 0)?.with_payload(payload);
        let key = *event.key();
        self.scheduler.schedule_at_tick(event, key.tick())?;
        Ok(key)
    }

    /// Drop pending `kind` work at `pos`. Returns how many events went.
    pub fn cancel(&mut self, pos: Position, kind: EventKind) -> usize {
        self.scheduler.cancel_at(pos, kind)
    }

    fn event_for(
        &self,
        pos: Position,
        kind: EventKind,
        delay: Ticks,
        priority: i32,
        aux: i32,
    ) -> Result<ScheduledEvent<P>, KernelError> {
        let key = self.router.key_for(self.tick + delay, pos, kind, priority)?;
        Ok(ScheduledEvent::new(key, kind, pos, aux))
    }
}

impl<P: Clone> Kernel<P> {
    /// Run the current tick against `store`.
    ///
    /// `handler` sees each event in key order together with a context over
    /// this pass's overlay. On a handler or commit error the overlay is
    /// discarded, the tick does not advance, and events not yet run stay
    /// queued.
    pub fn step<S, F>(&mut self, store: &mut S, mut handler: F) -> Result<StepReport, KernelError>
    where
        S: BackingStore + ?Sized,
        F: FnMut(&ScheduledEvent<P>, &mut ComponentContext<'_, P>) -> Result<(), KernelError>,
    {
        let tick = self.tick;
        self.scheduler.drain_tick(tick);

        let mut overlay = ShadowOverlay::new(store);
        let mut events_run = 0;
        while let Some(event) = self.scheduler.poll_micro() {
            let mut ctx = ComponentContext::new(
                &mut overlay,
                &mut self.snapshots,
                &mut self.pulses,
                &mut self.scheduler,
                self.router,
                tick,
            );
            if let Err(err) = handler(&event, &mut ctx) {
                warn!(tick, pos = %event.pos(), kind = ?event.kind(), error = %err, "handler failed, pass discarded");
                overlay.clear();
                return Err(err);
            }
            events_run += 1;
        }

        let requests = overlay.scheduled_ticks().to_vec();
        let commit = overlay.commit()?;
        for request in &requests {
            self.router.route(
                &mut self.scheduler,
                tick,
                request.pos,
                request.delay,
                request.priority,
            )?;
        }

        self.snapshots.clear();
        self.tick += 1;
        debug!(tick, events_run, routed = requests.len(), applied = commit.applied, "kernel step");
        Ok(StepReport {
            tick,
            events_run,
            routed: requests.len(),
            commit,
        })
    }

    /// Step `ticks` times, stopping at the first error.
    pub fn run_for<S, F>(
        &mut self,
        ticks: Ticks,
        store: &mut S,
        mut handler: F,
    ) -> Result<Vec<StepReport>, KernelError>
    where
        S: BackingStore + ?Sized,
        F: FnMut(&ScheduledEvent<P>, &mut ComponentContext<'_, P>) -> Result<(), KernelError>,
    {
        let mut reports = Vec::with_capacity(ticks as usize);
        for _ in 0..ticks {
            reports.push(self.step(store, &mut handler)?);
        }
        Ok(reports)
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self {
            scheduler: TickWheelScheduler::new(),
            router: TickRouter::default(),
            snapshots: ContainerSnapshotRegistry::new(),
            pulses: ObserverPulseTracker::new(),
            tick: 0,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
