//! Two-level deterministic scheduler.
//!
//! Coarse level: a hashed timing wheel of `wheel_size` buckets (a power of
//! two) indexed by `tick & (wheel_size - 1)`. Ticks beyond the wheel reuse
//! slots; every drain re-checks the exact tick so a wrapped entry never fires
//! early.
//!
//! Fine level: a binary min-heap ordered by [`OrderingKey`] and then by an
//! insertion sequence number, holding the work of the tick being drained.
//!
//! Once a tick has been drained it becomes the active tick. Scheduling onto
//! the active tick goes straight to the heap and runs in the same pass;
//! scheduling before it is an ordering violation.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, VecDeque};

use tracing::trace;

use crate::event::ScheduledEvent;
use crate::key::{EventKind, OrderingKey};
use crate::pos::Position;
use crate::power::Ticks;
use crate::profiling::{SchedulerMetrics, SchedulerOp};

pub const DEFAULT_WHEEL_SIZE: usize = 4096;
pub const DEFAULT_MICRO_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("wheel size {0} is not a positive power of two")]
    InvalidWheelSize(usize),
    #[error("event key tick {key_tick} does not match due tick {tick_due}")]
    TickMismatch { key_tick: Ticks, tick_due: Ticks },
    #[error("event key micro phase {key_micro} does not match due phase {micro_due}")]
    MicroMismatch { key_micro: u8, micro_due: u8 },
    #[error("cannot schedule at tick {tick}: tick {active} is already being processed")]
    TickInPast { tick: Ticks, active: Ticks },
}

// ---------------------------------------------------------------------------
// Heap entry
// ---------------------------------------------------------------------------

/// An event plus its insertion sequence. Ordered by `(key, seq)` only; the
/// payload never participates in comparison.
#[derive(Debug, Clone)]
struct Entry<P> {
    seq: u64,
    event: ScheduledEvent<P>,
}

impl<P> PartialEq for Entry<P> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq && self.event.key() == other.event.key()
    }
}

impl<P> Eq for Entry<P> {}

impl<P> Ord for Entry<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.event
            .key()
            .cmp(other.event.key())
            .then(self.seq.cmp(&other.seq))
    }
}

impl<P> PartialOrd for Entry<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// TickWheelScheduler
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TickWheelScheduler<P = ()> {
    wheel: Vec<VecDeque<Entry<P>>>,
    mask: u64,
    micro: BinaryHeap<Reverse<Entry<P>>>,
    next_seq: u64,
    wheel_len: usize,
    /// Wheel entries per due tick, for jumping over empty ticks.
    due: BTreeMap<Ticks, usize>,
    active_tick: Option<Ticks>,
    metrics: SchedulerMetrics,
}

impl<P> TickWheelScheduler<P> {
    pub fn new() -> Self {
        Self::build(DEFAULT_WHEEL_SIZE, DEFAULT_MICRO_CAPACITY)
    }

    /// Scheduler with a custom wheel size, which must be a power of two.
    pub fn with_wheel_size(wheel_size: usize) -> Result<Self, SchedulerError> {
        Self::with_capacity(wheel_size, DEFAULT_MICRO_CAPACITY)
    }

    pub fn with_capacity(wheel_size: usize, micro_capacity: usize) -> Result<Self, SchedulerError> {
        if wheel_size == 0 || !wheel_size.is_power_of_two() {
            return Err(SchedulerError::InvalidWheelSize(wheel_size));
        }
        Ok(Self::build(wheel_size, micro_capacity))
    }

    fn build(wheel_size: usize, micro_capacity: usize) -> Self {
        Self {
            wheel: (0..wheel_size).map(|_| VecDeque::new()).collect(),
            mask: wheel_size as u64 - 1,
            micro: BinaryHeap::with_capacity(micro_capacity),
            next_seq: 0,
            wheel_len: 0,
            due: BTreeMap::new(),
            active_tick: None,
            metrics: SchedulerMetrics::new(),
        }
    }

    pub fn wheel_size(&self) -> usize {
        self.wheel.len()
    }

    /// The most recently drained tick, if any.
    pub fn active_tick(&self) -> Option<Ticks> {
        self.active_tick
    }

    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    pub fn wheel_len(&self) -> usize {
        self.wheel_len
    }

    pub fn micro_len(&self) -> usize {
        self.micro.len()
    }

    pub fn len(&self) -> usize {
        self.wheel_len + self.micro.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Earliest tick that still has entries waiting in the wheel.
    pub fn next_wheel_tick(&self) -> Option<Ticks> {
        self.due.keys().next().copied()
    }

    /// Place `event` in the wheel bucket for `tick_due`.
    ///
    /// The event's key must carry the same tick. If `tick_due` is the active
    /// tick the event joins the micro heap directly.
    pub fn schedule_at_tick(
        &mut self,
        event: ScheduledEvent<P>,
        tick_due: Ticks,
    ) -> Result<(), SchedulerError> {
        let key_tick = event.key().tick();
        if key_tick != tick_due {
            return Err(SchedulerError::TickMismatch { key_tick, tick_due });
        }
        if let Some(active) = self.active_tick {
            if tick_due < active {
                return Err(SchedulerError::TickInPast {
                    tick: tick_due,
                    active,
                });
            }
        }

        let start = self.metrics.start_timer();
        let entry = self.entry(event);
        if self.active_tick == Some(tick_due) {
            self.micro.push(Reverse(entry));
        } else {
            let slot = self.slot(tick_due);
            self.wheel[slot].push_back(entry);
            self.wheel_len += 1;
            *self.due.entry(tick_due).or_default() += 1;
        }
        self.metrics.record(SchedulerOp::ScheduleAtTick, start);
        Ok(())
    }

    /// Insert into the micro heap after checking the key's micro phase.
    pub fn schedule_micro(
        &mut self,
        event: ScheduledEvent<P>,
        micro_due: u8,
    ) -> Result<(), SchedulerError> {
        let key_micro = event.key().micro();
        if key_micro != micro_due {
            return Err(SchedulerError::MicroMismatch {
                key_micro,
                micro_due,
            });
        }
        let start = self.metrics.start_timer();
        let entry = self.entry(event);
        self.micro.push(Reverse(entry));
        self.metrics.record(SchedulerOp::ScheduleMicro, start);
        Ok(())
    }

    /// Insert into the micro heap unconditionally.
    pub fn offer_micro(&mut self, event: ScheduledEvent<P>) {
        let start = self.metrics.start_timer();
        let entry = self.entry(event);
        self.micro.push(Reverse(entry));
        self.metrics.record(SchedulerOp::OfferMicro, start);
    }

    /// Pop the smallest pending micro event.
    pub fn poll_micro(&mut self) -> Option<ScheduledEvent<P>> {
        let start = self.metrics.start_timer();
        let next = self.micro.pop().map(|Reverse(entry)| entry.event);
        self.metrics.record(SchedulerOp::PollMicro, start);
        next
    }

    /// Key of the next micro event without removing it.
    pub fn peek_micro(&self) -> Option<&OrderingKey> {
        self.micro.peek().map(|Reverse(entry)| entry.event.key())
    }

    /// True if the bucket for `tick` holds anything due at or before it.
    pub fn has_due_at(&self, tick: Ticks) -> bool {
        self.wheel[self.slot(tick)]
            .iter()
            .any(|entry| entry.event.key().tick() <= tick)
    }

    /// Remove every matching entry from the wheel and the heap. Returns the
    /// number of entries removed.
    pub fn cancel_at(&mut self, pos: Position, kind: EventKind) -> usize {
        let start = self.metrics.start_timer();

        let before_micro = self.micro.len();
        self.micro.retain(|Reverse(entry)| !entry.event.matches(pos, kind));
        let micro_removed = before_micro - self.micro.len();

        let mut removed_ticks = Vec::new();
        for bucket in &mut self.wheel {
            if bucket.is_empty() {
                continue;
            }
            bucket.retain(|entry| {
                let hit = entry.event.matches(pos, kind);
                if hit {
                    removed_ticks.push(entry.event.key().tick());
                }
                !hit
            });
        }
        let wheel_removed = removed_ticks.len();
        self.wheel_len -= wheel_removed;
        for tick in removed_ticks {
            self.forget_due(tick);
        }

        self.metrics.record(SchedulerOp::Cancel, start);
        micro_removed + wheel_removed
    }
}

impl<P: Clone> TickWheelScheduler<P> {
    /// Move every entry of `tick`'s bucket with `key.tick <= tick` into the
    /// micro heap and return copies in bucket order. Later entries sharing
    /// the slot stay where they are.
    pub fn drain_tick(&mut self, tick: Ticks) -> Vec<ScheduledEvent<P>> {
        let start = self.metrics.start_timer();
        self.active_tick = Some(self.active_tick.map_or(tick, |active| active.max(tick)));

        let slot = self.slot(tick);
        let bucket = &mut self.wheel[slot];
        let mut drained = Vec::new();
        let mut kept = VecDeque::with_capacity(bucket.len());
        while let Some(entry) = bucket.pop_front() {
            if entry.event.key().tick() <= tick {
                drained.push(entry.event.clone());
                self.micro.push(Reverse(entry));
            } else {
                kept.push_back(entry);
            }
        }
        *bucket = kept;
        self.wheel_len -= drained.len();
        for event in &drained {
            self.forget_due(event.key().tick());
        }

        if !drained.is_empty() {
            trace!(tick, drained = drained.len(), "drained tick");
        }
        self.metrics.record(SchedulerOp::DrainTick, start);
        drained
    }
}

impl<P> TickWheelScheduler<P> {
    fn entry(&mut self, event: ScheduledEvent<P>) -> Entry<P> {
        let seq = self.next_seq;
        self.next_seq += 1;
        Entry { seq, event }
    }

    fn slot(&self, tick: Ticks) -> usize {
        (tick & self.mask) as usize
    }

    fn forget_due(&mut self, tick: Ticks) {
        if let Some(count) = self.due.get_mut(&tick) {
            *count -= 1;
            if *count == 0 {
                self.due.remove(&tick);
            }
        }
    }
}

impl<P> Default for TickWheelScheduler<P> {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
