//! Operation counts and latency accounting for the scheduler.
//!
//! [`SchedulerMetrics`] is always on; recording costs one `Instant::now()`
//! pair per operation.

use std::time::{Duration, Instant};

/// Scheduler operations that are timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerOp {
    ScheduleAtTick,
    ScheduleMicro,
    OfferMicro,
    PollMicro,
    DrainTick,
    Cancel,
}

impl SchedulerOp {
    pub const ALL: [SchedulerOp; 6] = [
        SchedulerOp::ScheduleAtTick,
        SchedulerOp::ScheduleMicro,
        SchedulerOp::OfferMicro,
        SchedulerOp::PollMicro,
        SchedulerOp::DrainTick,
        SchedulerOp::Cancel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SchedulerOp::ScheduleAtTick => "schedule_at_tick",
            SchedulerOp::ScheduleMicro => "schedule_micro",
            SchedulerOp::OfferMicro => "offer_micro",
            SchedulerOp::PollMicro => "poll_micro",
            SchedulerOp::DrainTick => "drain_tick",
            SchedulerOp::Cancel => "cancel",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Count and accumulated latency for one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
    pub ops: u64,
    pub total: Duration,
}

impl OpStats {
    /// Mean latency, zero when nothing was recorded.
    pub fn average(&self) -> Duration {
        if self.ops == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / self.ops as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerMetrics {
    stats: [OpStats; 6],
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn start_timer(&self) -> Instant {
        Instant::now()
    }

    pub(crate) fn record(&mut self, op: SchedulerOp, started: Instant) {
        let entry = &mut self.stats[op.slot()];
        entry.ops += 1;
        entry.total += started.elapsed();
    }

    pub fn stats(&self, op: SchedulerOp) -> OpStats {
        self.stats[op.slot()]
    }

    pub fn ops(&self, op: SchedulerOp) -> u64 {
        self.stats[op.slot()].ops
    }

    pub fn average(&self, op: SchedulerOp) -> Duration {
        self.stats[op.slot()].average()
    }

    /// The operation with the largest accumulated latency.
    pub fn bottleneck(&self) -> (SchedulerOp, Duration) {
        SchedulerOp::ALL
            .into_iter()
            .map(|op| (op, self.stats[op.slot()].total))
            .max_by_key(|(_, total)| *total)
            .unwrap_or((SchedulerOp::ScheduleAtTick, Duration::ZERO))
    }

    pub fn reset(&mut self) {
        self.stats = Default::default();
    }
}
