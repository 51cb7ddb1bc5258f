//! Maps block tick requests `(pos, delay, priority)` onto ordering keys.
//!
//! The region field groups positions into square column regions; the micro
//! phase is the request priority clamped into `0..=MAX_MICRO`.

use crate::config::RouterConfig;
use crate::event::ScheduledEvent;
use crate::key::{EventKind, KeyError, MAX_MICRO, OrderingKey};
use crate::pos::Position;
use crate::power::Ticks;
use crate::scheduler::{SchedulerError, TickWheelScheduler};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("tick request has negative delay {0}")]
    NegativeDelay(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRouter {
    region_block_size: i32,
    min_delay: Ticks,
}

impl TickRouter {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            region_block_size: config.region_block_size.max(1),
            min_delay: config.min_commit_delay,
        }
    }

    /// Packed `(region_x, region_z)` id, 16 bits each.
    pub fn region_of(&self, pos: Position) -> i32 {
        let rx = pos.x.div_euclid(self.region_block_size) as u32 & 0xFFFF;
        let rz = pos.z.div_euclid(self.region_block_size) as u32 & 0xFFFF;
        ((rx << 16) | rz) as i32
    }

    pub fn micro_phase(priority: i32) -> u8 {
        priority.clamp(0, MAX_MICRO as i32) as u8
    }

    pub fn key_for(
        &self,
        tick: Ticks,
        pos: Position,
        kind: EventKind,
        priority: i32,
    ) -> Result<OrderingKey, KeyError> {
        OrderingKey::for_block(
            tick,
            Self::micro_phase(priority),
            self.region_of(pos),
            pos,
            kind,
        )
    }

    /// Due tick for a request made at `now`, never sooner than the
    /// configured minimum delay. Negative delays are rejected.
    pub fn due_tick(&self, now: Ticks, delay: i64) -> Result<Ticks, RouteError> {
        let delay = Ticks::try_from(delay).map_err(|_| RouteError::NegativeDelay(delay))?;
        Ok(now + delay.max(self.min_delay))
    }

    /// Schedule a `BlockScheduledTick` for a committed request.
    pub fn route<P: Clone>(
        &self,
        scheduler: &mut TickWheelScheduler<P>,
        now: Ticks,
        pos: Position,
        delay: i64,
        priority: i32,
    ) -> Result<OrderingKey, RouteError> {
        let due = self.due_tick(now, delay)?;
        let key = self.key_for(due, pos, EventKind::BlockScheduledTick, priority)?;
        let event = ScheduledEvent::new(key, EventKind::BlockScheduledTick, pos, priority);
        scheduler.schedule_at_tick(event, due)?;
        Ok(key)
    }
}

impl Default for TickRouter {
    fn default() -> Self {
        Self::new(&RouterConfig::default())
    }
}
