//! Ordering keys: the total order every scheduled piece of work runs in.
//!
//! A key is `(tick, micro, region, local_order)` compared lexicographically.
//! `local_order` is normally a packed `(y, z, x, kind)` value built by
//! [`OrderingKey::local_order`], so that within one micro phase and region
//! ties break by Y-major position and then by [`EventKind`].

use serde::{Deserialize, Serialize};

use crate::pos::Position;
use crate::power::Ticks;

const AXIS_BITS: u32 = 20;
const KIND_BITS: u32 = 4;
const AXIS_MASK: i64 = (1 << AXIS_BITS) - 1;
const AXIS_OFFSET: i64 = 1 << (AXIS_BITS - 1);

/// Highest micro phase a key may carry.
pub const MAX_MICRO: u8 = 9;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("coordinate {value} on axis {axis} outside the packable range")]
    CoordinateOutOfRange { axis: char, value: i32 },
    #[error("micro phase {0} outside 0..=9")]
    MicroOutOfRange(u8),
}

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// Kinds of scheduled work. The declaration order is the tiebreak order for
/// events at the same position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum EventKind {
    BlockScheduledTick = 0,
    NeighborChange = 1,
    PowerPropagation = 2,
    ComponentEval = 3,
    PistonTxn = 4,
    ObserverPulse = 5,
    NetlistInvalidate = 6,
    AdminControl = 7,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::BlockScheduledTick,
        EventKind::NeighborChange,
        EventKind::PowerPropagation,
        EventKind::ComponentEval,
        EventKind::PistonTxn,
        EventKind::ObserverPulse,
        EventKind::NetlistInvalidate,
        EventKind::AdminControl,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// Ordering key
// ---------------------------------------------------------------------------

/// Immutable, totally ordered scheduling key.
///
/// Field order matters: the derived `Ord` compares `tick`, `micro`,
/// `region`, then `local_order` as an unsigned magnitude.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OrderingKey {
    tick: Ticks,
    micro: u8,
    region: i32,
    local_order: u64,
}

impl OrderingKey {
    pub fn new(tick: Ticks, micro: u8, region: i32, local_order: u64) -> Result<Self, KeyError> {
        if micro > MAX_MICRO {
            return Err(KeyError::MicroOutOfRange(micro));
        }
        Ok(Self {
            tick,
            micro,
            region,
            local_order,
        })
    }

    /// Key for work of `kind` at `pos`, with `local_order` packed from both.
    pub fn for_block(
        tick: Ticks,
        micro: u8,
        region: i32,
        pos: Position,
        kind: EventKind,
    ) -> Result<Self, KeyError> {
        Self::new(tick, micro, region, Self::local_order(pos, kind)?)
    }

    /// Pack `(y, z, x, kind)` into a single `u64` whose unsigned order
    /// matches the canonical position order followed by kind order.
    pub fn local_order(pos: Position, kind: EventKind) -> Result<u64, KeyError> {
        let y = compact('y', pos.y)?;
        let z = compact('z', pos.z)?;
        let x = compact('x', pos.x)?;
        Ok((y << (AXIS_BITS * 2 + KIND_BITS))
            | (z << (AXIS_BITS + KIND_BITS))
            | (x << KIND_BITS)
            | kind.ordinal() as u64)
    }

    pub fn tick(&self) -> Ticks {
        self.tick
    }

    pub fn micro(&self) -> u8 {
        self.micro
    }

    pub fn region(&self) -> i32 {
        self.region
    }

    pub fn local_order_bits(&self) -> u64 {
        self.local_order
    }

    /// Same key moved to another tick.
    pub fn with_tick(self, tick: Ticks) -> Self {
        Self { tick, ..self }
    }
}

fn compact(axis: char, value: i32) -> Result<u64, KeyError> {
    let adjusted = value as i64 + AXIS_OFFSET;
    if !(0..=AXIS_MASK).contains(&adjusted) {
        return Err(KeyError::CoordinateOutOfRange { axis, value });
    }
    Ok(adjusted as u64)
}
