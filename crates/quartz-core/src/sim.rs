//! Results reported by [`crate::engine::SimulationEngine`] and the hash used
//! to compare two runs.

use serde::{Deserialize, Serialize};

use crate::pos::Position;
use crate::power::{PowerLevel, Ticks};

// ---------------------------------------------------------------------------
// State changes
// ---------------------------------------------------------------------------

/// One component's output changing during an elapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub tick: Ticks,
    pub position: Position,
    pub previous: PowerLevel,
    pub new: PowerLevel,
}

/// Outcome of [`crate::engine::SimulationEngine::elapse`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElapseResult {
    pub start_tick: Ticks,
    pub end_tick: Ticks,
    /// Changes in the order they were applied.
    pub changes: Vec<StateChange>,
}

impl ElapseResult {
    pub fn is_quiet(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes_at(&self, tick: Ticks) -> impl Iterator<Item = &StateChange> {
        self.changes.iter().filter(move |c| c.tick == tick)
    }
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// FNV-1a (64-bit) accumulator for desync detection. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= byte as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_position(&mut self, pos: Position) {
        self.write_i32(pos.x);
        self.write_i32(pos.y);
        self.write_i32(pos.z);
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}
