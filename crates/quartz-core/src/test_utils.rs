//! Shared test helpers for unit tests, integration tests, and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.

use std::collections::{BTreeMap, BTreeSet};

use crate::dust::csr::{DustCsrBuilder, DustCsrGraph, DustPort};
use crate::event::ScheduledEvent;
use crate::key::{EventKind, OrderingKey};
use crate::pos::Position;
use crate::power::Ticks;
use crate::shadow::{BackingStore, StoreError};

// ===========================================================================
// Positions
// ===========================================================================

pub fn pos(x: i32, y: i32, z: i32) -> Position {
    Position::new(x, y, z)
}

/// `len` conductor positions along +x starting at the origin.
pub fn line_of(len: i32) -> Vec<Position> {
    (0..len).map(|x| pos(x, 0, 0)).collect()
}

// ===========================================================================
// Events
// ===========================================================================

/// Micro phase 0, region 0 event at `pos`.
pub fn block_event(tick: Ticks, pos: Position, kind: EventKind) -> ScheduledEvent {
    let key = OrderingKey::for_block(tick, 0, 0, pos, kind).expect("test position in range");
    ScheduledEvent::new(key, kind, pos, 0)
}

// ===========================================================================
// Dust graphs
// ===========================================================================

/// A straight run of `len` conductors with a port at each end.
pub fn wire_with_end_ports(len: i32) -> DustCsrGraph {
    let mut builder = DustCsrBuilder::new();
    builder.add_conductors(line_of(len));
    builder
        .attach_port(DustPort::new(1, 0), pos(0, 0, 0))
        .expect("fresh port");
    builder
        .attach_port(DustPort::new(2, 0), pos(len - 1, 0, 0))
        .expect("fresh port");
    builder.build().expect("straight wire builds")
}

// ===========================================================================
// Recording store
// ===========================================================================

/// Every call the overlay made against a [`RecordingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Write {
        pos: Position,
        value: u32,
        aux: Option<Vec<u8>>,
    },
    ScheduleTick {
        pos: Position,
        delay: i64,
        priority: i32,
    },
    Notify {
        pos: Position,
        source: Position,
    },
}

/// In-memory [`BackingStore`] that logs calls and can inject write failures.
///
/// Unset positions read as 0. Failing writes are counted by attempt number
/// (1-based, across all writes including rollback writes) and are not
/// logged.
#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    values: BTreeMap<Position, u32>,
    aux: BTreeMap<Position, Vec<u8>>,
    signals: BTreeMap<Position, u8>,
    calls: Vec<StoreCall>,
    write_attempts: usize,
    fail_on: BTreeSet<usize>,
    signal_reads: std::cell::Cell<usize>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value without logging a call.
    pub fn seed(&mut self, pos: Position, value: u32) {
        self.values.insert(pos, value);
    }

    pub fn seed_aux(&mut self, pos: Position, aux: Vec<u8>) {
        self.aux.insert(pos, aux);
    }

    pub fn seed_signal(&mut self, pos: Position, signal: u8) {
        self.signals.insert(pos, signal);
    }

    /// Make the `attempt`-th write fail.
    pub fn fail_on_write(&mut self, attempt: usize) {
        self.fail_on.insert(attempt);
    }

    pub fn value(&self, pos: Position) -> u32 {
        self.values.get(&pos).copied().unwrap_or(0)
    }

    pub fn aux(&self, pos: Position) -> Option<Vec<u8>> {
        self.aux.get(&pos).cloned()
    }

    pub fn calls(&self) -> &[StoreCall] {
        &self.calls
    }

    /// Successful writes as `(pos, value)` in call order.
    pub fn writes(&self) -> Vec<(Position, u32)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                StoreCall::Write { pos, value, .. } => Some((*pos, *value)),
                _ => None,
            })
            .collect()
    }

    pub fn notifications(&self) -> Vec<(Position, Position)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                StoreCall::Notify { pos, source } => Some((*pos, *source)),
                _ => None,
            })
            .collect()
    }

    /// How many times `read_signal` was called.
    pub fn signal_reads(&self) -> usize {
        self.signal_reads.get()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }
}

impl BackingStore for RecordingStore {
    fn read(&self, pos: Position) -> u32 {
        self.value(pos)
    }

    fn read_aux(&self, pos: Position) -> Option<Vec<u8>> {
        self.aux(pos)
    }

    fn write(&mut self, pos: Position, value: u32, aux: Option<Vec<u8>>) -> Result<(), StoreError> {
        self.write_attempts += 1;
        if self.fail_on.contains(&self.write_attempts) {
            return Err(StoreError::new(
                pos,
                format!("injected failure on write {}", self.write_attempts),
            ));
        }
        self.values.insert(pos, value);
        match &aux {
            Some(blob) => {
                self.aux.insert(pos, blob.clone());
            }
            None => {
                self.aux.remove(&pos);
            }
        }
        self.calls.push(StoreCall::Write { pos, value, aux });
        Ok(())
    }

    fn schedule_tick(&mut self, pos: Position, delay: i64, priority: i32) {
        self.calls.push(StoreCall::ScheduleTick {
            pos,
            delay,
            priority,
        });
    }

    fn notify_neighbor(&mut self, pos: Position, source: Position) {
        self.calls.push(StoreCall::Notify { pos, source });
    }

    fn read_signal(&self, pos: Position) -> u8 {
        self.signal_reads.set(self.signal_reads.get() + 1);
        self.signals.get(&pos).copied().unwrap_or(0)
    }
}
