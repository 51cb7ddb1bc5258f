//! Transactional write overlay between simulation logic and the world store.
//!
//! Writes are buffered per 16x16x16 section as a sorted sparse list of
//! `(local_index, value, aux)`. Reads consult the buffer first and fall
//! through to the [`BackingStore`]. [`ShadowOverlay::commit`] applies
//! everything in a fixed order:
//!
//! 1. staged writes, sections in canonical `(y, z, x)` order and local index
//!    order within a section,
//! 2. scheduled tick requests in the order they were queued,
//! 3. neighbour notifications in the order they were queued.
//!
//! If a write fails, the writes already applied are reverted in reverse
//! order before the error is returned; a revert that fails is reported but
//! does not stop the others. The overlay is empty after every commit,
//! successful or not.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::pos::Position;

const SECTION_SHIFT: i32 = 4;
const SECTION_SIZE: i32 = 1 << SECTION_SHIFT;
const LOCAL_MASK: u16 = (SECTION_SIZE - 1) as u16;

// ---------------------------------------------------------------------------
// Backing store
// ---------------------------------------------------------------------------

/// Failure reported by a backing store write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("store write at {pos} failed: {reason}")]
pub struct StoreError {
    pub pos: Position,
    pub reason: String,
}

impl StoreError {
    pub fn new(pos: Position, reason: impl Into<String>) -> Self {
        Self {
            pos,
            reason: reason.into(),
        }
    }
}

/// The authoritative world store the overlay commits into.
///
/// The kernel depends on nothing beyond these operations.
pub trait BackingStore {
    /// Packed block state at `pos`.
    fn read(&self, pos: Position) -> u32;

    /// Auxiliary data (block entity blob) at `pos`.
    fn read_aux(&self, _pos: Position) -> Option<Vec<u8>> {
        None
    }

    fn write(&mut self, pos: Position, value: u32, aux: Option<Vec<u8>>) -> Result<(), StoreError>;

    fn schedule_tick(&mut self, pos: Position, delay: i64, priority: i32);

    fn notify_neighbor(&mut self, pos: Position, source: Position);

    /// Container signal strength read by snapshotting components.
    fn read_signal(&self, _pos: Position) -> u8 {
        0
    }
}

// ---------------------------------------------------------------------------
// Errors and stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShadowError {
    /// A write failed; every earlier write of the commit was reverted.
    #[error("commit aborted after {applied} writes: {source}")]
    Store {
        applied: usize,
        #[source]
        source: StoreError,
    },
    /// A write failed and reverting at least one earlier write failed as
    /// well. Every other earlier write was still reverted; `rollback` is the
    /// first revert that failed.
    #[error("commit aborted ({original}); rollback also failed ({rollback})")]
    RollbackFailed {
        original: StoreError,
        rollback: StoreError,
    },
    /// A tick request asked for a negative delay. Rejected when staged.
    #[error("tick request at {pos} has negative delay {delay}")]
    NegativeDelay { pos: Position, delay: i64 },
}

/// Result of a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowCommitStats {
    /// Number of staged writes applied.
    pub applied: usize,
    /// Neighbour notification targets in delivery order.
    pub neighbor_positions: Vec<Position>,
}

// ---------------------------------------------------------------------------
// Section addressing
// ---------------------------------------------------------------------------

/// Section coordinates. Field order gives the canonical `(y, z, x)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct SectionPos {
    y: i32,
    z: i32,
    x: i32,
}

impl SectionPos {
    fn of(pos: Position) -> Self {
        Self {
            x: pos.x.div_euclid(SECTION_SIZE),
            y: pos.y.div_euclid(SECTION_SIZE),
            z: pos.z.div_euclid(SECTION_SIZE),
        }
    }

    fn block(self, local: u16) -> Position {
        let lx = (local & LOCAL_MASK) as i32;
        let lz = ((local >> 4) & LOCAL_MASK) as i32;
        let ly = ((local >> 8) & LOCAL_MASK) as i32;
        Position::new(
            (self.x << SECTION_SHIFT) + lx,
            (self.y << SECTION_SHIFT) + ly,
            (self.z << SECTION_SHIFT) + lz,
        )
    }
}

/// `(ly << 8) | (lz << 4) | lx` within the owning section.
fn local_index(pos: Position) -> u16 {
    let lx = pos.x.rem_euclid(SECTION_SIZE) as u16;
    let ly = pos.y.rem_euclid(SECTION_SIZE) as u16;
    let lz = pos.z.rem_euclid(SECTION_SIZE) as u16;
    (ly << 8) | (lz << 4) | lx
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Staged {
    local: u16,
    value: u32,
    aux: Option<Vec<u8>>,
}

/// Sparse staged writes of one section, sorted by local index.
#[derive(Debug, Clone, Default)]
struct SectionDelta {
    entries: Vec<Staged>,
}

impl SectionDelta {
    fn find(&self, local: u16) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&local, |s| s.local)
    }

    fn get(&self, local: u16) -> Option<&Staged> {
        self.find(local).ok().map(|slot| &self.entries[slot])
    }

    fn put(&mut self, staged: Staged) {
        match self.find(staged.local) {
            Ok(slot) => self.entries[slot] = staged,
            Err(slot) => self.entries.insert(slot, staged),
        }
    }

    fn remove(&mut self, local: u16) {
        if let Ok(slot) = self.find(local) {
            self.entries.remove(slot);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRequest {
    pub pos: Position,
    pub delay: i64,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborNotification {
    pub pos: Position,
    pub source: Position,
}

/// Value and aux a position held before a commit overwrote it.
struct Undo {
    pos: Position,
    value: u32,
    aux: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// ShadowOverlay
// ---------------------------------------------------------------------------

/// Buffered view over a [`BackingStore`] for one simulation pass.
#[derive(Debug)]
pub struct ShadowOverlay<'s, S: BackingStore + ?Sized> {
    store: &'s mut S,
    sections: BTreeMap<SectionPos, SectionDelta>,
    scheduled: Vec<TickRequest>,
    neighbors: Vec<NeighborNotification>,
}

impl<'s, S: BackingStore + ?Sized> ShadowOverlay<'s, S> {
    pub fn new(store: &'s mut S) -> Self {
        Self {
            store,
            sections: BTreeMap::new(),
            scheduled: Vec::new(),
            neighbors: Vec::new(),
        }
    }

    /// Read-only access to the backing store.
    pub fn store(&self) -> &S {
        self.store
    }

    fn staged(&self, pos: Position) -> Option<&Staged> {
        self.sections
            .get(&SectionPos::of(pos))
            .and_then(|delta| delta.get(local_index(pos)))
    }

    /// Staged value at `pos`, or the store's value if untouched.
    pub fn get(&self, pos: Position) -> u32 {
        match self.staged(pos) {
            Some(staged) => staged.value,
            None => self.store.read(pos),
        }
    }

    /// Staged aux at `pos`, or the store's aux if untouched.
    pub fn get_aux(&self, pos: Position) -> Option<Vec<u8>> {
        match self.staged(pos) {
            Some(staged) => staged.aux.clone(),
            None => self.store.read_aux(pos),
        }
    }

    /// Container signal, always read from the store.
    pub fn read_signal(&self, pos: Position) -> u8 {
        self.store.read_signal(pos)
    }

    /// Stage a write. Writing the store's current value and aux back drops
    /// any staged entry instead, so the overlay only ever holds changes.
    pub fn set(&mut self, pos: Position, value: u32, aux: Option<Vec<u8>>) {
        let section = SectionPos::of(pos);
        let local = local_index(pos);

        if let Some(existing) = self.staged(pos) {
            if existing.value == value && existing.aux == aux {
                return;
            }
        }

        if self.store.read(pos) == value && self.store.read_aux(pos) == aux {
            if let Some(delta) = self.sections.get_mut(&section) {
                delta.remove(local);
                if delta.entries.is_empty() {
                    self.sections.remove(&section);
                }
            }
            return;
        }

        self.sections
            .entry(section)
            .or_default()
            .put(Staged { local, value, aux });
    }

    pub fn mark_neighbor_changed(&mut self, pos: Position, source: Position) {
        self.neighbors.push(NeighborNotification { pos, source });
    }

    /// Queue a tick request for delivery on commit.
    pub fn schedule_tick(
        &mut self,
        pos: Position,
        delay: i64,
        priority: i32,
    ) -> Result<(), ShadowError> {
        if delay < 0 {
            return Err(ShadowError::NegativeDelay { pos, delay });
        }
        self.scheduled.push(TickRequest {
            pos,
            delay,
            priority,
        });
        Ok(())
    }

    /// Number of staged writes.
    pub fn staged_len(&self) -> usize {
        self.sections.values().map(|d| d.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.scheduled.is_empty() && self.neighbors.is_empty()
    }

    pub fn scheduled_ticks(&self) -> &[TickRequest] {
        &self.scheduled
    }

    pub fn neighbor_notifications(&self) -> &[NeighborNotification] {
        &self.neighbors
    }

    /// Staged writes in commit order.
    pub fn staged_positions(&self) -> Vec<Position> {
        self.sections
            .iter()
            .flat_map(|(section, delta)| delta.entries.iter().map(|s| section.block(s.local)))
            .collect()
    }

    /// Drop all staged state without touching the store.
    pub fn clear(&mut self) {
        self.sections.clear();
        self.scheduled.clear();
        self.neighbors.clear();
    }

    /// Apply all staged state to the store atomically.
    pub fn commit(&mut self) -> Result<ShadowCommitStats, ShadowError> {
        let sections = std::mem::take(&mut self.sections);
        let scheduled = std::mem::take(&mut self.scheduled);
        let neighbors = std::mem::take(&mut self.neighbors);

        let mut undo: Vec<Undo> = Vec::new();
        for (section, delta) in sections {
            for staged in delta.entries {
                let pos = section.block(staged.local);
                let previous = Undo {
                    pos,
                    value: self.store.read(pos),
                    aux: self.store.read_aux(pos),
                };
                if let Err(source) = self.store.write(pos, staged.value, staged.aux) {
                    return Err(self.roll_back(undo, source));
                }
                undo.push(previous);
            }
        }

        for request in &scheduled {
            self.store
                .schedule_tick(request.pos, request.delay, request.priority);
        }
        for note in &neighbors {
            self.store.notify_neighbor(note.pos, note.source);
        }

        debug!(
            applied = undo.len(),
            ticks = scheduled.len(),
            neighbors = neighbors.len(),
            "shadow commit"
        );
        Ok(ShadowCommitStats {
            applied: undo.len(),
            neighbor_positions: neighbors.iter().map(|n| n.pos).collect(),
        })
    }

    fn roll_back(&mut self, undo: Vec<Undo>, source: StoreError) -> ShadowError {
        let applied = undo.len();
        warn!(applied, error = %source, "shadow commit failed, rolling back");
        let mut first_failure = None;
        for entry in undo.into_iter().rev() {
            if let Err(rollback) = self.store.write(entry.pos, entry.value, entry.aux) {
                warn!(pos = %rollback.pos, error = %rollback, "revert failed");
                first_failure.get_or_insert(rollback);
            }
        }
        match first_failure {
            Some(rollback) => ShadowError::RollbackFailed {
                original: source,
                rollback,
            },
            None => ShadowError::Store { applied, source },
        }
    }
}

// ---------------------------------------------------------------------------
// ShadowView
// ---------------------------------------------------------------------------

/// Object-safe view of an overlay, independent of the store type. This is
/// what component code sees.
pub trait ShadowView {
    fn get(&self, pos: Position) -> u32;
    fn get_aux(&self, pos: Position) -> Option<Vec<u8>>;
    fn set(&mut self, pos: Position, value: u32, aux: Option<Vec<u8>>);
    fn mark_neighbor_changed(&mut self, pos: Position, source: Position);
    fn schedule_tick(
        &mut self,
        pos: Position,
        delay: i64,
        priority: i32,
    ) -> Result<(), ShadowError>;
    fn read_signal(&self, pos: Position) -> u8;
}

impl<S: BackingStore + ?Sized> ShadowView for ShadowOverlay<'_, S> {
    fn get(&self, pos: Position) -> u32 {
        ShadowOverlay::get(self, pos)
    }

    fn get_aux(&self, pos: Position) -> Option<Vec<u8>> {
        ShadowOverlay::get_aux(self, pos)
    }

    fn set(&mut self, pos: Position, value: u32, aux: Option<Vec<u8>>) {
        ShadowOverlay::set(self, pos, value, aux)
    }

    fn mark_neighbor_changed(&mut self, pos: Position, source: Position) {
        ShadowOverlay::mark_neighbor_changed(self, pos, source)
    }

    fn schedule_tick(
        &mut self,
        pos: Position,
        delay: i64,
        priority: i32,
    ) -> Result<(), ShadowError> {
        ShadowOverlay::schedule_tick(self, pos, delay, priority)
    }

    fn read_signal(&self, pos: Position) -> u8 {
        ShadowOverlay::read_signal(self, pos)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingStore, StoreCall, pos};

    // -----------------------------------------------------------------------
    // Addressing
    // -----------------------------------------------------------------------

    #[test]
    fn local_index_round_trips_negative_coordinates() {
        for p in [pos(-1, -1, -1), pos(-16, 31, 17), pos(15, 0, -17)] {
            let section = SectionPos::of(p);
            assert_eq!(section.block(local_index(p)), p);
        }
        assert_eq!(SectionPos::of(pos(-1, 0, 0)).x, -1);
        assert_eq!(local_index(pos(-1, 0, 0)), 15);
    }

    // -----------------------------------------------------------------------
    // Read-through and staging
    // -----------------------------------------------------------------------

    #[test]
    fn set_then_get_before_and_after_commit() {
        let mut store = RecordingStore::new();
        let p = pos(3, 4, 5);
        let mut overlay = ShadowOverlay::new(&mut store);
        overlay.set(p, 7, None);
        assert_eq!(overlay.get(p), 7);
        assert_eq!(overlay.store().value(p), 0);

        let stats = overlay.commit().unwrap();
        assert_eq!(stats.applied, 1);
        assert_eq!(overlay.get(p), 7);
        assert!(overlay.is_empty());
        drop(overlay);
        assert_eq!(store.value(p), 7);
    }

    #[test]
    fn reads_see_staged_writes_and_fall_through_elsewhere() {
        let mut store = RecordingStore::new();
        let staged = pos(-3, 70, 12);
        let untouched = pos(-2, 70, 12);
        store.seed(staged, 1);
        store.seed(untouched, 2);
        store.seed_aux(untouched, vec![4]);

        let mut overlay = ShadowOverlay::new(&mut store);
        overlay.set(staged, 8, Some(vec![5, 6]));
        assert_eq!(overlay.get(staged), 8);
        assert_eq!(overlay.get_aux(staged), Some(vec![5, 6]));
        assert_eq!(overlay.get(untouched), 2);
        assert_eq!(overlay.get_aux(untouched), Some(vec![4]));

        let view: &dyn ShadowView = &overlay;
        assert_eq!(view.get(staged), 8);
        assert_eq!(view.get(untouched), 2);
        assert_eq!(overlay.store().value(staged), 1);
    }

    #[test]
    fn negative_tick_delay_is_rejected_when_staged() {
        let mut store = RecordingStore::new();
        let mut overlay = ShadowOverlay::new(&mut store);
        let err = overlay.schedule_tick(pos(0, 0, 0), -5, 0).unwrap_err();
        assert_eq!(
            err,
            ShadowError::NegativeDelay {
                pos: pos(0, 0, 0),
                delay: -5
            }
        );
        assert!(overlay.scheduled_ticks().is_empty());
        overlay.schedule_tick(pos(0, 0, 0), 0, 0).unwrap();
        assert_eq!(overlay.scheduled_ticks().len(), 1);
    }

    #[test]
    fn writing_back_original_value_is_a_noop() {
        let mut store = RecordingStore::new();
        let p = pos(0, 0, 0);
        store.seed(p, 4);
        let mut overlay = ShadowOverlay::new(&mut store);
        overlay.set(p, 9, None);
        assert_eq!(overlay.staged_len(), 1);
        overlay.set(p, 4, None);
        assert_eq!(overlay.staged_len(), 0);

        let stats = overlay.commit().unwrap();
        assert_eq!(stats.applied, 0);
        drop(overlay);
        assert!(store.writes().is_empty());
    }

    #[test]
    fn aux_participates_in_equality() {
        let mut store = RecordingStore::new();
        let p = pos(1, 1, 1);
        let mut overlay = ShadowOverlay::new(&mut store);
        overlay.set(p, 0, Some(vec![1, 2]));
        assert_eq!(overlay.staged_len(), 1);
        assert_eq!(overlay.get_aux(p), Some(vec![1, 2]));
        overlay.set(p, 0, None);
        assert_eq!(overlay.staged_len(), 0);
    }

    #[test]
    fn clear_drops_everything_without_touching_store() {
        let mut store = RecordingStore::new();
        let mut overlay = ShadowOverlay::new(&mut store);
        overlay.set(pos(1, 2, 3), 5, None);
        overlay.schedule_tick(pos(1, 2, 3), 2, 0).unwrap();
        overlay.mark_neighbor_changed(pos(1, 3, 3), pos(1, 2, 3));
        overlay.clear();
        assert!(overlay.is_empty());
        assert_eq!(overlay.get(pos(1, 2, 3)), 0);
        drop(overlay);
        assert!(store.calls().is_empty());
    }

    // -----------------------------------------------------------------------
    // Commit ordering
    // -----------------------------------------------------------------------

    #[test]
    fn commit_order_is_spatial_then_ticks_then_neighbors() {
        let a = pos(-1, -1, 0);
        let b = pos(0, 0, 0);
        let c = pos(1, 0, 0);
        let d = pos(0, 0, 1);
        let e = pos(5, 17, 5);
        let f = pos(5, 32, 5);

        let mut store = RecordingStore::new();
        let mut overlay = ShadowOverlay::new(&mut store);
        for (i, p) in [f, d, b, e, a, c].into_iter().enumerate() {
            overlay.set(p, i as u32 + 1, None);
        }
        overlay.mark_neighbor_changed(c, b);
        overlay.schedule_tick(a, 2, 1).unwrap();
        overlay.mark_neighbor_changed(a, b);
        overlay.schedule_tick(f, 0, 0).unwrap();

        let stats = overlay.commit().unwrap();
        assert_eq!(stats.applied, 6);
        assert_eq!(stats.neighbor_positions, vec![c, a]);
        drop(overlay);

        let written: Vec<Position> = store.writes().iter().map(|(p, _)| *p).collect();
        assert_eq!(written, vec![a, b, c, d, e, f]);

        let tail: Vec<&StoreCall> = store.calls().iter().skip(6).collect();
        assert_eq!(
            tail,
            vec![
                &StoreCall::ScheduleTick { pos: a, delay: 2, priority: 1 },
                &StoreCall::ScheduleTick { pos: f, delay: 0, priority: 0 },
                &StoreCall::Notify { pos: c, source: b },
                &StoreCall::Notify { pos: a, source: b },
            ]
        );
    }

    #[test]
    fn duplicate_notifications_are_delivered_each_time() {
        let mut store = RecordingStore::new();
        let mut overlay = ShadowOverlay::new(&mut store);
        overlay.mark_neighbor_changed(pos(0, 0, 0), pos(1, 0, 0));
        overlay.mark_neighbor_changed(pos(0, 0, 0), pos(1, 0, 0));
        let stats = overlay.commit().unwrap();
        assert_eq!(stats.neighbor_positions.len(), 2);
    }

    // -----------------------------------------------------------------------
    // Atomicity
    // -----------------------------------------------------------------------

    #[test]
    fn failed_write_rolls_back_earlier_writes() {
        let mut store = RecordingStore::new();
        store.seed(pos(0, 0, 0), 1);
        store.seed_aux(pos(0, 0, 0), vec![9]);
        store.fail_on_write(3);

        let mut overlay = ShadowOverlay::new(&mut store);
        overlay.set(pos(0, 0, 0), 10, None);
        overlay.set(pos(1, 0, 0), 11, None);
        overlay.set(pos(2, 0, 0), 12, None);
        overlay.schedule_tick(pos(0, 0, 0), 1, 0).unwrap();
        overlay.mark_neighbor_changed(pos(0, 1, 0), pos(0, 0, 0));

        let err = overlay.commit().unwrap_err();
        assert!(matches!(err, ShadowError::Store { applied: 2, .. }));
        assert!(overlay.is_empty());
        drop(overlay);

        assert_eq!(store.value(pos(0, 0, 0)), 1);
        assert_eq!(store.aux(pos(0, 0, 0)), Some(vec![9]));
        assert_eq!(store.value(pos(1, 0, 0)), 0);
        assert_eq!(store.value(pos(2, 0, 0)), 0);
        assert!(
            !store
                .calls()
                .iter()
                .any(|c| matches!(c, StoreCall::ScheduleTick { .. } | StoreCall::Notify { .. }))
        );
    }

    #[test]
    fn rollback_failure_reports_both_errors() {
        let mut store = RecordingStore::new();
        store.fail_on_write(2);
        store.fail_on_write(3);

        let mut overlay = ShadowOverlay::new(&mut store);
        overlay.set(pos(0, 0, 0), 1, None);
        overlay.set(pos(1, 0, 0), 2, None);
        let err = overlay.commit().unwrap_err();
        match err {
            ShadowError::RollbackFailed { original, rollback } => {
                assert_eq!(original.pos, pos(1, 0, 0));
                assert_eq!(rollback.pos, pos(0, 0, 0));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn failed_revert_does_not_stop_the_rest_of_the_rollback() {
        let mut store = RecordingStore::new();
        for x in 0..3 {
            store.seed(pos(x, 0, 0), 1);
        }
        // Writes 1-3 apply, write 4 fails, reverts run as attempts 5-7 in
        // reverse order, so attempt 6 is the revert of x = 1.
        store.fail_on_write(4);
        store.fail_on_write(6);

        let mut overlay = ShadowOverlay::new(&mut store);
        for x in 0..4 {
            overlay.set(pos(x, 0, 0), 9, None);
        }
        let err = overlay.commit().unwrap_err();
        match err {
            ShadowError::RollbackFailed { original, rollback } => {
                assert_eq!(original.pos, pos(3, 0, 0));
                assert_eq!(rollback.pos, pos(1, 0, 0));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        drop(overlay);

        assert_eq!(store.value(pos(0, 0, 0)), 1);
        assert_eq!(store.value(pos(2, 0, 0)), 1);
        assert_eq!(store.value(pos(1, 0, 0)), 9);
        assert_eq!(store.value(pos(3, 0, 0)), 0);
    }
}
