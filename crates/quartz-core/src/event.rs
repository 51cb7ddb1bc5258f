use crate::key::{EventKind, OrderingKey};
use crate::pos::Position;

/// A unit of scheduled work.
///
/// Created when a component or external stimulus requests future work and
/// consumed exactly once when drained. Fields are private so an event cannot
/// be edited after it has been queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEvent<P = ()> {
    key: OrderingKey,
    kind: EventKind,
    pos: Position,
    aux: i32,
    payload: Option<P>,
}

impl<P> ScheduledEvent<P> {
    pub fn new(key: OrderingKey, kind: EventKind, pos: Position, aux: i32) -> Self {
        Self {
            key,
            kind,
            pos,
            aux,
            payload: None,
        }
    }

    /// Attach an opaque payload.
    pub fn with_payload(mut self, payload: P) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn key(&self) -> &OrderingKey {
        &self.key
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn pos(&self) -> Position {
        self.pos
    }

    pub fn aux(&self) -> i32 {
        self.aux
    }

    pub fn payload(&self) -> Option<&P> {
        self.payload.as_ref()
    }

    pub fn into_payload(self) -> Option<P> {
        self.payload
    }

    /// True if this event targets `pos` with `kind`; the cancellation match.
    pub fn matches(&self, pos: Position, kind: EventKind) -> bool {
        self.pos == pos && self.kind == kind
    }
}
