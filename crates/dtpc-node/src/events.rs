use dtpc_core::{AduId, DtnTime, EventId};
use serde::{Deserialize, Serialize};

/// What a timeline event does when it comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Requeue an outbound ADU for retransmission.
    ResendAdu(AduId),
    /// Drop an outbound ADU whose lifespan ran out.
    DeleteAdu(AduId),
    /// Drop an inbound gap placeholder and rescan its aggregator.
    DeleteGap(AduId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtpcEvent {
    pub id: EventId,
    pub due: DtnTime,
    pub kind: EventKind,
}

/// Single timeline kept in ascending due order.
///
/// Events with equal due times fire in scheduling order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQueue {
    events: Vec<DtpcEvent>,
    next_id: u64,
}

impl EventQueue {
    pub fn schedule(&mut self, due: DtnTime, kind: EventKind) -> EventId {
        self.next_id += 1;
        let id = EventId(self.next_id);
        // Most new events are due after everything already queued.
        let position = self
            .events
            .iter()
            .rposition(|event| event.due <= due)
            .map_or(0, |index| index + 1);
        self.events.insert(position, DtpcEvent { id, due, kind });
        id
    }

    /// Removes an event; returns whether it was still queued.
    pub fn cancel(&mut self, id: EventId) -> bool {
        match self.events.iter().position(|event| event.id == id) {
            Some(index) => {
                self.events.remove(index);
                true
            }
            None => false,
        }
    }

    /// Pops the earliest event due at or before `now`.
    pub fn pop_due(&mut self, now: DtnTime) -> Option<DtpcEvent> {
        if self.events.first().is_some_and(|event| event.due <= now) {
            Some(self.events.remove(0))
        } else {
            None
        }
    }

    pub fn next_due(&self) -> Option<DtnTime> {
        self.events.first().map(|event| event.due)
    }

    pub fn get(&self, id: EventId) -> Option<&DtpcEvent> {
        self.events.iter().find(|event| event.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DtpcEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
