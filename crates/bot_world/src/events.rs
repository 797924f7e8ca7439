//! Events emitted by the simulation for viewers and transports.

use bot_world_wasm_abi::{GuestFault, Rotation};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::geometry::Position;
use crate::types::{EntityId, ProgramId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorldEvent {
    TickStart {
        tick: u64,
    },
    TickEnd {
        tick: u64,
    },
    BotSpawn {
        unit: EntityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        program: Option<ProgramId>,
        at: Position,
        facing: Rotation,
    },
    BotDespawn {
        unit: EntityId,
    },
    BotLog {
        unit: EntityId,
        message: String,
    },
    BotFault {
        unit: EntityId,
        fault: GuestFault,
    },
    BotRotate {
        unit: EntityId,
        facing: Rotation,
    },
    BotMove {
        unit: EntityId,
        from: Position,
        to: Position,
    },
    /// Move dropped by the occupancy or bounds check. `to` is `None` when the
    /// destination does not fit the coordinate range.
    BotBlocked {
        unit: EntityId,
        to: Option<Position>,
    },
    /// Move cancelled because another unit contested the same cell or the
    /// movers formed a closed loop.
    BotCollide {
        unit: EntityId,
        to: Position,
    },
}

impl WorldEvent {
    pub fn unit(&self) -> Option<EntityId> {
        match self {
            WorldEvent::BotSpawn { unit, .. }
            | WorldEvent::BotDespawn { unit }
            | WorldEvent::BotLog { unit, .. }
            | WorldEvent::BotFault { unit, .. }
            | WorldEvent::BotRotate { unit, .. }
            | WorldEvent::BotMove { unit, .. }
            | WorldEvent::BotBlocked { unit, .. }
            | WorldEvent::BotCollide { unit, .. } => Some(*unit),
            WorldEvent::TickStart { .. } | WorldEvent::TickEnd { .. } => None,
        }
    }
}

/// Bounded buffer of events waiting to be drained.
///
/// Past `capacity` the oldest event is dropped and counted. A zero capacity
/// keeps nothing.
#[derive(Debug, Clone, Default)]
pub struct EventJournal {
    events: VecDeque<WorldEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn push(&mut self, event: WorldEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = WorldEvent>) {
        for event in events {
            self.push(event);
        }
    }

    pub fn drain(&mut self) -> Vec<WorldEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events evicted since the journal was created.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_kind_tag() {
        let event = WorldEvent::BotMove {
            unit: EntityId(3),
            from: Position::new(0, 0),
            to: Position::new(2, 0),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "kind": "bot_move",
                "unit": 3,
                "from": {"x": 0, "y": 0},
                "to": {"x": 2, "y": 0}
            })
        );
        assert_eq!(event.unit(), Some(EntityId(3)));
        assert_eq!(WorldEvent::TickEnd { tick: 1 }.unit(), None);
    }

    #[test]
    fn journal_keeps_newest_events_within_capacity() {
        let mut journal = EventJournal::new(2);
        journal.extend((1..=5).map(|tick| WorldEvent::TickStart { tick }));

        assert_eq!(journal.len(), 2);
        assert_eq!(journal.dropped(), 3);
        assert_eq!(
            journal.drain(),
            vec![
                WorldEvent::TickStart { tick: 4 },
                WorldEvent::TickStart { tick: 5 }
            ]
        );
        assert!(journal.is_empty());
        assert_eq!(journal.dropped(), 3);
    }

    #[test]
    fn zero_capacity_journal_retains_nothing() {
        let mut journal = EventJournal::new(0);
        journal.push(WorldEvent::TickEnd { tick: 1 });
        assert!(!journal.is_enabled());
        assert!(journal.is_empty());
        assert_eq!(journal.dropped(), 0);
    }
}
