// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Schedule of independent one-shot events.
//!
//! Both state machines sometimes need many outstanding one-shots of
//! the same flavor at once (state-change report retransmissions,
//! group-specific query retransmissions). Each gets a unique 64-bit
//! id; the id is embedded in the timer kind, and the payload lives
//! here until the event has fired.
//!
//! A fired event is not removed immediately: firing happens while the
//! owner is reacting to that very event, so the entry is only marked
//! expired and reclaimed on the next [`EventSchedule::schedule`]
//! call. Cancelling everything with [`EventSchedule::clear`] returns
//! the ids that were still live so the caller can cancel their
//! timers.

use std::collections::HashMap;

/// Id-keyed set of pending one-shot event payloads.
#[derive(Debug)]
pub struct EventSchedule<E> {
    id_counter: u64,
    events: HashMap<u64, E>,
    expired: Vec<u64>,
}

impl<E: Clone> EventSchedule<E> {
    pub fn new() -> Self {
        Self {
            id_counter: 0,
            events: HashMap::new(),
            expired: Vec::new(),
        }
    }

    /// Registers a new event and returns its id. Entries expired by
    /// earlier [`fire`](Self::fire) calls are reclaimed first.
    pub fn schedule(&mut self, event: E) -> u64 {
        for id in self.expired.drain(..) {
            self.events.remove(&id);
        }

        let id = self.id_counter;
        self.id_counter += 1;
        self.events.insert(id, event);
        id
    }

    /// Marks the event as fired and hands back its payload. Returns
    /// `None` for unknown ids and for ids that already fired (a stale
    /// expiry from a cancelled timer).
    pub fn fire(&mut self, id: u64) -> Option<E> {
        if self.expired.contains(&id) {
            return None;
        }
        let event = self.events.get(&id)?.clone();
        self.expired.push(id);
        Some(event)
    }

    /// Drops every pending event and returns the ids that were still
    /// live, so their timers can be cancelled.
    pub fn clear(&mut self) -> Vec<u64> {
        let live: Vec<u64> = self
            .events
            .keys()
            .copied()
            .filter(|id| !self.expired.contains(id))
            .collect();
        self.events.clear();
        self.expired.clear();
        live
    }

    /// Number of events that have not fired.
    pub fn len(&self) -> usize {
        self.events.len() - self.expired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Clone> Default for EventSchedule<E> {
    fn default() -> Self {
        Self::new()
    }
}
