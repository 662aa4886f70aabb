//! Priority event queue.

use std::collections::BTreeMap;
use std::time::Instant;

use parking_lot::Mutex;

use crate::event::{Event, Priority, TargetRef};

type QueueKey = (Priority, Instant, u64);

#[derive(Default)]
struct QueueState {
    entries: BTreeMap<QueueKey, Event>,
    sequence: u64,
    compressed: u64,
}

/// Thread-safe event queue ordered by priority, then by enqueue time.
///
/// Equal timestamps fall back to insertion order, so events of the same
/// priority are delivered FIFO.
#[derive(Default)]
pub struct EventQueue {
    state: Mutex<QueueState>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps and enqueues `event`.
    ///
    /// A compressible event is dropped when a queued event of the same type
    /// and target is already waiting; the queued one keeps its position.
    /// Returns `false` when the event was dropped.
    pub fn push(&self, mut event: Event) -> bool {
        let mut state = self.state.lock();
        if event.header.compressible
            && state
                .entries
                .values()
                .rev()
                .any(|queued| event.compresses_with(queued))
        {
            state.compressed += 1;
            log::trace!("compressed {} into a queued event", event.event_type());
            return false;
        }
        let timestamp = Instant::now();
        event.header.timestamp = Some(timestamp);
        let sequence = state.sequence;
        state.sequence += 1;
        state
            .entries
            .insert((event.priority(), timestamp, sequence), event);
        true
    }

    /// Removes the highest-priority, oldest event.
    pub fn pop(&self) -> Option<Event> {
        self.state.lock().entries.pop_first().map(|(_, event)| event)
    }

    pub fn peek_priority(&self) -> Option<Priority> {
        self.state
            .lock()
            .entries
            .first_key_value()
            .map(|(key, _)| key.0)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Number of events dropped by compression since creation.
    pub fn compressed(&self) -> u64 {
        self.state.lock().compressed
    }

    /// Drops every queued event addressed to `target`.
    pub fn remove_for_target(&self, target: &TargetRef) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, event| event.target() != Some(target));
        before - state.entries.len()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }
}
