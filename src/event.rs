//! Event definitions for the simulation kernel.
//!
//! An event is a payload tagged with the virtual instant at which it fires
//! and a sequence number assigned at insertion. Events are ordered by
//! `(time, sequence)`, so events scheduled for the same instant fire in the
//! order in which they were scheduled.

use serde::{Deserialize, Serialize};

use crate::types::SimTime;

/// The ordering key of a scheduled event.
///
/// The derived `Ord` compares `time` first and `sequence` second, which is
/// exactly the firing order of the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    /// The simulation time at which the event fires
    pub time: SimTime,
    /// Monotonic tie-breaker assigned at insertion
    pub sequence: u64,
}

impl EventKey {
    /// Creates a new key.
    pub fn new(time: SimTime, sequence: u64) -> Self {
        Self { time, sequence }
    }
}

/// Handle returned by the scheduler for a pending event.
///
/// Handles stay valid after the event fired or was cancelled; cancelling
/// them again is a no-op.
pub type EventHandle = EventKey;

/// An event popped from the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event<E> {
    /// The simulation time at which this event occurs
    pub time: SimTime,
    /// Insertion sequence number
    pub sequence: u64,
    /// The event payload
    pub payload: E,
}

impl<E> Event<E> {
    /// Creates a new event from its key and payload.
    pub fn new(key: EventKey, payload: E) -> Self {
        Self {
            time: key.time,
            sequence: key.sequence,
            payload,
        }
    }

    /// Returns the ordering key of this event.
    pub fn key(&self) -> EventKey {
        EventKey::new(self.time, self.sequence)
    }

    /// Maps the payload, keeping time and sequence.
    pub fn map<F, T>(self, f: F) -> Event<T>
    where
        F: FnOnce(E) -> T,
    {
        Event {
            time: self.time,
            sequence: self.sequence,
            payload: f(self.payload),
        }
    }
}
