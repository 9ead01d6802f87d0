//! Core type definitions for the simulation kernel.
//!
//! This module defines the fundamental types shared by the scheduler, the
//! timer subsystem, the actor runtime and the resource-flow graph.

use serde::{Deserialize, Serialize};

/// Simulation time unit (milliseconds of virtual time).
///
/// `SimTime` is never derived from the wall clock; it only moves when the
/// scheduler pops an event.
pub type SimTime = u64;

/// Sentinel returned by a flow stage that has no further work.
///
/// A stage returning `IDLE` from `on_update` is only invoked again when the
/// graph invalidates it.
pub const IDLE: SimTime = SimTime::MAX;

/// Unique identifier for an actor.
pub type ActorId = u64;

/// Unique identifier for a stage in the resource-flow graph.
///
/// Stage identifiers are never reused within one graph, so a wake-up that
/// refers to a removed stage can always be recognised as stale.
pub type StageId = u64;

/// Identifier of a physical host, used by placement strategies.
pub type HostId = u32;

/// Handle to an input port of a flow stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InletId(pub(crate) usize);

/// Handle to an output port of a flow stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutletId(pub(crate) usize);

impl InletId {
    /// Returns the raw slab index of this port.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl OutletId {
    /// Returns the raw slab index of this port.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Adds a duration to an instant, saturating at [`IDLE`].
#[inline]
pub fn after(now: SimTime, duration: SimTime) -> SimTime {
    now.saturating_add(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_aliases() {
        let time: SimTime = 1000;
        let actor: ActorId = 42;
        let stage: StageId = 7;
        let host: HostId = 1;

        assert_eq!(time, 1000);
        assert_eq!(actor, 42);
        assert_eq!(stage, 7);
        assert_eq!(host, 1);
    }

    #[test]
    fn test_after_saturates() {
        assert_eq!(after(10, 5), 15);
        assert_eq!(after(IDLE - 1, 10), IDLE);
        assert_eq!(after(0, IDLE), IDLE);
    }

    #[test]
    fn test_port_ids_order() {
        assert!(InletId(1) < InletId(2));
        assert_eq!(OutletId(3).index(), 3);
    }
}
