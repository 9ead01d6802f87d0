//! Error types for the simulation kernel.
//!
//! Programming errors (scheduling in the past, connecting a port twice) are
//! asserted. Expected runtime conditions and workload failures are values of
//! the enums below and are returned to the caller.

use thiserror::Error;

use crate::types::{HostId, SimTime};

/// Errors raised when inserting an event into the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The requested instant lies before the current virtual time.
    #[error("cannot schedule at {requested} ms: current time is {now} ms")]
    InPast {
        /// The instant the caller asked for
        requested: SimTime,
        /// The scheduler's current time
        now: SimTime,
    },
}

/// Failures of a resource consumer.
///
/// A consumer failure is isolated to the consumer that raised it: the
/// owning stage logs it, calls `on_failure` and turns its edge idle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsumerError {
    /// The workload logic itself failed.
    #[error("workload failed: {0}")]
    Workload(String),

    /// The consumer was detached from the graph before it finished.
    #[error("consumer cancelled before completion")]
    Cancelled,

    /// The workload description is not usable.
    #[error("invalid workload: {0}")]
    InvalidWorkload(String),
}

/// Expected placement outcomes that are not a success.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    /// No host passed every filter.
    #[error("insufficient capacity to place task {task}")]
    InsufficientCapacity {
        /// The task that could not be placed
        task: u64,
    },

    /// The requested host is not available.
    #[error("host {0} is unavailable")]
    HostUnavailable(HostId),

    /// Too many consecutive placement failures.
    #[error("{failures} consecutive scheduling failures exceed the maximum of {max}")]
    TooManyFailures {
        /// Consecutive failures observed
        failures: u32,
        /// Configured maximum
        max: u32,
    },
}

/// Errors raised by the consumer registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown workload kind: {0}")]
    UnknownKind(String),

    #[error("missing attribute `{attr}` for workload kind `{kind}`")]
    MissingAttr { kind: String, attr: String },

    #[error("invalid value `{value}` for attribute `{attr}`")]
    InvalidAttr { attr: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScheduleError::InPast { requested: 5, now: 10 };
        assert_eq!(err.to_string(), "cannot schedule at 5 ms: current time is 10 ms");

        let err = PlacementError::TooManyFailures { failures: 4, max: 3 };
        assert!(err.to_string().contains("maximum of 3"));

        let err = ConsumerError::Workload("boom".into());
        assert_eq!(err.to_string(), "workload failed: boom");
    }
}
