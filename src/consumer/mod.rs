//! The resource consumer protocol.
//!
//! A consumer is a workload that drives its own resource usage over virtual
//! time. The stage hosting it (see [`ConsumerStage`](crate::stages::ConsumerStage))
//! walks it through `NotStarted → Running → {Exited | Failed}`:
//!
//! 1. `on_event(Start)` once, when the stage first runs connected,
//! 2. `on_next(ctx, now, delta)` whenever the stage runs, returning either
//!    [`NextAction::Consume`] or [`NextAction::Exit`],
//! 3. `on_event(Capacity)` before `on_next` when the offered capacity changed,
//! 4. `on_event(Exit)` after `Exit`, or `on_failure` if `on_next` failed.
//!
//! `on_next` may be called several times at the same instant while the graph
//! propagates; with `delta == 0` it must not change the outcome.

mod func;
mod trace;
mod work;

use serde::{Deserialize, Serialize};

use crate::error::ConsumerError;
use crate::types::SimTime;

pub use func::FnConsumer;
pub use trace::{TraceFragment, TraceReplay};
pub use work::BoundedWork;

/// Lifecycle notifications of a consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsumerEvent {
    /// The consumer is attached and about to receive its first `on_next`.
    Start,
    /// The consumer returned `Exit` and is being detached.
    Exit,
    /// The capacity offered to the consumer changed.
    Capacity,
}

/// What the consumer wants next.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum NextAction {
    /// Consume at `rate` for at most `duration` ms, then call `on_next` again.
    /// A duration of [`IDLE`](crate::types::IDLE) waits for a port change.
    Consume {
        /// Requested rate, in work units per second
        rate: f64,
        /// Time until the next call, in ms
        duration: SimTime,
    },
    /// No more work.
    Exit,
}

impl NextAction {
    /// Shorthand for [`NextAction::Consume`].
    pub fn consume(rate: f64, duration: SimTime) -> Self {
        Self::Consume { rate, duration }
    }
}

/// Lifecycle state of a hosted consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsumerState {
    /// Not started yet
    NotStarted,
    /// Receiving `on_next` calls
    Running,
    /// Returned `Exit`
    Exited,
    /// Failed or was cancelled
    Failed,
}

impl ConsumerState {
    /// Returns true for `Exited` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited | Self::Failed)
    }
}

/// What a consumer sees of its edge when it is called.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerContext {
    /// Current virtual time
    pub now: SimTime,
    /// Capacity currently offered by the provider
    pub capacity: f64,
    /// Rate currently granted by the provider
    pub rate: f64,
    /// Rate that was granted since the previous call
    pub speed: f64,
    /// Rate the consumer last requested
    pub demand: f64,
}

/// A workload consuming flow-graph capacity over time.
pub trait ResourceConsumer {
    /// Handles a lifecycle event.
    fn on_event(&mut self, _ctx: &ConsumerContext, _event: ConsumerEvent) {}

    /// Decides what to do next.
    ///
    /// # Arguments
    /// * `ctx` - The edge as seen at `now`
    /// * `now` - The current virtual time
    /// * `delta` - Time since the previous call (0 on the first one)
    fn on_next(&mut self, ctx: &ConsumerContext, now: SimTime, delta: SimTime) -> Result<NextAction, ConsumerError>;

    /// Terminal failure; release anything waiting on the consumer.
    fn on_failure(&mut self, _ctx: &ConsumerContext, _cause: &ConsumerError) {}
}

impl<C: ResourceConsumer + ?Sized> ResourceConsumer for Box<C> {
    fn on_event(&mut self, ctx: &ConsumerContext, event: ConsumerEvent) {
        (**self).on_event(ctx, event)
    }

    fn on_next(&mut self, ctx: &ConsumerContext, now: SimTime, delta: SimTime) -> Result<NextAction, ConsumerError> {
        (**self).on_next(ctx, now, delta)
    }

    fn on_failure(&mut self, ctx: &ConsumerContext, cause: &ConsumerError) {
        (**self).on_failure(ctx, cause)
    }
}

/// How a hosted consumer ended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConsumerOutcome {
    /// The consumer returned `Exit`.
    Exited {
        /// When it exited
        at: SimTime,
        /// Total work consumed
        consumed: f64,
    },
    /// The consumer failed or was cancelled.
    Failed {
        /// When it failed
        at: SimTime,
        /// Why
        #[serde(with = "cause_string")]
        cause: ConsumerError,
    },
}

impl ConsumerOutcome {
    /// The instant the consumer finished.
    pub fn at(&self) -> SimTime {
        match self {
            Self::Exited { at, .. } | Self::Failed { at, .. } => *at,
        }
    }

    /// Returns true if the consumer exited normally.
    pub fn is_exited(&self) -> bool {
        matches!(self, Self::Exited { .. })
    }
}

mod cause_string {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::error::ConsumerError;

    pub fn serialize<S: Serializer>(cause: &ConsumerError, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(cause)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ConsumerError, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(ConsumerError::Workload(text))
    }
}
