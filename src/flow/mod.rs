//! Push-based resource-flow graph.
//!
//! Stages are connected by edges from an outlet (providing side) to an inlet
//! (consuming side). Every port carries `{capacity, rate, demand}`:
//!
//! - the provider writes `capacity` and the granted `rate` on its outlet,
//! - the consumer writes its `demand` on its inlet,
//! - the graph copies each write to the peer port and, if the value changed,
//!   re-runs the peer's stage at the same instant.
//!
//! A stage returns the next instant it needs to run at; the graph keeps at
//! most one scheduler event per stage for it.

mod counters;
mod graph;
mod stage;

pub use counters::FlowCounters;
pub use graph::{FlowGraph, StageWake, DEFAULT_MAX_PROPAGATION_STEPS};
pub use stage::{FlowStage, PortView, StageContext};
