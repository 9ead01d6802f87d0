//! Accumulated work counters for telemetry.

use serde::{Deserialize, Serialize};

use crate::numeric::consumed;
use crate::types::SimTime;

/// Work requested, delivered and lost to overcommitment, in work units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowCounters {
    /// Work requested
    pub demand: f64,
    /// Work delivered
    pub actual: f64,
    /// Work requested but not delivered
    pub overcommit: f64,
}

impl FlowCounters {
    /// Accounts an interval of `delta` ms during which `demand` was requested
    /// and `actual` was granted.
    pub fn record(&mut self, demand: f64, actual: f64, delta: SimTime) {
        if delta == 0 {
            return;
        }
        let requested = consumed(demand, delta);
        let delivered = consumed(actual, delta);
        self.demand += requested;
        self.actual += delivered;
        self.overcommit += (requested - delivered).max(0.0);
    }

    /// Adds another set of counters.
    pub fn merge(&mut self, other: &FlowCounters) {
        self.demand += other.demand;
        self.actual += other.actual;
        self.overcommit += other.overcommit;
    }
}
