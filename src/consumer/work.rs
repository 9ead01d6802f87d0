//! A fixed amount of work at bounded utilization.

use super::{ConsumerContext, NextAction, ResourceConsumer};
use crate::error::ConsumerError;
use crate::numeric::{approx_ge, consumed, duration_for};
use crate::types::{SimTime, IDLE};

/// Processes `work` units, never asking for more than
/// `capacity * utilization`.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundedWork {
    /// Total work to process
    work: f64,
    /// Fraction of the offered capacity the workload may use, in (0, 1]
    utilization: f64,
    /// Work processed so far
    done: f64,
}

impl BoundedWork {
    /// Creates a workload of `work` units at `utilization`.
    ///
    /// # Panics
    /// Panics if `work` is negative or `utilization` is outside (0, 1].
    pub fn new(work: f64, utilization: f64) -> Self {
        match Self::try_new(work, utilization) {
            Ok(workload) => workload,
            Err(err) => panic!("{err}"),
        }
    }

    /// Creates a workload, validating its parameters.
    pub fn try_new(work: f64, utilization: f64) -> Result<Self, ConsumerError> {
        if !(work >= 0.0 && work.is_finite()) {
            return Err(ConsumerError::InvalidWorkload(format!(
                "work must be a finite non-negative number, got {work}"
            )));
        }
        if !(utilization > 0.0 && utilization <= 1.0) {
            return Err(ConsumerError::InvalidWorkload(format!(
                "utilization must be in (0, 1], got {utilization}"
            )));
        }
        Ok(Self {
            work,
            utilization,
            done: 0.0,
        })
    }

    /// Work left to process.
    pub fn remaining(&self) -> f64 {
        (self.work - self.done).max(0.0)
    }

    /// Work processed so far.
    pub fn done(&self) -> f64 {
        self.done
    }

    /// Returns true once the processed work matches the total.
    pub fn is_finished(&self) -> bool {
        approx_ge(self.done, self.work)
    }
}

impl ResourceConsumer for BoundedWork {
    fn on_next(&mut self, ctx: &ConsumerContext, _now: SimTime, delta: SimTime) -> Result<NextAction, ConsumerError> {
        self.done += consumed(ctx.speed, delta);
        if self.is_finished() {
            return Ok(NextAction::Exit);
        }

        let limit = ctx.capacity * self.utilization;
        if limit <= 0.0 {
            return Ok(NextAction::consume(0.0, IDLE));
        }

        // Finish time follows the granted rate once the provider answered.
        let effective = if ctx.rate > 0.0 { ctx.rate.min(limit) } else { limit };
        let duration = duration_for(self.remaining(), effective).unwrap_or(IDLE);
        Ok(NextAction::consume(limit, duration))
    }
}
