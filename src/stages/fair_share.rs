//! Max-min fair multiplexing of several providers over several consumers.

use std::any::Any;

use crate::flow::{FlowCounters, FlowStage, StageContext};
use crate::types::{SimTime, IDLE};

/// Max-min fair allocation of `capacity` across `demands`.
///
/// Demands are satisfied from smallest to largest; once the equal share of
/// what remains drops below a demand, every remaining consumer gets that
/// share. Negative demands count as zero.
///
/// # Examples
/// ```
/// use dcsim::stages::max_min_allocate;
///
/// assert_eq!(max_min_allocate(&[2.0, 10.0, 10.0], 12.0), vec![2.0, 5.0, 5.0]);
/// assert_eq!(max_min_allocate(&[1.0, 2.0], 10.0), vec![1.0, 2.0]);
/// ```
pub fn max_min_allocate(demands: &[f64], capacity: f64) -> Vec<f64> {
    let mut allocation = vec![0.0; demands.len()];
    if demands.is_empty() || capacity <= 0.0 {
        return allocation;
    }

    let mut order: Vec<usize> = (0..demands.len()).collect();
    order.sort_by(|&a, &b| demands[a].total_cmp(&demands[b]).then(a.cmp(&b)));

    let mut remaining = capacity;
    let mut left = demands.len();
    for index in order {
        let share = remaining / left as f64;
        let grant = demands[index].max(0.0).min(share);
        allocation[index] = grant;
        remaining = (remaining - grant).max(0.0);
        left -= 1;
    }
    allocation
}

/// Multiplexes every inlet into one pool and shares it fairly.
///
/// The pool is the sum of the inlet capacities and each outlet is offered it
/// as capacity. The aggregate `min(total demand, pool)` is pulled from the
/// inlets in proportion to their capacity, but only what the inlets were
/// actually granted is shared among the outlets, max-min fair. Behind
/// another switch the granted rate can be well below the pool.
#[derive(Clone, Debug, Default)]
pub struct MaxMinSwitch {
    last_update: SimTime,
    demand: f64,
    rate: f64,
    counters: FlowCounters,
}

impl MaxMinSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate demand seen at the last update.
    pub fn demand(&self) -> f64 {
        self.demand
    }

    /// Aggregate rate granted at the last update.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn counters(&self) -> &FlowCounters {
        &self.counters
    }
}

impl FlowStage for MaxMinSwitch {
    fn on_update(&mut self, ctx: &mut StageContext<'_>, now: SimTime) -> SimTime {
        let delta = now.saturating_sub(self.last_update);
        self.counters.record(self.demand, self.rate, delta);
        self.last_update = now;

        let inlets = ctx.inlets().to_vec();
        let outlets = ctx.outlets().to_vec();

        // 1) Size the pool
        let capacities: Vec<f64> = inlets.iter().map(|&inlet| ctx.inlet(inlet).capacity.max(0.0)).collect();
        let supply: f64 = capacities.iter().sum();
        let granted: f64 = inlets.iter().map(|&inlet| ctx.inlet(inlet).rate.max(0.0)).sum();
        let available = granted.min(supply);

        // 2) Share what was granted among the outlets
        let demands: Vec<f64> = outlets
            .iter()
            .map(|&outlet| {
                let view = ctx.outlet(outlet);
                if view.connected {
                    view.demand.max(0.0)
                } else {
                    0.0
                }
            })
            .collect();
        let allocation = max_min_allocate(&demands, available);
        for (&outlet, &rate) in outlets.iter().zip(&allocation) {
            ctx.set_capacity(outlet, supply);
            ctx.push(outlet, rate);
        }

        // 3) Draw the aggregate from the inlets
        let total_demand: f64 = demands.iter().sum();
        let draw = total_demand.min(supply);
        for (&inlet, &capacity) in inlets.iter().zip(&capacities) {
            let share = if supply > 0.0 { draw * capacity / supply } else { 0.0 };
            ctx.pull(inlet, share);
        }

        self.demand = total_demand;
        self.rate = allocation.iter().sum();
        IDLE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
