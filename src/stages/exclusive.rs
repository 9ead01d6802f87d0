//! One consumer at a time.

use std::any::Any;
use std::collections::VecDeque;

use crate::flow::{FlowCounters, FlowStage, StageContext};
use crate::types::{OutletId, SimTime, IDLE};

/// Grants the whole pool to a single outlet at a time.
///
/// Outlets asking for a positive rate queue up in the order they first ask.
/// The demand of the head of the queue, capped by the pool, is pulled from
/// the inlets and the head is granted whatever the inlets delivered. Every
/// other outlet is offered the pool as capacity but granted nothing. The
/// head keeps the grant until its demand drops to zero or it disconnects,
/// then the next outlet in line takes over.
#[derive(Clone, Debug, Default)]
pub struct ExclusiveSwitch {
    queue: VecDeque<OutletId>,
    last_update: SimTime,
    demand: f64,
    rate: f64,
    counters: FlowCounters,
}

impl ExclusiveSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The outlet currently holding the grant.
    pub fn active(&self) -> Option<OutletId> {
        self.queue.front().copied()
    }

    /// Outlets waiting behind the active one.
    pub fn waiting(&self) -> usize {
        self.queue.len().saturating_sub(1)
    }

    pub fn counters(&self) -> &FlowCounters {
        &self.counters
    }
}

impl FlowStage for ExclusiveSwitch {
    fn on_update(&mut self, ctx: &mut StageContext<'_>, now: SimTime) -> SimTime {
        let delta = now.saturating_sub(self.last_update);
        self.counters.record(self.demand, self.rate, delta);
        self.last_update = now;

        let inlets = ctx.inlets().to_vec();
        let outlets = ctx.outlets().to_vec();
        let capacities: Vec<f64> = inlets.iter().map(|&inlet| ctx.inlet(inlet).capacity.max(0.0)).collect();
        let supply: f64 = capacities.iter().sum();
        let delivered: f64 = inlets.iter().map(|&inlet| ctx.inlet(inlet).rate.max(0.0)).sum();
        let available = delivered.min(supply);

        // 1) Refresh the line
        let wants = |ctx: &StageContext<'_>, outlet: OutletId| {
            let view = ctx.outlet(outlet);
            view.connected && view.demand > 0.0
        };
        self.queue.retain(|&outlet| wants(ctx, outlet));
        for &outlet in &outlets {
            if wants(ctx, outlet) && !self.queue.contains(&outlet) {
                self.queue.push_back(outlet);
            }
        }
        let active = self.queue.front().copied();

        // 2) Grant the head only
        let requested = active.map_or(0.0, |outlet| ctx.outlet(outlet).demand.min(supply));
        let granted = requested.min(available);
        for &outlet in &outlets {
            ctx.set_capacity(outlet, supply);
            let rate = if Some(outlet) == active { granted } else { 0.0 };
            ctx.push(outlet, rate);
        }

        // 3) Draw the head's demand from the inlets
        for (&inlet, &capacity) in inlets.iter().zip(&capacities) {
            let share = if supply > 0.0 { requested * capacity / supply } else { 0.0 };
            ctx.pull(inlet, share);
        }

        self.demand = outlets
            .iter()
            .map(|&outlet| ctx.outlet(outlet))
            .filter(|view| view.connected)
            .map(|view| view.demand.max(0.0))
            .sum();
        self.rate = granted;
        IDLE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
