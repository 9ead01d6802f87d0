//! A capacity provider with an observable reading.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::flow::{FlowCounters, FlowGraph, FlowStage, StageContext};
use crate::numeric::consumed;
use crate::types::{OutletId, SimTime, StageId, IDLE};

/// Maps utilization in [0, 1] to power draw in watts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PowerModel {
    /// Fixed draw regardless of load
    Constant {
        /// Draw in watts
        watts: f64,
    },
    /// `idle + (max - idle) * u`
    Linear {
        /// Draw at zero load
        idle: f64,
        /// Draw at full load
        max: f64,
    },
    /// `idle + (max - idle) * sqrt(u)`
    Sqrt {
        /// Draw at zero load
        idle: f64,
        /// Draw at full load
        max: f64,
    },
    /// `idle + (max - idle) * u^2`
    Square {
        /// Draw at zero load
        idle: f64,
        /// Draw at full load
        max: f64,
    },
    /// `idle + (max - idle) * u^3`
    Cubic {
        /// Draw at zero load
        idle: f64,
        /// Draw at full load
        max: f64,
    },
}

impl PowerModel {
    /// Power draw at `utilization` (clamped to [0, 1]).
    pub fn power(&self, utilization: f64) -> f64 {
        let u = utilization.clamp(0.0, 1.0);
        match *self {
            Self::Constant { watts } => watts,
            Self::Linear { idle, max } => idle + (max - idle) * u,
            Self::Sqrt { idle, max } => idle + (max - idle) * u.sqrt(),
            Self::Square { idle, max } => idle + (max - idle) * u * u,
            Self::Cubic { idle, max } => idle + (max - idle) * u * u * u,
        }
    }
}

/// Observable state of a driven resource at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceReading {
    /// Instant of the reading
    pub time: SimTime,
    /// Granted rate
    pub rate: f64,
    /// Requested rate
    pub demand: f64,
    /// Offered capacity
    pub capacity: f64,
    /// `rate / capacity`
    pub utilization: f64,
    /// Work supplied so far
    pub supplied: f64,
    /// Time spent with a positive rate, in ms
    pub active_time: SimTime,
    /// Time spent idle, in ms
    pub idle_time: SimTime,
    /// Current power draw in watts (0 without a power model)
    pub power: f64,
    /// Energy used so far in joules
    pub energy: f64,
    /// Requested, delivered and overcommitted work
    pub counters: FlowCounters,
}

/// A fixed, runtime-adjustable capacity on one outlet.
///
/// The source grants `min(demand, capacity)`.
#[derive(Clone, Debug)]
pub struct FlowSource {
    capacity: f64,
    /// Capacity to apply once the elapsed interval has been accounted
    pending_capacity: Option<f64>,
    power_model: Option<PowerModel>,
    /// Instant the accumulators were last brought up to date
    last_update: SimTime,
    started: bool,
    rate: f64,
    demand: f64,
    supplied: f64,
    active_time: SimTime,
    idle_time: SimTime,
    energy: f64,
    counters: FlowCounters,
}

impl FlowSource {
    /// Creates a source offering `capacity` units per second.
    pub fn new(capacity: f64) -> Self {
        Self {
            capacity: capacity.max(0.0),
            pending_capacity: None,
            power_model: None,
            last_update: 0,
            started: false,
            rate: 0.0,
            demand: 0.0,
            supplied: 0.0,
            active_time: 0,
            idle_time: 0,
            energy: 0.0,
            counters: FlowCounters::default(),
        }
    }

    /// Attaches a power model.
    pub fn with_power_model(mut self, model: PowerModel) -> Self {
        self.power_model = Some(model);
        self
    }

    /// Adds the source to `graph` with one outlet.
    pub fn install(self, graph: &mut FlowGraph, name: impl Into<String>) -> (StageId, OutletId) {
        let stage = graph.add_stage(name, self);
        let outlet = graph.add_outlet(stage);
        (stage, outlet)
    }

    /// Offered capacity, including a change not yet propagated.
    pub fn capacity(&self) -> f64 {
        self.pending_capacity.unwrap_or(self.capacity)
    }

    /// Changes the capacity. Invalidate the stage for peers to see it, e.g.
    /// through [`FlowGraph::update_stage`].
    ///
    /// Once the source has started, the change takes effect at its next
    /// update so the interval up to then is accounted at the old capacity.
    pub fn set_capacity(&mut self, capacity: f64) {
        let capacity = capacity.max(0.0);
        if self.started {
            self.pending_capacity = Some(capacity);
        } else {
            self.capacity = capacity;
        }
    }

    fn utilization(&self) -> f64 {
        if self.capacity > 0.0 {
            self.rate / self.capacity
        } else {
            0.0
        }
    }

    fn power(&self) -> f64 {
        self.power_model.map_or(0.0, |model| model.power(self.utilization()))
    }

    /// Reading at `now`, extrapolated from the last update with the current
    /// rate.
    pub fn reading_at(&self, now: SimTime) -> ResourceReading {
        let delta = if self.started {
            now.saturating_sub(self.last_update)
        } else {
            0
        };
        let mut counters = self.counters;
        counters.record(self.demand, self.rate, delta);
        let (active, idle) = if self.rate > 0.0 { (delta, 0) } else { (0, delta) };

        ResourceReading {
            time: now,
            rate: self.rate,
            demand: self.demand,
            capacity: self.capacity,
            utilization: self.utilization(),
            supplied: self.supplied + consumed(self.rate, delta),
            active_time: self.active_time + active,
            idle_time: self.idle_time + idle,
            power: self.power(),
            energy: self.energy + self.power() * delta as f64 / 1000.0,
            counters,
        }
    }

    fn advance(&mut self, now: SimTime) {
        if self.started {
            let delta = now.saturating_sub(self.last_update);
            self.supplied += consumed(self.rate, delta);
            self.counters.record(self.demand, self.rate, delta);
            if self.rate > 0.0 {
                self.active_time += delta;
            } else {
                self.idle_time += delta;
            }
            self.energy += self.power() * delta as f64 / 1000.0;
        }
        self.started = true;
        self.last_update = now;
    }
}

impl FlowStage for FlowSource {
    fn on_update(&mut self, ctx: &mut StageContext<'_>, now: SimTime) -> SimTime {
        self.advance(now);
        if let Some(capacity) = self.pending_capacity.take() {
            self.capacity = capacity;
        }

        let Some(&outlet) = ctx.outlets().first() else {
            self.rate = 0.0;
            self.demand = 0.0;
            return IDLE;
        };
        let view = ctx.outlet(outlet);
        let demand = if view.connected { view.demand.max(0.0) } else { 0.0 };
        let grant = demand.min(self.capacity);

        ctx.set_capacity(outlet, self.capacity);
        ctx.push(outlet, grant);
        self.demand = demand;
        self.rate = grant;
        IDLE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{TraceFragment, TraceReplay};
    use crate::event::Event;
    use crate::flow::StageWake;
    use crate::scheduler::{RunBudget, Scheduler};
    use crate::stages::ConsumerStage;

    #[test]
    fn test_power_models() {
        let linear = PowerModel::Linear { idle: 100.0, max: 200.0 };
        assert_eq!(linear.power(0.5), 150.0);
        assert_eq!(linear.power(2.0), 200.0);

        let square = PowerModel::Square { idle: 0.0, max: 100.0 };
        assert_eq!(square.power(0.5), 25.0);

        let sqrt = PowerModel::Sqrt { idle: 0.0, max: 100.0 };
        assert_eq!(sqrt.power(0.25), 50.0);

        assert_eq!(PowerModel::Constant { watts: 42.0 }.power(0.9), 42.0);
    }

    #[test]
    fn test_power_model_serde() {
        let model: PowerModel = serde_json::from_str(r#"{"model":"cubic","idle":10.0,"max":20.0}"#).unwrap();
        assert_eq!(model, PowerModel::Cubic { idle: 10.0, max: 20.0 });
    }

    #[test]
    fn test_reading_extrapolates() {
        let mut source = FlowSource::new(100.0).with_power_model(PowerModel::Linear { idle: 50.0, max: 150.0 });
        source.advance(0);
        source.rate = 50.0;
        source.demand = 80.0;

        let reading = source.reading_at(2_000);
        assert_eq!(reading.supplied, 100.0);
        assert_eq!(reading.active_time, 2_000);
        assert_eq!(reading.utilization, 0.5);
        assert_eq!(reading.power, 100.0);
        assert_eq!(reading.energy, 200.0);
        assert_eq!(reading.counters.overcommit, 60.0);
    }

    #[test]
    fn test_capacity_change_keeps_elapsed_energy() {
        let mut scheduler = Scheduler::new();
        let mut graph = FlowGraph::new();
        let model = PowerModel::Linear { idle: 0.0, max: 100.0 };
        let (cpu, outlet) = FlowSource::new(100.0).with_power_model(model).install(&mut graph, "cpu");
        let replay = TraceReplay::new([TraceFragment::new(5_000, 50.0)]);
        let (_, inlet) = ConsumerStage::new(replay).install(&mut graph, "trace");
        graph.connect(&mut scheduler, outlet, inlet);

        let mut handler = |s: &mut Scheduler<StageWake>, event: Event<StageWake>| graph.on_wake(s, event.payload);
        scheduler.run(&mut handler, RunBudget::until(1_000));
        drop(handler);

        // Half the capacity in use for one second: 50 W.
        graph.update_stage(&mut scheduler, cpu, |source: &mut FlowSource| source.set_capacity(50.0));
        let source = graph.stage::<FlowSource>(cpu).unwrap();
        let reading = source.reading_at(1_000);
        assert_eq!(reading.capacity, 50.0);
        assert!((reading.energy - 50.0).abs() < 1e-9);
        assert_eq!(reading.utilization, 1.0);

        // Fully used for the next second: 100 W.
        assert!((source.reading_at(2_000).energy - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_capacity_before_start_applies_at_once() {
        let mut source = FlowSource::new(10.0);
        source.set_capacity(-4.0);
        assert_eq!(source.capacity(), 0.0);
        source.set_capacity(20.0);
        assert_eq!(source.reading_at(0).capacity, 20.0);
    }
}
