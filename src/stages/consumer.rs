//! The stage hosting a [`ResourceConsumer`].

use std::any::Any;

use crate::consumer::{ConsumerContext, ConsumerEvent, ConsumerOutcome, ConsumerState, NextAction, ResourceConsumer};
use crate::error::ConsumerError;
use crate::flow::{FlowCounters, FlowGraph, FlowStage, StageContext};
use crate::numeric::consumed;
use crate::types::{after, InletId, SimTime, StageId, IDLE};

/// Callback run once with the consumer's outcome.
pub type CompletionWaiter = Box<dyn FnOnce(&ConsumerOutcome)>;

/// Drives a consumer from its single inlet.
///
/// The consumer starts the first time the stage runs with its inlet
/// connected. From then on every update accounts the work done at the rate
/// granted since the previous update, hands the consumer a fresh
/// [`ConsumerContext`] and applies its [`NextAction`].
pub struct ConsumerStage<C> {
    /// The hosted workload
    consumer: C,
    /// Lifecycle state
    state: ConsumerState,
    /// Instant of the previous update
    last_update: SimTime,
    /// Rate granted at the previous update
    speed: f64,
    /// Rate last requested
    demand: f64,
    /// Capacity seen at the previous update
    capacity: f64,
    /// Work consumed so far
    consumed: f64,
    counters: FlowCounters,
    outcome: Option<ConsumerOutcome>,
    waiters: Vec<CompletionWaiter>,
}

impl<C: ResourceConsumer + 'static> ConsumerStage<C> {
    /// Wraps a consumer.
    pub fn new(consumer: C) -> Self {
        Self {
            consumer,
            state: ConsumerState::NotStarted,
            last_update: 0,
            speed: 0.0,
            demand: 0.0,
            capacity: 0.0,
            consumed: 0.0,
            counters: FlowCounters::default(),
            outcome: None,
            waiters: Vec::new(),
        }
    }

    /// Adds the stage to `graph` with one inlet.
    pub fn install(self, graph: &mut FlowGraph, name: impl Into<String>) -> (StageId, InletId) {
        let stage = graph.add_stage(name, self);
        let inlet = graph.add_inlet(stage);
        (stage, inlet)
    }

    /// Registers a callback for the outcome. Runs immediately if the consumer
    /// already finished.
    pub fn on_finish(&mut self, waiter: impl FnOnce(&ConsumerOutcome) + 'static) {
        match &self.outcome {
            Some(outcome) => waiter(outcome),
            None => self.waiters.push(Box::new(waiter)),
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn outcome(&self) -> Option<&ConsumerOutcome> {
        self.outcome.as_ref()
    }

    /// Work consumed so far.
    pub fn consumed(&self) -> f64 {
        self.consumed
    }

    pub fn counters(&self) -> &FlowCounters {
        &self.counters
    }

    /// Rate granted at the last update.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn demand(&self) -> f64 {
        self.demand
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }

    fn start(&mut self, now: SimTime, capacity: f64) {
        assert_eq!(self.state, ConsumerState::NotStarted, "consumer started twice");
        self.state = ConsumerState::Running;
        self.last_update = now;
        self.capacity = capacity;
    }

    /// Accounts the interval since the previous update at the old speed.
    fn account(&mut self, now: SimTime) -> SimTime {
        let delta = now.saturating_sub(self.last_update);
        self.consumed += consumed(self.speed, delta);
        self.counters.record(self.demand, self.speed, delta);
        self.last_update = now;
        delta
    }

    fn context(&self, now: SimTime, capacity: f64, rate: f64) -> ConsumerContext {
        ConsumerContext {
            now,
            capacity,
            rate,
            speed: self.speed,
            demand: self.demand,
        }
    }

    fn finish(&mut self, outcome: ConsumerOutcome) {
        self.state = match outcome {
            ConsumerOutcome::Exited { .. } => ConsumerState::Exited,
            ConsumerOutcome::Failed { .. } => ConsumerState::Failed,
        };
        for waiter in self.waiters.drain(..) {
            waiter(&outcome);
        }
        self.outcome = Some(outcome);
    }

    fn fail(&mut self, ctx: &mut StageContext<'_>, inlet: InletId, cctx: &ConsumerContext, cause: ConsumerError) {
        if self.state == ConsumerState::Running {
            self.consumer.on_failure(cctx, &cause);
        }
        ctx.pull(inlet, 0.0);
        self.demand = 0.0;
        self.finish(ConsumerOutcome::Failed { at: cctx.now, cause });
    }
}

impl<C: ResourceConsumer + 'static> FlowStage for ConsumerStage<C> {
    fn on_update(&mut self, ctx: &mut StageContext<'_>, now: SimTime) -> SimTime {
        let Some(&inlet) = ctx.inlets().first() else {
            return IDLE;
        };
        if self.state.is_terminal() {
            return IDLE;
        }
        let port = ctx.inlet(inlet);

        // 1) Start once connected
        let first = self.state == ConsumerState::NotStarted;
        if first {
            if !port.connected {
                return IDLE;
            }
            self.start(now, port.capacity);
            let cctx = self.context(now, port.capacity, port.rate);
            self.consumer.on_event(&cctx, ConsumerEvent::Start);
        }

        // 2) Account the interval at the previous speed
        let delta = self.account(now);
        let cctx = self.context(now, port.capacity, port.rate);
        if !first && port.capacity != self.capacity {
            self.capacity = port.capacity;
            self.consumer.on_event(&cctx, ConsumerEvent::Capacity);
        }
        self.speed = port.rate;

        // 3) Ask the consumer what's next
        match self.consumer.on_next(&cctx, now, delta) {
            Ok(NextAction::Consume { rate, duration }) => {
                let rate = rate.max(0.0);
                ctx.pull(inlet, rate);
                self.demand = rate;
                if duration == IDLE {
                    IDLE
                } else {
                    after(now, duration.max(1))
                }
            }
            Ok(NextAction::Exit) => {
                ctx.pull(inlet, 0.0);
                self.demand = 0.0;
                self.consumer.on_event(&cctx, ConsumerEvent::Exit);
                tracing::debug!(stage = ctx.id(), now, consumed = self.consumed, "consumer exited");
                self.finish(ConsumerOutcome::Exited {
                    at: now,
                    consumed: self.consumed,
                });
                IDLE
            }
            Err(cause) => {
                tracing::warn!(stage = ctx.id(), now, error = %cause, "consumer failed");
                self.fail(ctx, inlet, &cctx, cause);
                IDLE
            }
        }
    }

    fn on_stop(&mut self, ctx: &mut StageContext<'_>, now: SimTime) {
        if self.state.is_terminal() {
            return;
        }
        let Some(&inlet) = ctx.inlets().first() else {
            self.finish(ConsumerOutcome::Failed {
                at: now,
                cause: ConsumerError::Cancelled,
            });
            return;
        };
        if self.state == ConsumerState::Running {
            self.account(now);
        }
        let port = ctx.inlet(inlet);
        let cctx = self.context(now, port.capacity, port.rate);
        tracing::debug!(stage = ctx.id(), now, "consumer cancelled");
        self.fail(ctx, inlet, &cctx, ConsumerError::Cancelled);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
