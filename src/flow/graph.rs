//! The resource-flow graph: stage storage, port wiring and propagation.

use crate::event::EventHandle;
use crate::scheduler::WakeupSink;
use crate::types::{InletId, OutletId, SimTime, StageId, IDLE};

use super::stage::{DirtyQueue, FlowStage, PortSlot, PortView, StageContext};

/// Default bound on stage invocations within one flush.
pub const DEFAULT_MAX_PROPAGATION_STEPS: u64 = 100_000;

/// Scheduler payload asking the graph to run a stage at its promised time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StageWake {
    /// The stage to run
    pub stage: StageId,
    /// The instant the stage asked for
    pub deadline: SimTime,
}

struct StageSlot {
    /// Stage name, for logs and lookups
    name: String,
    /// The stage; `None` only while it runs
    stage: Option<Box<dyn FlowStage>>,
    /// Input ports in creation order
    inlets: Vec<InletId>,
    /// Output ports in creation order
    outlets: Vec<OutletId>,
    /// Instant the stage asked to run at, `IDLE` if none
    deadline: SimTime,
    /// Scheduler event for `deadline`
    wake: Option<EventHandle>,
    /// Number of `on_update` calls
    invocations: u64,
}

/// A dataflow network of stages connected through rate-carrying ports.
///
/// The graph owns every stage and every port. Stages are identified by a
/// [`StageId`] that is never reused, so a wake-up aimed at a removed stage is
/// recognised and dropped.
///
/// Propagation is push based: when a stage writes a port value that differs
/// from what the peer sees, the peer's stage is queued and re-run at the same
/// instant. [`FlowGraph::flush`] drains that queue until no stage has a stale
/// view before control returns to the scheduler.
pub struct FlowGraph {
    /// Stage slots indexed by id
    stages: Vec<Option<StageSlot>>,
    /// Inlet slab
    inlets: Vec<Option<PortSlot>>,
    /// Outlet slab
    outlets: Vec<Option<PortSlot>>,
    /// Stages to re-run at the current instant
    dirty: DirtyQueue,
    /// Bound on invocations per flush
    max_propagation_steps: u64,
    /// Wake-ups that arrived for removed or rescheduled stages
    stale_wakes: u64,
    /// Total `on_update` calls
    updates: u64,
}

impl FlowGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::with_max_steps(DEFAULT_MAX_PROPAGATION_STEPS)
    }

    /// Creates an empty graph with a custom propagation bound.
    pub fn with_max_steps(max_propagation_steps: u64) -> Self {
        Self {
            stages: Vec::new(),
            inlets: Vec::new(),
            outlets: Vec::new(),
            dirty: DirtyQueue::default(),
            max_propagation_steps: max_propagation_steps.max(1),
            stale_wakes: 0,
            updates: 0,
        }
    }

    /// Adds a stage. It runs for the first time on the next flush.
    pub fn add_stage<T>(&mut self, name: impl Into<String>, stage: T) -> StageId
    where
        T: FlowStage,
    {
        self.add_boxed_stage(name, Box::new(stage))
    }

    /// Adds an already boxed stage.
    pub fn add_boxed_stage(&mut self, name: impl Into<String>, stage: Box<dyn FlowStage>) -> StageId {
        let id = self.stages.len() as StageId;
        let name = name.into();
        tracing::trace!(stage = id, %name, "stage added");
        self.stages.push(Some(StageSlot {
            name,
            stage: Some(stage),
            inlets: Vec::new(),
            outlets: Vec::new(),
            deadline: IDLE,
            wake: None,
            invocations: 0,
        }));
        self.dirty.mark(id);
        id
    }

    /// Adds an input port to a stage.
    ///
    /// # Panics
    /// Panics if the stage does not exist.
    pub fn add_inlet(&mut self, stage: StageId) -> InletId {
        let id = InletId(self.inlets.len());
        self.live_slot_mut(stage).inlets.push(id);
        self.inlets.push(Some(PortSlot::new(stage)));
        self.dirty.mark(stage);
        id
    }

    /// Adds an output port to a stage.
    ///
    /// # Panics
    /// Panics if the stage does not exist.
    pub fn add_outlet(&mut self, stage: StageId) -> OutletId {
        let id = OutletId(self.outlets.len());
        self.live_slot_mut(stage).outlets.push(id);
        self.outlets.push(Some(PortSlot::new(stage)));
        self.dirty.mark(stage);
        id
    }

    /// Connects an outlet to an inlet and propagates.
    ///
    /// # Panics
    /// Panics if either port does not exist or is already connected.
    pub fn connect<S>(&mut self, sink: &mut S, outlet: OutletId, inlet: InletId)
    where
        S: WakeupSink<StageWake> + ?Sized,
    {
        let (capacity, rate, provider) = match self.outlets.get(outlet.0).and_then(Option::as_ref) {
            Some(port) => {
                assert!(port.peer.is_none(), "outlet {outlet:?} is already connected");
                (port.capacity, port.rate, port.owner)
            }
            None => panic!("unknown outlet {outlet:?}"),
        };
        let (demand, consumer) = match self.inlets.get_mut(inlet.0).and_then(Option::as_mut) {
            Some(port) => {
                assert!(port.peer.is_none(), "inlet {inlet:?} is already connected");
                port.peer = Some(outlet.0);
                port.capacity = capacity;
                port.rate = rate;
                (port.demand, port.owner)
            }
            None => panic!("unknown inlet {inlet:?}"),
        };
        if let Some(port) = self.outlets.get_mut(outlet.0).and_then(Option::as_mut) {
            port.peer = Some(inlet.0);
            port.demand = demand;
        }

        tracing::trace!(provider, consumer, ?outlet, ?inlet, "ports connected");
        self.dirty.mark(provider);
        self.dirty.mark(consumer);
        self.flush(sink);
    }

    /// Disconnects the edge attached to `outlet` and propagates.
    ///
    /// The consuming side sees zero capacity and rate, the providing side
    /// zero demand. Returns false if the outlet was not connected.
    pub fn disconnect<S>(&mut self, sink: &mut S, outlet: OutletId) -> bool
    where
        S: WakeupSink<StageWake> + ?Sized,
    {
        let detached = self.detach_outlet(outlet);
        if detached {
            self.flush(sink);
        }
        detached
    }

    fn detach_outlet(&mut self, outlet: OutletId) -> bool {
        let Some(port) = self.outlets.get_mut(outlet.0).and_then(Option::as_mut) else {
            return false;
        };
        let Some(peer) = port.peer.take() else {
            return false;
        };
        port.demand = 0.0;
        let provider = port.owner;
        self.dirty.mark(provider);

        if let Some(peer) = self.inlets.get_mut(peer).and_then(Option::as_mut) {
            peer.peer = None;
            peer.capacity = 0.0;
            peer.rate = 0.0;
            self.dirty.mark(peer.owner);
        }
        true
    }

    fn detach_inlet(&mut self, inlet: InletId) -> bool {
        let peer = self
            .inlets
            .get(inlet.0)
            .and_then(Option::as_ref)
            .and_then(|port| port.peer);
        match peer {
            Some(outlet) => self.detach_outlet(OutletId(outlet)),
            None => false,
        }
    }

    /// Queues a stage for re-evaluation at the current instant and
    /// propagates.
    pub fn invalidate<S>(&mut self, sink: &mut S, stage: StageId)
    where
        S: WakeupSink<StageWake> + ?Sized,
    {
        if self.contains(stage) {
            self.dirty.mark(stage);
            self.flush(sink);
        }
    }

    /// Runs queued stages at the current instant until none is left.
    ///
    /// Returns the number of stage invocations.
    pub fn flush<S>(&mut self, sink: &mut S) -> u64
    where
        S: WakeupSink<StageWake> + ?Sized,
    {
        let now = sink.now();
        let mut steps = 0;
        while let Some(stage) = self.dirty.pop() {
            if steps >= self.max_propagation_steps {
                tracing::warn!(
                    now,
                    steps,
                    pending = self.dirty.len() + 1,
                    "flow propagation did not converge, dropping pending updates"
                );
                self.dirty.clear();
                break;
            }
            if self.run_stage(sink, stage, now) {
                steps += 1;
            }
        }
        steps
    }

    /// Handles a stage wake-up popped from the scheduler.
    pub fn on_wake<S>(&mut self, sink: &mut S, wake: StageWake)
    where
        S: WakeupSink<StageWake> + ?Sized,
    {
        let slot = match self.stages.get_mut(wake.stage as usize).and_then(Option::as_mut) {
            Some(slot) if slot.deadline == wake.deadline && slot.wake.is_some() => slot,
            Some(_) => {
                self.stale_wakes += 1;
                tracing::debug!(stage = wake.stage, deadline = wake.deadline, "discarding superseded stage wake-up");
                return;
            }
            None => {
                self.stale_wakes += 1;
                tracing::debug!(stage = wake.stage, "discarding wake-up of removed stage");
                return;
            }
        };
        slot.wake = None;
        slot.deadline = IDLE;
        self.dirty.mark(wake.stage);
        self.flush(sink);
    }

    fn run_stage<S>(&mut self, sink: &mut S, id: StageId, now: SimTime) -> bool
    where
        S: WakeupSink<StageWake> + ?Sized,
    {
        let index = id as usize;
        let Some(mut stage) = self
            .stages
            .get_mut(index)
            .and_then(Option::as_mut)
            .and_then(|slot| slot.stage.take())
        else {
            return false;
        };

        let next = match self.stages[index].as_ref() {
            Some(slot) => {
                let mut ctx = StageContext {
                    stage: id,
                    now,
                    own_inlets: &slot.inlets,
                    own_outlets: &slot.outlets,
                    inlets: &mut self.inlets,
                    outlets: &mut self.outlets,
                    dirty: &mut self.dirty,
                };
                stage.on_update(&mut ctx, now)
            }
            None => IDLE,
        };
        self.updates += 1;

        if let Some(slot) = self.stages[index].as_mut() {
            slot.stage = Some(stage);
            slot.invocations += 1;
            tracing::trace!(stage = id, name = %slot.name, now, next, "stage updated");
        }
        self.reschedule(sink, id, now, next);
        true
    }

    fn reschedule<S>(&mut self, sink: &mut S, id: StageId, now: SimTime, next: SimTime)
    where
        S: WakeupSink<StageWake> + ?Sized,
    {
        let Some(slot) = self.stages.get_mut(id as usize).and_then(Option::as_mut) else {
            return;
        };
        let next = next.max(now);
        if slot.deadline == next && (next == IDLE || slot.wake.is_some()) {
            return;
        }
        if let Some(handle) = slot.wake.take() {
            sink.cancel(handle);
        }
        slot.deadline = next;
        if next != IDLE {
            slot.wake = Some(sink.schedule_at(next, StageWake { stage: id, deadline: next }));
        }
    }

    /// Removes a stage, disconnecting all of its ports.
    ///
    /// The stage's `on_stop` runs first, then every peer is re-evaluated. A
    /// wake-up still queued for the stage becomes a no-op.
    pub fn remove_stage<S>(&mut self, sink: &mut S, id: StageId) -> Option<Box<dyn FlowStage>>
    where
        S: WakeupSink<StageWake> + ?Sized,
    {
        let now = sink.now();
        let mut slot = self.stages.get_mut(id as usize).and_then(Option::take)?;
        let mut stage = slot.stage.take()?;

        // 1) Let the stage release its edges
        {
            let mut ctx = StageContext {
                stage: id,
                now,
                own_inlets: &slot.inlets,
                own_outlets: &slot.outlets,
                inlets: &mut self.inlets,
                outlets: &mut self.outlets,
                dirty: &mut self.dirty,
            };
            stage.on_stop(&mut ctx, now);
        }

        // 2) Detach and drop its ports
        for inlet in slot.inlets.drain(..) {
            self.detach_inlet(inlet);
            self.inlets[inlet.0] = None;
        }
        for outlet in slot.outlets.drain(..) {
            self.detach_outlet(outlet);
            self.outlets[outlet.0] = None;
        }

        tracing::debug!(stage = id, name = %slot.name, "stage removed");
        self.flush(sink);
        Some(stage)
    }

    /// Returns a typed reference to a stage.
    pub fn stage<T: FlowStage>(&self, id: StageId) -> Option<&T> {
        self.stages
            .get(id as usize)?
            .as_ref()?
            .stage
            .as_ref()?
            .as_any()
            .downcast_ref::<T>()
    }

    /// Returns a typed mutable reference to a stage.
    ///
    /// Changes made through this reference are not seen by peers until the
    /// stage is invalidated; prefer [`FlowGraph::update_stage`].
    pub fn stage_mut<T: FlowStage>(&mut self, id: StageId) -> Option<&mut T> {
        self.stages
            .get_mut(id as usize)?
            .as_mut()?
            .stage
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<T>()
    }

    /// Mutates a stage and invalidates it.
    ///
    /// Returns `None` if the stage does not exist or is not a `T`.
    pub fn update_stage<T, S, R>(&mut self, sink: &mut S, id: StageId, f: impl FnOnce(&mut T) -> R) -> Option<R>
    where
        T: FlowStage,
        S: WakeupSink<StageWake> + ?Sized,
    {
        let result = f(self.stage_mut::<T>(id)?);
        self.invalidate(sink, id);
        Some(result)
    }

    /// Returns true if the stage exists.
    pub fn contains(&self, id: StageId) -> bool {
        matches!(self.stages.get(id as usize), Some(Some(_)))
    }

    /// Returns the name of a stage.
    pub fn stage_name(&self, id: StageId) -> Option<&str> {
        self.slot(id).map(|slot| slot.name.as_str())
    }

    /// Finds a stage by name.
    pub fn find_stage(&self, name: &str) -> Option<StageId> {
        self.stages
            .iter()
            .enumerate()
            .find(|(_, slot)| slot.as_ref().is_some_and(|slot| slot.name == name))
            .map(|(id, _)| id as StageId)
    }

    /// Returns the instant a stage asked to run at.
    pub fn deadline(&self, id: StageId) -> Option<SimTime> {
        self.slot(id).map(|slot| slot.deadline)
    }

    /// Returns how many times a stage's `on_update` ran.
    pub fn invocations(&self, id: StageId) -> u64 {
        self.slot(id).map_or(0, |slot| slot.invocations)
    }

    /// Returns the inlets of a stage.
    pub fn inlets_of(&self, id: StageId) -> &[InletId] {
        self.slot(id).map_or(&[], |slot| slot.inlets.as_slice())
    }

    /// Returns the outlets of a stage.
    pub fn outlets_of(&self, id: StageId) -> &[OutletId] {
        self.slot(id).map_or(&[], |slot| slot.outlets.as_slice())
    }

    /// Reads an inlet.
    pub fn inlet(&self, id: InletId) -> Option<PortView> {
        self.inlets.get(id.0)?.as_ref().map(PortSlot::view)
    }

    /// Reads an outlet.
    pub fn outlet(&self, id: OutletId) -> Option<PortView> {
        self.outlets.get(id.0)?.as_ref().map(PortSlot::view)
    }

    /// Ids of the live stages in creation order.
    pub fn stage_ids(&self) -> impl Iterator<Item = StageId> + '_ {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(id, _)| id as StageId)
    }

    /// Returns the number of live stages.
    pub fn len(&self) -> usize {
        self.stages.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if the graph has no stage.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if stages are waiting for a flush.
    pub fn has_pending_updates(&self) -> bool {
        self.dirty.len() > 0
    }

    /// Returns the number of discarded wake-ups.
    pub fn stale_wakes(&self) -> u64 {
        self.stale_wakes
    }

    /// Returns the total number of stage invocations.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    fn slot(&self, id: StageId) -> Option<&StageSlot> {
        self.stages.get(id as usize)?.as_ref()
    }

    fn live_slot_mut(&mut self, id: StageId) -> &mut StageSlot {
        match self.stages.get_mut(id as usize).and_then(Option::as_mut) {
            Some(slot) => slot,
            None => panic!("unknown stage {id}"),
        }
    }
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}
