//! The `FlowStage` trait and the context a stage sees while it runs.

use std::any::Any;
use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{InletId, OutletId, SimTime, StageId};

/// A node of the resource-flow graph.
///
/// A stage is invoked only when the graph invalidated it (one of its ports
/// changed, or a caller asked for it) or at the instant it returned from its
/// previous invocation. It must never assume it is polled more often.
pub trait FlowStage: Any {
    /// Recomputes the stage at `now`.
    ///
    /// The stage derives the elapsed time from its own bookkeeping, updates
    /// its ports through `ctx` and returns the next instant it must run at,
    /// or [`IDLE`](crate::types::IDLE) if only a port change can give it more
    /// work.
    fn on_update(&mut self, ctx: &mut StageContext<'_>, now: SimTime) -> SimTime;

    /// Called once when the stage is removed, while its ports are still
    /// connected.
    fn on_stop(&mut self, _ctx: &mut StageContext<'_>, _now: SimTime) {}

    /// Upcast for typed access through [`FlowGraph::stage`](super::FlowGraph::stage).
    fn as_any(&self) -> &dyn Any;

    /// Upcast for typed access through [`FlowGraph::stage_mut`](super::FlowGraph::stage_mut).
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Snapshot of one port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PortView {
    /// Stage owning the port
    pub owner: StageId,
    /// Whether an edge is attached
    pub connected: bool,
    /// Capacity offered by the providing side
    pub capacity: f64,
    /// Rate granted by the providing side
    pub rate: f64,
    /// Rate requested by the consuming side
    pub demand: f64,
}

/// Graph-owned state of a port.
#[derive(Clone, Debug)]
pub(crate) struct PortSlot {
    pub(crate) owner: StageId,
    pub(crate) peer: Option<usize>,
    pub(crate) capacity: f64,
    pub(crate) rate: f64,
    pub(crate) demand: f64,
}

impl PortSlot {
    pub(crate) fn new(owner: StageId) -> Self {
        Self {
            owner,
            peer: None,
            capacity: 0.0,
            rate: 0.0,
            demand: 0.0,
        }
    }

    pub(crate) fn view(&self) -> PortView {
        PortView {
            owner: self.owner,
            connected: self.peer.is_some(),
            capacity: self.capacity,
            rate: self.rate,
            demand: self.demand,
        }
    }
}

/// Stages waiting to be re-evaluated at the current instant, in FIFO order
/// and without duplicates.
#[derive(Debug, Default)]
pub(crate) struct DirtyQueue {
    order: VecDeque<StageId>,
    queued: HashSet<StageId>,
}

impl DirtyQueue {
    pub(crate) fn mark(&mut self, stage: StageId) {
        if self.queued.insert(stage) {
            self.order.push_back(stage);
        }
    }

    pub(crate) fn pop(&mut self) -> Option<StageId> {
        let stage = self.order.pop_front()?;
        self.queued.remove(&stage);
        Some(stage)
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.queued.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

/// What a running stage may read and write.
///
/// A stage only writes its own ports: `pull` on its inlets, `push` and
/// `set_capacity` on its outlets. A write that changes the value seen by the
/// peer port marks the peer's stage dirty.
pub struct StageContext<'a> {
    pub(crate) stage: StageId,
    pub(crate) now: SimTime,
    pub(crate) own_inlets: &'a [InletId],
    pub(crate) own_outlets: &'a [OutletId],
    pub(crate) inlets: &'a mut Vec<Option<PortSlot>>,
    pub(crate) outlets: &'a mut Vec<Option<PortSlot>>,
    pub(crate) dirty: &'a mut DirtyQueue,
}

impl<'a> StageContext<'a> {
    /// The running stage.
    pub fn id(&self) -> StageId {
        self.stage
    }

    /// The current virtual time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// The stage's inlets in creation order.
    pub fn inlets(&self) -> &[InletId] {
        self.own_inlets
    }

    /// The stage's outlets in creation order.
    pub fn outlets(&self) -> &[OutletId] {
        self.own_outlets
    }

    /// Reads one of the stage's inlets.
    pub fn inlet(&self, inlet: InletId) -> PortView {
        match self.inlets.get(inlet.0).and_then(Option::as_ref) {
            Some(slot) => slot.view(),
            None => panic!("stage {} reads unknown inlet {:?}", self.stage, inlet),
        }
    }

    /// Reads one of the stage's outlets.
    pub fn outlet(&self, outlet: OutletId) -> PortView {
        match self.outlets.get(outlet.0).and_then(Option::as_ref) {
            Some(slot) => slot.view(),
            None => panic!("stage {} reads unknown outlet {:?}", self.stage, outlet),
        }
    }

    /// Requests `demand` on an inlet.
    pub fn pull(&mut self, inlet: InletId, demand: f64) {
        let peer = {
            let slot = own_slot(&mut self.inlets[..], inlet.0, self.stage, "inlet");
            slot.demand = demand;
            slot.peer
        };
        if let Some(peer) = peer.and_then(|p| self.outlets.get_mut(p)).and_then(Option::as_mut) {
            if peer.demand != demand {
                peer.demand = demand;
                self.dirty.mark(peer.owner);
            }
        }
    }

    /// Grants `rate` on an outlet.
    pub fn push(&mut self, outlet: OutletId, rate: f64) {
        let peer = {
            let slot = own_slot(&mut self.outlets[..], outlet.0, self.stage, "outlet");
            slot.rate = rate;
            slot.peer
        };
        if let Some(peer) = peer.and_then(|p| self.inlets.get_mut(p)).and_then(Option::as_mut) {
            if peer.rate != rate {
                peer.rate = rate;
                self.dirty.mark(peer.owner);
            }
        }
    }

    /// Offers `capacity` on an outlet.
    pub fn set_capacity(&mut self, outlet: OutletId, capacity: f64) {
        let peer = {
            let slot = own_slot(&mut self.outlets[..], outlet.0, self.stage, "outlet");
            slot.capacity = capacity;
            slot.peer
        };
        if let Some(peer) = peer.and_then(|p| self.inlets.get_mut(p)).and_then(Option::as_mut) {
            if peer.capacity != capacity {
                peer.capacity = capacity;
                self.dirty.mark(peer.owner);
            }
        }
    }
}

fn own_slot<'s>(slab: &'s mut [Option<PortSlot>], index: usize, stage: StageId, kind: &str) -> &'s mut PortSlot {
    match slab.get_mut(index).and_then(Option::as_mut) {
        Some(slot) if slot.owner == stage => slot,
        Some(slot) => panic!("stage {stage} writes {kind} {index} owned by stage {}", slot.owner),
        None => panic!("stage {stage} writes unknown {kind} {index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_queue_dedups() {
        let mut queue = DirtyQueue::default();
        queue.mark(3);
        queue.mark(1);
        queue.mark(3);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(3));
        queue.mark(3);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_push_marks_peer_on_change_only() {
        let mut inlets = vec![Some(PortSlot::new(2))];
        let mut outlets = vec![Some(PortSlot::new(1))];
        inlets[0].as_mut().unwrap().peer = Some(0);
        outlets[0].as_mut().unwrap().peer = Some(0);
        let mut dirty = DirtyQueue::default();
        let own_outlets = [OutletId(0)];

        let mut ctx = StageContext {
            stage: 1,
            now: 0,
            own_inlets: &[],
            own_outlets: &own_outlets,
            inlets: &mut inlets,
            outlets: &mut outlets,
            dirty: &mut dirty,
        };
        ctx.push(OutletId(0), 5.0);
        ctx.set_capacity(OutletId(0), 10.0);
        assert_eq!(ctx.inlet(InletId(0)).rate, 5.0);
        assert_eq!(ctx.dirty.pop(), Some(2));

        ctx.push(OutletId(0), 5.0);
        assert_eq!(ctx.dirty.pop(), None);
    }

    #[test]
    #[should_panic(expected = "owned by stage 2")]
    fn test_writing_foreign_port_panics() {
        let mut inlets = vec![Some(PortSlot::new(2))];
        let mut outlets = Vec::new();
        let mut dirty = DirtyQueue::default();

        let mut ctx = StageContext {
            stage: 1,
            now: 0,
            own_inlets: &[],
            own_outlets: &[],
            inlets: &mut inlets,
            outlets: &mut outlets,
            dirty: &mut dirty,
        };
        ctx.pull(InletId(0), 1.0);
    }
}
