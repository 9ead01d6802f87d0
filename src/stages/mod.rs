//! Ready-made flow stages.
//!
//! - [`FlowSource`]: a capacity provider with an optional power model
//! - [`ConsumerStage`]: hosts a [`ResourceConsumer`](crate::consumer::ResourceConsumer)
//! - [`MaxMinSwitch`]: shares pooled inlets fairly between outlets
//! - [`ExclusiveSwitch`]: grants pooled inlets to one outlet at a time
//!
//! A typical host wires one or more sources into a switch and connects each
//! task's consumer stage to an outlet of the switch:
//!
//! ```
//! use dcsim::consumer::BoundedWork;
//! use dcsim::flow::{FlowGraph, StageWake};
//! use dcsim::scheduler::Scheduler;
//! use dcsim::stages::{ConsumerStage, FlowSource, MaxMinSwitch};
//!
//! let mut scheduler: Scheduler<StageWake> = Scheduler::new();
//! let mut graph = FlowGraph::new();
//!
//! let (_, cpu) = FlowSource::new(100.0).install(&mut graph, "cpu");
//! let mux = graph.add_stage("mux", MaxMinSwitch::new());
//! let mux_in = graph.add_inlet(mux);
//! graph.connect(&mut scheduler, cpu, mux_in);
//!
//! for name in ["a", "b"] {
//!     let out = graph.add_outlet(mux);
//!     let (_, inlet) = ConsumerStage::new(BoundedWork::new(500.0, 1.0)).install(&mut graph, name);
//!     graph.connect(&mut scheduler, out, inlet);
//! }
//!
//! // Both tasks run at half the source's capacity.
//! let a = graph.find_stage("a").unwrap();
//! assert_eq!(graph.stage::<ConsumerStage<BoundedWork>>(a).unwrap().speed(), 50.0);
//! ```

mod consumer;
mod exclusive;
mod fair_share;
mod source;

pub use consumer::{CompletionWaiter, ConsumerStage};
pub use exclusive::ExclusiveSwitch;
pub use fair_share::{max_min_allocate, MaxMinSwitch};
pub use source::{FlowSource, PowerModel, ResourceReading};
