//! # dcsim
//!
//! A deterministic discrete-event kernel for datacenter simulation.
//!
//! Virtual time is an integer number of milliseconds that only moves when the
//! scheduler pops an event. On top of the scheduler the crate provides:
//!
//! - **Timers** keyed per owner, where re-arming or cancelling makes pending
//!   wake-ups stale instead of removing them.
//! - **Actors** with replaceable behaviors, FIFO mailboxes, dead letters and
//!   per-actor timers.
//! - **A resource-flow graph** of stages connected through ports. Consumers
//!   pull demand, providers push rates, and a change propagates to a fixed
//!   point before virtual time advances.
//! - **Stages** for the usual topology: a capacity-limited source, max-min
//!   fair and exclusive switches, and a stage driving a workload.
//! - **Placement** of tasks on hosts through filters and weighers.
//!
//! ## Features
//!
//! - `parallel` - Run independent scenarios on a rayon thread pool
//!
//! ## Quick Start
//!
//! ```rust
//! use dcsim::consumer::BoundedWork;
//! use dcsim::stages::FlowSource;
//! use dcsim::{KernelConfig, Simulation, StopReason};
//!
//! let mut sim: Simulation<()> = Simulation::new(KernelConfig::default()).unwrap();
//!
//! // A 100-unit resource and one job processing 1000 units at half speed
//! let cpu = sim.kernel().add_source("cpu", FlowSource::new(100.0));
//! sim.attach_consumer("job", BoundedWork::new(1000.0, 0.5), cpu);
//!
//! let summary = sim.run_until_idle();
//! assert_eq!(summary.stop_reason, StopReason::Idle);
//! assert_eq!(summary.final_time, 20_000);
//! assert_eq!(summary.consumers_exited, 1);
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use dcsim::KernelConfig;
//!
//! let config = KernelConfig::from_yaml(&std::fs::read_to_string("run.yaml")?)?;
//! dcsim::init_logging(&config.log_level);
//! ```

pub mod types;
pub mod error;
pub mod numeric;
pub mod event;
pub mod scheduler;
pub mod timer;
pub mod actor;
pub mod flow;
pub mod consumer;
pub mod stages;
pub mod placement;
pub mod registry;
pub mod config;
pub mod stats;
pub mod engine;
pub mod parallel;

// Re-export commonly used types
pub use types::{after, ActorId, HostId, InletId, OutletId, SimTime, StageId, IDLE};
pub use error::{ConsumerError, PlacementError, RegistryError, ScheduleError};
pub use event::{Event, EventHandle, EventKey};
pub use scheduler::{EventHandler, RunBudget, RunOutcome, Scheduler, StopReason, WakeupSink};
pub use timer::TimerSubsystem;
pub use actor::{ActorContext, ActorSystem, Behavior, Signal};
pub use flow::{FlowGraph, FlowStage, StageContext};
pub use consumer::{ConsumerContext, ConsumerOutcome, ConsumerState, NextAction, ResourceConsumer};
pub use stages::{ConsumerStage, ExclusiveSwitch, FlowSource, MaxMinSwitch};
pub use placement::{FilterScheduler, HostView, TaskRequest};
pub use registry::{create_default_registry, ConsumerRegistry, WorkloadSpec};
pub use config::{ConfigError, KernelConfig, KernelConfigBuilder};
pub use stats::{KernelStats, RunSummary};
pub use engine::{Kernel, SimEvent, Simulation};
pub use parallel::ScenarioRunner;

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` takes precedence over `level`. Calling this more than once is
/// harmless; only the first subscriber is installed.
///
/// # Example
///
/// ```rust,ignore
/// dcsim::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
