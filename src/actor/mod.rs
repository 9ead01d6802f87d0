//! Actor runtime driven by the virtual-time scheduler.
//!
//! Actors own a FIFO mailbox, a current [`Behavior`] and a private timer
//! subsystem. Handling a message produces the next behavior, which the
//! runtime swaps in. Nothing runs on another thread: sends become scheduler
//! events at the current instant (or later, for delayed sends), so a message
//! is never processed while its sender is still running.
//!
//! # Example
//!
//! ```rust
//! use dcsim::actor::{ActorEvent, ActorSystem, Behavior};
//! use dcsim::scheduler::{RunBudget, Scheduler};
//! use dcsim::Event;
//!
//! let mut sched: Scheduler<ActorEvent<u32>> = Scheduler::new();
//! let mut system = ActorSystem::new();
//!
//! let echo = system.spawn(&mut sched, "echo", Behavior::receive(|_ctx, n: &u32| {
//!     if *n == 0 { Behavior::stopped() } else { Behavior::same() }
//! }));
//! system.tell(&mut sched, echo, 0);
//!
//! sched.run(
//!     &mut |s: &mut Scheduler<ActorEvent<u32>>, e: Event<ActorEvent<u32>>| system.handle(s, e.payload),
//!     RunBudget::until_idle(),
//! );
//! assert!(!system.is_alive(echo));
//! ```

mod behavior;
mod context;
mod system;

pub use behavior::{Behavior, MessageHandler, Receive, Signal, SignalHandler, TimerKey};
pub use context::ActorContext;
pub use system::{ActorEvent, ActorStats, ActorSystem, DeadLetter, DeadLetterReason};
