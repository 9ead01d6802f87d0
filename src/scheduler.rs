//! Virtual clock and deterministic event scheduler.
//!
//! The scheduler keeps the simulated "now" and a time-ordered queue of
//! pending events. Time only advances when [`Scheduler::advance`] (or one of
//! the `run` loops) pops the earliest event; there is no busy waiting and no
//! real sleep.
//!
//! # Ordering
//!
//! Events are keyed by `(time, sequence)`, where `sequence` is a strictly
//! increasing counter assigned at insertion. Events scheduled for the same
//! instant therefore fire in insertion order, and two runs that schedule the
//! same events in the same order produce the same trace.
//!
//! # Example
//!
//! ```rust
//! use dcsim::scheduler::{RunBudget, Scheduler};
//!
//! let mut sched: Scheduler<&'static str> = Scheduler::new();
//! sched.schedule(10, "b");
//! sched.schedule(5, "a");
//!
//! let mut fired = Vec::new();
//! let outcome = sched.run(
//!     &mut |_: &mut Scheduler<&'static str>, event: dcsim::Event<&'static str>| {
//!         fired.push(event.payload)
//!     },
//!     RunBudget::until_idle(),
//! );
//!
//! assert_eq!(fired, vec!["a", "b"]);
//! assert_eq!(outcome.final_time, 10);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;
use crate::event::{Event, EventHandle, EventKey};
use crate::types::{after, SimTime, IDLE};

/// Receives the events popped by the scheduler.
///
/// The handler gets mutable access to the scheduler so that it can schedule
/// follow-up events or cancel pending ones.
pub trait EventHandler<E> {
    /// Handle one event. The scheduler's clock already equals `event.time`.
    fn handle(&mut self, scheduler: &mut Scheduler<E>, event: Event<E>);
}

impl<E, F> EventHandler<E> for F
where
    F: FnMut(&mut Scheduler<E>, Event<E>),
{
    fn handle(&mut self, scheduler: &mut Scheduler<E>, event: Event<E>) {
        self(scheduler, event)
    }
}

/// Narrow scheduling interface used by timers, actors and the flow graph.
///
/// Components never see the full event type of the simulation; they only
/// schedule their own wake-up type `T`.
pub trait WakeupSink<T> {
    /// Current virtual time.
    fn now(&self) -> SimTime;

    /// Schedule `wakeup` to fire at `at`.
    fn schedule_at(&mut self, at: SimTime, wakeup: T) -> EventHandle;

    /// Cancel a pending wake-up. Returns false if it already fired or was
    /// cancelled.
    fn cancel(&mut self, handle: EventHandle) -> bool;
}

/// Why a run loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopReason {
    /// No events remain.
    Idle,
    /// The next event lies after the virtual time limit.
    TimeLimit,
    /// The event-count budget was exhausted.
    EventLimit,
    /// The wall-clock budget was exhausted.
    WallClock,
}

/// Limits for a run loop. All limits are optional; the default runs until
/// the queue is empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunBudget {
    /// Process events with `time <= until`, then move the clock to `until`
    pub until: Option<SimTime>,
    /// Maximum number of events to process
    pub max_events: Option<u64>,
    /// Maximum wall-clock time to spend
    pub wall_clock: Option<Duration>,
}

impl RunBudget {
    /// Runs until no events remain.
    pub fn until_idle() -> Self {
        Self::default()
    }

    /// Runs until the given virtual time (inclusive).
    pub fn until(time: SimTime) -> Self {
        Self {
            until: Some(time),
            ..Self::default()
        }
    }

    /// Runs for at most `count` events.
    pub fn events(count: u64) -> Self {
        Self {
            max_events: Some(count),
            ..Self::default()
        }
    }

    /// Adds a wall-clock limit.
    pub fn with_wall_clock(mut self, limit: Duration) -> Self {
        self.wall_clock = Some(limit);
        self
    }

    /// Adds an event-count limit.
    pub fn with_max_events(mut self, count: u64) -> Self {
        self.max_events = Some(count);
        self
    }
}

/// Result of a run loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Events processed by this call
    pub events: u64,
    /// Virtual time when the loop returned
    pub final_time: SimTime,
    /// Why the loop returned
    pub reason: StopReason,
}

/// The core deterministic scheduler.
///
/// Owns the virtual clock and the event queue. The queue is a `BTreeMap`
/// keyed by [`EventKey`], which gives ordered pops and O(log n) cancellation.
pub struct Scheduler<E> {
    /// Current virtual time
    now: SimTime,
    /// Sequence number assigned to the next inserted event
    next_sequence: u64,
    /// Pending events in firing order
    queue: BTreeMap<EventKey, E>,
    /// Events popped so far
    events_fired: u64,
    /// Events removed through `cancel`
    events_cancelled: u64,
}

impl<E> Scheduler<E> {
    /// Creates a scheduler whose clock starts at 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a scheduler whose clock starts at `start`.
    pub fn starting_at(start: SimTime) -> Self {
        Self {
            now: start,
            next_sequence: 0,
            queue: BTreeMap::new(),
            events_fired: 0,
            events_cancelled: 0,
        }
    }

    /// Returns the current virtual time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedules an event, failing if `at` lies in the past.
    pub fn try_schedule(&mut self, at: SimTime, payload: E) -> Result<EventHandle, ScheduleError> {
        if at < self.now {
            return Err(ScheduleError::InPast {
                requested: at,
                now: self.now,
            });
        }
        Ok(self.insert(at, payload))
    }

    /// Schedules an event at `at`.
    ///
    /// Scheduling in the past is a programming error: debug builds panic,
    /// release builds clamp the event to the current time.
    pub fn schedule(&mut self, at: SimTime, payload: E) -> EventHandle {
        if at < self.now {
            debug_assert!(
                false,
                "{}",
                ScheduleError::InPast {
                    requested: at,
                    now: self.now
                }
            );
            tracing::warn!(requested = at, now = self.now, "event scheduled in the past, clamping");
            return self.insert(self.now, payload);
        }
        self.insert(at, payload)
    }

    /// Schedules an event `delay` ms after the current time.
    pub fn schedule_after(&mut self, delay: SimTime, payload: E) -> EventHandle {
        let at = after(self.now, delay);
        self.insert(at, payload)
    }

    fn insert(&mut self, at: SimTime, payload: E) -> EventHandle {
        let key = EventKey::new(at, self.next_sequence);
        self.next_sequence += 1;
        self.queue.insert(key, payload);
        tracing::trace!(time = at, sequence = key.sequence, "event scheduled");
        key
    }

    /// Cancels a pending event.
    ///
    /// Cancelling an event that already fired or was already cancelled is a
    /// no-op and returns false.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.remove_key(handle)
    }

    fn remove_key(&mut self, key: EventKey) -> bool {
        let removed = self.queue.remove(&key).is_some();
        if removed {
            self.events_cancelled += 1;
        }
        removed
    }

    /// Returns true if the event is still queued.
    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.queue.contains_key(&handle)
    }

    /// Returns the time of the earliest pending event.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.queue.first_key_value().map(|(key, _)| key.time)
    }

    /// Pops the earliest event and moves the clock to its time.
    pub fn pop_next(&mut self) -> Option<Event<E>> {
        let (key, payload) = self.queue.pop_first()?;
        self.now = key.time;
        self.events_fired += 1;
        Some(Event::new(key, payload))
    }

    /// Pops and dispatches the earliest event.
    ///
    /// Returns whether more events remain after the dispatch.
    pub fn advance<H>(&mut self, handler: &mut H) -> bool
    where
        H: EventHandler<E> + ?Sized,
    {
        match self.pop_next() {
            Some(event) => {
                handler.handle(self, event);
                !self.queue.is_empty()
            }
            None => false,
        }
    }

    /// Dispatches events until the budget is exhausted or the queue is empty.
    pub fn run<H>(&mut self, handler: &mut H, budget: RunBudget) -> RunOutcome
    where
        H: EventHandler<E> + ?Sized,
    {
        let started = Instant::now();
        let mut events = 0;

        let reason = loop {
            if budget.max_events.is_some_and(|max| events >= max) {
                break StopReason::EventLimit;
            }
            if budget.wall_clock.is_some_and(|limit| started.elapsed() >= limit) {
                break StopReason::WallClock;
            }
            match self.peek_time() {
                None => break StopReason::Idle,
                Some(next) if budget.until.is_some_and(|until| next > until) => {
                    break StopReason::TimeLimit;
                }
                Some(_) => {}
            }
            if let Some(event) = self.pop_next() {
                handler.handle(self, event);
                events += 1;
            }
        };

        if matches!(reason, StopReason::Idle | StopReason::TimeLimit) {
            if let Some(until) = budget.until {
                if until != IDLE && until > self.now {
                    self.now = until;
                }
            }
        }

        RunOutcome {
            events,
            final_time: self.now,
            reason,
        }
    }

    /// Returns the number of pending events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if no events are pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the number of events popped so far.
    pub fn events_fired(&self) -> u64 {
        self.events_fired
    }

    /// Returns the number of events removed through `cancel`.
    pub fn events_cancelled(&self) -> u64 {
        self.events_cancelled
    }
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Scheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now)
            .field("pending", &self.queue.len())
            .field("next_sequence", &self.next_sequence)
            .field("events_fired", &self.events_fired)
            .finish()
    }
}

impl<E, T> WakeupSink<T> for Scheduler<E>
where
    T: Into<E>,
{
    fn now(&self) -> SimTime {
        self.now
    }

    fn schedule_at(&mut self, at: SimTime, wakeup: T) -> EventHandle {
        self.schedule(at, wakeup.into())
    }

    fn cancel(&mut self, handle: EventHandle) -> bool {
        self.remove_key(handle)
    }
}

/// Adapts a sink of `U` into a sink of `T` through a mapping closure.
pub struct MapSink<'a, S: ?Sized, U, F> {
    inner: &'a mut S,
    map: F,
    _marker: PhantomData<fn() -> U>,
}

impl<'a, S: ?Sized, U, F> MapSink<'a, S, U, F> {
    /// Wraps `inner`, converting every wake-up through `map`.
    pub fn new(inner: &'a mut S, map: F) -> Self {
        Self {
            inner,
            map,
            _marker: PhantomData,
        }
    }
}

impl<'a, T, U, S, F> WakeupSink<T> for MapSink<'a, S, U, F>
where
    S: WakeupSink<U> + ?Sized,
    F: FnMut(T) -> U,
{
    fn now(&self) -> SimTime {
        self.inner.now()
    }

    fn schedule_at(&mut self, at: SimTime, wakeup: T) -> EventHandle {
        let mapped = (self.map)(wakeup);
        self.inner.schedule_at(at, mapped)
    }

    fn cancel(&mut self, handle: EventHandle) -> bool {
        self.inner.cancel(handle)
    }
}

/// A boxed closure event, run against a world value `W`.
pub struct Action<W>(Box<dyn FnOnce(&mut W, &mut Scheduler<Action<W>>)>);

impl<W> Action<W> {
    /// Wraps a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&mut W, &mut Scheduler<Action<W>>) + 'static,
    {
        Self(Box::new(f))
    }
}

struct ActionRunner<'a, W>(&'a mut W);

impl<'a, W> EventHandler<Action<W>> for ActionRunner<'a, W> {
    fn handle(&mut self, scheduler: &mut Scheduler<Action<W>>, event: Event<Action<W>>) {
        (event.payload.0)(self.0, scheduler)
    }
}

impl<W> Scheduler<Action<W>> {
    /// Schedules a closure at `at`.
    pub fn schedule_action<F>(&mut self, at: SimTime, f: F) -> EventHandle
    where
        F: FnOnce(&mut W, &mut Scheduler<Action<W>>) + 'static,
    {
        self.schedule(at, Action::new(f))
    }

    /// Runs closure events against `world`.
    pub fn run_actions(&mut self, world: &mut W, budget: RunBudget) -> RunOutcome {
        self.run(&mut ActionRunner(world), budget)
    }
}
