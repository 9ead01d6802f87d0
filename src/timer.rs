//! Keyed, generation-counted timers layered on the scheduler.
//!
//! A timer lives in the subsystem's map under `(owner, key)`. Starting a
//! timer stamps it with a fresh generation and schedules a [`TimerWakeup`]
//! carrying that generation. When the wake-up arrives it is honoured only if
//! the timer still exists and its generation matches; anything else is a
//! stale wake-up and is dropped.
//!
//! Cancelling therefore never searches the event queue: it removes the map
//! entry and the orphaned wake-up is recognised on arrival.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::scheduler::WakeupSink;
use crate::types::{after, SimTime};

/// The scheduler payload of a pending timer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerWakeup<O, K> {
    /// The timer owner
    pub owner: O,
    /// The timer key within the owner
    pub key: K,
    /// The generation the wake-up was scheduled with
    pub generation: u64,
}

/// A timer that was honoured by [`TimerSubsystem::deliver`].
#[derive(Clone, Debug, PartialEq)]
pub struct TimerFired<O, K, P> {
    /// The timer owner
    pub owner: O,
    /// The timer key within the owner
    pub key: K,
    /// The payload given at start
    pub payload: P,
    /// The generation that fired
    pub generation: u64,
}

#[derive(Clone, Debug)]
struct TimerEntry<P> {
    payload: P,
    duration: SimTime,
    repeat: bool,
    generation: u64,
}

/// Per-owner keyed timers.
///
/// `O` identifies the owner, `K` the timer within the owner and `P` is the
/// payload handed back when the timer fires.
#[derive(Debug)]
pub struct TimerSubsystem<O, K, P> {
    /// Live timers by (owner, key)
    timers: HashMap<(O, K), TimerEntry<P>>,
    /// Last generation handed out
    next_generation: u64,
    /// Wake-ups dropped because their timer was cancelled or restarted
    stale_discards: u64,
}

impl<O, K, P> TimerSubsystem<O, K, P>
where
    O: Clone + Eq + Hash + Debug,
    K: Clone + Eq + Hash + Debug,
    P: Clone,
{
    /// Creates an empty timer subsystem.
    pub fn new() -> Self {
        Self {
            timers: HashMap::new(),
            next_generation: 0,
            stale_discards: 0,
        }
    }

    /// Starts or replaces the timer under `(owner, key)`.
    ///
    /// The first wake-up is scheduled `duration` ms from now. A repeating
    /// timer re-arms itself every `duration` ms until cancelled.
    ///
    /// # Arguments
    /// * `sink` - Where the wake-up is scheduled
    /// * `owner` - The owner of the timer
    /// * `key` - The key of the timer within the owner
    /// * `payload` - Value handed back on every fire
    /// * `duration` - Delay (and period, for repeating timers) in ms
    /// * `repeat` - Whether the timer is periodic
    ///
    /// # Returns
    /// The generation assigned to the timer.
    ///
    /// # Panics
    /// Panics if a repeating timer is started with a zero period.
    pub fn start<S>(
        &mut self,
        sink: &mut S,
        owner: O,
        key: K,
        payload: P,
        duration: SimTime,
        repeat: bool,
    ) -> u64
    where
        S: WakeupSink<TimerWakeup<O, K>> + ?Sized,
    {
        assert!(
            !repeat || duration > 0,
            "periodic timer {key:?} of {owner:?} needs a positive period"
        );

        self.next_generation += 1;
        let generation = self.next_generation;
        let at = after(sink.now(), duration);

        let replaced = self.timers.insert(
            (owner.clone(), key.clone()),
            TimerEntry {
                payload,
                duration,
                repeat,
                generation,
            },
        );
        tracing::trace!(?owner, ?key, generation, at, restarted = replaced.is_some(), "timer started");

        sink.schedule_at(
            at,
            TimerWakeup {
                owner,
                key,
                generation,
            },
        );
        generation
    }

    /// Starts a single-shot timer.
    pub fn start_single<S>(&mut self, sink: &mut S, owner: O, key: K, payload: P, delay: SimTime) -> u64
    where
        S: WakeupSink<TimerWakeup<O, K>> + ?Sized,
    {
        self.start(sink, owner, key, payload, delay, false)
    }

    /// Starts a periodic timer.
    pub fn start_periodic<S>(&mut self, sink: &mut S, owner: O, key: K, payload: P, period: SimTime) -> u64
    where
        S: WakeupSink<TimerWakeup<O, K>> + ?Sized,
    {
        self.start(sink, owner, key, payload, period, true)
    }

    /// Cancels one timer. Returns false if no such timer was active.
    pub fn cancel(&mut self, owner: &O, key: &K) -> bool {
        self.timers.remove(&(owner.clone(), key.clone())).is_some()
    }

    /// Cancels every timer of `owner`, returning how many were removed.
    pub fn cancel_all(&mut self, owner: &O) -> usize {
        let before = self.timers.len();
        self.timers.retain(|(o, _), _| o != owner);
        before - self.timers.len()
    }

    /// Returns true if the timer is active.
    pub fn is_active(&self, owner: &O, key: &K) -> bool {
        self.timers.contains_key(&(owner.clone(), key.clone()))
    }

    /// Returns the current generation of a timer.
    pub fn generation(&self, owner: &O, key: &K) -> Option<u64> {
        self.timers
            .get(&(owner.clone(), key.clone()))
            .map(|entry| entry.generation)
    }

    /// Handles a wake-up popped from the scheduler.
    ///
    /// Returns the fired timer, or `None` if the wake-up is stale. Periodic
    /// timers are re-armed `duration` ms from now with the same generation.
    pub fn deliver<S>(&mut self, sink: &mut S, wakeup: TimerWakeup<O, K>) -> Option<TimerFired<O, K, P>>
    where
        S: WakeupSink<TimerWakeup<O, K>> + ?Sized,
    {
        let slot = (wakeup.owner.clone(), wakeup.key.clone());
        let entry = match self.timers.get(&slot) {
            Some(entry) if entry.generation == wakeup.generation => entry,
            Some(entry) => {
                self.stale_discards += 1;
                tracing::debug!(
                    owner = ?wakeup.owner,
                    key = ?wakeup.key,
                    stale = wakeup.generation,
                    current = entry.generation,
                    "discarding superseded timer wake-up"
                );
                return None;
            }
            None => {
                self.stale_discards += 1;
                tracing::debug!(owner = ?wakeup.owner, key = ?wakeup.key, "discarding wake-up of cancelled timer");
                return None;
            }
        };

        let fired = TimerFired {
            owner: wakeup.owner.clone(),
            key: wakeup.key.clone(),
            payload: entry.payload.clone(),
            generation: wakeup.generation,
        };

        if entry.repeat {
            let at = after(sink.now(), entry.duration);
            sink.schedule_at(at, wakeup);
        } else {
            self.timers.remove(&slot);
        }
        Some(fired)
    }

    /// Returns the number of active timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Returns true if no timer is active.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Returns the number of stale wake-ups dropped so far.
    pub fn stale_discards(&self) -> u64 {
        self.stale_discards
    }
}

impl<O, K, P> Default for TimerSubsystem<O, K, P>
where
    O: Clone + Eq + Hash + Debug,
    K: Clone + Eq + Hash + Debug,
    P: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
