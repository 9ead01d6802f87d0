//! The actor runtime.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::behavior::{Behavior, Signal, TimerKey};
use super::context::{ActorContext, Effect};
use crate::scheduler::{MapSink, WakeupSink};
use crate::timer::{TimerSubsystem, TimerWakeup};
use crate::types::{after, ActorId, SimTime};

/// Scheduler payload of the actor runtime.
#[derive(Clone, Debug, PartialEq)]
pub enum ActorEvent<M> {
    /// Deliver the first Started signal to a freshly spawned actor.
    Start(ActorId),
    /// Process the next message of an actor's mailbox.
    Dispatch(ActorId),
    /// A delayed message arriving at its recipient.
    Deliver {
        /// Recipient
        to: ActorId,
        /// The message
        message: M,
    },
    /// A timer wake-up of one of the actors.
    Timer(TimerWakeup<ActorId, TimerKey>),
}

/// Why a message ended up in the dead-letter list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeadLetterReason {
    /// The behavior did not handle the message.
    Unhandled,
    /// The recipient does not exist (never spawned or already stopped).
    NoRecipient,
    /// The recipient stopped with the message still in its mailbox.
    Discarded,
}

/// A message that was not processed.
#[derive(Clone, Debug, PartialEq)]
pub struct DeadLetter<M> {
    /// When the message was dropped
    pub at: SimTime,
    /// Intended recipient
    pub recipient: ActorId,
    /// The message itself
    pub message: M,
    /// Why it was dropped
    pub reason: DeadLetterReason,
}

/// Counters of the actor runtime.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorStats {
    /// Actors spawned
    pub spawned: u64,
    /// Actors stopped
    pub stopped: u64,
    /// Messages handed to a behavior
    pub messages_processed: u64,
    /// Signals handed to a behavior
    pub signals_delivered: u64,
    /// Messages routed to the dead-letter list
    pub dead_letters: u64,
    /// Timer wake-ups dropped as stale
    pub stale_timer_discards: u64,
}

struct ActorCell<M> {
    name: String,
    behavior: Behavior<M>,
    mailbox: VecDeque<M>,
    timers: TimerSubsystem<ActorId, TimerKey, M>,
}

/// Hosts actors and dispatches their messages, signals and timers.
///
/// The system does not own a scheduler. Every operation takes a
/// [`WakeupSink`] of [`ActorEvent`] and events popped from the scheduler are
/// handed back through [`ActorSystem::handle`].
pub struct ActorSystem<M> {
    /// Live actors by id
    actors: BTreeMap<ActorId, ActorCell<M>>,
    /// Next actor id; ids are never reused
    next_id: ActorId,
    /// Messages that could not be processed
    dead_letters: Vec<DeadLetter<M>>,
    /// Counters
    stats: ActorStats,
}

impl<M> ActorSystem<M>
where
    M: Clone + 'static,
{
    /// Creates an empty actor system.
    pub fn new() -> Self {
        Self {
            actors: BTreeMap::new(),
            next_id: 1,
            dead_letters: Vec::new(),
            stats: ActorStats::default(),
        }
    }

    /// Spawns an actor. It receives [`Signal::Started`] at the current instant.
    ///
    /// # Panics
    /// Panics if `behavior` is `Same` or `Unhandled`.
    pub fn spawn<S>(&mut self, sink: &mut S, name: impl Into<String>, behavior: Behavior<M>) -> ActorId
    where
        S: WakeupSink<ActorEvent<M>> + ?Sized,
    {
        let name = name.into();
        assert!(
            !behavior.is_directive(),
            "actor `{name}` cannot start with the `{}` directive",
            behavior.kind()
        );
        let id = self.next_id;
        self.next_id += 1;
        self.insert_actor(sink, id, name, behavior);
        id
    }

    fn insert_actor<S>(&mut self, sink: &mut S, id: ActorId, name: String, behavior: Behavior<M>)
    where
        S: WakeupSink<ActorEvent<M>> + ?Sized,
    {
        tracing::debug!(actor = id, %name, behavior = behavior.kind(), "actor spawned");
        self.actors.insert(
            id,
            ActorCell {
                name,
                behavior,
                mailbox: VecDeque::new(),
                timers: TimerSubsystem::new(),
            },
        );
        self.stats.spawned += 1;
        let now = sink.now();
        sink.schedule_at(now, ActorEvent::Start(id));
    }

    /// Enqueues a message; it is processed at the current instant, after
    /// every event already scheduled for this instant.
    pub fn tell<S>(&mut self, sink: &mut S, to: ActorId, message: M)
    where
        S: WakeupSink<ActorEvent<M>> + ?Sized,
    {
        let now = sink.now();
        match self.actors.get_mut(&to) {
            Some(cell) => {
                cell.mailbox.push_back(message);
                sink.schedule_at(now, ActorEvent::Dispatch(to));
            }
            None => self.dead_letter(now, to, message, DeadLetterReason::NoRecipient),
        }
    }

    /// Sends a message that arrives `delay` ms from now.
    pub fn tell_after<S>(&mut self, sink: &mut S, to: ActorId, message: M, delay: SimTime)
    where
        S: WakeupSink<ActorEvent<M>> + ?Sized,
    {
        if delay == 0 {
            return self.tell(sink, to, message);
        }
        let at = after(sink.now(), delay);
        sink.schedule_at(at, ActorEvent::Deliver { to, message });
    }

    /// Stops an actor from outside the system.
    ///
    /// The actor receives [`Signal::PostStop`], its timers are cancelled and
    /// its pending messages become dead letters. Returns false if the actor
    /// does not exist.
    pub fn stop<S>(&mut self, sink: &mut S, id: ActorId) -> bool
    where
        S: WakeupSink<ActorEvent<M>> + ?Sized,
    {
        if !self.actors.contains_key(&id) {
            return false;
        }
        self.stop_actor(sink, id);
        true
    }

    /// Processes one event popped from the scheduler.
    pub fn handle<S>(&mut self, sink: &mut S, event: ActorEvent<M>)
    where
        S: WakeupSink<ActorEvent<M>> + ?Sized,
    {
        match event {
            ActorEvent::Start(id) => self.deliver_signal(sink, id, Signal::Started),
            ActorEvent::Dispatch(id) => self.dispatch(sink, id),
            ActorEvent::Deliver { to, message } => {
                let now = sink.now();
                match self.actors.get_mut(&to) {
                    Some(cell) => {
                        cell.mailbox.push_back(message);
                        self.dispatch(sink, to);
                    }
                    None => self.dead_letter(now, to, message, DeadLetterReason::NoRecipient),
                }
            }
            ActorEvent::Timer(wakeup) => self.fire_timer(sink, wakeup),
        }
    }

    fn fire_timer<S>(&mut self, sink: &mut S, wakeup: TimerWakeup<ActorId, TimerKey>)
    where
        S: WakeupSink<ActorEvent<M>> + ?Sized,
    {
        let id = wakeup.owner;
        let Some(cell) = self.actors.get_mut(&id) else {
            self.stats.stale_timer_discards += 1;
            tracing::debug!(actor = id, key = %wakeup.key, "discarding timer of stopped actor");
            return;
        };

        let fired = {
            let mut timer_sink = MapSink::new(&mut *sink, ActorEvent::Timer);
            cell.timers.deliver(&mut timer_sink, wakeup)
        };

        match fired {
            Some(fired) => self.deliver_signal(
                sink,
                id,
                Signal::Timer {
                    key: fired.key,
                    message: fired.payload,
                },
            ),
            // Counted by the actor's timer subsystem.
            None => {}
        }
    }

    fn dispatch<S>(&mut self, sink: &mut S, id: ActorId)
    where
        S: WakeupSink<ActorEvent<M>> + ?Sized,
    {
        let now = sink.now();
        let Some(cell) = self.actors.get_mut(&id) else {
            // Stopped after the message was enqueued; it is already a dead letter.
            tracing::trace!(actor = id, "dispatch to stopped actor");
            return;
        };
        let Some(message) = cell.mailbox.pop_front() else {
            return;
        };
        let current = cell.behavior.clone();

        // 1) Run the handler
        let mut ctx = ActorContext::new(id, now, &mut self.next_id);
        let next = match &current {
            Behavior::Receive(receive) => match receive.message_handler() {
                Some(handler) => handler(&mut ctx, &message),
                None => Behavior::Unhandled,
            },
            Behavior::Ignore => Behavior::Same,
            _ => Behavior::Unhandled,
        };
        let effects = ctx.into_effects();
        self.stats.messages_processed += 1;
        tracing::trace!(actor = id, next = next.kind(), "message processed");

        if matches!(next, Behavior::Unhandled) {
            self.dead_letter(now, id, message, DeadLetterReason::Unhandled);
        }

        // 2) Apply the recorded effects, then switch behavior
        self.apply_effects(sink, id, effects);
        self.transition(sink, id, next);
    }

    fn deliver_signal<S>(&mut self, sink: &mut S, id: ActorId, signal: Signal<M>)
    where
        S: WakeupSink<ActorEvent<M>> + ?Sized,
    {
        let Some(cell) = self.actors.get(&id) else {
            return;
        };
        let current = cell.behavior.clone();
        let (next, effects) = self.run_signal_handler(sink.now(), id, &current, &signal);
        self.apply_effects(sink, id, effects);
        self.transition(sink, id, next);
    }

    fn run_signal_handler(
        &mut self,
        now: SimTime,
        id: ActorId,
        behavior: &Behavior<M>,
        signal: &Signal<M>,
    ) -> (Behavior<M>, Vec<Effect<M>>) {
        let Behavior::Receive(receive) = behavior else {
            return (Behavior::Same, Vec::new());
        };
        let Some(handler) = receive.signal_handler() else {
            return (Behavior::Same, Vec::new());
        };

        let mut ctx = ActorContext::new(id, now, &mut self.next_id);
        let next = handler(&mut ctx, signal);
        self.stats.signals_delivered += 1;
        (next, ctx.into_effects())
    }

    fn transition<S>(&mut self, sink: &mut S, id: ActorId, next: Behavior<M>)
    where
        S: WakeupSink<ActorEvent<M>> + ?Sized,
    {
        match next {
            Behavior::Same | Behavior::Unhandled => {}
            Behavior::Stopped => self.stop_actor(sink, id),
            next => {
                if let Some(cell) = self.actors.get_mut(&id) {
                    cell.behavior = next;
                }
            }
        }
    }

    fn stop_actor<S>(&mut self, sink: &mut S, id: ActorId)
    where
        S: WakeupSink<ActorEvent<M>> + ?Sized,
    {
        let Some(mut cell) = self.actors.remove(&id) else {
            return;
        };
        let now = sink.now();

        // 1) PostStop; the returned behavior is irrelevant
        let (_, effects) = self.run_signal_handler(now, id, &cell.behavior, &Signal::PostStop);

        // 2) Detach timers and discard the mailbox
        let cancelled = cell.timers.cancel_all(&id);
        self.stats.stale_timer_discards += cell.timers.stale_discards();
        for message in cell.mailbox.drain(..) {
            self.dead_letter(now, id, message, DeadLetterReason::Discarded);
        }
        self.stats.stopped += 1;
        tracing::debug!(actor = id, name = %cell.name, timers = cancelled, "actor stopped");

        self.apply_effects(sink, id, effects);
    }

    fn apply_effects<S>(&mut self, sink: &mut S, id: ActorId, effects: Vec<Effect<M>>)
    where
        S: WakeupSink<ActorEvent<M>> + ?Sized,
    {
        for effect in effects {
            match effect {
                Effect::Send { to, message, delay } => self.tell_after(sink, to, message, delay),
                Effect::Spawn { id: child, name, behavior } => self.insert_actor(sink, child, name, behavior),
                Effect::Stop(target) => {
                    self.stop_actor(sink, target);
                }
                Effect::StartTimer {
                    key,
                    message,
                    duration,
                    repeat,
                } => {
                    if let Some(cell) = self.actors.get_mut(&id) {
                        let mut timer_sink = MapSink::new(&mut *sink, ActorEvent::Timer);
                        cell.timers.start(&mut timer_sink, id, key, message, duration, repeat);
                    }
                }
                Effect::CancelTimer(key) => {
                    if let Some(cell) = self.actors.get_mut(&id) {
                        cell.timers.cancel(&id, &key);
                    }
                }
                Effect::CancelAllTimers => {
                    if let Some(cell) = self.actors.get_mut(&id) {
                        cell.timers.cancel_all(&id);
                    }
                }
            }
        }
    }

    fn dead_letter(&mut self, at: SimTime, recipient: ActorId, message: M, reason: DeadLetterReason) {
        tracing::debug!(actor = recipient, ?reason, "dead letter");
        self.stats.dead_letters += 1;
        self.dead_letters.push(DeadLetter {
            at,
            recipient,
            message,
            reason,
        });
    }

    /// Returns true if the actor exists.
    pub fn is_alive(&self, id: ActorId) -> bool {
        self.actors.contains_key(&id)
    }

    /// Returns the name an actor was spawned with.
    pub fn name(&self, id: ActorId) -> Option<&str> {
        self.actors.get(&id).map(|cell| cell.name.as_str())
    }

    /// Returns the number of queued messages of an actor.
    pub fn mailbox_len(&self, id: ActorId) -> usize {
        self.actors.get(&id).map_or(0, |cell| cell.mailbox.len())
    }

    /// Returns true if the actor has an active timer under `key`.
    pub fn has_timer(&self, id: ActorId, key: &TimerKey) -> bool {
        self.actors
            .get(&id)
            .is_some_and(|cell| cell.timers.is_active(&id, key))
    }

    /// Returns the number of live actors.
    pub fn len(&self) -> usize {
        self.actors.len()
    }

    /// Returns true if no actor is alive.
    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Returns the dead letters collected so far.
    pub fn dead_letters(&self) -> &[DeadLetter<M>] {
        &self.dead_letters
    }

    /// Removes and returns the dead letters collected so far.
    pub fn take_dead_letters(&mut self) -> Vec<DeadLetter<M>> {
        std::mem::take(&mut self.dead_letters)
    }

    /// Returns the runtime counters.
    pub fn stats(&self) -> ActorStats {
        let mut stats = self.stats.clone();
        stats.stale_timer_discards += self
            .actors
            .values()
            .map(|cell| cell.timers.stale_discards())
            .sum::<u64>();
        stats
    }
}

impl<M> Default for ActorSystem<M>
where
    M: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::event::Event;
    use crate::scheduler::{RunBudget, Scheduler};

    #[derive(Clone, Debug, PartialEq)]
    enum Msg {
        Inc,
        Get,
        Stop,
        Tick,
        Other,
    }

    type Log = Rc<RefCell<Vec<String>>>;

    fn run(sched: &mut Scheduler<ActorEvent<Msg>>, system: &mut ActorSystem<Msg>, until: SimTime) {
        sched.run(
            &mut |s: &mut Scheduler<ActorEvent<Msg>>, e: Event<ActorEvent<Msg>>| system.handle(s, e.payload),
            RunBudget::until(until),
        );
    }

    fn counter(count: u32, log: Log) -> Behavior<Msg> {
        Behavior::receive(move |_ctx, msg| match msg {
            Msg::Inc => counter(count + 1, log.clone()),
            Msg::Get => {
                log.borrow_mut().push(format!("count={count}"));
                Behavior::same()
            }
            Msg::Stop => Behavior::stopped(),
            _ => Behavior::unhandled(),
        })
    }

    #[test]
    fn test_behavior_replacement() {
        let mut sched = Scheduler::new();
        let mut system = ActorSystem::new();
        let log = Log::default();

        let id = system.spawn(&mut sched, "counter", counter(0, log.clone()));
        system.tell(&mut sched, id, Msg::Inc);
        system.tell(&mut sched, id, Msg::Inc);
        system.tell(&mut sched, id, Msg::Get);
        run(&mut sched, &mut system, 10);

        assert_eq!(*log.borrow(), vec!["count=2"]);
        assert_eq!(system.stats().messages_processed, 3);
    }

    #[test]
    fn test_unhandled_goes_to_dead_letters() {
        let mut sched = Scheduler::new();
        let mut system = ActorSystem::new();
        let log = Log::default();

        let id = system.spawn(&mut sched, "counter", counter(0, log.clone()));
        system.tell(&mut sched, id, Msg::Other);
        system.tell(&mut sched, id, Msg::Inc);
        system.tell(&mut sched, id, Msg::Get);
        run(&mut sched, &mut system, 10);

        // The behavior is kept after an unhandled message.
        assert_eq!(*log.borrow(), vec!["count=1"]);
        let letters = system.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].message, Msg::Other);
        assert_eq!(letters[0].reason, DeadLetterReason::Unhandled);
    }

    #[test]
    fn test_stop_discards_mailbox() {
        let mut sched = Scheduler::new();
        let mut system = ActorSystem::new();
        let log = Log::default();

        let id = system.spawn(&mut sched, "counter", counter(0, log.clone()));
        system.tell(&mut sched, id, Msg::Stop);
        system.tell(&mut sched, id, Msg::Get);
        system.tell(&mut sched, id, Msg::Inc);
        run(&mut sched, &mut system, 10);

        assert!(!system.is_alive(id));
        assert!(log.borrow().is_empty());
        let reasons: Vec<_> = system.dead_letters().iter().map(|l| l.reason).collect();
        assert_eq!(reasons, vec![DeadLetterReason::Discarded, DeadLetterReason::Discarded]);

        // Later sends find no recipient.
        system.tell(&mut sched, id, Msg::Inc);
        assert_eq!(system.dead_letters()[2].reason, DeadLetterReason::NoRecipient);
    }

    #[test]
    fn test_signals_and_timers() {
        let mut sched = Scheduler::new();
        let mut system = ActorSystem::new();
        let log = Log::default();
        let signal_log = log.clone();

        let behavior = Behavior::receive(|_ctx, _msg: &Msg| Behavior::same()).with_signal(move |ctx, signal| {
            match signal {
                Signal::Started => {
                    signal_log.borrow_mut().push(format!("started@{}", ctx.now()));
                    ctx.start_periodic_timer("tick", Msg::Tick, 100);
                }
                Signal::Timer { key, message } => {
                    signal_log.borrow_mut().push(format!("{key}:{message:?}@{}", ctx.now()));
                    if ctx.now() >= 300 {
                        return Behavior::stopped();
                    }
                }
                Signal::PostStop => signal_log.borrow_mut().push(format!("stopped@{}", ctx.now())),
            }
            Behavior::same()
        });

        let id = system.spawn(&mut sched, "ticker", behavior);
        run(&mut sched, &mut system, 1000);

        assert_eq!(
            *log.borrow(),
            vec!["started@0", "tick:Tick@100", "tick:Tick@200", "tick:Tick@300", "stopped@300"]
        );
        assert!(!system.is_alive(id));
        // The periodic re-arm scheduled at 300 was orphaned by the stop.
        assert_eq!(system.stats().stale_timer_discards, 1);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut sched = Scheduler::new();
        let mut system = ActorSystem::new();
        let log = Log::default();
        let inner = log.clone();

        let behavior = Behavior::receive(move |ctx, msg: &Msg| {
            match msg {
                Msg::Inc => ctx.start_single_timer("once", Msg::Tick, 50),
                Msg::Stop => ctx.cancel_timer("once"),
                _ => {}
            }
            Behavior::same()
        })
        .with_signal(move |_ctx, signal| {
            if let Signal::Timer { key, .. } = signal {
                inner.borrow_mut().push(key.to_string());
            }
            Behavior::same()
        });

        let id = system.spawn(&mut sched, "t", behavior);
        system.tell(&mut sched, id, Msg::Inc);
        system.tell_after(&mut sched, id, Msg::Stop, 20);
        run(&mut sched, &mut system, 200);

        assert!(log.borrow().is_empty());
        assert!(!system.has_timer(id, &"once".into()));
        assert_eq!(system.stats().stale_timer_discards, 1);
    }

    #[test]
    fn test_spawn_child_and_reply() {
        let mut sched = Scheduler::new();
        let mut system = ActorSystem::new();
        let log = Log::default();
        let child_log = log.clone();

        let parent = Behavior::receive(move |ctx, msg: &Msg| {
            if *msg == Msg::Inc {
                let child_log = child_log.clone();
                let child = ctx.spawn(
                    "child",
                    Behavior::receive(move |ctx, msg: &Msg| {
                        child_log.borrow_mut().push(format!("child got {msg:?}@{}", ctx.now()));
                        Behavior::stopped()
                    }),
                );
                ctx.send_after(child, Msg::Get, 5);
            }
            Behavior::same()
        });

        let id = system.spawn(&mut sched, "parent", parent);
        system.tell(&mut sched, id, Msg::Inc);
        run(&mut sched, &mut system, 100);

        assert_eq!(*log.borrow(), vec!["child got Get@5"]);
        assert_eq!(system.len(), 1);
        assert_eq!(system.stats().spawned, 2);
        assert_eq!(system.stats().stopped, 1);
    }

    #[test]
    fn test_ignore_and_empty() {
        let mut sched = Scheduler::new();
        let mut system: ActorSystem<Msg> = ActorSystem::new();

        let quiet = system.spawn(&mut sched, "quiet", Behavior::ignore());
        let empty = system.spawn(&mut sched, "empty", Behavior::empty());
        system.tell(&mut sched, quiet, Msg::Inc);
        system.tell(&mut sched, empty, Msg::Inc);
        run(&mut sched, &mut system, 10);

        let letters = system.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].recipient, empty);
    }

    #[test]
    #[should_panic(expected = "cannot start with the `same` directive")]
    fn test_spawn_with_directive_panics() {
        let mut sched: Scheduler<ActorEvent<Msg>> = Scheduler::new();
        let mut system: ActorSystem<Msg> = ActorSystem::new();
        system.spawn(&mut sched, "bad", Behavior::same());
    }
}
