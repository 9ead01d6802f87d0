//! The context handed to behavior handlers.

use super::behavior::{Behavior, TimerKey};
use crate::types::{ActorId, SimTime};

/// A side effect requested by a handler, applied by the system after the
/// handler returns.
pub(crate) enum Effect<M> {
    Send {
        to: ActorId,
        message: M,
        delay: SimTime,
    },
    Spawn {
        id: ActorId,
        name: String,
        behavior: Behavior<M>,
    },
    Stop(ActorId),
    StartTimer {
        key: TimerKey,
        message: M,
        duration: SimTime,
        repeat: bool,
    },
    CancelTimer(TimerKey),
    CancelAllTimers,
}

/// Gives a handler access to its identity, the clock and the runtime.
///
/// Every operation is recorded and applied in call order once the handler
/// returns, so a handler never observes the effects of its own sends.
pub struct ActorContext<'a, M> {
    self_id: ActorId,
    now: SimTime,
    next_id: &'a mut ActorId,
    effects: Vec<Effect<M>>,
}

impl<'a, M> ActorContext<'a, M> {
    pub(crate) fn new(self_id: ActorId, now: SimTime, next_id: &'a mut ActorId) -> Self {
        Self {
            self_id,
            now,
            next_id,
            effects: Vec::new(),
        }
    }

    /// The id of the actor running the handler.
    pub fn self_id(&self) -> ActorId {
        self.self_id
    }

    /// The current virtual time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Sends a message, delivered at the current instant after this handler.
    pub fn send(&mut self, to: ActorId, message: M) {
        self.send_after(to, message, 0);
    }

    /// Sends a message delivered `delay` ms from now.
    pub fn send_after(&mut self, to: ActorId, message: M, delay: SimTime) {
        self.effects.push(Effect::Send { to, message, delay });
    }

    /// Spawns a new actor and returns its id.
    ///
    /// # Panics
    /// Panics if `behavior` is `Same` or `Unhandled`.
    pub fn spawn(&mut self, name: impl Into<String>, behavior: Behavior<M>) -> ActorId {
        let name = name.into();
        assert!(
            !behavior.is_directive(),
            "actor `{name}` cannot start with the `{}` directive",
            behavior.kind()
        );
        let id = *self.next_id;
        *self.next_id += 1;
        self.effects.push(Effect::Spawn { id, name, behavior });
        id
    }

    /// Stops another actor. An actor stops itself by returning
    /// [`Behavior::Stopped`].
    pub fn stop(&mut self, actor: ActorId) {
        self.effects.push(Effect::Stop(actor));
    }

    /// Starts (or restarts) a single-shot timer of this actor.
    pub fn start_single_timer(&mut self, key: impl Into<TimerKey>, message: M, delay: SimTime) {
        self.effects.push(Effect::StartTimer {
            key: key.into(),
            message,
            duration: delay,
            repeat: false,
        });
    }

    /// Starts (or restarts) a periodic timer of this actor.
    pub fn start_periodic_timer(&mut self, key: impl Into<TimerKey>, message: M, period: SimTime) {
        self.effects.push(Effect::StartTimer {
            key: key.into(),
            message,
            duration: period,
            repeat: true,
        });
    }

    /// Cancels one timer of this actor.
    pub fn cancel_timer(&mut self, key: impl Into<TimerKey>) {
        self.effects.push(Effect::CancelTimer(key.into()));
    }

    /// Cancels every timer of this actor.
    pub fn cancel_all_timers(&mut self) {
        self.effects.push(Effect::CancelAllTimers);
    }

    pub(crate) fn into_effects(self) -> Vec<Effect<M>> {
        self.effects
    }
}
