//! Behaviors and signals.

use std::fmt;
use std::rc::Rc;

use super::context::ActorContext;

/// Name of an actor timer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey(pub String);

impl From<&str> for TimerKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for TimerKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Notifications delivered through the signal path of a behavior.
#[derive(Clone, Debug, PartialEq)]
pub enum Signal<M> {
    /// The actor was spawned and is about to receive messages.
    Started,
    /// The actor stopped; its mailbox and timers are being discarded.
    PostStop,
    /// One of the actor's timers fired.
    Timer {
        /// Key of the timer
        key: TimerKey,
        /// Payload given when the timer was started
        message: M,
    },
}

/// Message handler of a receiving behavior.
pub type MessageHandler<M> = Rc<dyn Fn(&mut ActorContext<'_, M>, &M) -> Behavior<M>>;

/// Signal handler of a receiving behavior.
pub type SignalHandler<M> = Rc<dyn Fn(&mut ActorContext<'_, M>, &Signal<M>) -> Behavior<M>>;

/// The handlers of a [`Behavior::Receive`].
pub struct Receive<M> {
    on_message: Option<MessageHandler<M>>,
    on_signal: Option<SignalHandler<M>>,
}

impl<M> Receive<M> {
    pub(crate) fn message_handler(&self) -> Option<&MessageHandler<M>> {
        self.on_message.as_ref()
    }

    pub(crate) fn signal_handler(&self) -> Option<&SignalHandler<M>> {
        self.on_signal.as_ref()
    }
}

impl<M> Clone for Receive<M> {
    fn clone(&self) -> Self {
        Self {
            on_message: self.on_message.clone(),
            on_signal: self.on_signal.clone(),
        }
    }
}

/// What an actor does with its next message or signal.
///
/// Behaviors are values: a handler returns the behavior for the next step and
/// the runtime swaps it in. `Same` and `Unhandled` are directives that keep
/// the current behavior and may not be used as an initial behavior.
pub enum Behavior<M> {
    /// Keep the current behavior.
    Same,
    /// Handle messages (and optionally signals) with closures.
    Receive(Receive<M>),
    /// Stop the actor.
    Stopped,
    /// Keep the current behavior and report the message as unhandled.
    Unhandled,
    /// Silently drop every message.
    Ignore,
    /// Report every message as unhandled.
    Empty,
}

impl<M> Behavior<M> {
    /// Keep the current behavior.
    pub fn same() -> Self {
        Self::Same
    }

    /// Stop the actor.
    pub fn stopped() -> Self {
        Self::Stopped
    }

    /// Report the current message as unhandled.
    pub fn unhandled() -> Self {
        Self::Unhandled
    }

    /// Drop all messages.
    pub fn ignore() -> Self {
        Self::Ignore
    }

    /// Treat all messages as unhandled.
    pub fn empty() -> Self {
        Self::Empty
    }

    /// Creates a behavior that handles messages with `handler`. Signals are
    /// ignored until a signal handler is attached with [`Behavior::with_signal`].
    pub fn receive<F>(handler: F) -> Self
    where
        F: Fn(&mut ActorContext<'_, M>, &M) -> Behavior<M> + 'static,
    {
        Self::Receive(Receive {
            on_message: Some(Rc::new(handler)),
            on_signal: None,
        })
    }

    /// Creates a behavior that only reacts to signals. Messages are unhandled.
    pub fn receive_signal<F>(handler: F) -> Self
    where
        F: Fn(&mut ActorContext<'_, M>, &Signal<M>) -> Behavior<M> + 'static,
    {
        Self::Receive(Receive {
            on_message: None,
            on_signal: Some(Rc::new(handler)),
        })
    }

    /// Attaches a signal handler to a receiving behavior.
    ///
    /// Other behaviors are returned unchanged.
    pub fn with_signal<F>(self, handler: F) -> Self
    where
        F: Fn(&mut ActorContext<'_, M>, &Signal<M>) -> Behavior<M> + 'static,
    {
        match self {
            Self::Receive(receive) => Self::Receive(Receive {
                on_message: receive.on_message,
                on_signal: Some(Rc::new(handler)),
            }),
            other => other,
        }
    }

    /// Returns true for `Same` and `Unhandled`.
    pub fn is_directive(&self) -> bool {
        matches!(self, Self::Same | Self::Unhandled)
    }

    /// Returns a short name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Same => "same",
            Self::Receive(_) => "receive",
            Self::Stopped => "stopped",
            Self::Unhandled => "unhandled",
            Self::Ignore => "ignore",
            Self::Empty => "empty",
        }
    }
}

impl<M> Clone for Behavior<M> {
    fn clone(&self) -> Self {
        match self {
            Self::Same => Self::Same,
            Self::Receive(receive) => Self::Receive(receive.clone()),
            Self::Stopped => Self::Stopped,
            Self::Unhandled => Self::Unhandled,
            Self::Ignore => Self::Ignore,
            Self::Empty => Self::Empty,
        }
    }
}

impl<M> fmt::Debug for Behavior<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receive(receive) => f
                .debug_struct("Receive")
                .field("on_message", &receive.on_message.is_some())
                .field("on_signal", &receive.on_signal.is_some())
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}
