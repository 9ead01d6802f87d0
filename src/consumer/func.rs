//! Closure-backed consumers.

use super::{ConsumerContext, NextAction, ResourceConsumer};
use crate::error::ConsumerError;
use crate::types::SimTime;

/// Adapts a closure into a [`ResourceConsumer`].
///
/// ```rust
/// use dcsim::consumer::{FnConsumer, NextAction};
///
/// // Ask for 10 units/s for one second, then exit.
/// let mut calls = 0;
/// let consumer = FnConsumer::new(move |_ctx, _now, _delta| {
///     calls += 1;
///     Ok(if calls == 1 { NextAction::consume(10.0, 1_000) } else { NextAction::Exit })
/// });
/// # let _ = consumer;
/// ```
pub struct FnConsumer<F> {
    next: F,
}

impl<F> FnConsumer<F>
where
    F: FnMut(&ConsumerContext, SimTime, SimTime) -> Result<NextAction, ConsumerError>,
{
    /// Wraps `next`, called for every `on_next`.
    pub fn new(next: F) -> Self {
        Self { next }
    }
}

impl<F> ResourceConsumer for FnConsumer<F>
where
    F: FnMut(&ConsumerContext, SimTime, SimTime) -> Result<NextAction, ConsumerError>,
{
    fn on_next(&mut self, ctx: &ConsumerContext, now: SimTime, delta: SimTime) -> Result<NextAction, ConsumerError> {
        (self.next)(ctx, now, delta)
    }
}
