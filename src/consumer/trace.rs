//! Replay of pre-computed usage fragments.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::{ConsumerContext, NextAction, ResourceConsumer};
use crate::error::ConsumerError;
use crate::types::{after, SimTime};

/// One step of a usage trace.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceFragment {
    /// How long the usage lasts, in ms
    pub duration: SimTime,
    /// Requested rate during the fragment
    pub usage: f64,
}

impl TraceFragment {
    /// Creates a fragment.
    pub fn new(duration: SimTime, usage: f64) -> Self {
        Self { duration, usage }
    }
}

/// Replays fragments back to back, then exits.
///
/// Fragments are laid end to end from the first call, so the replay does not
/// drift even if the stage runs between fragment boundaries.
#[derive(Clone, Debug)]
pub struct TraceReplay {
    fragments: VecDeque<TraceFragment>,
    /// End of the current fragment and its usage
    current: Option<(SimTime, f64)>,
}

impl TraceReplay {
    /// Creates a replay of `fragments`.
    pub fn new(fragments: impl IntoIterator<Item = TraceFragment>) -> Self {
        Self {
            fragments: fragments.into_iter().collect(),
            current: None,
        }
    }

    /// Validates usages and creates the replay.
    pub fn try_new(fragments: impl IntoIterator<Item = TraceFragment>) -> Result<Self, ConsumerError> {
        let replay = Self::new(fragments);
        if let Some(bad) = replay.fragments.iter().find(|f| !(f.usage >= 0.0 && f.usage.is_finite())) {
            return Err(ConsumerError::InvalidWorkload(format!(
                "fragment usage must be a finite non-negative number, got {}",
                bad.usage
            )));
        }
        Ok(replay)
    }

    /// Fragments not started yet.
    pub fn remaining(&self) -> usize {
        self.fragments.len()
    }
}

impl ResourceConsumer for TraceReplay {
    fn on_next(&mut self, _ctx: &ConsumerContext, now: SimTime, _delta: SimTime) -> Result<NextAction, ConsumerError> {
        loop {
            let start = match self.current {
                Some((end, usage)) if now < end => return Ok(NextAction::consume(usage, end - now)),
                Some((end, _)) => end,
                None => now,
            };
            match self.fragments.pop_front() {
                Some(fragment) => {
                    self.current = Some((after(start, fragment.duration), fragment.usage));
                }
                None => return Ok(NextAction::Exit),
            }
        }
    }
}
