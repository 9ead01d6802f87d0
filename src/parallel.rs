//! Running independent scenarios side by side.
//!
//! A single simulation is strictly sequential. Independent runs (different
//! seeds, configurations or workloads) share nothing, so they can run on a
//! rayon thread pool. Each scenario builds its own [`Simulation`] inside the
//! worker; results come back in input order.
//!
//! # Feature Flag
//!
//! Parallel execution requires the `parallel` feature:
//! ```toml
//! [dependencies]
//! dcsim = { version = "0.1", features = ["parallel"] }
//! ```
//! Without it the runner executes scenarios one after the other.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::{ConfigResult, KernelConfig};
use crate::engine::Simulation;
use crate::stats::RunSummary;

/// Executes independent scenarios, in parallel when enabled.
#[derive(Clone, Debug, Default)]
pub struct ScenarioRunner {
    /// Worker threads; 0 uses rayon's global pool
    num_threads: usize,
}

impl ScenarioRunner {
    /// Creates a runner using the global pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a dedicated pool of `num_threads` workers.
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Returns true if scenarios run concurrently.
    pub fn is_parallel(&self) -> bool {
        cfg!(feature = "parallel")
    }

    /// Applies `f` to every scenario sequentially.
    #[cfg(not(feature = "parallel"))]
    pub fn run<S, R, F>(&self, scenarios: Vec<S>, f: F) -> Vec<R>
    where
        S: Send,
        R: Send,
        F: Fn(S) -> R + Send + Sync,
    {
        tracing::debug!(scenarios = scenarios.len(), "running scenarios sequentially");
        scenarios.into_iter().map(f).collect()
    }

    /// Applies `f` to every scenario on the thread pool.
    #[cfg(feature = "parallel")]
    pub fn run<S, R, F>(&self, scenarios: Vec<S>, f: F) -> Vec<R>
    where
        S: Send,
        R: Send,
        F: Fn(S) -> R + Send + Sync,
    {
        tracing::debug!(scenarios = scenarios.len(), threads = self.num_threads, "running scenarios in parallel");
        if self.num_threads > 0 {
            match rayon::ThreadPoolBuilder::new().num_threads(self.num_threads).build() {
                Ok(pool) => return pool.install(|| scenarios.into_par_iter().map(&f).collect()),
                Err(err) => tracing::warn!(error = %err, "falling back to the global thread pool"),
            }
        }
        scenarios.into_par_iter().map(f).collect()
    }

    /// Builds one simulation per configuration, lets `setup` populate it and
    /// runs it until idle.
    pub fn run_simulations<M, F>(&self, configs: Vec<KernelConfig>, setup: F) -> Vec<ConfigResult<RunSummary>>
    where
        M: Clone + 'static,
        F: Fn(&mut Simulation<M>) + Send + Sync,
    {
        self.run(configs, |config| -> ConfigResult<RunSummary> {
            let mut sim = Simulation::new(config)?;
            setup(&mut sim);
            Ok(sim.run_until_idle())
        })
    }
}
