//! Statistics of a simulation run.
//!
//! [`KernelStats`] is a detailed snapshot for telemetry collaborators;
//! [`RunSummary`] is the aggregate outcome the driving loop reports upward.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::actor::ActorStats;
use crate::scheduler::StopReason;
use crate::types::SimTime;

/// Scheduler counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Events dispatched
    pub events_fired: u64,
    /// Events cancelled before firing
    pub events_cancelled: u64,
    /// Events still queued
    pub pending: usize,
}

/// Flow-graph counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStats {
    /// Live stages
    pub stages: usize,
    /// Stage invocations
    pub updates: u64,
    /// Wake-ups dropped for removed or rescheduled stages
    pub stale_wakes: u64,
}

/// Outcomes of the consumers attached through the simulation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerTally {
    pub attached: u64,
    pub exited: u64,
    pub failed: u64,
}

impl ConsumerTally {
    /// Consumers that have not finished yet.
    pub fn running(&self) -> u64 {
        self.attached.saturating_sub(self.exited + self.failed)
    }
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    /// Total wall-clock time spent in run loops, in milliseconds
    pub total_wall_time_ms: f64,

    /// Simulated milliseconds per wall-clock second
    pub sim_time_per_second: f64,

    /// Events processed per wall-clock second
    pub events_per_second: f64,
}

/// Snapshot of every kernel counter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelStats {
    /// Virtual time of the snapshot
    pub now: SimTime,
    pub scheduler: SchedulerStats,
    pub flow: FlowStats,
    pub actors: ActorStats,
    pub consumers: ConsumerTally,
    pub timing: TimingStats,
}

impl KernelStats {
    /// Updates timing statistics from the wall-clock time spent running.
    pub fn compute_timing(&mut self, wall_time_ms: f64, simulated: SimTime) {
        self.timing.total_wall_time_ms = wall_time_ms;

        if wall_time_ms > 0.0 {
            let seconds = wall_time_ms / 1000.0;
            self.timing.sim_time_per_second = simulated as f64 / seconds;
            self.timing.events_per_second = self.scheduler.events_fired as f64 / seconds;
        }
    }

    /// All discarded wake-ups: timers and stages.
    pub fn stale_discards(&self) -> u64 {
        self.actors.stale_timer_discards + self.flow.stale_wakes
    }

    /// Exports statistics to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports summary statistics to CSV.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("metric,value\n");
        csv.push_str(&format!("now,{}\n", self.now));
        csv.push_str(&format!("events_fired,{}\n", self.scheduler.events_fired));
        csv.push_str(&format!("events_cancelled,{}\n", self.scheduler.events_cancelled));
        csv.push_str(&format!("stage_updates,{}\n", self.flow.updates));
        csv.push_str(&format!("stale_wakes,{}\n", self.flow.stale_wakes));
        csv.push_str(&format!("messages_processed,{}\n", self.actors.messages_processed));
        csv.push_str(&format!("dead_letters,{}\n", self.actors.dead_letters));
        csv.push_str(&format!("consumers_exited,{}\n", self.consumers.exited));
        csv.push_str(&format!("consumers_failed,{}\n", self.consumers.failed));
        csv.push_str(&format!("wall_time_ms,{:.2}\n", self.timing.total_wall_time_ms));

        csv
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for KernelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Kernel Statistics ===")?;
        writeln!(f, "Virtual time: {} ms", self.now)?;
        writeln!(f)?;

        writeln!(f, "--- Scheduler ---")?;
        writeln!(f, "Events fired: {}", self.scheduler.events_fired)?;
        writeln!(f, "Events cancelled: {}", self.scheduler.events_cancelled)?;
        writeln!(f, "Pending: {}", self.scheduler.pending)?;
        writeln!(f)?;

        writeln!(f, "--- Flow ---")?;
        writeln!(f, "Stages: {}", self.flow.stages)?;
        writeln!(f, "Updates: {}", self.flow.updates)?;
        writeln!(f)?;

        writeln!(f, "--- Actors ---")?;
        writeln!(f, "Spawned: {}, stopped: {}", self.actors.spawned, self.actors.stopped)?;
        writeln!(f, "Messages processed: {}", self.actors.messages_processed)?;
        writeln!(f, "Dead letters: {}", self.actors.dead_letters)?;
        writeln!(f)?;

        writeln!(f, "--- Consumers ---")?;
        writeln!(
            f,
            "Attached: {}, exited: {}, failed: {}",
            self.consumers.attached, self.consumers.exited, self.consumers.failed
        )?;
        writeln!(f, "Discarded wake-ups: {}", self.stale_discards())
    }
}

/// Aggregate outcome of a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub final_time: SimTime,
    /// Events processed over the whole simulation
    pub events_processed: u64,
    pub stop_reason: StopReason,
    pub consumers_exited: u64,
    pub consumers_failed: u64,
    pub dead_letters: u64,
    /// Stale timer and stage wake-ups
    pub stale_discards: u64,
}

impl RunSummary {
    /// Builds the summary of a run that stopped for `stop_reason`.
    pub fn from_stats(stats: &KernelStats, stop_reason: StopReason) -> Self {
        Self {
            final_time: stats.now,
            events_processed: stats.scheduler.events_fired,
            stop_reason,
            consumers_exited: stats.consumers.exited,
            consumers_failed: stats.consumers.failed,
            dead_letters: stats.actors.dead_letters,
            stale_discards: stats.stale_discards(),
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stopped ({:?}) at {} ms after {} events: {} consumers exited, {} failed",
            self.stop_reason, self.final_time, self.events_processed, self.consumers_exited, self.consumers_failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> KernelStats {
        KernelStats {
            now: 5_000,
            scheduler: SchedulerStats {
                events_fired: 40,
                events_cancelled: 3,
                pending: 0,
            },
            flow: FlowStats {
                stages: 4,
                updates: 90,
                stale_wakes: 2,
            },
            actors: ActorStats {
                stale_timer_discards: 1,
                dead_letters: 5,
                ..ActorStats::default()
            },
            consumers: ConsumerTally {
                attached: 3,
                exited: 2,
                failed: 1,
            },
            timing: TimingStats::default(),
        }
    }

    #[test]
    fn test_run_summary_from_stats() {
        let summary = RunSummary::from_stats(&stats(), StopReason::Idle);

        assert_eq!(summary.final_time, 5_000);
        assert_eq!(summary.events_processed, 40);
        assert_eq!(summary.stale_discards, 3);
        assert_eq!(summary.dead_letters, 5);
        assert_eq!(
            summary.to_string(),
            "stopped (Idle) at 5000 ms after 40 events: 2 consumers exited, 1 failed"
        );
    }

    #[test]
    fn test_stats_json_export() {
        let json = stats().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["scheduler"]["events_fired"], 40);
        assert_eq!(value["consumers"]["failed"], 1);
    }

    #[test]
    fn test_stats_csv_export() {
        let csv = stats().to_csv();

        assert!(csv.starts_with("metric,value\n"));
        assert!(csv.contains("events_fired,40"));
        assert!(csv.contains("stale_wakes,2"));
    }

    #[test]
    fn test_compute_timing() {
        let mut stats = stats();
        stats.compute_timing(2_000.0, 5_000);

        assert_eq!(stats.timing.events_per_second, 20.0);
        assert_eq!(stats.timing.sim_time_per_second, 2_500.0);
        assert_eq!(stats.consumers.running(), 0);
    }

    #[test]
    fn test_summary_output() {
        let summary = stats().summary();

        assert!(summary.contains("=== Kernel Statistics ==="));
        assert!(summary.contains("Dead letters: 5"));
    }
}
