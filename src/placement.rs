//! Host selection for tasks.
//!
//! Placement works on read-only [`HostView`] snapshots. A [`FilterScheduler`]
//! drops every host that fails one of its [`HostFilter`]s, scores the rest
//! with its [`HostWeigher`]s and returns the best one. Filters and weighers
//! are plain strategy objects; add your own by implementing the traits.

use serde::{Deserialize, Serialize};

use crate::config::KernelConfig;
use crate::error::PlacementError;
use crate::types::HostId;

/// Read-only snapshot of a host, as seen by placement strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostView {
    pub id: HostId,
    pub name: String,
    /// False while the host is down or in maintenance
    pub available: bool,
    /// Physical cores
    pub cpu_count: u32,
    /// Total CPU capacity in work units per second
    pub cpu_capacity: f64,
    /// Memory in MiB
    pub memory: u64,
    /// vCPUs promised to placed tasks
    pub provisioned_vcpus: u32,
    /// Memory promised to placed tasks, in MiB
    pub provisioned_memory: u64,
    /// Tasks placed on the host
    pub instance_count: u32,
}

impl HostView {
    /// An idle, available host.
    pub fn new(id: HostId, cpu_count: u32, cpu_capacity: f64, memory: u64) -> Self {
        Self {
            id,
            name: format!("host-{id}"),
            available: true,
            cpu_count,
            cpu_capacity,
            memory,
            provisioned_vcpus: 0,
            provisioned_memory: 0,
            instance_count: 0,
        }
    }

    /// Records `task` as placed on this host.
    pub fn assign(&mut self, task: &TaskRequest) {
        self.provisioned_vcpus = self.provisioned_vcpus.saturating_add(task.vcpus);
        self.provisioned_memory = self.provisioned_memory.saturating_add(task.memory);
        self.instance_count = self.instance_count.saturating_add(1);
    }

    /// Releases the resources of `task`.
    pub fn release(&mut self, task: &TaskRequest) {
        self.provisioned_vcpus = self.provisioned_vcpus.saturating_sub(task.vcpus);
        self.provisioned_memory = self.provisioned_memory.saturating_sub(task.memory);
        self.instance_count = self.instance_count.saturating_sub(1);
    }
}

/// What a task asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: u64,
    pub vcpus: u32,
    /// Memory in MiB
    pub memory: u64,
    /// Run on this host only
    #[serde(default)]
    pub pinned_host: Option<HostId>,
}

impl TaskRequest {
    pub fn new(id: u64, vcpus: u32, memory: u64) -> Self {
        Self {
            id,
            vcpus,
            memory,
            pinned_host: None,
        }
    }

    /// Pins the task to `host`.
    pub fn pinned_to(mut self, host: HostId) -> Self {
        self.pinned_host = Some(host);
        self
    }
}

/// Decides whether a host can run a task at all.
pub trait HostFilter {
    fn test(&self, host: &HostView, task: &TaskRequest) -> bool;

    /// Human-readable name for logs.
    fn name(&self) -> &str;
}

/// Scores a host for a task; higher is better.
///
/// Raw scores are normalized to [0, 1] across the candidates before the
/// multiplier is applied, so weighers with different units can be combined.
pub trait HostWeigher {
    fn weigh(&self, host: &HostView, task: &TaskRequest) -> f64;

    /// Factor applied to the normalized score. Negative values prefer low
    /// raw scores.
    fn multiplier(&self) -> f64 {
        1.0
    }

    fn name(&self) -> &str;
}

/// Keeps available hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputeFilter;

impl HostFilter for ComputeFilter {
    fn test(&self, host: &HostView, _task: &TaskRequest) -> bool {
        host.available
    }

    fn name(&self) -> &str {
        "compute"
    }
}

/// Keeps hosts with enough vCPUs left under the allocation ratio.
#[derive(Debug, Clone, Copy)]
pub struct VCpuFilter {
    pub allocation_ratio: f64,
}

impl VCpuFilter {
    pub fn new(allocation_ratio: f64) -> Self {
        Self { allocation_ratio }
    }
}

impl HostFilter for VCpuFilter {
    fn test(&self, host: &HostView, task: &TaskRequest) -> bool {
        let limit = host.cpu_count as f64 * self.allocation_ratio;
        host.provisioned_vcpus.saturating_add(task.vcpus) as f64 <= limit
    }

    fn name(&self) -> &str {
        "vcpu"
    }
}

/// Keeps hosts with enough memory left under the allocation ratio.
#[derive(Debug, Clone, Copy)]
pub struct RamFilter {
    pub allocation_ratio: f64,
}

impl RamFilter {
    pub fn new(allocation_ratio: f64) -> Self {
        Self { allocation_ratio }
    }
}

impl HostFilter for RamFilter {
    fn test(&self, host: &HostView, task: &TaskRequest) -> bool {
        let limit = host.memory as f64 * self.allocation_ratio;
        host.provisioned_memory.saturating_add(task.memory) as f64 <= limit
    }

    fn name(&self) -> &str {
        "ram"
    }
}

/// Prefers hosts with more free memory.
#[derive(Debug, Clone, Copy)]
pub struct RamWeigher {
    pub multiplier: f64,
}

impl RamWeigher {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }
}

impl HostWeigher for RamWeigher {
    fn weigh(&self, host: &HostView, _task: &TaskRequest) -> f64 {
        host.memory as f64 - host.provisioned_memory as f64
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }

    fn name(&self) -> &str {
        "ram"
    }
}

/// Prefers hosts with more free vCPUs.
#[derive(Debug, Clone, Copy)]
pub struct VCpuWeigher {
    pub multiplier: f64,
}

impl VCpuWeigher {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }
}

impl HostWeigher for VCpuWeigher {
    fn weigh(&self, host: &HostView, _task: &TaskRequest) -> f64 {
        host.cpu_count as f64 - host.provisioned_vcpus as f64
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }

    fn name(&self) -> &str {
        "vcpu"
    }
}

/// Scores hosts by the number of placed tasks. Use a negative multiplier to
/// spread tasks out.
#[derive(Debug, Clone, Copy)]
pub struct InstanceCountWeigher {
    pub multiplier: f64,
}

impl InstanceCountWeigher {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }
}

impl HostWeigher for InstanceCountWeigher {
    fn weigh(&self, host: &HostView, _task: &TaskRequest) -> f64 {
        host.instance_count as f64
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }

    fn name(&self) -> &str {
        "instance_count"
    }
}

/// Filter-then-weigh host selection with failure accounting.
pub struct FilterScheduler {
    filters: Vec<Box<dyn HostFilter>>,
    weighers: Vec<Box<dyn HostWeigher>>,
    /// Consecutive failures tolerated before `TooManyFailures`
    max_failures: u32,
    consecutive_failures: u32,
    total_failures: u64,
    placements: u64,
}

impl FilterScheduler {
    /// A scheduler without filters or weighers.
    pub fn new(max_failures: u32) -> Self {
        Self {
            filters: Vec::new(),
            weighers: Vec::new(),
            max_failures,
            consecutive_failures: 0,
            total_failures: 0,
            placements: 0,
        }
    }

    /// The stock setup: compute, vCPU and RAM filters, RAM weigher.
    pub fn from_config(config: &KernelConfig) -> Self {
        Self::new(config.max_scheduling_failures)
            .with_filter(ComputeFilter)
            .with_filter(VCpuFilter::new(config.cpu_allocation_ratio))
            .with_filter(RamFilter::new(config.ram_allocation_ratio))
            .with_weigher(RamWeigher::new(1.0))
    }

    pub fn with_filter(mut self, filter: impl HostFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn with_weigher(mut self, weigher: impl HostWeigher + 'static) -> Self {
        self.weighers.push(Box::new(weigher));
        self
    }

    /// Picks a host for `task`.
    ///
    /// Pinned tasks go through [`FilterScheduler::select_on`]. Ties between
    /// equally scored hosts go to the lowest id.
    pub fn select(&mut self, hosts: &[HostView], task: &TaskRequest) -> Result<HostId, PlacementError> {
        if let Some(host) = task.pinned_host {
            return self.select_on(hosts, task, host);
        }

        let candidates: Vec<&HostView> = hosts.iter().filter(|host| self.passes(host, task)).collect();
        if candidates.is_empty() {
            return Err(self.failure(PlacementError::InsufficientCapacity { task: task.id }));
        }

        let scores = self.scores(&candidates, task);
        let best = candidates
            .iter()
            .zip(&scores)
            .max_by(|(a, sa), (b, sb)| sa.total_cmp(sb).then(b.id.cmp(&a.id)))
            .map(|(host, _)| host.id);

        match best {
            Some(id) => Ok(self.success(id, task)),
            None => Err(self.failure(PlacementError::InsufficientCapacity { task: task.id })),
        }
    }

    /// Places `task` on `host` if it is up and passes every filter.
    pub fn select_on(&mut self, hosts: &[HostView], task: &TaskRequest, host: HostId) -> Result<HostId, PlacementError> {
        let Some(view) = hosts.iter().find(|view| view.id == host).filter(|view| view.available) else {
            return Err(self.failure(PlacementError::HostUnavailable(host)));
        };
        if !self.passes(view, task) {
            return Err(self.failure(PlacementError::InsufficientCapacity { task: task.id }));
        }
        Ok(self.success(host, task))
    }

    fn passes(&self, host: &HostView, task: &TaskRequest) -> bool {
        self.filters.iter().all(|filter| {
            let ok = filter.test(host, task);
            if !ok {
                tracing::trace!(host = host.id, task = task.id, filter = filter.name(), "host filtered out");
            }
            ok
        })
    }

    fn scores(&self, candidates: &[&HostView], task: &TaskRequest) -> Vec<f64> {
        let mut totals = vec![0.0; candidates.len()];
        for weigher in &self.weighers {
            let raw: Vec<f64> = candidates.iter().map(|host| weigher.weigh(host, task)).collect();
            let min = raw.iter().copied().fold(f64::INFINITY, f64::min);
            let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let span = max - min;
            for (total, value) in totals.iter_mut().zip(raw) {
                let normalized = if span > 0.0 { (value - min) / span } else { 0.0 };
                *total += normalized * weigher.multiplier();
            }
        }
        totals
    }

    fn success(&mut self, host: HostId, task: &TaskRequest) -> HostId {
        self.consecutive_failures = 0;
        self.placements += 1;
        tracing::trace!(host, task = task.id, "task placed");
        host
    }

    fn failure(&mut self, cause: PlacementError) -> PlacementError {
        self.consecutive_failures += 1;
        self.total_failures += 1;
        if self.consecutive_failures > self.max_failures {
            tracing::debug!(failures = self.consecutive_failures, max = self.max_failures, "placement keeps failing");
            return PlacementError::TooManyFailures {
                failures: self.consecutive_failures,
                max: self.max_failures,
            };
        }
        tracing::debug!(error = %cause, "placement failed");
        cause
    }

    /// Forgets the current streak of failures.
    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    pub fn placements(&self) -> u64 {
        self.placements
    }
}
