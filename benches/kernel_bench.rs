//! Performance benchmarks for the dcsim kernel.
//!
//! Run with: `cargo bench`
//! Or for specific bench: `cargo bench --bench kernel_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use dcsim::actor::{Behavior, Signal};
use dcsim::consumer::BoundedWork;
use dcsim::stages::{ExclusiveSwitch, FlowSource, MaxMinSwitch};
use dcsim::types::{SimTime, StageId};
use dcsim::{Event, FlowStage, KernelConfig, RunBudget, ScenarioRunner, Scheduler, Simulation};

// ============================================================================
// Helpers
// ============================================================================

fn quiet_config() -> KernelConfig {
    KernelConfig {
        export_interval: None,
        ..KernelConfig::default()
    }
}

/// `consumers` jobs of uneven size behind one switch.
fn switch_scenario<T: FlowStage>(consumers: usize, switch: T) -> Simulation<()> {
    let mut sim: Simulation<()> = Simulation::new(quiet_config()).unwrap();
    let mux: StageId = {
        let mut kernel = sim.kernel();
        let cpu = kernel.add_source("cpu", FlowSource::new(1_000.0));
        let mux = kernel.add_stage("mux", switch);
        let inlet = kernel.graph.add_inlet(mux);
        kernel.connect(cpu, inlet);
        mux
    };
    for i in 0..consumers {
        let outlet = sim.kernel().graph.add_outlet(mux);
        let work = 100.0 + (i % 17) as f64 * 25.0;
        sim.attach_consumer(format!("job-{i}"), BoundedWork::new(work, 1.0), outlet);
    }
    sim
}

// ============================================================================
// Scheduler Benchmarks
// ============================================================================

fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");

    for num_events in [1000, 10000, 100000].iter() {
        group.throughput(Throughput::Elements(*num_events as u64));

        group.bench_with_input(
            BenchmarkId::new("schedule", num_events),
            num_events,
            |b, &num_events| {
                b.iter(|| {
                    let mut sched: Scheduler<u64> = Scheduler::new();
                    for i in 0..num_events as u64 {
                        sched.schedule((i * 7919) % 10_007, i);
                    }
                    black_box(sched.len());
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("drain", num_events),
            num_events,
            |b, &num_events| {
                b.iter_batched(
                    || {
                        let mut sched: Scheduler<u64> = Scheduler::new();
                        for i in 0..num_events as u64 {
                            sched.schedule((i * 7919) % 10_007, i);
                        }
                        sched
                    },
                    |mut sched| {
                        let mut sum = 0u64;
                        sched.run(
                            &mut |_: &mut Scheduler<u64>, event: Event<u64>| sum += event.payload,
                            RunBudget::until_idle(),
                        );
                        black_box(sum);
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

// ============================================================================
// Flow Benchmarks
// ============================================================================

fn bench_max_min_switch(c: &mut Criterion) {
    let mut group = c.benchmark_group("max_min_switch");

    for consumers in [10, 100, 500].iter() {
        group.throughput(Throughput::Elements(*consumers as u64));
        group.bench_with_input(
            BenchmarkId::new("consumers", consumers),
            consumers,
            |b, &consumers| {
                b.iter(|| {
                    let mut sim = switch_scenario(consumers, MaxMinSwitch::new());
                    black_box(sim.run_until_idle());
                });
            },
        );
    }

    group.finish();
}

fn bench_exclusive_switch(c: &mut Criterion) {
    let mut group = c.benchmark_group("exclusive_switch");

    for consumers in [10, 100, 500].iter() {
        group.throughput(Throughput::Elements(*consumers as u64));
        group.bench_with_input(
            BenchmarkId::new("consumers", consumers),
            consumers,
            |b, &consumers| {
                b.iter(|| {
                    let mut sim = switch_scenario(consumers, ExclusiveSwitch::new());
                    black_box(sim.run_until_idle());
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Actor Benchmarks
// ============================================================================

fn bench_actor_timers(c: &mut Criterion) {
    let mut group = c.benchmark_group("actor_timers");

    for actors in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*actors as u64));
        group.bench_with_input(BenchmarkId::new("actors", actors), actors, |b, &actors| {
            b.iter(|| {
                let mut sim: Simulation<u32> = Simulation::new(quiet_config()).unwrap();
                for i in 0..actors {
                    let period = 10 + (i % 7) as SimTime;
                    sim.spawn(
                        format!("ticker-{i}"),
                        Behavior::receive_signal(move |ctx, signal: &Signal<u32>| {
                            if let Signal::Started = signal {
                                ctx.start_periodic_timer("tick", 0, period);
                            }
                            Behavior::same()
                        }),
                    );
                }
                black_box(sim.run_until(10_000));
            });
        });
    }

    group.finish();
}

// ============================================================================
// Parallel Scenarios
// ============================================================================

fn bench_scenarios(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios");
    let configs = || (0..8).map(|seed| KernelConfig { seed, ..quiet_config() }).collect::<Vec<_>>();

    group.bench_function("runner", |b| {
        b.iter(|| {
            let runner = ScenarioRunner::new();
            black_box(runner.run_simulations::<(), _>(configs(), |sim| {
                let cpu = sim.kernel().add_source("cpu", FlowSource::new(100.0));
                sim.attach_consumer("job", BoundedWork::new(10_000.0, 1.0), cpu);
            }));
        });
    });

    group.finish();
}

// ============================================================================
// Criterion Groups
// ============================================================================

criterion_group!(
    benches,
    bench_scheduler,
    bench_max_min_switch,
    bench_exclusive_switch,
    bench_actor_timers,
    bench_scenarios,
);

criterion_main!(benches);
