//! Integration tests for the scheduler and the timer subsystem.
//!
//! These tests drive the public API only:
//! - Deterministic ordering of same-instant events
//! - Run budgets and clock movement
//! - Keyed timers whose stale wake-ups are discarded on arrival

use std::cell::RefCell;
use std::rc::Rc;

use dcsim::scheduler::{MapSink, RunBudget, Scheduler, StopReason};
use dcsim::timer::{TimerSubsystem, TimerWakeup};
use dcsim::types::SimTime;
use dcsim::Event;

// ============================================================================
// Helpers
// ============================================================================

type Wakeup = TimerWakeup<u32, &'static str>;
type Timers = TimerSubsystem<u32, &'static str, &'static str>;

/// Events of the timer tests: a timer wake-up or a scripted action.
#[derive(Debug)]
enum TestEvent {
    Timer(Wakeup),
    Cancel(u32, &'static str),
    Restart(u32, &'static str, SimTime),
}

impl From<Wakeup> for TestEvent {
    fn from(wakeup: Wakeup) -> Self {
        TestEvent::Timer(wakeup)
    }
}

/// Runs `sched` to completion, returning `(time, payload)` of every fired timer.
fn run_timers(sched: &mut Scheduler<TestEvent>, timers: &mut Timers) -> Vec<(SimTime, &'static str)> {
    let mut fired = Vec::new();
    sched.run(
        &mut |s: &mut Scheduler<TestEvent>, event: Event<TestEvent>| match event.payload {
            TestEvent::Timer(wakeup) => {
                if let Some(timer) = timers.deliver(s, wakeup) {
                    fired.push((s.now(), timer.payload));
                }
            }
            TestEvent::Cancel(owner, key) => {
                timers.cancel(&owner, &key);
            }
            TestEvent::Restart(owner, key, delay) => {
                timers.start_single(s, owner, key, "restarted", delay);
            }
        },
        RunBudget::until_idle(),
    );
    fired
}

// ============================================================================
// Scheduler
// ============================================================================

#[test]
fn test_same_instant_events_fire_in_insertion_order() {
    let mut sched: Scheduler<u32> = Scheduler::new();
    for i in 0..100 {
        sched.schedule(50, i);
    }
    sched.schedule(10, 1_000);

    let mut seen = Vec::new();
    sched.run(
        &mut |_: &mut Scheduler<u32>, event: Event<u32>| seen.push(event.payload),
        RunBudget::until_idle(),
    );

    let mut expected = vec![1_000];
    expected.extend(0..100);
    assert_eq!(seen, expected);
}

#[test]
fn test_identical_schedules_produce_identical_traces() {
    let trace = || {
        let mut sched: Scheduler<u64> = Scheduler::new();
        for i in 0..50u64 {
            sched.schedule((i * 7919) % 97, i);
        }
        let mut seen = Vec::new();
        sched.run(
            &mut |s: &mut Scheduler<u64>, event: Event<u64>| {
                seen.push((s.now(), event.payload));
                if event.payload % 5 == 0 && s.now() < 500 {
                    s.schedule_after(event.payload % 13, event.payload + 1_000);
                }
            },
            RunBudget::until_idle(),
        );
        seen
    };

    let first = trace();
    assert_eq!(first, trace());
    assert!(first.windows(2).all(|pair| pair[0].0 <= pair[1].0));
}

#[test]
fn test_handler_cancels_pending_event() {
    let mut sched: Scheduler<&'static str> = Scheduler::new();
    sched.schedule(5, "cancel");
    let victim = sched.schedule(10, "victim");
    sched.schedule(15, "survivor");

    let mut seen = Vec::new();
    sched.run(
        &mut |s: &mut Scheduler<&'static str>, event: Event<&'static str>| {
            if event.payload == "cancel" {
                assert!(s.cancel(victim));
            }
            seen.push(event.payload);
        },
        RunBudget::until_idle(),
    );

    assert_eq!(seen, vec!["cancel", "survivor"]);
    assert_eq!(sched.events_cancelled(), 1);
}

#[test]
fn test_successive_budgets() {
    let mut sched: Scheduler<u32> = Scheduler::new();
    for i in 1..=10 {
        sched.schedule(i * 100, i as u32);
    }
    let mut noop = |_: &mut Scheduler<u32>, _: Event<u32>| {};

    let first = sched.run(&mut noop, RunBudget::until(350));
    assert_eq!(first.events, 3);
    assert_eq!(first.reason, StopReason::TimeLimit);
    assert_eq!(first.final_time, 350);

    let second = sched.run(&mut noop, RunBudget::events(2));
    assert_eq!(second.events, 2);
    assert_eq!(second.reason, StopReason::EventLimit);
    assert_eq!(second.final_time, 500);

    let last = sched.run(&mut noop, RunBudget::until_idle());
    assert_eq!(last.events, 5);
    assert_eq!(last.reason, StopReason::Idle);
    assert_eq!(sched.now(), 1_000);
    assert_eq!(sched.events_fired(), 10);
}

#[test]
fn test_clock_never_moves_backwards() {
    let mut sched: Scheduler<u32> = Scheduler::starting_at(1_000);
    sched.schedule(1_000, 0);
    sched.schedule(2_000, 1);

    let last = Rc::new(RefCell::new(0));
    let probe = last.clone();
    sched.run(
        &mut |s: &mut Scheduler<u32>, _: Event<u32>| {
            assert!(s.now() >= *probe.borrow());
            *probe.borrow_mut() = s.now();
            assert!(s.try_schedule(s.now() - 1, 9).is_err());
        },
        RunBudget::until_idle(),
    );

    assert_eq!(*last.borrow(), 2_000);
}

// ============================================================================
// Timers
// ============================================================================

#[test]
fn test_single_timers_fire_at_their_delay() {
    let mut sched: Scheduler<TestEvent> = Scheduler::new();
    let mut timers = Timers::new();
    timers.start_single(&mut sched, 1, "a", "first", 30);
    timers.start_single(&mut sched, 1, "b", "second", 10);
    timers.start_single(&mut sched, 2, "a", "third", 20);

    let fired = run_timers(&mut sched, &mut timers);

    assert_eq!(fired, vec![(10, "second"), (20, "third"), (30, "first")]);
    assert!(timers.is_empty());
    assert_eq!(timers.stale_discards(), 0);
}

#[test]
fn test_cancel_before_due_never_fires() {
    let mut sched: Scheduler<TestEvent> = Scheduler::new();
    let mut timers = Timers::new();
    timers.start_single(&mut sched, 1, "t", "payload", 100);
    sched.schedule(50, TestEvent::Cancel(1, "t"));

    let fired = run_timers(&mut sched, &mut timers);

    assert!(fired.is_empty());
    // The orphaned wake-up still arrived and was dropped.
    assert_eq!(timers.stale_discards(), 1);
    assert_eq!(sched.now(), 100);
}

#[test]
fn test_restart_supersedes_pending_wakeup() {
    let mut sched: Scheduler<TestEvent> = Scheduler::new();
    let mut timers = Timers::new();
    timers.start_single(&mut sched, 7, "t", "original", 100);
    sched.schedule(60, TestEvent::Restart(7, "t", 100));

    let fired = run_timers(&mut sched, &mut timers);

    assert_eq!(fired, vec![(160, "restarted")]);
    assert_eq!(timers.stale_discards(), 1);
}

#[test]
fn test_periodic_timer_until_cancelled() {
    let mut sched: Scheduler<TestEvent> = Scheduler::new();
    let mut timers = Timers::new();
    timers.start_periodic(&mut sched, 1, "tick", "tick", 25);
    sched.schedule(110, TestEvent::Cancel(1, "tick"));

    let fired = run_timers(&mut sched, &mut timers);

    assert_eq!(fired, vec![(25, "tick"), (50, "tick"), (75, "tick"), (100, "tick")]);
    assert!(!timers.is_active(&1, &"tick"));
}

#[test]
fn test_timers_through_mapped_sink() {
    #[derive(Debug)]
    enum Outer {
        Timer(Wakeup),
        Other,
    }

    let mut sched: Scheduler<Outer> = Scheduler::new();
    let mut timers = Timers::new();
    {
        let mut sink: MapSink<'_, _, Outer, _> = MapSink::new(&mut sched, Outer::Timer);
        timers.start_single(&mut sink, 3, "k", "mapped", 40);
    }
    sched.schedule(40, Outer::Other);

    let mut fired = Vec::new();
    let mut others = 0;
    sched.run(
        &mut |s: &mut Scheduler<Outer>, event: Event<Outer>| match event.payload {
            Outer::Timer(wakeup) => {
                let mut sink: MapSink<'_, _, Outer, _> = MapSink::new(s, Outer::Timer);
                if let Some(timer) = timers.deliver(&mut sink, wakeup) {
                    fired.push(timer.payload);
                }
            }
            Outer::Other => others += 1,
        },
        RunBudget::until_idle(),
    );

    assert_eq!(fired, vec!["mapped"]);
    assert_eq!(others, 1);
}
