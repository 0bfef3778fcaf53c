//! Step Scheduling Scenario Suite
//!
//! Builds complete step trees and drives them through both main loop modes.
//!
//! The suite relies on these guarantees:
//! 1) Every lifecycle callback is dispatched from the loop, never nested in
//!    another one, so event ORDER is identical in offline and realtime runs.
//! 2) Time points only move forward: a realtime run delivers every event at
//!    or after the instant the offline run delivers it at, within a small
//!    dispatch latency.
//! 3) Wake-ups at the same instant fire in the order they were scheduled.

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::dispatch::Dispatcher;
    use crate::engine::{MainLoop, SchedulerMode};
    use crate::error::{EngineError, StepError};
    use crate::step::{Step, StepState};
    use crate::step_loop::{Loop, LoopCondition};
    use crate::stepping_stones::SteppingStones;
    use crate::stimulus::{SimulatedStimulus, Stimulus};
    use crate::time::{Clock, Duration, TimePoint};
    use crate::timer::Timer;
    use crate::trial::Trial;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Upper bound on how far realtime delivery may lag the offline run.
    const REALTIME_SLACK: Duration = Duration::from_millis(100);

    /// A logged event for comparison
    #[derive(Clone, Debug, PartialEq)]
    struct LoggedEvent {
        id: String,
        /// Offset from the start of the run.
        t: Duration,
    }

    type EventLog = Rc<RefCell<Vec<LoggedEvent>>>;

    fn push(log: &EventLog, start: TimePoint, id: impl Into<String>, tp: TimePoint) {
        log.borrow_mut().push(LoggedEvent {
            id: id.into(),
            t: tp - start,
        });
    }

    fn ids(events: &[LoggedEvent]) -> Vec<&str> {
        events.iter().map(|e| e.id.as_str()).collect()
    }

    fn ms(v: i64) -> Duration {
        Duration::from_millis(v)
    }

    /// Build a scenario on a fresh main loop, run it to completion and return
    /// the log. The returned root keeps the tree alive for the whole run.
    fn run_scenario<F>(mode: SchedulerMode, build: F) -> Vec<LoggedEvent>
    where
        F: Fn(&MainLoop, TimePoint, &EventLog) -> Step,
    {
        let main_loop = MainLoop::new(EngineConfig {
            mode,
            ..Default::default()
        })
        .unwrap();
        let log: EventLog = Rc::new(RefCell::new(Vec::new()));
        let start = main_loop.now();
        let root = build(&main_loop, start, &log);
        root.enter(start).unwrap();
        main_loop.run().unwrap();
        assert_eq!(root.state(), StepState::Left, "root step did not finish");
        let events = log.borrow().clone();
        events
    }

    /// Compare two runs (offline vs realtime) for deterministic equivalence.
    fn compare_deterministic_runs(label: &str, offline: &[LoggedEvent], realtime: &[LoggedEvent]) {
        assert_eq!(
            ids(offline),
            ids(realtime),
            "[{}] Event order mismatch between offline and realtime",
            label
        );
        for (o, r) in offline.iter().zip(realtime) {
            assert!(
                r.t >= o.t,
                "[{}] {} delivered early in realtime: offline={} realtime={}",
                label,
                o.id,
                o.t,
                r.t
            );
            assert!(
                r.t - o.t < REALTIME_SLACK,
                "[{}] {} lagged too much in realtime: offline={} realtime={}",
                label,
                o.id,
                o.t,
                r.t
            );
        }
    }

    fn run_both<F>(label: &str, build: F) -> Vec<LoggedEvent>
    where
        F: Fn(&MainLoop, TimePoint, &EventLog) -> Step,
    {
        let offline = run_scenario(SchedulerMode::Offline, &build);
        let realtime = run_scenario(SchedulerMode::Realtime, &build);
        compare_deterministic_runs(label, &offline, &realtime);
        offline
    }

    // ---------------------------------------------------------------------
    // Loops
    // ---------------------------------------------------------------------

    /// Childless loop that finishes each iteration right away.
    fn counting_loop(
        main_loop: &MainLoop,
        start: TimePoint,
        log: &EventLog,
        index: i64,
        stop: i64,
        increment: i64,
        condition: LoopCondition,
    ) -> Step {
        let lp = Loop::with_range(&main_loop.dispatcher(), index, stop, increment, condition);
        let l = log.clone();
        lp.connect_iteration(move |lp, index, tp| {
            push(&l, start, format!("iteration {index}"), tp);
            lp.activate(tp).unwrap();
        });
        let l = log.clone();
        lp.connect_leave(move |s, tp| {
            push(&l, start, format!("leave {}", s.get_loop_index(0).unwrap()), tp);
        });
        lp.into()
    }

    #[test]
    fn test_ascending_loop_runs_ten_iterations() {
        let events = run_both("ascending", |ml, start, log| {
            counting_loop(ml, start, log, 0, 10, 1, LoopCondition::Less)
        });

        let mut expected: Vec<String> = (0..10).map(|i| format!("iteration {i}")).collect();
        expected.push("leave 10".to_string());
        assert_eq!(ids(&events), expected);
        assert!(events.iter().all(|e| e.t == Duration::ZERO));
    }

    #[test]
    fn test_descending_loop_runs_eleven_iterations() {
        let events = run_both("descending", |ml, start, log| {
            counting_loop(ml, start, log, 10, 0, -1, LoopCondition::GreaterEqual)
        });

        let mut expected: Vec<String> = (0..=10).rev().map(|i| format!("iteration {i}")).collect();
        expected.push("leave -1".to_string());
        assert_eq!(ids(&events), expected);
    }

    /// outer(0..2) -> inner(0..2) -> trial, logging the loop indices seen by
    /// the trial.
    fn nested_loops(
        main_loop: &MainLoop,
        start: TimePoint,
        log: &EventLog,
        reset_inner: bool,
    ) -> Step {
        let d = main_loop.dispatcher();
        let outer = Loop::with_range(&d, 0, 2, 1, LoopCondition::Less);
        let inner = Loop::with_range(&d, 0, 2, 1, LoopCondition::Less);
        let trial = Trial::new(&d);

        if reset_inner {
            inner.connect_enter(|s, _| s.as_loop().unwrap().set_index(0));
        }
        let l = log.clone();
        trial.connect_activate(move |s, tp| {
            let outer = s.get_loop_index(1).unwrap();
            let inner = s.get_loop_index(0).unwrap();
            push(&l, start, format!("({outer},{inner})"), tp);
            s.leave(tp).unwrap();
        });

        inner.set_child(trial).unwrap();
        outer.set_child(inner).unwrap();
        outer.into()
    }

    #[test]
    fn test_nested_loops_with_inner_reset() {
        let events = run_both("nested", |ml, start, log| nested_loops(ml, start, log, true));
        assert_eq!(ids(&events), vec!["(0,0)", "(0,1)", "(1,0)", "(1,1)"]);
    }

    #[test]
    fn test_inner_loop_index_is_not_reset_implicitly() {
        let events = run_scenario(SchedulerMode::Offline, |ml, start, log| {
            nested_loops(ml, start, log, false)
        });
        assert_eq!(ids(&events), vec!["(0,0)", "(0,1)"]);
    }

    #[test]
    fn test_loop_index_beyond_depth_fails_once_per_depth() {
        let main_loop = MainLoop::offline();
        let d = main_loop.dispatcher();
        let outer = Loop::with_range(&d, 3, 10, 1, LoopCondition::Less);
        let stones = SteppingStones::new(&d);
        let inner = Loop::with_range(&d, 7, 10, 1, LoopCondition::Less);
        let trial = Trial::new(&d);

        inner.set_child(trial.clone()).unwrap();
        stones.add_step("inner", inner.clone()).unwrap();
        outer.set_child(stones.clone()).unwrap();

        assert_eq!(trial.get_loop_index(0), Ok(7));
        // The stepping stones in between is not a loop and is skipped.
        assert_eq!(trial.get_loop_index(1), Ok(3));
        assert_eq!(trial.get_loop_indices(), vec![3, 7]);
        assert_eq!(stones.get_loop_index(0), Ok(3));

        let mut failures = Vec::new();
        for levels_up in 2..6 {
            match trial.get_loop_index(levels_up) {
                Err(StepError::NoSuchLoop { levels_up: reported }) => failures.push(reported),
                other => panic!("expected NoSuchLoop for {levels_up}, got {other:?}"),
            }
        }
        assert_eq!(failures, vec![2, 3, 4, 5]);
    }

    /// Childless loop whose iterations are finished by a timer, the way an
    /// asynchronous stimulus completion re-enters a loop.
    fn timer_paced_loop(main_loop: &MainLoop, start: TimePoint, log: &EventLog) -> Step {
        let d = main_loop.dispatcher();
        let lp = Loop::with_range(&d, 0, 3, 1, LoopCondition::Less);
        let timer = Timer::new(&d);

        let t = timer.clone();
        let l = log.clone();
        lp.connect_iteration(move |_, index, tp| {
            push(&l, start, format!("iteration {index}"), tp);
            t.arm(tp + ms(30));
        });
        // The loop owns the timer through its observer; the timer only
        // refers back weakly.
        let stepper = lp.downgrade();
        timer.connect_fired(move |_, tp| {
            if let Some(lp) = stepper.upgrade() {
                lp.activate(tp).unwrap();
            }
        });
        let l = log.clone();
        lp.connect_leave(move |_, tp| push(&l, start, "leave", tp));
        lp.into()
    }

    #[test]
    fn test_loop_reentered_from_timer() {
        let events = run_both("timer paced", timer_paced_loop);
        assert_eq!(
            events,
            vec![
                LoggedEvent { id: "iteration 0".into(), t: ms(0) },
                LoggedEvent { id: "iteration 1".into(), t: ms(30) },
                LoggedEvent { id: "iteration 2".into(), t: ms(60) },
                LoggedEvent { id: "leave".into(), t: ms(90) },
            ]
        );
    }

    /// Loop with a child whose iteration observer also tries to finish the
    /// iteration, as a childless loop would.
    fn eager_loop_with_child(main_loop: &MainLoop, start: TimePoint, log: &EventLog) -> Step {
        let d = main_loop.dispatcher();
        let lp = Loop::with_range(&d, 0, 3, 1, LoopCondition::Less);
        let trial = Trial::new(&d);

        let l = log.clone();
        lp.connect_iteration(move |lp, index, tp| {
            let outcome = match lp.activate(tp) {
                Ok(()) => "accepted",
                Err(_) => "refused",
            };
            push(&l, start, format!("iteration {index} activate {outcome}"), tp);
        });
        let l = log.clone();
        trial.connect_enter(move |s, tp| {
            push(&l, start, format!("trial {}", s.get_loop_index(0).unwrap()), tp);
            s.leave(tp).unwrap();
        });
        let l = log.clone();
        lp.connect_leave(move |_, tp| push(&l, start, "leave", tp));

        lp.set_child(trial).unwrap();
        lp.into()
    }

    #[test]
    fn test_activate_from_iteration_keeps_every_child_run() {
        let events = run_both("eager loop", eager_loop_with_child);
        assert_eq!(
            ids(&events),
            vec![
                "iteration 0 activate refused",
                "trial 0",
                "iteration 1 activate refused",
                "trial 1",
                "iteration 2 activate refused",
                "trial 2",
                "leave",
            ]
        );
    }

    // ---------------------------------------------------------------------
    // Stepping stones
    // ---------------------------------------------------------------------

    fn colored_stones(main_loop: &MainLoop, start: TimePoint, log: &EventLog) -> Step {
        let d = main_loop.dispatcher();
        let stones = SteppingStones::new(&d);

        for name in ["red", "blue", "exit"] {
            let trial = Trial::with_name(&d, name);
            let l = log.clone();
            trial.connect_enter(move |s, tp| {
                // At most one sibling is entered at any time.
                let container = s.parent().and_then(|p| p.as_stepping_stones()).unwrap();
                let active = container
                    .step_names()
                    .iter()
                    .filter(|n| container.step_by_name(n).unwrap().is_active())
                    .count();
                assert_eq!(active, 1);
                push(&l, start, format!("enter {}", s.name()), tp);
            });
            let l = log.clone();
            trial.connect_leave(move |s, tp| push(&l, start, format!("leave {}", s.name()), tp));
            trial.connect_activate(|s, tp| s.leave(tp).unwrap());
            stones.add_step(name, trial).unwrap();
        }

        stones.connect_enter(|s, _| {
            s.as_stepping_stones()
                .unwrap()
                .activate_next_by_name("blue")
                .unwrap();
        });
        let blue = stones.step_by_name("blue").unwrap();
        blue.connect_leave(|s, _| {
            let container = s.parent().and_then(|p| p.as_stepping_stones()).unwrap();
            container.activate_next_by_name("exit").unwrap();
        });
        let l = log.clone();
        stones.connect_leave(move |_, tp| push(&l, start, "leave stones", tp));
        stones.into()
    }

    #[test]
    fn test_stepping_stones_jump_by_name() {
        let events = run_both("stones", colored_stones);
        assert_eq!(
            ids(&events),
            vec!["enter blue", "leave blue", "enter exit", "leave exit", "leave stones"]
        );
    }

    #[test]
    fn test_skipped_branch_never_enters() {
        let main_loop = MainLoop::offline();
        let log: EventLog = Rc::new(RefCell::new(Vec::new()));
        let root = colored_stones(&main_loop, main_loop.now(), &log);
        root.enter(main_loop.now()).unwrap();
        main_loop.run().unwrap();

        let stones = root.as_stepping_stones().unwrap();
        assert_eq!(stones.step_by_name("red").unwrap().state(), StepState::Idle);
        assert_eq!(stones.step_by_name("blue").unwrap().state(), StepState::Left);
        assert_eq!(stones.step_by_name("exit").unwrap().state(), StepState::Left);
        assert_eq!(root.state(), StepState::Left);
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    /// Fire `n` times, re-arming from the delivered time. Returns the
    /// requested targets and delivered times.
    fn periodic_timer(main_loop: &MainLoop, period: Duration, n: usize) -> Vec<(TimePoint, TimePoint)> {
        let timer = Timer::new(&main_loop.dispatcher());
        let firings = Rc::new(RefCell::new(Vec::new()));

        let f = firings.clone();
        timer.connect_fired(move |timer, tp| {
            // fire_time is cleared once fired; the target was recorded on arm.
            assert_eq!(timer.fire_time(), None);
            f.borrow_mut().push(tp);
            if f.borrow().len() < n {
                timer.arm(tp + period);
            }
        });

        let first = main_loop.now() + period;
        timer.arm(first);
        main_loop.run().unwrap();

        let delivered = firings.borrow().clone();
        let mut targets = vec![first];
        targets.extend(delivered.iter().take(n - 1).map(|tp| *tp + period));
        targets.into_iter().zip(delivered).collect()
    }

    #[test]
    fn test_periodic_timer_offline() {
        let main_loop = MainLoop::offline();
        let firings = periodic_timer(&main_loop, ms(100), 5);
        assert_eq!(firings.len(), 5);
        for (i, (target, delivered)) in firings.iter().enumerate() {
            assert_eq!(*target, TimePoint::ZERO + ms(100) * (i as i64 + 1));
            assert_eq!(target, delivered);
        }
    }

    #[test]
    fn test_periodic_timer_realtime_targets_increase() {
        let main_loop = MainLoop::realtime();
        let firings = periodic_timer(&main_loop, ms(20), 5);
        assert_eq!(firings.len(), 5);
        for window in firings.windows(2) {
            assert!(window[1].0 > window[0].0, "targets must strictly increase");
        }
        for (target, delivered) in &firings {
            assert!(delivered >= target);
            assert!(*delivered - *target < REALTIME_SLACK);
        }
    }

    #[test]
    fn test_long_offline_session_is_not_capped() {
        let main_loop = MainLoop::new(EngineConfig {
            max_dispatches: 1_000,
            ..EngineConfig::offline()
        })
        .unwrap();
        let firings = periodic_timer(&main_loop, ms(1), 2_000);
        assert_eq!(firings.len(), 2_000);
        assert_eq!(main_loop.now(), TimePoint::ZERO + ms(2_000));
    }

    /// Wake-up that reschedules itself at the instant it was delivered.
    fn reschedule_at_delivery(d: Dispatcher, at: TimePoint, count: Rc<Cell<usize>>) {
        let next = d.clone();
        d.schedule_wakeup(at, move |tp| {
            count.set(count.get() + 1);
            reschedule_at_delivery(next, tp, count);
        });
    }

    #[test]
    fn test_runaway_rescheduling_hits_dispatch_limit() {
        for mode in [SchedulerMode::Offline, SchedulerMode::Realtime] {
            let main_loop = MainLoop::new(EngineConfig {
                mode,
                max_dispatches: 100,
                ..Default::default()
            })
            .unwrap();
            let count = Rc::new(Cell::new(0));
            reschedule_at_delivery(main_loop.dispatcher(), main_loop.now(), count.clone());

            let err = main_loop.run().unwrap_err();
            assert!(
                matches!(err, EngineError::DispatchLimit { limit: 100 }),
                "{mode:?}: {err:?}"
            );
            assert_eq!(count.get(), 100, "{mode:?}");
        }
    }

    // ---------------------------------------------------------------------
    // Stimuli
    // ---------------------------------------------------------------------

    /// Three trials, each presenting a stimulus for 20ms and leaving when it
    /// reports being stopped.
    fn stimulus_trials(main_loop: &MainLoop, start: TimePoint, log: &EventLog) -> Step {
        let d = main_loop.dispatcher();
        let lp = Loop::with_range(&d, 0, 3, 1, LoopCondition::Less);
        let trial = Trial::new(&d);
        let stimulus = SimulatedStimulus::new(&d, ms(5), Duration::from(main_loop.config().frame_interval));

        let s = stimulus.clone();
        trial.connect_enter(move |_, tp| s.play_for(tp, ms(20)));
        let l = log.clone();
        stimulus.connect_started(Rc::new(move |tp| push(&l, start, "started", tp)));
        let (l, t) = (log.clone(), trial.downgrade());
        stimulus.connect_stopped(Rc::new(move |tp| {
            push(&l, start, "stopped", tp);
            if let Some(trial) = t.upgrade() {
                trial.leave(tp).unwrap();
            }
        }));

        lp.set_child(trial).unwrap();
        lp.into()
    }

    #[test]
    fn test_stimulus_measured_with_delivered_times() {
        let events = run_both("stimulus", stimulus_trials);
        assert_eq!(
            ids(&events),
            vec!["started", "stopped", "started", "stopped", "started", "stopped"]
        );

        // Offline the latency is exact: each presentation starts 5ms after the
        // trial is entered and lasts exactly the requested 20ms.
        let times: Vec<Duration> = events.iter().map(|e| e.t).collect();
        assert_eq!(
            times,
            vec![ms(5), ms(25), ms(30), ms(50), ms(55), ms(75)]
        );
        for pair in events.chunks(2) {
            assert_eq!(pair[1].t - pair[0].t, ms(20));
        }
    }

    // ---------------------------------------------------------------------
    // Time model
    // ---------------------------------------------------------------------

    #[test]
    fn test_time_point_identities() {
        let clock = Clock::new();
        let a = clock.now();
        let b = clock.now() + ms(3);
        assert_eq!(-(a - b), b - a);

        for d in [
            Duration::ZERO,
            Duration::from_micros(1),
            ms(-5),
            Duration::from_secs(3),
            Duration::from_secs_f64(0.25),
        ] {
            assert_eq!(a + d - d, a);
            assert_eq!(b - d + d, b);
            assert_eq!((a + d) - a, d);
        }
    }

    #[test]
    fn test_millis_round_trip_to_seconds() {
        for v in [0_i64, 1, 250, 1000, 1500, -40] {
            let d = Duration::from_millis(v);
            assert!((d.as_secs_f64() - v as f64 / 1000.0).abs() < 1e-12);
            assert_eq!(d.as_millis(), v);
        }
    }
}
