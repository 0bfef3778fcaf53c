//! Engine - realtime and offline main loops
//!
//! The engine ties together the executor and scheduler into an
//! [`EventLoop`] that steps and timers run on.
//! - Realtime: uses spin_sleep for precise timing
//! - Offline: virtual time, advanced explicitly for faster-than-realtime runs

use crate::config::EngineConfig;
use crate::dispatch::{Dispatcher, EventLoop, WakeupHandle};
use crate::error::{EngineError, EngineResult};
use crate::executor::{Executor, Task};
use crate::scheduler::{TimeScheduler, WakeupCallback};
use crate::time::{Duration, TimePoint};
use spin_sleep::SpinSleeper;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, trace};

pub use crate::scheduler::SchedulerMode;

/// State shared between the main loop and every dispatcher handed out.
struct LoopShared {
    executor: Executor,
    scheduler: RefCell<TimeScheduler>,
    quit: Cell<bool>,
}

impl EventLoop for LoopShared {
    fn now(&self) -> TimePoint {
        self.scheduler.borrow().now()
    }

    fn invoke_soon(&self, task: Task) {
        self.executor.spawn(task);
    }

    fn schedule_wakeup(&self, at: TimePoint, callback: WakeupCallback) -> WakeupHandle {
        let id = self.scheduler.borrow_mut().add_wakeup(at, callback);
        trace!(id, %at, "wake-up scheduled");
        WakeupHandle(id)
    }

    fn cancel_wakeup(&self, handle: WakeupHandle) -> bool {
        // The callback is dropped after the borrow ends, its captures may
        // cancel wake-ups of their own.
        let removed = self.scheduler.borrow_mut().cancel_wakeup(handle.0);
        let cancelled = removed.is_some();
        trace!(id = handle.0, cancelled, "wake-up cancelled");
        drop(removed);
        cancelled
    }
}

/// Counts wake-ups dispatched without time moving on, so callbacks that keep
/// rescheduling themselves at the current instant end in
/// [`EngineError::DispatchLimit`] instead of spinning forever.
struct DispatchBudget {
    limit: usize,
    instant: Option<TimePoint>,
    used: usize,
}

impl DispatchBudget {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            instant: None,
            used: 0,
        }
    }

    /// Time moved on, count afresh.
    fn reset(&mut self) {
        self.instant = None;
        self.used = 0;
    }

    /// Charge a dispatch at a virtual instant; a later instant resets the
    /// count.
    fn charge_at(&mut self, instant: TimePoint) -> EngineResult<()> {
        if self.instant != Some(instant) {
            self.instant = Some(instant);
            self.used = 0;
        }
        self.charge()
    }

    /// Charge a dispatch made without waiting since the previous one.
    fn charge(&mut self) -> EngineResult<()> {
        self.used += 1;
        if self.used > self.limit {
            return Err(EngineError::DispatchLimit { limit: self.limit });
        }
        Ok(())
    }
}

/// The built-in event loop.
///
/// Cloning gives another handle to the same loop, so callbacks can hold one
/// and call [`quit`](Self::quit).
#[derive(Clone)]
pub struct MainLoop {
    shared: Rc<LoopShared>,
    sleeper: SpinSleeper,
    config: EngineConfig,
}

impl MainLoop {
    /// Create a new main loop; the mode comes from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the configuration does not
    /// validate.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: EngineConfig) -> Self {
        debug!(mode = ?config.mode, "creating main loop");
        Self {
            shared: Rc::new(LoopShared {
                executor: Executor::new(),
                scheduler: RefCell::new(TimeScheduler::new(config.mode)),
                quit: Cell::new(false),
            }),
            sleeper: SpinSleeper::default(),
            config,
        }
    }

    pub fn realtime() -> Self {
        Self::with_valid_config(EngineConfig::default())
    }

    pub fn offline() -> Self {
        Self::with_valid_config(EngineConfig::offline())
    }

    pub fn mode(&self) -> SchedulerMode {
        self.config.mode
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A handle for steps, timers and stimuli to schedule work on this loop.
    pub fn dispatcher(&self) -> Dispatcher {
        let shared: Rc<dyn EventLoop> = self.shared.clone();
        Dispatcher::from_rc(shared)
    }

    pub fn now(&self) -> TimePoint {
        self.shared.now()
    }

    /// Queue a callback to run on the next drain.
    pub fn spawn(&self, task: impl FnOnce() + 'static) {
        self.shared.executor.spawn(task);
    }

    /// Make `run`/`run_until` return after the current dispatch.
    pub fn quit(&self) {
        debug!("quit requested");
        self.shared.quit.set(true);
    }

    /// Whether any wake-up or deferred callback is still waiting.
    pub fn has_pending(&self) -> bool {
        self.shared.executor.has_ready_tasks() || self.shared.scheduler.borrow().has_pending_waits()
    }

    /// Run deferred callbacks until none are left.
    fn drain(&self) -> EngineResult<()> {
        let limit = self.config.max_dispatches;
        let runs = self.shared.executor.run_until_stalled(limit);
        if runs >= limit && self.shared.executor.has_ready_tasks() {
            return Err(EngineError::DispatchLimit { limit });
        }
        Ok(())
    }

    /// Run the earliest wake-up due at `t`, handing it `delivered`.
    fn dispatch_due(&self, t: TimePoint, delivered: TimePoint) -> bool {
        // The scheduler borrow must end before the callback runs.
        let due = self.shared.scheduler.borrow_mut().process_one_timeslice(t);
        match due {
            Some(wakeup) => {
                trace!(id = wakeup.id, deadline = %wakeup.deadline, %delivered, "dispatching wake-up");
                (wakeup.callback)(delivered);
                true
            }
            None => false,
        }
    }

    /// Move virtual time forward to `t`; virtual time never runs backwards.
    fn set_offline_now(&self, t: TimePoint) -> TimePoint {
        let mut scheduler = self.shared.scheduler.borrow_mut();
        scheduler.offline_now = scheduler.offline_now.max(t);
        scheduler.offline_now
    }

    fn require_mode(&self, expected: SchedulerMode) -> EngineResult<()> {
        if self.config.mode != expected {
            return Err(EngineError::WrongMode {
                expected,
                actual: self.config.mode,
            });
        }
        Ok(())
    }

    /// Run until [`quit`](Self::quit) is called or nothing is left to do.
    ///
    /// In offline mode virtual time jumps from one wake-up to the next.
    pub fn run(&self) -> EngineResult<()> {
        self.run_until(|| false)
    }

    /// Run until the given condition is true, [`quit`](Self::quit) is called,
    /// or nothing is left to do.
    pub fn run_until<F>(&self, is_done: F) -> EngineResult<()>
    where
        F: Fn() -> bool,
    {
        self.shared.quit.set(false);
        let mut budget = DispatchBudget::new(self.config.max_dispatches);

        loop {
            // Drain all ready callbacks
            self.drain()?;

            if self.shared.quit.get() || is_done() {
                break;
            }

            let next = self.shared.scheduler.borrow_mut().peek_next_event_time();
            let Some(next_t) = next else {
                if !self.shared.executor.has_ready_tasks() {
                    debug!("main loop idle, nothing left to dispatch");
                    break;
                }
                self.sleeper.sleep(self.config.idle_sleep);
                continue;
            };

            match self.config.mode {
                SchedulerMode::Offline => {
                    let now = self.set_offline_now(next_t);
                    budget.charge_at(now)?;
                    self.dispatch_due(next_t, now);
                }
                SchedulerMode::Realtime => {
                    let now = self.now();
                    if next_t <= now {
                        // Process exactly one wake-up, then drain again
                        budget.charge()?;
                        self.dispatch_due(now, now);
                        continue;
                    }
                    budget.reset();
                    self.sleep_until(next_t, now);
                }
            }
        }

        Ok(())
    }

    fn sleep_until(&self, target: TimePoint, now: TimePoint) {
        if let Ok(wait) = std::time::Duration::try_from(target - now) {
            self.sleeper.sleep(wait);
        }
    }

    /// Run one non-blocking pass: deferred callbacks, then every wake-up that
    /// is due now. Returns whether anything was dispatched.
    pub fn iterate(&self) -> EngineResult<bool> {
        let had_tasks = self.shared.executor.has_ready_tasks();
        self.drain()?;

        let mut budget = DispatchBudget::new(self.config.max_dispatches);
        let mut dispatched = false;
        loop {
            let now = self.now();
            if !self.dispatch_due(now, now) {
                break;
            }
            dispatched = true;
            self.drain()?;
            budget.charge()?;
        }

        Ok(had_tasks || dispatched)
    }

    /// Advance virtual time to the target.
    /// Processes all due wake-ups in deadline order, draining deferred
    /// callbacks between each.
    pub fn advance_to(&self, target: TimePoint) -> EngineResult<()> {
        self.require_mode(SchedulerMode::Offline)?;

        // Run deferred callbacks first so they can schedule their wake-ups
        self.drain()?;

        let mut budget = DispatchBudget::new(self.config.max_dispatches);

        loop {
            let next = self.shared.scheduler.borrow_mut().peek_next_event_time();
            let Some(next_t) = next.filter(|t| *t <= target) else {
                break;
            };

            let now = self.set_offline_now(next_t);
            budget.charge_at(now)?;
            self.dispatch_due(next_t, now);

            // Drain between wake-ups so cancellations take effect
            self.drain()?;
        }

        self.set_offline_now(target);
        self.drain()
    }

    /// Advance virtual time by `dt`; negative values only drain.
    pub fn advance_by(&self, dt: Duration) -> EngineResult<()> {
        let dt = if dt.is_negative() { Duration::ZERO } else { dt };
        let target = self.now() + dt;
        self.advance_to(target)
    }
}

impl std::fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainLoop")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Create an offline main loop and queue `setup` as its first callback.
pub fn launch_offline<F>(setup: F) -> MainLoop
where
    F: FnOnce(&MainLoop) + 'static,
{
    launch(setup, MainLoop::offline())
}

/// Create a realtime main loop and queue `setup` as its first callback.
pub fn launch_realtime<F>(setup: F) -> MainLoop
where
    F: FnOnce(&MainLoop) + 'static,
{
    launch(setup, MainLoop::realtime())
}

/// Create a main loop with config and queue `setup` as its first callback.
///
/// # Errors
///
/// Returns [`EngineError::Config`] if the configuration does not validate.
pub fn launch_with_config<F>(setup: F, config: EngineConfig) -> EngineResult<MainLoop>
where
    F: FnOnce(&MainLoop) + 'static,
{
    Ok(launch(setup, MainLoop::new(config)?))
}

fn launch<F>(setup: F, main_loop: MainLoop) -> MainLoop
where
    F: FnOnce(&MainLoop) + 'static,
{
    let handle = main_loop.clone();
    main_loop.spawn(move || setup(&handle));
    main_loop
}
