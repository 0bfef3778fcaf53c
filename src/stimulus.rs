//! Stimulus boundary
//!
//! Rendering and audio live outside this crate. They are driven through the
//! [`Stimulus`] trait: the caller supplies time points, the stimulus reports
//! back when it actually started, updated and stopped. Those reported times
//! may lag the requested ones, so anything measuring elapsed time should use
//! them rather than the requested times.

use crate::dispatch::Dispatcher;
use crate::signal::{HandlerId, Signal};
use crate::time::{Duration, TimePoint};
use crate::timer::Timer;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::debug;

/// Observer of stimulus notifications.
pub type StimulusHandler = dyn Fn(TimePoint);

/// A visual or auditory stimulus scheduled against the process clock.
pub trait Stimulus {
    /// Start at `tp` and run until stopped.
    fn play(&self, tp: TimePoint);

    /// Start at `tp` and stop at `tp + duration`. A negative duration stops
    /// right after the start.
    fn play_for(&self, tp: TimePoint, duration: Duration);

    /// Stop at `tp`.
    fn stop(&self, tp: TimePoint);

    fn connect_started(&self, handler: Rc<StimulusHandler>) -> HandlerId;

    fn connect_stopped(&self, handler: Rc<StimulusHandler>) -> HandlerId;

    /// Called once per frame while the stimulus is running.
    fn connect_update(&self, handler: Rc<StimulusHandler>) -> HandlerId;
}

struct SimulatedInner {
    latency: Duration,
    frame_interval: Duration,
    running: Cell<bool>,
    onset: Cell<Option<TimePoint>>,
    frames: Cell<u64>,
    start_timer: Timer,
    stop_timer: Timer,
    frame_timer: Timer,
    started_signal: Signal<StimulusHandler>,
    stopped_signal: Signal<StimulusHandler>,
    update_signal: Signal<StimulusHandler>,
}

impl SimulatedInner {
    fn emit(signal: &Signal<StimulusHandler>, tp: TimePoint) {
        for handler in signal.snapshot() {
            handler(tp);
        }
    }

    fn on_start(&self, tp: TimePoint) {
        debug!(%tp, "stimulus started");
        self.running.set(true);
        self.onset.set(Some(tp));
        self.frames.set(0);
        Self::emit(&self.started_signal, tp);
        self.on_frame(tp);
    }

    fn on_frame(&self, tp: TimePoint) {
        self.frames.set(self.frames.get() + 1);
        Self::emit(&self.update_signal, tp);
        if self.running.get() {
            self.frame_timer.arm(tp + self.frame_interval);
        }
    }

    fn on_stop(&self, tp: TimePoint) {
        self.frame_timer.disarm();
        if !self.running.replace(false) {
            debug!(%tp, "stop of a stimulus that is not running");
            return;
        }
        debug!(%tp, frames = self.frames.get(), "stimulus stopped");
        Self::emit(&self.stopped_signal, tp);
    }
}

/// A stand-in stimulus with a fixed presentation latency, driven entirely by
/// the event loop. Notifications arrive `latency` after the requested times,
/// with updates every `frame_interval` in between.
#[derive(Clone)]
pub struct SimulatedStimulus(Rc<SimulatedInner>);

impl SimulatedStimulus {
    pub fn new(dispatcher: &Dispatcher, latency: Duration, frame_interval: Duration) -> Self {
        let inner = Rc::new(SimulatedInner {
            latency,
            frame_interval,
            running: Cell::new(false),
            onset: Cell::new(None),
            frames: Cell::new(0),
            start_timer: Timer::new(dispatcher),
            stop_timer: Timer::new(dispatcher),
            frame_timer: Timer::new(dispatcher),
            started_signal: Signal::new(),
            stopped_signal: Signal::new(),
            update_signal: Signal::new(),
        });

        let weak = Rc::downgrade(&inner);
        inner.start_timer.connect_fired(with_inner(&weak, SimulatedInner::on_start));
        inner.stop_timer.connect_fired(with_inner(&weak, SimulatedInner::on_stop));
        inner.frame_timer.connect_fired(with_inner(&weak, SimulatedInner::on_frame));

        Self(inner)
    }

    pub fn latency(&self) -> Duration {
        self.0.latency
    }

    pub fn is_running(&self) -> bool {
        self.0.running.get()
    }

    /// When the current or last presentation actually started.
    pub fn onset(&self) -> Option<TimePoint> {
        self.0.onset.get()
    }

    /// Frames presented since the last start.
    pub fn frames(&self) -> u64 {
        self.0.frames.get()
    }
}

/// Forward a timer firing to the stimulus, if it is still alive.
fn with_inner(
    weak: &Weak<SimulatedInner>,
    f: fn(&SimulatedInner, TimePoint),
) -> impl Fn(&Timer, TimePoint) + 'static {
    let weak = weak.clone();
    move |_, tp| {
        if let Some(inner) = weak.upgrade() {
            f(&inner, tp);
        }
    }
}

impl Stimulus for SimulatedStimulus {
    fn play(&self, tp: TimePoint) {
        self.0.stop_timer.disarm();
        self.0.start_timer.arm(tp + self.0.latency);
    }

    fn play_for(&self, tp: TimePoint, duration: Duration) {
        let start = tp + self.0.latency;
        self.0.start_timer.arm(start);
        // Armed after the start timer, so at an equal instant it fires second.
        self.0.stop_timer.arm(start + duration.max(Duration::ZERO));
    }

    fn stop(&self, tp: TimePoint) {
        self.0.stop_timer.arm(tp + self.0.latency);
    }

    fn connect_started(&self, handler: Rc<StimulusHandler>) -> HandlerId {
        self.0.started_signal.connect(handler)
    }

    fn connect_stopped(&self, handler: Rc<StimulusHandler>) -> HandlerId {
        self.0.stopped_signal.connect(handler)
    }

    fn connect_update(&self, handler: Rc<StimulusHandler>) -> HandlerId {
        self.0.update_signal.connect(handler)
    }
}
