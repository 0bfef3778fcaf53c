//! Event-loop boundary
//!
//! Steps, timers and stimuli never own the loop that drives them. They hold a
//! [`Dispatcher`], a cheap handle to whatever implements [`EventLoop`]: the
//! built-in [`MainLoop`](crate::engine::MainLoop), or an adapter around a
//! foreign loop.

use crate::executor::Task;
use crate::scheduler::WakeupCallback;
use crate::time::TimePoint;
use std::fmt;
use std::rc::Rc;

/// Identifies a pending wake-up so it can be cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WakeupHandle(pub(crate) u64);

impl WakeupHandle {
    /// Build a handle from an adapter-specific id.
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

/// What the stepping core needs from an event loop.
///
/// All methods return immediately; the work they request runs later, from
/// the loop's own dispatch.
pub trait EventLoop {
    /// The current instant on the loop's clock.
    fn now(&self) -> TimePoint;

    /// Run `task` at the next opportunity, after everything already queued.
    fn invoke_soon(&self, task: Task);

    /// Run `callback` at or after `at`. The callback receives the instant at
    /// which it actually runs.
    fn schedule_wakeup(&self, at: TimePoint, callback: WakeupCallback) -> WakeupHandle;

    /// Drop a pending wake-up. Returns false if it already ran or was
    /// cancelled before.
    fn cancel_wakeup(&self, handle: WakeupHandle) -> bool;
}

/// Shared handle to an [`EventLoop`].
#[derive(Clone)]
pub struct Dispatcher(Rc<dyn EventLoop>);

impl Dispatcher {
    pub fn new(event_loop: impl EventLoop + 'static) -> Self {
        Self(Rc::new(event_loop))
    }

    pub fn from_rc(event_loop: Rc<dyn EventLoop>) -> Self {
        Self(event_loop)
    }

    pub fn now(&self) -> TimePoint {
        self.0.now()
    }

    pub fn invoke_soon(&self, task: impl FnOnce() + 'static) {
        self.0.invoke_soon(Box::new(task));
    }

    pub fn schedule_wakeup(
        &self,
        at: TimePoint,
        callback: impl FnOnce(TimePoint) + 'static,
    ) -> WakeupHandle {
        self.0.schedule_wakeup(at, Box::new(callback))
    }

    pub fn cancel_wakeup(&self, handle: WakeupHandle) -> bool {
        self.0.cancel_wakeup(handle)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
