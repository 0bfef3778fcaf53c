//! Timer
//!
//! A one-shot wake-up outside the step tree. Periodic behavior comes from
//! re-arming in the fired observer, relative to the delivered time point so
//! dispatch jitter does not accumulate.

use crate::dispatch::{Dispatcher, WakeupHandle};
use crate::signal::{HandlerId, Signal};
use crate::time::TimePoint;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Observer of timer firings; receives the time point the wake-up was
/// actually delivered at.
pub type FiredHandler = dyn Fn(&Timer, TimePoint);

struct TimerInner {
    dispatcher: Dispatcher,
    fire_time: Option<TimePoint>,
    pending: Option<WakeupHandle>,
    fired_signal: Signal<FiredHandler>,
}

impl Drop for TimerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            self.dispatcher.cancel_wakeup(handle);
        }
    }
}

#[derive(Clone)]
pub struct Timer(Rc<RefCell<TimerInner>>);

impl Timer {
    pub fn new(dispatcher: &Dispatcher) -> Self {
        Self(Rc::new(RefCell::new(TimerInner {
            dispatcher: dispatcher.clone(),
            fire_time: None,
            pending: None,
            fired_signal: Signal::new(),
        })))
    }

    /// Fire at or after `target`. Arming an armed timer replaces the pending
    /// target.
    pub fn arm(&self, target: TimePoint) {
        let (dispatcher, previous) = {
            let mut inner = self.0.borrow_mut();
            (inner.dispatcher.clone(), inner.pending.take())
        };
        if let Some(previous) = previous {
            dispatcher.cancel_wakeup(previous);
            debug!(%target, "re-arming timer, previous target dropped");
        }

        let weak: Weak<RefCell<TimerInner>> = Rc::downgrade(&self.0);
        let handle = dispatcher.schedule_wakeup(target, move |tp| {
            if let Some(inner) = weak.upgrade() {
                Timer(inner).fire(tp);
            }
        });

        let mut inner = self.0.borrow_mut();
        inner.fire_time = Some(target);
        inner.pending = Some(handle);
        trace!(%target, "timer armed");
    }

    /// Cancel the pending firing. Does nothing if the timer is not armed.
    pub fn disarm(&self) {
        let (dispatcher, pending) = {
            let mut inner = self.0.borrow_mut();
            inner.fire_time = None;
            (inner.dispatcher.clone(), inner.pending.take())
        };
        if let Some(handle) = pending {
            dispatcher.cancel_wakeup(handle);
            trace!("timer disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.0.borrow().pending.is_some()
    }

    /// The requested target of the pending firing.
    pub fn fire_time(&self) -> Option<TimePoint> {
        self.0.borrow().fire_time
    }

    pub fn connect_fired(&self, handler: impl Fn(&Timer, TimePoint) + 'static) -> HandlerId {
        self.0.borrow().fired_signal.connect(Rc::new(handler))
    }

    pub fn disconnect(&self, id: HandlerId) -> bool {
        self.0.borrow().fired_signal.disconnect(id)
    }

    fn fire(&self, tp: TimePoint) {
        let (target, handlers) = {
            let mut inner = self.0.borrow_mut();
            inner.pending = None;
            (inner.fire_time.take(), inner.fired_signal.snapshot())
        };
        trace!(?target, %tp, "timer fired");
        for handler in handlers {
            handler(self, tp);
        }
    }
}
