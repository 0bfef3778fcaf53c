//! Time Scheduler
//!
//! Keeps the pending wake-ups in deadline order and knows what time it is,
//! either from the monotonic clock (realtime) or from a virtual clock that
//! the engine advances (offline).

use crate::pq::MinPq;
use crate::time::{Clock, TimePoint};
use serde::{Deserialize, Serialize};

/// Scheduler execution mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    #[default]
    Realtime,
    Offline,
}

/// Callback run when a wake-up is dispatched. Receives the instant at which
/// it actually runs, which may lag the requested one.
pub type WakeupCallback = Box<dyn FnOnce(TimePoint)>;

/// A wake-up popped from the queue, ready to run.
pub struct DueWakeup {
    pub id: u64,
    pub deadline: TimePoint,
    pub callback: WakeupCallback,
}

/// The main time scheduler.
pub struct TimeScheduler {
    pub mode: SchedulerMode,

    /// Deterministic sequence counter, also used as wake-up id.
    seq: u64,

    clock: Clock,

    /// Offline clock.
    pub offline_now: TimePoint,

    /// Pending wake-ups keyed on their deadline.
    wakeups: MinPq<WakeupCallback>,
}

impl TimeScheduler {
    /// Create a new scheduler.
    pub fn new(mode: SchedulerMode) -> Self {
        Self {
            mode,
            seq: 0,
            clock: Clock::new(),
            offline_now: TimePoint::ZERO,
            wakeups: MinPq::new(),
        }
    }

    /// Allocate a deterministic sequence number.
    fn alloc_seq(&mut self) -> u64 {
        let s = self.seq;
        self.seq += 1;
        s
    }

    /// Get the current time.
    pub fn now(&self) -> TimePoint {
        match self.mode {
            SchedulerMode::Offline => self.offline_now,
            SchedulerMode::Realtime => self.clock.now(),
        }
    }

    /// Queue a wake-up. Returns its id for cancellation.
    pub fn add_wakeup(&mut self, at: TimePoint, callback: WakeupCallback) -> u64 {
        let seq = self.alloc_seq();
        self.wakeups.add(seq, at, seq, callback);
        seq
    }

    /// Take a pending wake-up out of the queue. Returns `None` when it
    /// already ran or never existed.
    pub fn cancel_wakeup(&mut self, id: u64) -> Option<WakeupCallback> {
        self.wakeups.remove(id)
    }

    /// Peek the next event time.
    pub fn peek_next_event_time(&mut self) -> Option<TimePoint> {
        self.wakeups.peek_deadline()
    }

    /// Pop the earliest wake-up if it is due at `t`.
    /// Wake-ups sharing a deadline come out in the order they were added.
    pub fn process_one_timeslice(&mut self, t: TimePoint) -> Option<DueWakeup> {
        match self.wakeups.peek_deadline() {
            Some(deadline) if deadline <= t => {}
            _ => return None,
        }
        self.wakeups.pop().map(|(id, deadline, _, callback)| DueWakeup {
            id,
            deadline,
            callback,
        })
    }

    /// Check if there are any pending wake-ups.
    pub fn has_pending_waits(&self) -> bool {
        !self.wakeups.is_empty()
    }
}
