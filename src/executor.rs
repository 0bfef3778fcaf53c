//! Single-threaded deterministic executor
//!
//! A FIFO queue of deferred callbacks. Tasks run in the order they were
//! queued, and a task queued while the queue is being drained runs in the
//! same drain, after everything that was already waiting. This is what
//! "invoke soon" means for every step transition.

use std::{cell::RefCell, collections::VecDeque};

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

/// Single-threaded deterministic executor.
#[derive(Default)]
pub struct Executor {
    /// FIFO queue of ready tasks.
    ready: RefCell<VecDeque<Task>>,
}

impl Executor {
    /// Create a new executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task to run on the next drain.
    pub fn spawn(&self, task: impl FnOnce() + 'static) {
        self.ready.borrow_mut().push_back(Box::new(task));
    }

    /// Run ready tasks until no more are ready or `budget` tasks have run.
    /// Returns the number of tasks run.
    pub fn run_until_stalled(&self, budget: usize) -> usize {
        let mut runs = 0;
        while runs < budget {
            // The borrow must end before the task runs, tasks spawn more tasks.
            let task = self.ready.borrow_mut().pop_front();
            let Some(task) = task else {
                break;
            };
            runs += 1;
            task();
        }
        runs
    }

    /// Check if there are any ready tasks.
    pub fn has_ready_tasks(&self) -> bool {
        !self.ready.borrow().is_empty()
    }
}
