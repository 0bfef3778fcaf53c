//! Loop
//!
//! A step that repeats its child while `index <condition> stop` holds,
//! moving `index` by `increment` after every iteration.

use crate::dispatch::Dispatcher;
use crate::error::StepResult;
use crate::signal::{HandlerId, Signal};
use crate::step::{Step, StepKind};
use crate::time::TimePoint;
use std::cell::RefCell;
use std::ops::Deref;
use std::rc::Rc;
use tracing::{debug, warn};

/// Comparison between a loop's index and its stop value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopCondition {
    #[default]
    Less,
    LessEqual,
    Equal,
    NotEqual,
    GreaterEqual,
    Greater,
}

impl LoopCondition {
    /// Evaluate `index <self> stop`.
    pub fn test(self, index: i64, stop: i64) -> bool {
        match self {
            LoopCondition::Less => index < stop,
            LoopCondition::LessEqual => index <= stop,
            LoopCondition::Equal => index == stop,
            LoopCondition::NotEqual => index != stop,
            LoopCondition::GreaterEqual => index >= stop,
            LoopCondition::Greater => index > stop,
        }
    }
}

/// Observer of loop iterations: the loop, the index of the iteration, and
/// the time point it started at.
pub type IterationHandler = dyn Fn(&Loop, i64, TimePoint);

pub(crate) struct LoopData {
    index: i64,
    stop: i64,
    increment: i64,
    condition: LoopCondition,
    pub(crate) child: Option<Step>,
    /// Set while an iteration runs; the next activation advances the index.
    iterating: bool,
    iteration_signal: Signal<IterationHandler>,
}

impl LoopData {
    pub(crate) fn reset_for_entry(&mut self) {
        self.iterating = false;
    }
}

/// A step that repeats.
///
/// Without a child, each iteration is finished by calling
/// [`activate`](Step::activate), usually from an iteration observer or once
/// the iteration's stimulus is done. With a child, the child is entered on
/// every iteration and its leave finishes the iteration.
#[derive(Clone)]
pub struct Loop {
    step: Step,
    data: Rc<RefCell<LoopData>>,
}

impl Loop {
    /// Loop with index 0, stop 0, increment 1 and condition `Less`; it does
    /// not iterate until the stop value is raised.
    pub fn new(dispatcher: &Dispatcher) -> Self {
        Self::with_range(dispatcher, 0, 0, 1, LoopCondition::Less)
    }

    pub fn with_range(
        dispatcher: &Dispatcher,
        index: i64,
        stop: i64,
        increment: i64,
        condition: LoopCondition,
    ) -> Self {
        let data = Rc::new(RefCell::new(LoopData {
            index,
            stop,
            increment,
            condition,
            child: None,
            iterating: false,
            iteration_signal: Signal::new(),
        }));
        let step = Step::with_kind(dispatcher, StepKind::Loop(data.clone()));
        Self { step, data }
    }

    pub(crate) fn from_parts(step: Step, data: Rc<RefCell<LoopData>>) -> Self {
        Self { step, data }
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn index(&self) -> i64 {
        self.data.borrow().index
    }

    pub fn set_index(&self, index: i64) {
        self.data.borrow_mut().index = index;
    }

    pub fn stop(&self) -> i64 {
        self.data.borrow().stop
    }

    pub fn set_stop(&self, stop: i64) {
        self.data.borrow_mut().stop = stop;
    }

    pub fn increment(&self) -> i64 {
        self.data.borrow().increment
    }

    pub fn set_increment(&self, increment: i64) {
        self.data.borrow_mut().increment = increment;
    }

    pub fn condition(&self) -> LoopCondition {
        self.data.borrow().condition
    }

    pub fn set_condition(&self, condition: LoopCondition) {
        self.data.borrow_mut().condition = condition;
    }

    /// Whether the loop would run another iteration at its current index.
    pub fn test(&self) -> bool {
        let data = self.data.borrow();
        data.condition.test(data.index, data.stop)
    }

    pub fn child(&self) -> Option<Step> {
        self.data.borrow().child.clone()
    }

    /// Make `child` the step repeated by this loop, releasing any previous
    /// child.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::AlreadyParented`](crate::error::StepError::AlreadyParented)
    /// if `child` belongs to another container, or
    /// [`StepError::Cycle`](crate::error::StepError::Cycle) if it encloses
    /// this loop.
    pub fn set_child(&self, child: impl Into<Step>) -> StepResult<()> {
        let child = child.into();
        if self.child().is_some_and(|current| current.ptr_eq(&child)) {
            return Ok(());
        }
        child.attach_to(&self.step)?;
        let previous = self.data.borrow_mut().child.replace(child);
        if let Some(previous) = previous {
            previous.detach();
        }
        Ok(())
    }

    /// Release the child, if any.
    pub fn take_child(&self) -> Option<Step> {
        let child = self.data.borrow_mut().child.take();
        if let Some(child) = &child {
            child.detach();
        }
        child
    }

    pub fn connect_iteration(&self, handler: impl Fn(&Loop, i64, TimePoint) + 'static) -> HandlerId {
        self.data.borrow().iteration_signal.connect(Rc::new(handler))
    }

    pub fn disconnect_iteration(&self, id: HandlerId) -> bool {
        self.data.borrow().iteration_signal.disconnect(id)
    }

    /// Finish the running iteration, if any, and start the next one or leave.
    pub(crate) fn iterate(&self, tp: TimePoint) {
        let (proceed, index) = {
            let mut data = self.data.borrow_mut();
            if data.iterating {
                data.index = data.index.saturating_add(data.increment);
                data.iterating = false;
            }
            let proceed = data.condition.test(data.index, data.stop);
            data.iterating = proceed;
            (proceed, data.index)
        };

        if !proceed {
            debug!(step = %self.step, index, "loop condition failed");
            if let Err(e) = self.step.leave(tp) {
                warn!(step = %self.step, error = %e, "could not leave finished loop");
            }
            return;
        }

        debug!(step = %self.step, index, %tp, "iteration");
        self.step.run_hook(|hooks| hooks.on_iteration(self, index, tp));
        let handlers = self.data.borrow().iteration_signal.snapshot();
        for handler in handlers {
            handler(self, index, tp);
        }

        if !self.step.is_active() {
            return;
        }
        let Some(child) = self.child() else {
            return;
        };
        if child.is_active() {
            debug!(step = %self.step, %child, "child still entered, not entering it again");
            return;
        }
        if let Err(e) = child.enter(tp) {
            warn!(step = %self.step, %child, error = %e, "could not enter loop child");
        }
    }
}

impl Deref for Loop {
    type Target = Step;

    fn deref(&self) -> &Step {
        &self.step
    }
}

impl From<Loop> for Step {
    fn from(lp: Loop) -> Step {
        lp.step
    }
}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.borrow();
        f.debug_struct("Loop")
            .field("step", &self.step)
            .field("index", &data.index)
            .field("stop", &data.stop)
            .field("increment", &data.increment)
            .field("condition", &data.condition)
            .finish_non_exhaustive()
    }
}
