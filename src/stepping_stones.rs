//! SteppingStones
//!
//! A container of named children that runs one child at a time and lets the
//! caller pick which child comes next. There is no implicit "next": unless a
//! child is selected, the container leaves as soon as its current child
//! leaves. On entry the first child added is selected by default.

use crate::dispatch::Dispatcher;
use crate::error::{Operation, StepError, StepResult};
use crate::step::{Step, StepKind};
use crate::time::TimePoint;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Deref;
use std::rc::Rc;
use tracing::{debug, warn};

#[derive(Default)]
pub(crate) struct StonesData {
    steps: Vec<(String, Step)>,
    by_name: HashMap<String, usize>,
    /// Child to enter at the next activation.
    next: Option<usize>,
    current: Option<usize>,
    /// Whether a child was entered since the container was entered.
    started: bool,
}

impl StonesData {
    pub(crate) fn current_step(&self) -> Option<Step> {
        self.current
            .and_then(|i| self.steps.get(i))
            .map(|(_, step)| step.clone())
    }

    pub(crate) fn has_steps(&self) -> bool {
        !self.steps.is_empty()
    }

    pub(crate) fn reset_for_entry(&mut self) {
        self.current = None;
        self.started = false;
    }

    pub(crate) fn clear_selection(&mut self) {
        self.current = None;
        self.next = None;
    }
}

#[derive(Clone)]
pub struct SteppingStones {
    step: Step,
    data: Rc<RefCell<StonesData>>,
}

impl SteppingStones {
    pub fn new(dispatcher: &Dispatcher) -> Self {
        let data = Rc::new(RefCell::new(StonesData::default()));
        let step = Step::with_kind(dispatcher, StepKind::SteppingStones(data.clone()));
        Self { step, data }
    }

    pub fn with_name(dispatcher: &Dispatcher, name: impl Into<String>) -> Self {
        let stones = Self::new(dispatcher);
        stones.set_name(name);
        stones
    }

    pub(crate) fn from_parts(step: Step, data: Rc<RefCell<StonesData>>) -> Self {
        Self { step, data }
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    /// Add a child under a unique name. Children keep their insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::DuplicateName`] if the name is taken, or
    /// [`StepError::AlreadyParented`] if the step belongs to another
    /// container.
    pub fn add_step(&self, name: impl Into<String>, step: impl Into<Step>) -> StepResult<()> {
        let name = name.into();
        if self.data.borrow().by_name.contains_key(&name) {
            return Err(StepError::DuplicateName(name));
        }
        let step = step.into();
        step.attach_to(&self.step)?;

        let mut data = self.data.borrow_mut();
        let index = data.steps.len();
        data.by_name.insert(name.clone(), index);
        data.steps.push((name, step));
        Ok(())
    }

    pub fn num_steps(&self) -> usize {
        self.data.borrow().steps.len()
    }

    /// Child names in insertion order.
    pub fn step_names(&self) -> Vec<String> {
        self.data
            .borrow()
            .steps
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn step_by_name(&self, name: &str) -> Option<Step> {
        let data = self.data.borrow();
        data.by_name
            .get(name)
            .and_then(|&i| data.steps.get(i))
            .map(|(_, step)| step.clone())
    }

    /// The child most recently entered during this lifecycle.
    pub fn current(&self) -> Option<Step> {
        self.data.borrow().current_step()
    }

    pub fn current_name(&self) -> Option<String> {
        let data = self.data.borrow();
        data.current
            .and_then(|i| data.steps.get(i))
            .map(|(name, _)| name.clone())
    }

    /// Select the child entered at the next activation of this container.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::NameNotFound`] for an unknown name, and
    /// [`StepError::InvalidTransition`] if the current child is still
    /// entered.
    pub fn activate_next_by_name(&self, name: &str) -> StepResult<()> {
        let index = self.data.borrow().by_name.get(name).copied();
        match index {
            Some(index) => self.activate_next_by_index(index),
            None => Err(StepError::NameNotFound(name.to_string())),
        }
    }

    /// Select a child by insertion position.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::InvalidIndex`] if `index` is out of range, and
    /// [`StepError::InvalidTransition`] if the current child is still
    /// entered.
    pub fn activate_next_by_index(&self, index: usize) -> StepResult<()> {
        let len = self.num_steps();
        if index >= len {
            return Err(StepError::InvalidIndex { index, len });
        }
        if let Some(current) = self.current() {
            if current.is_active() {
                return Err(StepError::InvalidTransition {
                    step: self.step.to_string(),
                    operation: Operation::SelectNext,
                    reason: format!("its child {current} is still entered"),
                });
            }
        }
        debug!(step = %self.step, index, "next child selected");
        self.data.borrow_mut().next = Some(index);
        Ok(())
    }

    /// Enter the selected child, or leave when there is none.
    pub(crate) fn advance(&self, tp: TimePoint) {
        let selected = {
            let mut data = self.data.borrow_mut();
            let first = !data.started;
            data.started = true;
            let default = (first && !data.steps.is_empty()).then_some(0);
            let selected = data.next.take().or(default);
            if selected.is_some() {
                data.current = selected;
            }
            selected.and_then(|i| data.steps.get(i).map(|(_, step)| step.clone()))
        };

        match selected {
            Some(child) => {
                debug!(step = %self.step, %child, %tp, "entering child");
                if let Err(e) = child.enter(tp) {
                    warn!(step = %self.step, %child, error = %e, "could not enter selected child");
                }
            }
            None => {
                debug!(step = %self.step, %tp, "no child selected, leaving");
                if let Err(e) = self.step.leave(tp) {
                    warn!(step = %self.step, error = %e, "could not leave stepping stones");
                }
            }
        }
    }
}

impl Deref for SteppingStones {
    type Target = Step;

    fn deref(&self) -> &Step {
        &self.step
    }
}

impl From<SteppingStones> for Step {
    fn from(stones: SteppingStones) -> Step {
        stones.step
    }
}

impl std::fmt::Debug for SteppingStones {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteppingStones")
            .field("step", &self.step)
            .field("steps", &self.step_names())
            .finish_non_exhaustive()
    }
}
