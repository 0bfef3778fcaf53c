//! Trial
//!
//! The leaf step. It has no scheduling logic of its own: behavior comes from
//! hooks and observers, and something must eventually call
//! [`leave`](Step::leave) or the enclosing container waits forever.

use crate::dispatch::Dispatcher;
use crate::step::{Step, StepKind};
use std::ops::Deref;

#[derive(Clone, Debug)]
pub struct Trial(Step);

impl Trial {
    pub fn new(dispatcher: &Dispatcher) -> Self {
        Self(Step::with_kind(dispatcher, StepKind::Trial))
    }

    pub fn with_name(dispatcher: &Dispatcher, name: impl Into<String>) -> Self {
        let trial = Self::new(dispatcher);
        trial.set_name(name);
        trial
    }

    pub fn step(&self) -> &Step {
        &self.0
    }
}

impl Deref for Trial {
    type Target = Step;

    fn deref(&self) -> &Step {
        &self.0
    }
}

impl From<Trial> for Step {
    fn from(trial: Trial) -> Step {
        trial.0
    }
}
