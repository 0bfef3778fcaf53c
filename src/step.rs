//! Step
//!
//! The lifecycle node every part of an experiment tree is built from. A step
//! is entered, activated zero or more times, and left, each phase carrying
//! the [`TimePoint`] it applies to.
//!
//! Transitions are validated when called and dispatched later through the
//! event loop: first the [`StepHooks`] of the step, then its observers in
//! connection order, then the behavior of the variant (trial, loop or
//! stepping stones). A lifecycle callback never runs nested inside another.

use crate::dispatch::Dispatcher;
use crate::error::{Operation, StepError, StepResult};
use crate::signal::{HandlerId, Signal};
use crate::step_loop::{Loop, LoopData};
use crate::stepping_stones::{SteppingStones, StonesData};
use crate::time::TimePoint;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

static STEP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_step_id() -> u64 {
    STEP_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Where a step is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StepState {
    #[default]
    Idle,
    Entered,
    Left,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepState::Idle => write!(f, "idle"),
            StepState::Entered => write!(f, "entered"),
            StepState::Left => write!(f, "left"),
        }
    }
}

/// Lifecycle extension points of a step.
///
/// Each hook runs before the observers of the same phase. All methods do
/// nothing by default, so implementors pick the phases they care about.
pub trait StepHooks {
    fn on_enter(&mut self, _step: &Step, _tp: TimePoint) {}

    fn on_activate(&mut self, _step: &Step, _tp: TimePoint) {}

    /// Only called for loops, once per iteration, before the iteration
    /// observers.
    fn on_iteration(&mut self, _step: &Loop, _index: i64, _tp: TimePoint) {}

    fn on_leave(&mut self, _step: &Step, _tp: TimePoint) {}
}

/// Observer of the enter, activate and leave phases.
pub type StepHandler = dyn Fn(&Step, TimePoint);

#[derive(Clone)]
pub(crate) enum StepKind {
    Trial,
    Loop(Rc<RefCell<LoopData>>),
    SteppingStones(Rc<RefCell<StonesData>>),
}

impl StepKind {
    fn label(&self) -> &'static str {
        match self {
            StepKind::Trial => "Trial",
            StepKind::Loop(_) => "Loop",
            StepKind::SteppingStones(_) => "SteppingStones",
        }
    }
}

struct StepInner {
    id: u64,
    name: String,
    state: StepState,
    parent: Option<Weak<RefCell<StepInner>>>,
    dispatcher: Dispatcher,
    kind: StepKind,
    hooks: Option<Box<dyn StepHooks>>,
    /// Set while an activation's hooks, observers and variant logic run.
    activating: bool,
    enter_signal: Signal<StepHandler>,
    activate_signal: Signal<StepHandler>,
    leave_signal: Signal<StepHandler>,
}

/// Shared handle to a step. Clones refer to the same step.
///
/// A parent owns its children; the child only keeps a weak back-reference.
#[derive(Clone)]
pub struct Step(Rc<RefCell<StepInner>>);

impl Step {
    pub(crate) fn with_kind(dispatcher: &Dispatcher, kind: StepKind) -> Self {
        Self(Rc::new(RefCell::new(StepInner {
            id: next_step_id(),
            name: String::new(),
            state: StepState::Idle,
            parent: None,
            dispatcher: dispatcher.clone(),
            kind,
            hooks: None,
            activating: false,
            enter_signal: Signal::new(),
            activate_signal: Signal::new(),
            leave_signal: Signal::new(),
        })))
    }

    /// Get the step ID.
    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.0.borrow_mut().name = name.into();
    }

    pub fn state(&self) -> StepState {
        self.0.borrow().state
    }

    /// True between enter and leave.
    pub fn is_active(&self) -> bool {
        self.state() == StepState::Entered
    }

    pub fn parent(&self) -> Option<Step> {
        self.0.borrow().parent.as_ref().and_then(Weak::upgrade).map(Step)
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.0.borrow().dispatcher.clone()
    }

    /// A handle that does not keep the step alive. Observers that refer back
    /// to their own tree should hold one of these.
    pub fn downgrade(&self) -> WeakStep {
        WeakStep(Rc::downgrade(&self.0))
    }

    /// Whether both handles refer to the same step.
    pub fn ptr_eq(&self, other: &Step) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Install the lifecycle hooks, replacing any previous ones.
    pub fn set_hooks(&self, hooks: impl StepHooks + 'static) {
        self.0.borrow_mut().hooks = Some(Box::new(hooks));
    }

    pub fn clear_hooks(&self) {
        self.0.borrow_mut().hooks = None;
    }

    pub fn as_loop(&self) -> Option<Loop> {
        match self.kind() {
            StepKind::Loop(data) => Some(Loop::from_parts(self.clone(), data)),
            _ => None,
        }
    }

    pub fn as_stepping_stones(&self) -> Option<SteppingStones> {
        match self.kind() {
            StepKind::SteppingStones(data) => Some(SteppingStones::from_parts(self.clone(), data)),
            _ => None,
        }
    }

    pub fn is_trial(&self) -> bool {
        matches!(self.kind(), StepKind::Trial)
    }

    pub fn connect_enter(&self, handler: impl Fn(&Step, TimePoint) + 'static) -> HandlerId {
        self.0.borrow().enter_signal.connect(Rc::new(handler))
    }

    pub fn connect_activate(&self, handler: impl Fn(&Step, TimePoint) + 'static) -> HandlerId {
        self.0.borrow().activate_signal.connect(Rc::new(handler))
    }

    pub fn connect_leave(&self, handler: impl Fn(&Step, TimePoint) + 'static) -> HandlerId {
        self.0.borrow().leave_signal.connect(Rc::new(handler))
    }

    /// Remove an observer connected to any phase of this step.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let removed = {
            let inner = self.0.borrow();
            inner.enter_signal.disconnect(id)
                || inner.activate_signal.disconnect(id)
                || inner.leave_signal.disconnect(id)
        };
        removed || self.as_loop().is_some_and(|lp| lp.disconnect_iteration(id))
    }

    /// Enter the step at `tp`.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::InvalidTransition`] if the step is already
    /// entered.
    pub fn enter(&self, tp: TimePoint) -> StepResult<()> {
        let state = self.state();
        if state == StepState::Entered {
            return Err(self.transition_error(Operation::Enter, "it is already entered"));
        }
        self.0.borrow_mut().state = StepState::Entered;
        match self.kind() {
            StepKind::Trial => {}
            StepKind::Loop(data) => data.borrow_mut().reset_for_entry(),
            StepKind::SteppingStones(data) => data.borrow_mut().reset_for_entry(),
        }

        debug!(step = %self, %tp, "enter");
        let step = self.clone();
        self.dispatcher().invoke_soon(move || step.dispatch_enter(tp));
        Ok(())
    }

    /// Activate the step at `tp`.
    ///
    /// For a loop this finishes the current iteration; for stepping stones it
    /// enters the selected child or leaves.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::InvalidTransition`] if the step is not entered,
    /// or if it is a container whose current child is still entered. A
    /// container with children also refuses activation from its own hooks
    /// and observers, since the activation being dispatched is about to
    /// enter a child.
    pub fn activate(&self, tp: TimePoint) -> StepResult<()> {
        let state = self.state();
        if state != StepState::Entered {
            return Err(self.transition_error(Operation::Activate, format!("it is {state}")));
        }
        if let Some(child) = self.active_child() {
            if child.is_active() {
                return Err(self.transition_error(
                    Operation::Activate,
                    format!("its child {child} is still entered"),
                ));
            }
        }
        if self.0.borrow().activating && self.has_children() {
            return Err(self.transition_error(
                Operation::Activate,
                "its current activation is still being dispatched",
            ));
        }

        trace!(step = %self, %tp, "activate requested");
        let step = self.clone();
        self.dispatcher().invoke_soon(move || step.dispatch_activate(tp));
        Ok(())
    }

    /// Leave the step at `tp`. Once the leave is dispatched, the parent is
    /// activated with the same time point.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::InvalidTransition`] if the step is not entered.
    pub fn leave(&self, tp: TimePoint) -> StepResult<()> {
        let state = self.state();
        if state != StepState::Entered {
            return Err(self.transition_error(Operation::Leave, format!("it is {state}")));
        }
        self.0.borrow_mut().state = StepState::Left;

        debug!(step = %self, %tp, "leave");
        let step = self.clone();
        self.dispatcher().invoke_soon(move || step.dispatch_leave(tp));
        Ok(())
    }

    /// Index of a loop up the ancestor chain, starting at this step.
    ///
    /// Only loops are counted: `0` is the nearest loop (this step itself if it
    /// is one), `1` the loop enclosing that one, and so on.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::NoSuchLoop`] if there are not enough loops.
    pub fn get_loop_index(&self, levels_up: usize) -> StepResult<i64> {
        let mut remaining = levels_up;
        let mut cursor = Some(self.clone());
        while let Some(step) = cursor {
            if let Some(lp) = step.as_loop() {
                if remaining == 0 {
                    return Ok(lp.index());
                }
                remaining -= 1;
            }
            cursor = step.parent();
        }
        Err(StepError::NoSuchLoop { levels_up })
    }

    /// Indices of every enclosing loop, outermost first.
    pub fn get_loop_indices(&self) -> Vec<i64> {
        let mut indices = Vec::new();
        let mut cursor = Some(self.clone());
        while let Some(step) = cursor {
            if let Some(lp) = step.as_loop() {
                indices.push(lp.index());
            }
            cursor = step.parent();
        }
        indices.reverse();
        indices
    }

    /// Record `parent` as the owner of this step.
    pub(crate) fn attach_to(&self, parent: &Step) -> StepResult<()> {
        let mut cursor = Some(parent.clone());
        while let Some(ancestor) = cursor {
            if ancestor.ptr_eq(self) {
                return Err(StepError::Cycle {
                    step: self.to_string(),
                });
            }
            cursor = ancestor.parent();
        }
        if self.parent().is_some() {
            return Err(StepError::AlreadyParented {
                step: self.to_string(),
            });
        }
        self.0.borrow_mut().parent = Some(Rc::downgrade(&parent.0));
        Ok(())
    }

    pub(crate) fn detach(&self) {
        self.0.borrow_mut().parent = None;
    }

    fn kind(&self) -> StepKind {
        self.0.borrow().kind.clone()
    }

    /// The child whose leave this step is waiting on, if any.
    fn active_child(&self) -> Option<Step> {
        match self.kind() {
            StepKind::Trial => None,
            StepKind::Loop(data) => data.borrow().child.clone(),
            StepKind::SteppingStones(data) => data.borrow().current_step(),
        }
    }

    fn has_children(&self) -> bool {
        match self.kind() {
            StepKind::Trial => false,
            StepKind::Loop(data) => data.borrow().child.is_some(),
            StepKind::SteppingStones(data) => data.borrow().has_steps(),
        }
    }

    fn set_activating(&self, activating: bool) {
        self.0.borrow_mut().activating = activating;
    }

    fn transition_error(&self, operation: Operation, reason: impl Into<String>) -> StepError {
        StepError::InvalidTransition {
            step: self.to_string(),
            operation,
            reason: reason.into(),
        }
    }

    /// Run a hook with the hooks taken out of the step, so the hook itself
    /// may use the step freely.
    pub(crate) fn run_hook(&self, f: impl FnOnce(&mut dyn StepHooks)) {
        let hooks = self.0.borrow_mut().hooks.take();
        if let Some(mut hooks) = hooks {
            f(hooks.as_mut());
            let mut inner = self.0.borrow_mut();
            // A hook may have installed replacements.
            if inner.hooks.is_none() {
                inner.hooks = Some(hooks);
            }
        }
    }

    fn emit(&self, select: impl Fn(&StepInner) -> &Signal<StepHandler>, tp: TimePoint) {
        let inner = self.0.borrow();
        let handlers = select(&*inner).snapshot();
        drop(inner);
        for handler in handlers {
            handler(self, tp);
        }
    }

    fn dispatch_enter(&self, tp: TimePoint) {
        trace!(step = %self, %tp, "dispatching enter");
        self.run_hook(|hooks| hooks.on_enter(self, tp));
        self.emit(|inner| &inner.enter_signal, tp);

        if self.is_active() {
            self.dispatch_activate(tp);
        } else {
            trace!(step = %self, "left during enter, skipping activation");
        }
    }

    fn dispatch_activate(&self, tp: TimePoint) {
        if !self.is_active() {
            trace!(step = %self, "no longer entered, skipping activation");
            return;
        }
        // The child may have been entered after this activation was queued.
        if let Some(child) = self.active_child().filter(Step::is_active) {
            warn!(step = %self, %child, %tp, "child still entered, activation dropped");
            return;
        }
        trace!(step = %self, %tp, "dispatching activate");
        self.set_activating(true);
        self.run_hook(|hooks| hooks.on_activate(self, tp));
        self.emit(|inner| &inner.activate_signal, tp);

        if self.is_active() {
            match self.kind() {
                StepKind::Trial => {}
                StepKind::Loop(data) => Loop::from_parts(self.clone(), data).iterate(tp),
                StepKind::SteppingStones(data) => {
                    SteppingStones::from_parts(self.clone(), data).advance(tp)
                }
            }
        }
        self.set_activating(false);
    }

    fn dispatch_leave(&self, tp: TimePoint) {
        trace!(step = %self, %tp, "dispatching leave");
        self.run_hook(|hooks| hooks.on_leave(self, tp));
        self.emit(|inner| &inner.leave_signal, tp);

        if let StepKind::SteppingStones(data) = self.kind() {
            data.borrow_mut().clear_selection();
        }

        if let Some(parent) = self.parent() {
            if let Err(e) = parent.activate(tp) {
                warn!(step = %self, %parent, error = %e, "could not resume parent after leave");
            }
        }
    }
}

/// Non-owning counterpart of [`Step`], see [`Step::downgrade`].
#[derive(Clone)]
pub struct WeakStep(Weak<RefCell<StepInner>>);

impl WeakStep {
    /// The step, if anything still owns it.
    pub fn upgrade(&self) -> Option<Step> {
        self.0.upgrade().map(Step)
    }
}

impl fmt::Debug for WeakStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(step) => write!(f, "WeakStep({step})"),
            None => write!(f, "WeakStep(dropped)"),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(inner) = self.0.try_borrow() else {
            return write!(f, "Step#?");
        };
        write!(f, "{}#{}", inner.kind.label(), inner.id)?;
        if !inner.name.is_empty() {
            write!(f, " '{}'", inner.name)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(inner) => f
                .debug_struct("Step")
                .field("id", &inner.id)
                .field("kind", &inner.kind.label())
                .field("name", &inner.name)
                .field("state", &inner.state)
                .finish_non_exhaustive(),
            Err(_) => f.debug_struct("Step").finish_non_exhaustive(),
        }
    }
}
