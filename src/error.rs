//! Error types for step lifecycles and the main loop.

use crate::scheduler::SchedulerMode;
use thiserror::Error;

/// The lifecycle operation that was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Enter,
    Activate,
    Leave,
    /// Choosing the next child of a stepping stones container.
    SelectNext,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Enter => write!(f, "enter"),
            Operation::Activate => write!(f, "activate"),
            Operation::Leave => write!(f, "leave"),
            Operation::SelectNext => write!(f, "select the next child of"),
        }
    }
}

/// Errors surfaced by step operations.
///
/// Every variant is returned synchronously to the caller of the offending
/// operation; nothing is retried or silently recovered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepError {
    /// The step is not in a state that allows the operation.
    #[error("cannot {operation} {step}: {reason}")]
    InvalidTransition {
        /// Description of the step, e.g. `Loop#4 'blocks'`.
        step: String,
        operation: Operation,
        reason: String,
    },

    /// A stepping stones container has no child with this name.
    #[error("there is no step with the name '{0}'")]
    NameNotFound(String),

    /// A stepping stones container already has a child with this name.
    #[error("the name '{0}' already exists")]
    DuplicateName(String),

    /// Selecting a child by position past the end.
    #[error("the index {index} is out of range for {len} steps")]
    InvalidIndex { index: usize, len: usize },

    /// The ancestor chain holds fewer loops than requested.
    #[error("no loop {levels_up} level(s) up the ancestor chain")]
    NoSuchLoop { levels_up: usize },

    /// The step is already owned by another container.
    #[error("{step} already has a parent")]
    AlreadyParented { step: String },

    /// Attaching the child would make a step its own ancestor.
    #[error("attaching {step} would create a cycle")]
    Cycle { step: String },
}

/// Convenience type alias for step operations.
pub type StepResult<T> = Result<T, StepError>;

/// Errors from driving the main loop.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// Callbacks kept scheduling more work than one dispatch pass allows.
    #[error("dispatch limit of {limit} exceeded, likely infinite scheduling")]
    DispatchLimit { limit: usize },

    /// The operation only makes sense in the other mode.
    #[error("operation requires {expected:?} mode, main loop runs in {actual:?} mode")]
    WrongMode {
        expected: SchedulerMode,
        actual: SchedulerMode,
    },

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// Convenience type alias for main loop operations.
pub type EngineResult<T> = Result<T, EngineError>;
