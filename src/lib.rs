//! Rust Stepping Library
//!
//! Hierarchical, time-anchored step scheduling for experiments:
//! - A tree of steps (trials, loops, named stepping stones) that are
//!   entered, activated and left at explicit time points
//! - Timers re-armed from their delivered time for drift-tolerant periods
//! - Microsecond time points and signed durations on one monotonic clock
//! - Dual execution modes: realtime (spin_sleep) and offline (virtual time)

pub mod time;
pub mod pq;
pub mod executor;
pub mod scheduler;
pub mod dispatch;
pub mod config;
pub mod error;
pub mod engine;
pub mod signal;
pub mod step;
pub mod trial;
pub mod step_loop;
pub mod stepping_stones;
pub mod timer;
pub mod stimulus;

#[cfg(test)]
mod timing_tests;

pub use config::EngineConfig;
pub use dispatch::{Dispatcher, EventLoop, WakeupHandle};
pub use engine::{launch_offline, launch_realtime, launch_with_config, MainLoop, SchedulerMode};
pub use error::{EngineError, EngineResult, Operation, StepError, StepResult};
pub use signal::HandlerId;
pub use step::{Step, StepHooks, StepState, WeakStep};
pub use step_loop::{Loop, LoopCondition};
pub use stepping_stones::SteppingStones;
pub use stimulus::{SimulatedStimulus, Stimulus};
pub use time::{Clock, Duration, TimeError, TimePoint};
pub use timer::Timer;
pub use trial::Trial;
