//! Nested Loop Demo
//!
//! Runs blocks of trials with two nested loops. Every trial presents a
//! simulated stimulus shortly after it is entered and leaves once the
//! stimulus reports it has stopped. Onset intervals are measured from the
//! delivered onsets, so presentation latency does not skew them.
//!
//! Usage:
//!   cargo run --bin loop_demo -- --blocks 2 --trials 4
//!   cargo run --bin loop_demo -- --config engine.toml
//!
//! Options:
//!   -b, --blocks <N>      Number of blocks (default 2)
//!   -t, --trials <N>      Trials per block (default 3)
//!   -c, --config <FILE>   Engine configuration (TOML)

use rust_stepping_lib::{
    Duration, EngineConfig, Loop, LoopCondition, MainLoop, SimulatedStimulus, Stimulus,
    TimePoint, Trial,
};
use std::cell::Cell;
use std::env;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Time between entering a trial and asking for the stimulus.
const LOOKAHEAD: Duration = Duration::from_millis(100);
const PRESENTATION: Duration = Duration::from_millis(250);
const LATENCY: Duration = Duration::from_millis(12);

fn print_usage() {
    println!("Usage: loop_demo [-b|--blocks N] [-t|--trials N] [-c|--config FILE]");
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("loop_demo=info")),
        )
        .with_target(true)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut blocks: i64 = 2;
    let mut trials: i64 = 3;
    let mut config = EngineConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--blocks" | "-b" => {
                i += 1;
                blocks = args
                    .get(i)
                    .and_then(|v| v.parse().ok())
                    .ok_or("--blocks expects a number")?;
            }
            "--trials" | "-t" => {
                i += 1;
                trials = args
                    .get(i)
                    .and_then(|v| v.parse().ok())
                    .ok_or("--trials expects a number")?;
            }
            "--config" | "-c" => {
                i += 1;
                let path = args.get(i).ok_or("--config expects a file")?;
                config = EngineConfig::from_toml_str(&std::fs::read_to_string(path)?)?;
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                print_usage();
                return Err(format!("Unknown argument {other}").into());
            }
        }
        i += 1;
    }

    init_logging();
    debug!(?config, "engine configuration");

    let main_loop = MainLoop::new(config)?;
    let d = main_loop.dispatcher();
    let frame_interval = Duration::from(main_loop.config().frame_interval);

    let block_loop = Loop::with_range(&d, 0, blocks, 1, LoopCondition::Less);
    block_loop.set_name("blocks");
    let trial_loop = Loop::with_range(&d, 0, trials, 1, LoopCondition::Less);
    trial_loop.set_name("trials");
    let trial = Trial::with_name(&d, "trial");
    let stimulus = SimulatedStimulus::new(&d, LATENCY, frame_interval);

    // Every block starts counting trials from zero again.
    trial_loop.connect_enter(|step, _| {
        if let Some(lp) = step.as_loop() {
            lp.set_index(0);
        }
    });
    block_loop.connect_iteration(|_, index, tp| info!(block = index, %tp, "block"));

    let s = stimulus.clone();
    trial.connect_enter(move |_, tp| s.play_for(tp + LOOKAHEAD, PRESENTATION));

    let previous_onset: Rc<Cell<Option<TimePoint>>> = Rc::new(Cell::new(None));
    // The trial owns the stimulus, so stimulus observers refer back to the
    // trial weakly.
    let (t, previous) = (trial.downgrade(), previous_onset.clone());
    stimulus.connect_started(Rc::new(move |tp| {
        let interval = previous.replace(Some(tp)).map(|p| tp - p);
        let indices = t.upgrade().map(|t| t.get_loop_indices()).unwrap_or_default();
        match interval {
            Some(interval) => println!("trial {indices:?} onset at {tp}, {interval} after the previous one"),
            None => println!("trial {indices:?} onset at {tp}"),
        }
    }));
    let t = trial.downgrade();
    stimulus.connect_stopped(Rc::new(move |tp| {
        let Some(trial) = t.upgrade() else {
            return;
        };
        if let Err(e) = trial.leave(tp) {
            warn!(error = %e, "trial could not leave");
        }
    }));

    trial_loop.set_child(trial)?;
    block_loop.set_child(trial_loop)?;

    let start = main_loop.now();
    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    block_loop.connect_leave(move |_, tp| {
        println!("finished after {}", tp - start);
        flag.set(true);
    });

    block_loop.enter(start)?;
    main_loop.run_until(|| done.get())?;
    Ok(())
}
