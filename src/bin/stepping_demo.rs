//! Stepping Stones Demo
//!
//! Three colored trials inside a stepping stones container. Each trial shows
//! a simulated stimulus, and when it leaves the next branch is chosen by
//! name. The container leaves after the "exit" branch.
//!
//! Usage:
//!   cargo run --bin stepping_demo                 # red, blue, exit
//!   cargo run --bin stepping_demo -- --blue-first # blue, red, exit

use rust_stepping_lib::{
    Duration, MainLoop, SimulatedStimulus, SteppingStones, Stimulus, Trial,
};
use std::env;
use std::rc::Rc;
use tracing::{info, warn};

const PRESENTATION: Duration = Duration::from_millis(400);
const LATENCY: Duration = Duration::from_millis(8);

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stepping_demo=info")),
        )
        .with_target(true)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut blue_first = false;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--blue-first" | "-b" => blue_first = true,
            "--help" | "-h" => {
                println!("Usage: stepping_demo [--blue-first]");
                return Ok(());
            }
            other => return Err(format!("Unknown argument {other}").into()),
        }
    }

    init_logging();

    let plan: Rc<Vec<&'static str>> = Rc::new(if blue_first {
        vec!["blue", "red", "exit"]
    } else {
        vec!["red", "blue", "exit"]
    });

    let main_loop = MainLoop::realtime();
    let d = main_loop.dispatcher();
    let frame_interval = Duration::from(main_loop.config().frame_interval);
    let stones = SteppingStones::with_name(&d, "colors");

    for name in ["red", "blue", "exit"] {
        let trial = Trial::with_name(&d, name);
        let stimulus = SimulatedStimulus::new(&d, LATENCY, frame_interval);

        let s = stimulus.clone();
        trial.connect_enter(move |step, tp| {
            info!(branch = %step.name(), %tp, "presenting");
            s.play_for(tp, PRESENTATION);
        });

        // The trial owns the stimulus through its enter observer, so the
        // stimulus only holds on to the trial weakly.
        let t = trial.downgrade();
        stimulus.connect_stopped(Rc::new(move |tp| {
            let Some(trial) = t.upgrade() else {
                return;
            };
            if let Err(e) = trial.leave(tp) {
                warn!(error = %e, "trial could not leave");
            }
        }));

        let (container, plan) = (stones.downgrade(), plan.clone());
        trial.connect_leave(move |step, tp| {
            let name = step.name();
            let position = plan.iter().position(|n| *n == name);
            let Some(next) = position.and_then(|p| plan.get(p + 1)) else {
                info!(branch = %name, %tp, "last branch done");
                return;
            };
            let Some(stones) = container.upgrade().and_then(|s| s.as_stepping_stones()) else {
                return;
            };
            if let Err(e) = stones.activate_next_by_name(next) {
                warn!(error = %e, "could not select the next branch");
            }
        });

        stones.add_step(name, trial)?;
    }

    let first = plan[0];
    stones.connect_enter(move |step, _| {
        let Some(stones) = step.as_stepping_stones() else {
            return;
        };
        if let Err(e) = stones.activate_next_by_name(first) {
            warn!(error = %e, "could not select the first branch");
        }
    });

    let start = main_loop.now();
    let ml = main_loop.clone();
    stones.connect_leave(move |_, tp| {
        println!("all branches done after {}", tp - start);
        ml.quit();
    });

    stones.enter(start)?;
    main_loop.run()?;
    Ok(())
}
