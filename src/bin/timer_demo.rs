//! Periodic Timer Demo
//!
//! Fires a timer repeatedly, re-arming it from the time point it was
//! actually delivered at, and reports how late each firing was.
//!
//! Usage:
//!   cargo run --bin timer_demo -- -n 20 -m 50
//!
//! Options:
//!   -n, --num-repetitions <N>   Number of firings (default 10)
//!   -m, --ms <MS>               Period in milliseconds (default 100)

use rust_stepping_lib::{Duration, MainLoop, Timer};
use std::cell::{Cell, RefCell};
use std::env;
use std::rc::Rc;
use tracing::info;

fn print_usage() {
    println!("Usage: timer_demo [-n|--num-repetitions N] [-m|--ms MS]");
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("timer_demo=info")),
        )
        .with_target(true)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut repetitions: usize = 10;
    let mut period_ms: i64 = 100;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--num-repetitions" | "-n" => {
                i += 1;
                repetitions = args
                    .get(i)
                    .and_then(|v| v.parse().ok())
                    .ok_or("--num-repetitions expects a positive number")?;
            }
            "--ms" | "-m" => {
                i += 1;
                period_ms = args
                    .get(i)
                    .and_then(|v| v.parse().ok())
                    .ok_or("--ms expects a number of milliseconds")?;
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
    if repetitions == 0 || period_ms <= 0 {
        return Err("repetitions and period must be greater than 0".into());
    }

    init_logging();

    let main_loop = MainLoop::realtime();
    let period = Duration::from_millis(period_ms);
    let timer = Timer::new(&main_loop.dispatcher());
    let lags: Rc<RefCell<Vec<Duration>>> = Rc::new(RefCell::new(Vec::new()));
    let target = Rc::new(Cell::new(main_loop.now() + period));

    let (l, t) = (lags.clone(), target.clone());
    timer.connect_fired(move |timer, tp| {
        let lag = tp - t.get();
        l.borrow_mut().push(lag);
        let count = l.borrow().len();
        info!(count, %tp, %lag, "timer fired");

        if count < repetitions {
            t.set(tp + period);
            timer.arm(t.get());
        }
    });

    timer.arm(target.get());
    main_loop.run()?;

    let lags = lags.borrow();
    let max = lags.iter().copied().max().unwrap_or(Duration::ZERO);
    let total = lags.iter().fold(Duration::ZERO, |acc, lag| acc + *lag);
    let mean = total / lags.len().max(1) as i64;
    println!(
        "{} firings every {}: mean lag {}, max lag {}",
        lags.len(),
        period,
        mean,
        max
    );
    Ok(())
}

