use std::process::exit;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info};
use serde::Serialize;

use dispatch_queue::{DispatchQueue, Result, TaskError};

#[derive(Parser)]
#[command(name = "dq-demo", version, about = "Runs a batch of tasks on a dispatch queue")]
struct Cli {
    /// Worker threads: 0 runs inline, 1 is serial, negative uses every CPU
    #[arg(long, default_value_t = -1, allow_negative_numbers = true, value_name = "N")]
    threads: i32,

    /// Number of tasks to dispatch
    #[arg(long, default_value_t = 100, value_name = "N")]
    tasks: u64,

    /// Simulated work per task, in milliseconds
    #[arg(long, default_value_t = 1, value_name = "MS")]
    work_ms: u64,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    log_level: log::LevelFilter,
}

/// Summary of one run.
#[derive(Debug, Serialize)]
struct Report {
    mode: &'static str,
    threads: usize,
    tasks: u64,
    elapsed_ms: u64,
    sum: u64,
}

fn main() {
    let cli = Cli::parse();

    env_logger::builder()
        .filter_level(cli.log_level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(e) = run(&cli) {
        error!("{}", e);
        exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let queue = DispatchQueue::builder()
        .thread_count(cli.threads)
        .thread_name("dq-demo")
        .build()?;
    let threads = queue.thread_count();
    let mode = mode_name(threads);

    info!("dq-demo {}", env!("CARGO_PKG_VERSION"));
    info!("Mode: {} ({} threads)", mode, threads);

    let work = Duration::from_millis(cli.work_ms);
    let start = Instant::now();
    let handles: Vec<_> = (0..cli.tasks)
        .map(|i| {
            queue.dispatch(move || {
                thread::sleep(work);
                i
            })
        })
        .collect();
    queue.wait();

    let sum = handles
        .into_iter()
        .map(|handle| handle.get())
        .sum::<std::result::Result<u64, TaskError>>();
    let elapsed = start.elapsed();
    queue.shutdown();
    let sum = sum?;

    let report = Report {
        mode,
        threads,
        tasks: cli.tasks,
        elapsed_ms: elapsed.as_millis() as u64,
        sum,
    };
    if cli.json {
        match serde_json::to_string(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize report: {}", e),
        }
    } else {
        println!(
            "{} mode, {} threads: {} tasks in {} ms (sum {})",
            report.mode, report.threads, report.tasks, report.elapsed_ms, report.sum
        );
    }

    Ok(())
}

fn mode_name(threads: usize) -> &'static str {
    match threads {
        0 => "synchronous",
        1 => "serial",
        _ => "concurrent",
    }
}
