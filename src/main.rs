//! Scheduler Simulation CLI
//!
//! Runs the round-robin scheduler over N workload threads and streams the
//! transition trace (BOOT, SPAWN, DISPATCH, PREEMPT, SYSCALL, IO-START,
//! FINISHED, ...) to stdout via the log layer.
//!
//! # Exit Codes
//!
//! - `0`: the run terminated with every workload finished
//! - `2`: invalid arguments

use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use schedsim_rs::workload::Profile;
use schedsim_rs::{run, RuntimeConfig, DEFAULT_MAX_STEPS};

fn print_usage(exe: &std::ffi::OsStr) {
    eprintln!(
        "usage: {} [OPTIONS]

OPTIONS:
    --apps=<N>            Number of workloads, 3..=6 (default: 3)
    --profile=<P>         Workload profile: cpu | io | split (default: split)
    --steps=<N>           Steps per workload (default: {DEFAULT_MAX_STEPS})
    --step-ms=<N>         Quantum length in milliseconds (default: 200)
    --trace-json=<PATH>   Write the full trace as JSON on exit
    --help, -h            Show this help message",
        exe.to_string_lossy()
    );
}

fn main() -> io::Result<()> {
    let mut args = env::args_os();
    let exe = args.next().unwrap_or_else(|| "schedsim".into());

    let mut apps: usize = 3;
    let mut profile = Profile::Split;
    let mut max_steps: u32 = DEFAULT_MAX_STEPS;
    let mut step_ms: u64 = 200;
    let mut trace_json: Option<PathBuf> = None;

    for arg in args {
        let Some(flag) = arg.to_str() else {
            print_usage(&exe);
            std::process::exit(2);
        };
        if let Some(value) = flag.strip_prefix("--apps=") {
            apps = value.parse().unwrap_or_else(|_| {
                eprintln!("invalid --apps value: {value}");
                std::process::exit(2);
            });
            if !(3..=6).contains(&apps) {
                eprintln!("--apps must be between 3 and 6");
                std::process::exit(2);
            }
        } else if let Some(value) = flag.strip_prefix("--profile=") {
            profile = Profile::parse(value).unwrap_or_else(|| {
                eprintln!("invalid --profile value: {value}");
                std::process::exit(2);
            });
        } else if let Some(value) = flag.strip_prefix("--steps=") {
            max_steps = value.parse().unwrap_or_else(|_| {
                eprintln!("invalid --steps value: {value}");
                std::process::exit(2);
            });
            if max_steps == 0 {
                eprintln!("--steps must be >= 1");
                std::process::exit(2);
            }
        } else if let Some(value) = flag.strip_prefix("--step-ms=") {
            step_ms = value.parse().unwrap_or_else(|_| {
                eprintln!("invalid --step-ms value: {value}");
                std::process::exit(2);
            });
            if step_ms == 0 {
                eprintln!("--step-ms must be >= 1");
                std::process::exit(2);
            }
        } else if let Some(value) = flag.strip_prefix("--trace-json=") {
            trace_json = Some(PathBuf::from(value));
        } else {
            match flag {
                "--help" | "-h" => {
                    print_usage(&exe);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("unknown flag: {flag}");
                    print_usage(&exe);
                    std::process::exit(2);
                }
            }
        }
    }

    // Default to the transition trace on stdout; RUST_LOG overrides.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new("schedsim=info,schedsim_rs=warn")
                }),
        )
        .with_target(false)
        .with_writer(io::stdout)
        .init();

    let cfg = RuntimeConfig {
        apps,
        profile,
        max_steps,
        step_interval: Duration::from_millis(step_ms),
        poll_interval: Duration::from_millis(step_ms / 10).max(Duration::from_millis(1)),
    };

    let report = run(&cfg);

    if let Some(path) = trace_json {
        let json = serde_json::to_string_pretty(&report.trace)?;
        fs::write(&path, json)?;
    }

    eprintln!("finished={} apps={apps} steps={max_steps}", report.finished);
    Ok(())
}
