//! CLI entrypoint for the monitorkit scenario harness.

use std::io::Write;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use monitorkit_core::{LogConfig, init_log_config};
use monitorkit_harness::{HarnessError, Scenario, parse_backends, run_scenario};

/// End-to-end scenarios for monitorkit monitors.
#[derive(Debug, Parser)]
#[command(name = "monitorkit-harness")]
#[command(about = "Scenario harness for monitorkit")]
struct Cli {
    /// Backend to run on: native, portable, or both.
    #[arg(long, global = true, default_value = "both")]
    backend: String,
    /// Emit debug-level diagnostics on stderr.
    #[arg(long, global = true)]
    debug: bool,
    /// Suppress operational log records on stderr.
    #[arg(long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Threads increment a shared counter under the monitor.
    Counter {
        #[arg(long, default_value_t = 8)]
        threads: usize,
        #[arg(long, default_value_t = 10_000)]
        iterations: u64,
    },
    /// Producer hands values to a consumer through a single-slot buffer.
    Handoff {
        #[arg(long, default_value_t = 10_000)]
        items: u64,
    },
    /// Unsignaled timed waits; reports overshoot percentiles.
    Timeout {
        #[arg(long, default_value_t = 20)]
        timeout_ms: i64,
        #[arg(long, default_value_t = 10)]
        samples: usize,
    },
    /// Waiters released together by notify_all.
    Broadcast {
        #[arg(long, default_value_t = 8)]
        waiters: usize,
    },
    /// The holder relocks; verifies the second lock blocks.
    Reentrancy {
        #[arg(long, default_value_t = 200)]
        block_ms: u64,
    },
    /// Every scenario with default parameters.
    All,
}

impl Command {
    fn scenarios(&self) -> Vec<Scenario> {
        match *self {
            Self::Counter {
                threads,
                iterations,
            } => vec![Scenario::Counter {
                threads,
                iterations,
            }],
            Self::Handoff { items } => vec![Scenario::Handoff { items }],
            Self::Timeout {
                timeout_ms,
                samples,
            } => vec![Scenario::Timeout {
                timeout_ms,
                samples,
            }],
            Self::Broadcast { waiters } => vec![Scenario::Broadcast { waiters }],
            Self::Reentrancy { block_ms } => vec![Scenario::Reentrancy { block_ms }],
            Self::All => Scenario::defaults().to_vec(),
        }
    }
}

fn run(cli: &Cli) -> Result<bool, HarnessError> {
    let backends = parse_backends(&cli.backend)?;
    let stdout = std::io::stdout();
    let mut all_ok = true;
    for scenario in cli.command.scenarios() {
        for &backend in &backends {
            let report = run_scenario(scenario, backend)?;
            all_ok &= report.ok;
            let mut out = stdout.lock();
            // A closed stdout ends the run early but is not a scenario failure.
            if writeln!(out, "{}", report.to_jsonl()?).is_err() {
                return Ok(all_ok);
            }
        }
    }
    Ok(all_ok)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.debug || cli.quiet {
        init_log_config(LogConfig {
            debug: cli.debug,
            operational: !cli.quiet,
        });
    }

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("harness: {err}");
            ExitCode::from(2)
        }
    }
}
