//! Scenario implementations.
//!
//! State shared between scenario threads lives in atomics accessed with
//! `Relaxed` ordering and plain load-then-store sequences, so only the
//! monitor's lock keeps updates from being lost.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use monitorkit_core::{Backend, Monitor, log_error, log_oper};

use crate::HarnessError;
use crate::report::{ScenarioReport, duration_ns, percentile};

/// A runnable scenario with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// `threads` workers each increment a shared counter `iterations` times.
    Counter { threads: usize, iterations: u64 },
    /// One producer hands `items` values to one consumer through a
    /// single-slot buffer.
    Handoff { items: u64 },
    /// Unsignaled timed waits, measuring how far each overshoots.
    Timeout { timeout_ms: i64, samples: usize },
    /// `waiters` threads released by one `notify_all`.
    Broadcast { waiters: usize },
    /// The holder locks again; the second lock must not return within
    /// `block_ms`.
    Reentrancy { block_ms: u64 },
}

impl Scenario {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Counter { .. } => "counter",
            Self::Handoff { .. } => "handoff",
            Self::Timeout { .. } => "timeout",
            Self::Broadcast { .. } => "broadcast",
            Self::Reentrancy { .. } => "reentrancy",
        }
    }

    /// Every scenario with its default parameters.
    #[must_use]
    pub const fn defaults() -> [Self; 5] {
        [
            Self::Counter {
                threads: 8,
                iterations: 10_000,
            },
            Self::Handoff { items: 10_000 },
            Self::Timeout {
                timeout_ms: 20,
                samples: 10,
            },
            Self::Broadcast { waiters: 8 },
            Self::Reentrancy { block_ms: 200 },
        ]
    }
}

/// Run `scenario` on a fresh monitor from `backend`.
pub fn run_scenario(scenario: Scenario, backend: Backend) -> Result<ScenarioReport, HarnessError> {
    log_oper!(
        "scenario {} starting on {} backend",
        scenario.name(),
        backend.as_str()
    );
    let report = match scenario {
        Scenario::Counter {
            threads,
            iterations,
        } => counter(backend, threads, iterations)?,
        Scenario::Handoff { items } => handoff(backend, items)?,
        Scenario::Timeout {
            timeout_ms,
            samples,
        } => timeout(backend, timeout_ms, samples)?,
        Scenario::Broadcast { waiters } => broadcast(backend, waiters)?,
        Scenario::Reentrancy { block_ms } => reentrancy(backend, block_ms)?,
    };
    if let Some(failure) = &report.failure {
        log_error!(
            "scenario {} failed on {} backend: {failure}",
            report.scenario,
            report.backend
        );
    }
    Ok(report)
}

fn join_all<T>(handles: Vec<JoinHandle<T>>, label: &'static str) -> Result<Vec<T>, HarnessError> {
    handles
        .into_iter()
        .map(|handle| handle.join().map_err(|_| HarnessError::ThreadPanicked(label)))
        .collect()
}

fn counter(backend: Backend, threads: usize, iterations: u64) -> Result<ScenarioReport, HarnessError> {
    if threads == 0 {
        return Err(HarnessError::InvalidParameter(
            "counter needs at least one thread".into(),
        ));
    }
    let expected = (threads as u64).checked_mul(iterations).ok_or_else(|| {
        HarnessError::InvalidParameter(format!(
            "counter total overflows: {threads} threads x {iterations} iterations"
        ))
    })?;
    let monitor = Arc::new(Monitor::with_backend(backend)?);
    let count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(threads));

    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let monitor = Arc::clone(&monitor);
            let count = Arc::clone(&count);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                for _ in 0..iterations {
                    let _guard = monitor.synchronized();
                    let value = count.load(Ordering::Relaxed);
                    count.store(value + 1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    join_all(handles, "counter worker")?;
    let elapsed = start.elapsed();

    let total = {
        let _guard = monitor.synchronized();
        count.load(Ordering::Relaxed)
    };
    Ok(ScenarioReport::new("counter", backend)
        .with_elapsed(elapsed)
        .metric("threads", threads as u64)
        .metric("iterations", iterations)
        .metric("expected", expected)
        .metric("total", total)
        .check(total == expected, || {
            format!("lost updates: total {total}, expected {expected}")
        }))
}

/// Single-slot buffer guarded by the scenario monitor.
#[derive(Default)]
struct Slot {
    full: AtomicBool,
    value: AtomicU64,
}

fn handoff(backend: Backend, items: u64) -> Result<ScenarioReport, HarnessError> {
    let monitor = Arc::new(Monitor::with_backend(backend)?);
    let slot = Arc::new(Slot::default());

    let start = Instant::now();
    let producer = {
        let monitor = Arc::clone(&monitor);
        let slot = Arc::clone(&slot);
        std::thread::spawn(move || {
            for item in 0..items {
                let guard = monitor.synchronized();
                while slot.full.load(Ordering::Relaxed) {
                    guard.wait_forever();
                }
                slot.value.store(item, Ordering::Relaxed);
                slot.full.store(true, Ordering::Relaxed);
                guard.notify();
            }
        })
    };

    let mut waits = 0_u64;
    let mut first_mismatch = None;
    for expected in 0..items {
        let guard = monitor.synchronized();
        while !slot.full.load(Ordering::Relaxed) {
            guard.wait_forever();
            waits += 1;
        }
        let value = slot.value.load(Ordering::Relaxed);
        slot.full.store(false, Ordering::Relaxed);
        guard.notify();
        drop(guard);
        if value != expected && first_mismatch.is_none() {
            first_mismatch = Some((expected, value));
        }
    }
    join_all(vec![producer], "handoff producer")?;
    let elapsed = start.elapsed();

    Ok(ScenarioReport::new("handoff", backend)
        .with_elapsed(elapsed)
        .metric("items", items)
        .metric("consumer_waits", waits)
        .check(first_mismatch.is_none(), || {
            let (expected, got) = first_mismatch.unwrap_or_default();
            format!("out of order: expected {expected}, got {got}")
        }))
}

fn timeout(backend: Backend, timeout_ms: i64, samples: usize) -> Result<ScenarioReport, HarnessError> {
    if timeout_ms <= 0 || samples == 0 {
        return Err(HarnessError::InvalidParameter(format!(
            "timeout needs timeout_ms > 0 and samples > 0, got {timeout_ms} and {samples}"
        )));
    }
    let monitor = Monitor::with_backend(backend)?;
    let timeout = Duration::from_millis(timeout_ms.unsigned_abs());

    let mut overshoots = Vec::with_capacity(samples);
    let mut early_returns = 0_u64;
    let start = Instant::now();
    for _ in 0..samples {
        let guard = monitor.synchronized();
        let wait_start = Instant::now();
        guard.wait(timeout_ms);
        let waited = wait_start.elapsed();
        drop(guard);
        match waited.checked_sub(timeout) {
            Some(overshoot) => overshoots.push(duration_ns(overshoot)),
            None => early_returns += 1,
        }
    }
    let elapsed = start.elapsed();
    overshoots.sort_unstable();

    Ok(ScenarioReport::new("timeout", backend)
        .with_elapsed(elapsed)
        .metric("timeout_ms", timeout_ms.unsigned_abs())
        .metric("samples", samples as u64)
        .metric("early_returns", early_returns)
        .metric("overshoot_p50_ns", percentile(&overshoots, 50.0))
        .metric("overshoot_p99_ns", percentile(&overshoots, 99.0))
        .metric("overshoot_max_ns", overshoots.last().copied().unwrap_or(0))
        .check(early_returns == 0, || {
            format!("{early_returns} of {samples} waits returned before {timeout_ms}ms")
        }))
}

fn broadcast(backend: Backend, waiters: usize) -> Result<ScenarioReport, HarnessError> {
    if waiters == 0 {
        return Err(HarnessError::InvalidParameter(
            "broadcast needs at least one waiter".into(),
        ));
    }
    let monitor = Arc::new(Monitor::with_backend(backend)?);
    let registered = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));
    let go = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..waiters)
        .map(|_| {
            let monitor = Arc::clone(&monitor);
            let registered = Arc::clone(&registered);
            let released = Arc::clone(&released);
            let go = Arc::clone(&go);
            std::thread::spawn(move || {
                let guard = monitor.synchronized();
                registered.store(registered.load(Ordering::Relaxed) + 1, Ordering::Relaxed);
                guard.notify_all();
                while !go.load(Ordering::Relaxed) {
                    guard.wait_forever();
                }
                released.store(released.load(Ordering::Relaxed) + 1, Ordering::Relaxed);
            })
        })
        .collect();

    {
        let guard = monitor.synchronized();
        while registered.load(Ordering::Relaxed) < waiters {
            guard.wait(50);
        }
    }

    let start = Instant::now();
    {
        let guard = monitor.synchronized();
        go.store(true, Ordering::Relaxed);
        guard.notify_all();
    }
    join_all(handles, "broadcast waiter")?;
    let elapsed = start.elapsed();

    let woken = {
        let _guard = monitor.synchronized();
        released.load(Ordering::Relaxed)
    };
    Ok(ScenarioReport::new("broadcast", backend)
        .with_elapsed(elapsed)
        .metric("waiters", waiters as u64)
        .metric("released", woken as u64)
        .check(woken == waiters, || {
            format!("notify_all released {woken} of {waiters} waiters")
        }))
}

fn reentrancy(backend: Backend, block_ms: u64) -> Result<ScenarioReport, HarnessError> {
    let monitor = Arc::new(Monitor::with_backend(backend)?);
    let (tx, rx) = mpsc::channel();

    // The worker never finishes: it keeps its Arc and the lock until exit.
    let worker = Arc::clone(&monitor);
    std::thread::spawn(move || {
        worker.lock();
        let _ = tx.send("first");
        worker.lock();
        let _ = tx.send("second");
    });

    let start = Instant::now();
    let first = rx.recv_timeout(Duration::from_secs(5));
    let second = rx.recv_timeout(Duration::from_millis(block_ms));
    let elapsed = start.elapsed();

    let deadlocked = first.is_ok() && matches!(second, Err(mpsc::RecvTimeoutError::Timeout));
    Ok(ScenarioReport::new("reentrancy", backend)
        .with_elapsed(elapsed)
        .metric("block_ms", block_ms)
        .metric("deadlocked", u64::from(deadlocked))
        .check(deadlocked, || {
            format!("holder relock was expected to block: first={first:?}, second={second:?}")
        }))
}
