/*!
 * Sync Stress - Main Entry Point
 *
 * Runs contention scenarios over every primitive and prints one JSON report
 * per scenario:
 * - Mutex and fair reentrant lock hand-off
 * - Semaphore permit bounds
 * - Read-write lock with mixed readers and writers
 * - Latch fan-out and barrier rounds
 *
 * Environment variables:
 * - SYNC_STRESS_THREADS / SYNC_STRESS_ITERATIONS: workload size
 * - SYNC_MAX_SPINS / SYNC_METRICS: synchronizer configuration
 * - RUST_LOG / SYNC_TRACE_JSON: logging
 */

use ai_os_sync::core::limits::{
    DEFAULT_STRESS_ITERATIONS, DEFAULT_STRESS_THREADS, ENV_STRESS_ITERATIONS, ENV_STRESS_THREADS,
};
use ai_os_sync::monitoring::span_scenario;
use ai_os_sync::{
    init_tracing, CountDownLatch, CyclicBarrier, Mutex, ReentrantLock, ReentrantReadWriteLock,
    Semaphore, SyncConfig, SyncMetricsSnapshot,
};
use anyhow::{anyhow, ensure, Context, Result};
use serde::Serialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
struct Workload {
    threads: usize,
    iterations: u64,
    config: SyncConfig,
}

#[derive(Debug, Serialize)]
struct ScenarioReport {
    scenario: &'static str,
    threads: usize,
    operations: u64,
    elapsed_ms: u64,
    violations: u64,
    metrics: SyncMetricsSnapshot,
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

/// Spawn `threads` workers and join them all, failing if any panicked
fn run_workers<F>(threads: usize, worker: F) -> Result<()>
where
    F: Fn(usize) -> Result<()> + Send + Sync + 'static,
{
    let worker = Arc::new(worker);
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let worker = worker.clone();
            thread::Builder::new()
                .name(format!("stress-{}", i))
                .spawn(move || worker(i))
        })
        .collect::<std::io::Result<_>>()
        .context("failed to spawn worker")?;

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("worker thread panicked"))??;
    }
    Ok(())
}

/// Tracks how many threads are inside a critical section at once
#[derive(Default)]
struct Occupancy {
    inside: AtomicUsize,
    violations: AtomicU64,
}

impl Occupancy {
    fn enter(&self, limit: usize) {
        if self.inside.fetch_add(1, Ordering::SeqCst) + 1 > limit {
            self.violations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn exit(&self) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }

    fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }
}

fn mutex_scenario(w: Workload) -> Result<ScenarioReport> {
    let span = span_scenario("mutex", w.threads);
    let _entered = span.enter();
    let mutex = Arc::new(Mutex::with_config(w.config));
    let occupancy = Arc::new(Occupancy::default());

    let (m, o) = (mutex.clone(), occupancy.clone());
    run_workers(w.threads, move |_| {
        for _ in 0..w.iterations {
            let _guard = m.guard()?;
            o.enter(1);
            o.exit();
        }
        Ok(())
    })?;

    let operations = w.threads as u64 * w.iterations;
    span.record_operations(operations);
    Ok(ScenarioReport {
        scenario: "mutex",
        threads: w.threads,
        operations,
        elapsed_ms: span.elapsed().as_millis() as u64,
        violations: occupancy.violations(),
        metrics: mutex.metrics(),
    })
}

fn fair_reentrant_scenario(w: Workload) -> Result<ScenarioReport> {
    let span = span_scenario("fair_reentrant", w.threads);
    let _entered = span.enter();
    let lock = Arc::new(ReentrantLock::with_config(true, w.config));
    let occupancy = Arc::new(Occupancy::default());

    let (l, o) = (lock.clone(), occupancy.clone());
    run_workers(w.threads, move |_| {
        for _ in 0..w.iterations {
            l.lock()?;
            l.lock()?;
            o.enter(1);
            if l.hold_count() != 2 {
                o.violations.fetch_add(1, Ordering::Relaxed);
            }
            o.exit();
            l.unlock()?;
            l.unlock()?;
        }
        Ok(())
    })?;

    let operations = w.threads as u64 * w.iterations;
    span.record_operations(operations);
    Ok(ScenarioReport {
        scenario: "fair_reentrant",
        threads: w.threads,
        operations,
        elapsed_ms: span.elapsed().as_millis() as u64,
        violations: occupancy.violations(),
        metrics: lock.metrics(),
    })
}

fn semaphore_scenario(w: Workload) -> Result<ScenarioReport> {
    let span = span_scenario("semaphore", w.threads);
    let _entered = span.enter();
    let permits = (w.threads / 2).max(1);
    let sem = Arc::new(Semaphore::with_config(permits as i32, false, w.config));
    let occupancy = Arc::new(Occupancy::default());

    let (s, o) = (sem.clone(), occupancy.clone());
    run_workers(w.threads, move |_| {
        for _ in 0..w.iterations {
            s.acquire()?;
            o.enter(permits);
            o.exit();
            s.release()?;
        }
        Ok(())
    })?;

    ensure!(
        sem.available_permits() == permits as i32,
        "semaphore leaked permits: {} of {}",
        sem.available_permits(),
        permits
    );

    let operations = w.threads as u64 * w.iterations;
    span.record_operations(operations);
    Ok(ScenarioReport {
        scenario: "semaphore",
        threads: w.threads,
        operations,
        elapsed_ms: span.elapsed().as_millis() as u64,
        violations: occupancy.violations(),
        metrics: sem.metrics(),
    })
}

fn rwlock_scenario(w: Workload) -> Result<ScenarioReport> {
    let span = span_scenario("rwlock", w.threads);
    let _entered = span.enter();
    let rw = Arc::new(ReentrantReadWriteLock::with_config(false, w.config));
    let writers = Arc::new(Occupancy::default());
    let readers_during_write = Arc::new(AtomicU64::new(0));
    let active_readers = Arc::new(AtomicUsize::new(0));

    let (r, wr, rdw, ar) = (
        rw.clone(),
        writers.clone(),
        readers_during_write.clone(),
        active_readers.clone(),
    );
    run_workers(w.threads, move |i| {
        for n in 0..w.iterations {
            // One write in eight
            if (i as u64 + n) % 8 == 0 {
                let _guard = r.write_lock().guard()?;
                wr.enter(1);
                if ar.load(Ordering::SeqCst) != 0 {
                    rdw.fetch_add(1, Ordering::Relaxed);
                }
                wr.exit();
            } else {
                let _guard = r.read_lock().guard()?;
                ar.fetch_add(1, Ordering::SeqCst);
                if wr.inside.load(Ordering::SeqCst) != 0 {
                    rdw.fetch_add(1, Ordering::Relaxed);
                }
                ar.fetch_sub(1, Ordering::SeqCst);
            }
        }
        Ok(())
    })?;

    let operations = w.threads as u64 * w.iterations;
    span.record_operations(operations);
    Ok(ScenarioReport {
        scenario: "rwlock",
        threads: w.threads,
        operations,
        elapsed_ms: span.elapsed().as_millis() as u64,
        violations: writers.violations() + readers_during_write.load(Ordering::Relaxed),
        metrics: rw.metrics(),
    })
}

fn latch_scenario(w: Workload) -> Result<ScenarioReport> {
    let span = span_scenario("latch", w.threads);
    let _entered = span.enter();
    let latch = Arc::new(CountDownLatch::with_config(w.threads as i32, w.config)?);
    let early = Arc::new(AtomicU64::new(0));

    let (l, e) = (latch.clone(), early.clone());
    run_workers(w.threads * 2, move |i| {
        if i % 2 == 0 {
            l.count_down();
        } else {
            l.wait()?;
            if l.count() != 0 {
                e.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    })?;

    span.record_operations(w.threads as u64 * 2);
    Ok(ScenarioReport {
        scenario: "latch",
        threads: w.threads * 2,
        operations: w.threads as u64 * 2,
        elapsed_ms: span.elapsed().as_millis() as u64,
        violations: early.load(Ordering::Relaxed),
        metrics: latch.metrics(),
    })
}

fn barrier_scenario(w: Workload) -> Result<ScenarioReport> {
    let span = span_scenario("barrier", w.threads);
    let _entered = span.enter();
    let rounds = (w.iterations / 100).max(1);
    let trips = Arc::new(AtomicU64::new(0));
    let t = trips.clone();
    let barrier = Arc::new(CyclicBarrier::with_action(w.threads, move || {
        t.fetch_add(1, Ordering::Relaxed);
    })?);

    let b = barrier.clone();
    run_workers(w.threads, move |_| {
        for _ in 0..rounds {
            b.wait()?;
        }
        Ok(())
    })?;

    let tripped = trips.load(Ordering::Relaxed);
    span.record_operations(rounds);
    Ok(ScenarioReport {
        scenario: "barrier",
        threads: w.threads,
        operations: rounds,
        elapsed_ms: span.elapsed().as_millis() as u64,
        violations: rounds.abs_diff(tripped),
        metrics: SyncMetricsSnapshot::default(),
    })
}

fn main() -> Result<()> {
    init_tracing();

    let workload = Workload {
        threads: env_or(ENV_STRESS_THREADS, DEFAULT_STRESS_THREADS)?.max(1),
        iterations: env_or(ENV_STRESS_ITERATIONS, DEFAULT_STRESS_ITERATIONS)?,
        config: SyncConfig::from_env(),
    };
    info!(
        threads = workload.threads,
        iterations = workload.iterations,
        max_spins = workload.config.max_spins,
        metrics = workload.config.metrics,
        "Sync stress starting"
    );

    let scenarios: [fn(Workload) -> Result<ScenarioReport>; 6] = [
        mutex_scenario,
        fair_reentrant_scenario,
        semaphore_scenario,
        rwlock_scenario,
        latch_scenario,
        barrier_scenario,
    ];

    let mut total_violations = 0;
    let mut combined = SyncMetricsSnapshot::default();
    for scenario in scenarios {
        let report = scenario(workload)?;
        if report.violations > 0 {
            warn!(scenario = report.scenario, violations = report.violations, "invariant violated");
        }
        total_violations += report.violations;
        combined = combined.merge(&report.metrics);
        println!("{}", serde_json::to_string(&report)?);
    }

    info!(
        contention_ratio = combined.contention_ratio(),
        parks = combined.parks,
        "Sync stress finished"
    );
    ensure!(total_violations == 0, "{} invariant violations", total_violations);
    Ok(())
}
