//! Stress helpers for concurrent access.
//!
//! Several threads share one [`Database`]; correctness must come entirely
//! from the store's atomic units.

use kvdex_core::{Database, Model};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations attempted.
    pub total_ops: usize,
    /// Operations that succeeded.
    pub successful_ops: usize,
    /// Operations rejected because a watched key changed.
    pub conflicts: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Operations per second.
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total_ops as f64 / secs
        } else {
            0.0
        }
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of threads.
    pub threads: usize,
    /// Operations per thread.
    pub operations: usize,
    /// Number of distinct score values.
    pub buckets: i64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            operations: 250,
            buckets: 8,
        }
    }
}

/// Saves new records from several threads and then moves each one to
/// another bucket. Conflicts are counted, other errors panic.
pub fn stress_concurrent_saves(db: &Database, model: &Model, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let model = db.model(model.namespace()).expect("Model not registered");
            let successful = Arc::clone(&successful);
            let conflicts = Arc::clone(&conflicts);
            let operations = config.operations;
            let buckets = config.buckets.max(1);
            thread::spawn(move || {
                for i in 0..operations {
                    let mut record = model
                        .new_record()
                        .with("name", format!("t{t}-{i}"))
                        .and_then(|r| r.with("score", i as i64 % buckets))
                        .expect("Failed to build record");
                    let outcome = model.save(&mut record).and_then(|_| {
                        record.set("score", (i as i64 + 1) % buckets)?;
                        model.save(&mut record)
                    });
                    match outcome {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(err) if err.is_conflict() => conflicts.fetch_add(1, Ordering::Relaxed),
                        Err(err) => panic!("save failed: {err}"),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Stress thread panicked");
    }

    let successful = successful.load(Ordering::Relaxed);
    let conflicts = conflicts.load(Ordering::Relaxed);
    StressTestResult {
        total_ops: successful + conflicts,
        successful_ops: successful,
        conflicts,
        duration: start.elapsed(),
    }
}

/// Runs readers against a model while one thread resets it repeatedly.
///
/// Every reset writes `size` records named `g{generation}-{i}` with
/// `score = generation`. Readers assert that the live key count is always
/// `0` (before the first reset) or `size`, never something in between, that
/// every record they load carries one generation in all its fields, and that
/// `all()` returns either nothing or `size` records of a single generation.
pub fn stress_reset_isolation(model: &Model, size: usize, resets: usize, readers: usize) {
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let reader_handles: Vec<_> = (0..readers)
        .map(|_| {
            let model = model.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let count = model.count().expect("count failed");
                    assert!(count == 0 || count == size, "reader saw {count} records");
                    if let Some(record) = model.last().expect("last failed") {
                        let name = record.get("name").and_then(|v| v.as_text()).unwrap_or("");
                        let score = record.get("score").and_then(|v| v.as_integer());
                        let generation = name
                            .strip_prefix('g')
                            .and_then(|rest| rest.split('-').next())
                            .and_then(|g| g.parse::<i64>().ok());
                        assert_eq!(generation, score, "record mixes two generations");
                    }
                    let records = model.all().expect("all failed");
                    let generations: BTreeSet<i64> = records
                        .iter()
                        .filter_map(|r| r.get("score").and_then(|v| v.as_integer()))
                        .collect();
                    assert!(
                        records.is_empty() || (records.len() == size && generations.len() == 1),
                        "all() returned {} records from generations {generations:?}",
                        records.len()
                    );
                }
            })
        })
        .collect();

    for generation in 0..resets {
        let mut records: Vec<_> = (0..size)
            .map(|i| {
                model
                    .new_record()
                    .with("name", format!("g{generation}-{i}"))
                    .and_then(|r| r.with("score", generation as i64))
                    .expect("Failed to build record")
            })
            .collect();
        model.reset(&mut records).expect("Reset failed");
    }
    stop.store(true, Ordering::Relaxed);

    for handle in reader_handles {
        handle.join().expect("Reader thread panicked");
    }
}
