//! Process-local metrics with Prometheus text exposition.
//!
//! Counters and gauges are per process: each worker tracks its own values,
//! and the supervisor process tracks submission/result counters. Only the
//! supervisor's registry is exported over HTTP (see `basalt-server`);
//! worker registries are in-process accounting.
//!
//! Naming convention: `basalt_<subsystem>_<name>` with `_total` appended
//! to counters in the exposition output.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    fn exposition(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} counter", self.name);
        let _ = writeln!(out, "{}_total {}", self.name, self.get());
    }
}

/// Arbitrarily settable gauge.
#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    fn exposition(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} gauge", self.name);
        let _ = writeln!(out, "{} {}", self.name, self.get());
    }
}

/// All process-level metrics.
#[derive(Debug)]
pub struct Metrics {
    pub tasks_submitted: Counter,
    pub tasks_completed: Counter,
    pub tasks_failed: Counter,
    pub tasks_cancelled: Counter,
    pub scheduler_quantum_overruns: Counter,
    pub memory_used_bytes: Gauge,
    pub memory_allocation_count: Gauge,
    pub worker_queue_depth: Gauge,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            tasks_submitted: Counter::new(
                "basalt_tasks_submitted",
                "Total tasks submitted in this process",
            ),
            tasks_completed: Counter::new(
                "basalt_tasks_completed",
                "Total tasks that ended in DONE state",
            ),
            tasks_failed: Counter::new(
                "basalt_tasks_failed",
                "Total tasks that ended in FAILED state",
            ),
            tasks_cancelled: Counter::new(
                "basalt_tasks_cancelled",
                "Total tasks cancelled by deadline or shutdown",
            ),
            scheduler_quantum_overruns: Counter::new(
                "basalt_scheduler_quantum_overruns",
                "Task executions that exceeded the configured quantum",
            ),
            memory_used_bytes: Gauge::new(
                "basalt_memory_used_bytes",
                "Current logical memory pool usage in bytes",
            ),
            memory_allocation_count: Gauge::new(
                "basalt_memory_allocation_count",
                "Number of live logical memory allocations",
            ),
            worker_queue_depth: Gauge::new(
                "basalt_worker_queue_depth",
                "Current number of tasks in the worker's run queue",
            ),
        }
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn exposition_text(&self) -> String {
        let mut out = String::new();
        self.tasks_submitted.exposition(&mut out);
        self.tasks_completed.exposition(&mut out);
        self.tasks_failed.exposition(&mut out);
        self.tasks_cancelled.exposition(&mut out);
        self.scheduler_quantum_overruns.exposition(&mut out);
        self.memory_used_bytes.exposition(&mut out);
        self.memory_allocation_count.exposition(&mut out);
        self.worker_queue_depth.exposition(&mut out);
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide registry, one per process.
pub static METRICS: Metrics = Metrics::new();
