//! Cooperative priority scheduler for one worker process.
//!
//! Policy:
//! - Highest `priority` first; ties broken by arrival order (FIFO), so
//!   ordering is deterministic for equal priorities.
//! - A task whose deadline has passed when it is selected is moved to
//!   `Cancelled` and handed back for result emission; it never runs.
//! - Execution is run-to-completion. The quantum is advisory: overruns
//!   are counted, never interrupted.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, SystemTime};

use uuid::Uuid;

use crate::metrics::METRICS;
use crate::task::{Task, TaskState};

struct Entry {
    task: Task,
    seq: u64,
}

impl Entry {
    fn key(&self) -> (i32, std::cmp::Reverse<u64>) {
        (self.task.meta.priority, std::cmp::Reverse(self.seq))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Priority run queue with deadline-aware admission.
pub struct Scheduler {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    quantum: Duration,
    overruns: u64,
}

impl Scheduler {
    pub fn new(quantum: Duration) -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            quantum,
            overruns: 0,
        }
    }

    /// Insert a task, keyed by `(priority desc, arrival asc)`.
    pub fn enqueue(&mut self, task: Task) {
        tracing::debug!(
            task_id = %task.meta.id,
            priority = task.meta.priority,
            "task enqueued"
        );
        self.heap.push(Entry {
            task,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        METRICS.worker_queue_depth.set(self.heap.len() as u64);
    }

    /// Pop the next eligible task.
    ///
    /// Returns the highest-priority task still in `Pending` state, or an
    /// expired one already moved to `Cancelled` — the caller emits its
    /// result and calls `next` again. No expired task is ever returned
    /// runnable. `None` means the queue is empty.
    pub fn next(&mut self, now: SystemTime) -> Option<Task> {
        let entry = self.heap.pop()?;
        let mut task = entry.task;
        METRICS.worker_queue_depth.set(self.heap.len() as u64);

        if let Some(deadline) = task.meta.deadline
            && now > deadline
        {
            tracing::warn!(task_id = %task.meta.id, "task deadline exceeded");
            task.set_state(TaskState::Cancelled);
            METRICS.tasks_cancelled.inc();
        }
        Some(task)
    }

    /// Account one finished execution against the quantum.
    pub fn record_execution(&mut self, task_id: Uuid, elapsed: Duration) {
        if elapsed > self.quantum {
            self.overruns += 1;
            METRICS.scheduler_quantum_overruns.inc();
            tracing::warn!(
                task_id = %task_id,
                elapsed_ms = elapsed.as_millis() as u64,
                quantum_ms = self.quantum.as_millis() as u64,
                "quantum overrun"
            );
        }
    }

    /// Remove and return everything still queued. Used at shutdown so the
    /// worker can report queued tasks as cancelled.
    pub fn drain(&mut self) -> Vec<Task> {
        let tasks = std::mem::take(&mut self.heap)
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|e| e.task)
            .collect();
        METRICS.worker_queue_depth.set(0);
        tasks
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn quantum(&self) -> Duration {
        self.quantum
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskSpec;

    fn sched() -> Scheduler {
        Scheduler::new(Duration::from_millis(10))
    }

    fn task(owner: &str, priority: i32) -> Task {
        Task::from_spec(TaskSpec::new(owner, "noop").with_priority(priority))
    }

    #[test]
    fn next_returns_none_when_empty() {
        let mut s = sched();
        assert!(s.next(SystemTime::now()).is_none());
    }

    #[test]
    fn distinct_priorities_pop_in_descending_order() {
        let mut s = sched();
        for p in [5, 10, 1, 7] {
            s.enqueue(task("t", p));
        }
        let now = SystemTime::now();
        let order: Vec<i32> = std::iter::from_fn(|| s.next(now))
            .map(|t| t.meta.priority)
            .collect();
        assert_eq!(order, vec![10, 7, 5, 1]);
    }

    #[test]
    fn equal_priorities_pop_in_arrival_order() {
        let mut s = sched();
        for owner in ["first", "second", "third"] {
            s.enqueue(task(owner, 3));
        }
        let now = SystemTime::now();
        let order: Vec<String> = std::iter::from_fn(|| s.next(now))
            .map(|t| t.meta.owner)
            .collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn expired_deadline_comes_back_cancelled() {
        let mut s = sched();
        let expired = Task::from_spec(
            TaskSpec::new("t", "noop")
                .with_deadline(SystemTime::now() - Duration::from_millis(1)),
        );
        let id = expired.meta.id;
        s.enqueue(expired);

        let popped = s.next(SystemTime::now()).unwrap();
        assert_eq!(popped.meta.id, id);
        assert_eq!(popped.state(), TaskState::Cancelled);
    }

    #[test]
    fn future_deadline_stays_pending() {
        let mut s = sched();
        s.enqueue(Task::from_spec(
            TaskSpec::new("t", "noop").with_deadline(SystemTime::now() + Duration::from_secs(60)),
        ));
        let popped = s.next(SystemTime::now()).unwrap();
        assert_eq!(popped.state(), TaskState::Pending);
    }

    #[test]
    fn expired_task_does_not_block_runnable_ones() {
        let mut s = sched();
        s.enqueue(Task::from_spec(
            TaskSpec::new("expired", "noop")
                .with_priority(100)
                .with_deadline(SystemTime::now() - Duration::from_secs(1)),
        ));
        s.enqueue(task("runnable", 1));

        let now = SystemTime::now();
        let first = s.next(now).unwrap();
        assert_eq!(first.state(), TaskState::Cancelled);
        let second = s.next(now).unwrap();
        assert_eq!(second.meta.owner, "runnable");
        assert_eq!(second.state(), TaskState::Pending);
    }

    #[test]
    fn overruns_are_counted_not_enforced() {
        let mut s = sched();
        let id = Uuid::new_v4();
        s.record_execution(id, Duration::from_millis(5));
        assert_eq!(s.overruns(), 0);
        s.record_execution(id, Duration::from_millis(25));
        assert_eq!(s.overruns(), 1);
    }

    #[test]
    fn drain_returns_priority_order_and_empties_queue() {
        let mut s = sched();
        for p in [2, 9, 4] {
            s.enqueue(task("t", p));
        }
        let drained: Vec<i32> = s.drain().into_iter().map(|t| t.meta.priority).collect();
        assert_eq!(drained, vec![9, 4, 2]);
        assert!(s.is_empty());
    }
}
