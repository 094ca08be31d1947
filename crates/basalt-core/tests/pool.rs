//! End-to-end supervisor/worker-process tests. These spawn real
//! `basalt-worker` processes, so they only run when that binary has been
//! built (`cargo build -p basalt-worker` first, then `cargo test -- --ignored`).

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use basalt_core::{Config, Supervisor, TaskSpec, TaskState};

fn pool_config(num_workers: usize) -> Config {
    Config {
        num_workers,
        ..Config::default()
    }
}

#[test]
#[ignore = "requires basalt-worker binary"]
fn submits_and_collects_across_the_pool() {
    let mut supervisor = Supervisor::start(pool_config(2)).unwrap();

    let mut ids = HashSet::new();
    for i in 0..6 {
        let spec = TaskSpec::new(format!("owner-{i}"), "echo")
            .with_priority(i)
            .with_input(format!("payload {i}"));
        ids.insert(supervisor.submit_task(spec).unwrap());
    }

    let mut summaries = Vec::new();
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while summaries.len() < ids.len() && std::time::Instant::now() < deadline {
        summaries.extend(supervisor.collect_results(Duration::from_millis(500)));
    }

    assert_eq!(summaries.len(), ids.len());
    let seen: HashSet<_> = summaries.iter().map(|s| s.id).collect();
    assert_eq!(seen, ids);
    assert!(summaries.iter().all(|s| s.state == TaskState::Done));

    supervisor.stop(Duration::from_secs(5));
}

#[test]
#[ignore = "requires basalt-worker binary"]
fn failures_and_cancellations_are_reported() {
    let mut supervisor = Supervisor::start(pool_config(1)).unwrap();

    let bad = supervisor
        .submit_task(TaskSpec::new("alice", "no-such-agent"))
        .unwrap();
    let late = supervisor
        .submit_task(
            TaskSpec::new("bob", "noop")
                .with_deadline(SystemTime::now() - Duration::from_secs(60)),
        )
        .unwrap();
    let good = supervisor
        .submit_task(TaskSpec::new("carol", "fill").with_input("4096"))
        .unwrap();

    let mut summaries = Vec::new();
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while summaries.len() < 3 && std::time::Instant::now() < deadline {
        summaries.extend(supervisor.collect_results(Duration::from_millis(500)));
    }
    assert_eq!(summaries.len(), 3);

    let state_of = |id| {
        summaries
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.state)
            .unwrap()
    };
    assert_eq!(state_of(bad), TaskState::Failed);
    assert_eq!(state_of(late), TaskState::Cancelled);
    assert_eq!(state_of(good), TaskState::Done);

    supervisor.stop(Duration::from_secs(5));
}

#[test]
#[ignore = "requires basalt-worker binary"]
fn stop_is_idempotent() {
    let mut supervisor = Supervisor::start(pool_config(1)).unwrap();
    assert_eq!(supervisor.alive_workers(), 1);
    supervisor.stop(Duration::from_secs(5));
    supervisor.stop(Duration::from_secs(5));
}
