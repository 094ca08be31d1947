//! Task model shared by the supervisor and workers.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Lifecycle state of a task.
///
/// Transitions are monotonic: `Pending → Running → {Done, Failed,
/// Cancelled}`, with `Waiting` as a parking state for multi-step agents
/// between quanta. A terminal state is never left. A task whose deadline
/// elapsed before execution goes `Pending → Cancelled` directly and is
/// never `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    /// Parked mid-execution between steps. None of the built-in agents
    /// yield, so nothing produces this state today; it is an extension
    /// point for multi-step agents.
    Waiting,
    Done,
    Failed,
    Cancelled,
}

impl TaskState {
    /// True for states that end the task's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Whether the transition graph allows `self → next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Waiting)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Waiting, Running)
                | (Waiting, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Waiting => "WAITING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Identity and scheduling attributes of a task.
///
/// `id` and `owner` are immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub id: Uuid,
    /// Tenant / principal the task (and its memory) belongs to.
    pub owner: String,
    /// Higher = scheduled sooner.
    pub priority: i32,
    pub created_at: SystemTime,
    /// Absolute wall-clock deadline; `None` = no deadline.
    pub deadline: Option<SystemTime>,
    pub labels: BTreeMap<String, String>,
}

/// Opaque work description: which agent to run and its input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub agent: String,
    pub input: String,
}

/// A unit of scheduled work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub meta: TaskMetadata,
    pub payload: TaskPayload,
    state: TaskState,
    last_error: Option<String>,
}

impl Task {
    /// Build a task from a validated submission, assigning a fresh id.
    pub fn from_spec(spec: TaskSpec) -> Self {
        Self {
            meta: TaskMetadata {
                id: Uuid::new_v4(),
                owner: spec.owner,
                priority: spec.priority,
                created_at: SystemTime::now(),
                deadline: spec.deadline,
                labels: spec.labels,
            },
            payload: TaskPayload {
                agent: spec.agent,
                input: spec.input,
            },
            state: TaskState::Pending,
            last_error: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Advance the task through the state graph.
    ///
    /// Illegal transitions are refused, not applied; they indicate a
    /// kernel bug, so they are logged loudly instead of corrupting the
    /// monotonicity invariant.
    pub fn set_state(&mut self, next: TaskState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                task_id = %self.meta.id,
                from = %self.state,
                to = %next,
                "illegal task state transition refused"
            );
            return;
        }
        self.state = next;
    }

    /// Record a task-level failure. Sets `last_error` and the `Failed`
    /// state together so the "`last_error` iff `Failed`" invariant holds.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.set_state(TaskState::Failed);
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.meta.id,
            owner: self.meta.owner.clone(),
            state: self.state,
            last_error: self.last_error.clone(),
        }
    }
}

/// Completion summary reported back to the submitting caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: Uuid,
    pub owner: String,
    pub state: TaskState,
    pub last_error: Option<String>,
}

/// A task submission, before an id is assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub owner: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub deadline: Option<SystemTime>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub agent: String,
    #[serde(default)]
    pub input: String,
}

impl TaskSpec {
    pub fn new(owner: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            priority: 0,
            deadline: None,
            labels: BTreeMap::new(),
            agent: agent.into(),
            input: String::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: SystemTime) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    /// Reject malformed submissions before a task is created.
    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            return Err(Error::Validation("owner must not be empty".into()));
        }
        if self.agent.trim().is_empty() {
            return Err(Error::Validation("agent must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ids_are_unique() {
        let a = Task::from_spec(TaskSpec::new("t", "noop"));
        let b = Task::from_spec(TaskSpec::new("t", "noop"));
        assert_ne!(a.meta.id, b.meta.id);
    }

    #[test]
    fn new_task_is_pending_without_error() {
        let task = Task::from_spec(TaskSpec::new("tenant-a", "noop"));
        assert_eq!(task.state(), TaskState::Pending);
        assert!(task.last_error().is_none());
    }

    #[test]
    fn legal_transitions_walk_the_graph() {
        let mut task = Task::from_spec(TaskSpec::new("t", "noop"));
        task.set_state(TaskState::Running);
        assert_eq!(task.state(), TaskState::Running);
        task.set_state(TaskState::Done);
        assert_eq!(task.state(), TaskState::Done);
    }

    #[test]
    fn waiting_parks_and_resumes() {
        let mut task = Task::from_spec(TaskSpec::new("t", "noop"));
        task.set_state(TaskState::Running);
        task.set_state(TaskState::Waiting);
        assert_eq!(task.state(), TaskState::Waiting);
        task.set_state(TaskState::Running);
        assert_eq!(task.state(), TaskState::Running);

        assert!(TaskState::Waiting.can_transition_to(TaskState::Cancelled));
        assert!(!TaskState::Waiting.can_transition_to(TaskState::Done));
        assert!(!TaskState::Pending.can_transition_to(TaskState::Waiting));
    }

    #[test]
    fn terminal_state_is_never_left() {
        let mut task = Task::from_spec(TaskSpec::new("t", "noop"));
        task.set_state(TaskState::Running);
        task.set_state(TaskState::Done);
        task.set_state(TaskState::Running);
        assert_eq!(task.state(), TaskState::Done);
    }

    #[test]
    fn pending_cannot_jump_to_done() {
        let mut task = Task::from_spec(TaskSpec::new("t", "noop"));
        task.set_state(TaskState::Done);
        assert_eq!(task.state(), TaskState::Pending);
    }

    #[test]
    fn fail_sets_error_and_state_together() {
        let mut task = Task::from_spec(TaskSpec::new("t", "noop"));
        task.set_state(TaskState::Running);
        task.fail("boom");
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(task.last_error(), Some("boom"));
    }

    #[test]
    fn summary_mirrors_task() {
        let mut task = Task::from_spec(TaskSpec::new("tenant-a", "noop"));
        task.set_state(TaskState::Running);
        task.fail("oops");
        let s = task.summary();
        assert_eq!(s.id, task.meta.id);
        assert_eq!(s.owner, "tenant-a");
        assert_eq!(s.state, TaskState::Failed);
        assert_eq!(s.last_error.as_deref(), Some("oops"));
    }

    #[test]
    fn validation_rejects_empty_owner_and_agent() {
        assert!(TaskSpec::new("", "noop").validate().is_err());
        assert!(TaskSpec::new("tenant", "").validate().is_err());
        assert!(TaskSpec::new("tenant", "noop").validate().is_ok());
    }

    #[test]
    fn spec_builder_sets_fields() {
        let deadline = SystemTime::now() + Duration::from_secs(60);
        let spec = TaskSpec::new("tenant", "echo")
            .with_priority(7)
            .with_deadline(deadline)
            .with_input("hello");
        assert_eq!(spec.priority, 7);
        assert_eq!(spec.deadline, Some(deadline));
        assert_eq!(spec.input, "hello");
    }
}
