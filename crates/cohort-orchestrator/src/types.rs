use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static TASK_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\btask[\s_#-]*(\d+)\b").expect("static regex is valid")
});

/// Identifier of a task within one run (`task-<n>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Id for the `seq`-th admitted task.
    pub fn from_seq(seq: u64) -> Self {
        Self(format!("task-{seq}"))
    }

    /// Normalize a loose reference such as `Task 3`, `task_3` or `task #3`.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = TASK_REF.captures(raw.trim())?;
        let seq: u64 = caps.get(1)?.as_str().parse().ok()?;
        Some(Self::from_seq(seq))
    }

    /// Every task reference found in a piece of text, in order, without duplicates.
    pub fn find_all(text: &str) -> Vec<Self> {
        let mut ids: Vec<Self> = Vec::new();
        for caps in TASK_REF.captures_iter(text) {
            if let Some(seq) = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) {
                let id = Self::from_seq(seq);
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// Like [`TaskId::find_all`], but with byte spans and duplicates kept.
    pub(crate) fn find_all_spans(text: &str) -> Vec<(usize, usize, Self)> {
        TASK_REF
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let seq = caps.get(1)?.as_str().parse::<u64>().ok()?;
                Some((whole.start(), whole.end(), Self::from_seq(seq)))
            })
            .collect()
    }

    /// The id as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sequence number of a canonical `task-N` id.
    pub fn seq(&self) -> Option<u64> {
        self.0.strip_prefix("task-")?.parse().ok()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a task. `Completed`, `Failed` and `Canceled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Admitted, not yet dispatched.
    Pending,
    /// Dispatched to its collaborator.
    InProgress,
    /// Finished with a usable result.
    Completed,
    /// Execution failed, or a dependency did not complete.
    Failed,
    /// Withdrawn by the manager before it ran.
    Canceled,
}

impl TaskStatus {
    /// Completed, failed and canceled tasks never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// A unit of work owned by one collaborator.
///
/// Status, result and timestamps only change through
/// [`TaskStore`](crate::task_store::TaskStore) transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// `task-N` id.
    pub id: TaskId,
    /// Admission order, used for stable listing.
    pub seq: u64,
    /// Collaborator the task is assigned to.
    pub agent_name: String,
    /// What the collaborator is asked to do.
    pub description: String,
    pub(crate) status: TaskStatus,
    pub(crate) dependencies: Vec<TaskId>,
    pub(crate) result: Option<String>,
    /// Admission time.
    pub created_at: DateTime<Utc>,
    pub(crate) start_time: Option<DateTime<Utc>>,
    pub(crate) end_time: Option<DateTime<Utc>>,
    /// Planning iteration in which the task was admitted.
    pub iteration: u32,
}

impl Task {
    pub(crate) fn new(
        seq: u64,
        agent_name: impl Into<String>,
        description: impl Into<String>,
        dependencies: Vec<TaskId>,
        iteration: u32,
    ) -> Self {
        Self {
            id: TaskId::from_seq(seq),
            seq,
            agent_name: agent_name.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            dependencies,
            result: None,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            iteration,
        }
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Ids this task waits on.
    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    /// Output on completion, error text on failure.
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// When the task was dispatched.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// When the task reached a terminal status.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Wall-clock time spent in `in_progress`, once the task has left it.
    pub fn duration_ms(&self) -> Option<u64> {
        let start = self.start_time?;
        let end = self.end_time?;
        u64::try_from((end - start).num_milliseconds()).ok()
    }
}

/// A task proposal extracted from manager text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Collaborator name as written by the manager.
    pub agent_name: String,
    /// What the collaborator is asked to do.
    pub description: String,
    /// Ids this task waits on.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

impl Assignment {
    /// Proposal without dependencies.
    pub fn new(agent_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            description: description.into(),
            dependencies: Vec::new(),
        }
    }

    /// Replace the dependency list.
    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependencies = deps;
        self
    }
}

/// Condensed view of a task for reports and run metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task id.
    pub id: TaskId,
    /// Assigned collaborator.
    pub agent_name: String,
    /// Task description.
    pub description: String,
    /// Status at the time of the summary.
    pub status: TaskStatus,
    /// Ids the task waits on.
    pub dependencies: Vec<TaskId>,
    /// Result truncated for reports.
    pub result_preview: Option<String>,
    /// Execution time, once the task finished.
    pub duration_ms: Option<u64>,
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}
