use crate::types::{truncate_chars, Task, TaskId, TaskStatus, TaskSummary};
use chrono::Utc;
use cohort_core::{CohortError, CohortResult};
use std::collections::HashMap;

/// The task map of one run, plus the status state machine.
///
/// Only the team controller mutates the store; executors report outcomes
/// back and the controller applies them between batches.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    last_seq: u64,
}

impl TaskStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The id the next reserved or admitted task will receive.
    pub fn next_id(&self) -> TaskId {
        TaskId::from_seq(self.last_seq + 1)
    }

    /// Claim the next id without inserting a task. A proposal that is later
    /// rejected keeps its number, so ids follow the manager's listing order.
    pub fn reserve_id(&mut self) -> TaskId {
        self.last_seq += 1;
        TaskId::from_seq(self.last_seq)
    }

    /// Insert a new `pending` task. Validation is the caller's job.
    pub fn admit(
        &mut self,
        agent_name: impl Into<String>,
        description: impl Into<String>,
        dependencies: Vec<TaskId>,
        iteration: u32,
    ) -> TaskId {
        self.last_seq += 1;
        self.insert(self.last_seq, agent_name, description, dependencies, iteration)
    }

    /// Insert a `pending` task under an id obtained from [`TaskStore::reserve_id`].
    pub fn admit_reserved(
        &mut self,
        id: &TaskId,
        agent_name: impl Into<String>,
        description: impl Into<String>,
        dependencies: Vec<TaskId>,
        iteration: u32,
    ) -> CohortResult<TaskId> {
        let seq = id
            .seq()
            .filter(|seq| *seq <= self.last_seq && !self.tasks.contains_key(id))
            .ok_or_else(|| CohortError::Admission(format!("{id} is not a reserved task id")))?;
        Ok(self.insert(seq, agent_name, description, dependencies, iteration))
    }

    fn insert(
        &mut self,
        seq: u64,
        agent_name: impl Into<String>,
        description: impl Into<String>,
        dependencies: Vec<TaskId>,
        iteration: u32,
    ) -> TaskId {
        let task = Task::new(seq, agent_name, description, dependencies, iteration);
        let id = task.id.clone();
        self.tasks.insert(id.clone(), task);
        id
    }

    /// Task by id.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// True if a task with this id was admitted.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// All tasks in admission order.
    pub fn all_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by_key(|t| t.seq);
        tasks
    }

    /// Number of admitted tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True before the first admission.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of tasks currently in `status`.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Move a ready task into `in_progress`.
    pub fn mark_in_progress(&mut self, id: &TaskId) -> CohortResult<()> {
        let task = self.transition(id, &[TaskStatus::Pending], TaskStatus::InProgress)?;
        task.start_time = Some(Utc::now());
        Ok(())
    }

    /// Record a successful collaborator result.
    pub fn mark_completed(&mut self, id: &TaskId, result: impl Into<String>) -> CohortResult<()> {
        let task = self.transition(id, &[TaskStatus::InProgress], TaskStatus::Completed)?;
        task.result = Some(result.into());
        task.end_time = Some(Utc::now());
        Ok(())
    }

    /// Record a failure. Allowed from `in_progress` (execution error) and
    /// from `pending` (dependency failure).
    pub fn mark_failed(&mut self, id: &TaskId, reason: impl Into<String>) -> CohortResult<()> {
        let task = self.transition(
            id,
            &[TaskStatus::Pending, TaskStatus::InProgress],
            TaskStatus::Failed,
        )?;
        task.result = Some(reason.into());
        if task.start_time.is_some() {
            task.end_time = Some(Utc::now());
        }
        Ok(())
    }

    /// Cancel a task that has not started yet.
    pub fn cancel(&mut self, id: &TaskId) -> CohortResult<()> {
        self.transition(id, &[TaskStatus::Pending], TaskStatus::Canceled)?;
        Ok(())
    }

    /// Replace the dependency set of a `pending` task.
    pub fn set_dependencies(&mut self, id: &TaskId, dependencies: Vec<TaskId>) -> CohortResult<()> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| CohortError::Orchestrator(format!("unknown task {id}")))?;
        if task.status != TaskStatus::Pending {
            return Err(CohortError::Orchestrator(format!(
                "cannot revise dependencies of {id}: task is {}",
                task.status
            )));
        }
        task.dependencies = dependencies;
        Ok(())
    }

    fn transition(
        &mut self,
        id: &TaskId,
        allowed_from: &[TaskStatus],
        to: TaskStatus,
    ) -> CohortResult<&mut Task> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| CohortError::Orchestrator(format!("unknown task {id}")))?;
        if !allowed_from.contains(&task.status) {
            return Err(CohortError::InvalidTransition {
                task: id.to_string(),
                from: task.status.to_string(),
                to: to.to_string(),
            });
        }
        task.status = to;
        Ok(task)
    }

    /// Fail every `pending` task that depends on a failed or canceled task,
    /// repeating until no more tasks are affected. Returns the ids failed.
    pub fn cascade_failures(&mut self) -> Vec<TaskId> {
        let mut cascaded = Vec::new();
        loop {
            let mut doomed: Vec<(TaskId, TaskId, TaskStatus)> = Vec::new();
            for task in self.all_tasks() {
                if task.status != TaskStatus::Pending {
                    continue;
                }
                let broken = task.dependencies.iter().find_map(|dep| {
                    self.tasks
                        .get(dep)
                        .filter(|d| matches!(d.status, TaskStatus::Failed | TaskStatus::Canceled))
                        .map(|d| (dep.clone(), d.status))
                });
                if let Some((dep, status)) = broken {
                    doomed.push((task.id.clone(), dep, status));
                }
            }
            if doomed.is_empty() {
                return cascaded;
            }
            for (id, dep, status) in doomed {
                let reason = format!("Dependency {dep} {status}; task was not executed");
                if self.mark_failed(&id, reason).is_ok() {
                    cascaded.push(id);
                }
            }
        }
    }

    /// `pending` tasks whose dependencies all exist and are `completed`,
    /// in admission order.
    pub fn ready_ids(&self) -> Vec<TaskId> {
        self.all_tasks()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                t.dependencies.iter().all(|dep| {
                    self.tasks
                        .get(dep)
                        .is_some_and(|d| d.status == TaskStatus::Completed)
                })
            })
            .map(|t| t.id.clone())
            .collect()
    }

    /// True when there is at least one task and every task is terminal.
    pub fn is_finished(&self) -> bool {
        !self.tasks.is_empty() && !self.has_unfinished()
    }

    /// True when some task is still `pending` or `in_progress`.
    pub fn has_unfinished(&self) -> bool {
        self.tasks.values().any(|t| !t.status.is_terminal())
    }

    /// Results of a task's dependencies, in dependency order.
    /// Dependencies without a result are skipped.
    pub fn dependency_results(&self, id: &TaskId) -> Vec<(TaskId, String, String)> {
        let Some(task) = self.tasks.get(id) else {
            return Vec::new();
        };
        task.dependencies
            .iter()
            .filter_map(|dep| {
                let d = self.tasks.get(dep)?;
                let result = d.result.clone()?;
                Some((dep.clone(), d.agent_name.clone(), result))
            })
            .collect()
    }

    /// A live or completed task with the same collaborator and description.
    pub fn find_duplicate(&self, agent_name: &str, description: &str) -> Option<&Task> {
        self.all_tasks().into_iter().find(|t| {
            t.agent_name == agent_name
                && t.description.trim() == description.trim()
                && !matches!(t.status, TaskStatus::Failed | TaskStatus::Canceled)
        })
    }

    /// Summaries of every task with results cut to `preview_chars`.
    pub fn summaries(&self, preview_chars: usize) -> Vec<TaskSummary> {
        self.all_tasks()
            .into_iter()
            .map(|t| TaskSummary {
                id: t.id.clone(),
                agent_name: t.agent_name.clone(),
                description: t.description.clone(),
                status: t.status,
                dependencies: t.dependencies.clone(),
                result_preview: t.result.as_deref().map(|r| truncate_chars(r, preview_chars)),
                duration_ms: t.duration_ms(),
            })
            .collect()
    }
}
