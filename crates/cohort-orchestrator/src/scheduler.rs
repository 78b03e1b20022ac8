use crate::executor::{TaskExecutor, TaskJob, TaskOutcome};
use crate::graph::{detect_cycles, format_cycle};
use crate::parser::Revision;
use crate::prompts;
use crate::task_store::TaskStore;
use crate::types::{Assignment, TaskId};
use cohort_core::{Collaborator, EventKind, EventSink, TeamEvent};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of admitting one batch of proposals and directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionReport {
    /// Ids of newly created tasks.
    pub admitted: Vec<TaskId>,
    /// Tasks canceled by directive.
    pub canceled: Vec<TaskId>,
    /// Tasks whose dependencies were replaced.
    pub revised: Vec<TaskId>,
    /// Proposals and directives that were not applied, for the transcript.
    pub notes: Vec<String>,
}

impl AdmissionReport {
    fn note(&mut self, note: String) {
        warn!("{note}");
        self.notes.push(note);
    }
}

/// Admission, readiness and dispatch over a [`TaskStore`].
pub struct Scheduler {
    members: Vec<String>,
    sink: Arc<dyn EventSink>,
}

impl Scheduler {
    /// Scheduler for a fixed roster of member names.
    pub fn new(members: Vec<String>, sink: Arc<dyn EventSink>) -> Self {
        Self { members, sink }
    }

    fn is_member(&self, name: &str) -> bool {
        self.members.iter().any(|m| m == name)
    }

    /// Admit parsed proposals. Unknown collaborators, cycles and duplicates are
    /// dropped with a note; nothing here is an error.
    ///
    /// Every proposal takes the next id whether or not it is admitted, so
    /// `task-N` references in the same batch point where the manager meant.
    /// A dependency on a skipped duplicate points at the existing task. A
    /// proposal depending on a rejected one is rejected too.
    pub fn create_tasks(
        &self,
        assignments: &[Assignment],
        store: &mut TaskStore,
        iteration: u32,
    ) -> AdmissionReport {
        let mut report = AdmissionReport::default();
        let mut rejected: Vec<TaskId> = Vec::new();
        let mut aliases: HashMap<TaskId, TaskId> = HashMap::new();

        for assignment in assignments {
            let agent = assignment.agent_name.as_str();
            let candidate = store.reserve_id();
            if !self.is_member(agent) {
                report.note(format!(
                    "Skipped proposal for unknown collaborator '{agent}': {}",
                    assignment.description
                ));
                self.sink.emit(
                    TeamEvent::new(
                        EventKind::TaskError,
                        agent,
                        format!("Skipped proposal for unknown collaborator '{agent}'"),
                    )
                    .with_details(serde_json::json!({ "reason": "unknown_collaborator" })),
                );
                rejected.push(candidate);
                continue;
            }

            if let Some(existing) = store.find_duplicate(agent, &assignment.description) {
                report.note(format!(
                    "Skipped duplicate proposal for {agent}: same as {} ({})",
                    existing.id,
                    existing.status()
                ));
                aliases.insert(candidate, existing.id.clone());
                continue;
            }

            let dependencies: Vec<TaskId> = assignment
                .dependencies
                .iter()
                .map(|d| aliases.get(d).unwrap_or(d).clone())
                .collect();
            if let Some(dep) = dependencies.iter().find(|d| rejected.contains(d)) {
                report.note(format!(
                    "Rejected proposal for {agent}: depends on {dep}, which was not admitted"
                ));
                self.sink.emit(
                    TeamEvent::new(
                        EventKind::TaskError,
                        agent,
                        format!("Rejected proposal for {agent}: depends on rejected {dep}"),
                    )
                    .with_details(serde_json::json!({ "reason": "rejected_dependency", "dependency": dep })),
                );
                rejected.push(candidate);
                continue;
            }

            let cycles = detect_cycles(&candidate, &dependencies, store);
            if !cycles.is_empty() {
                let chains: Vec<String> = cycles.iter().map(|c| format_cycle(c)).collect();
                report.note(format!(
                    "Rejected proposal for {agent}: dependency cycle {}",
                    chains.join("; ")
                ));
                self.sink.emit(
                    TeamEvent::new(
                        EventKind::TaskError,
                        agent,
                        format!("Rejected proposal for {agent}: dependency cycle"),
                    )
                    .with_details(serde_json::json!({ "reason": "cycle", "cycles": chains })),
                );
                rejected.push(candidate);
                continue;
            }

            let id = match store.admit_reserved(
                &candidate,
                agent,
                assignment.description.clone(),
                dependencies.clone(),
                iteration,
            ) {
                Ok(id) => id,
                Err(e) => {
                    report.note(format!("Could not admit proposal for {agent}: {e}"));
                    rejected.push(candidate);
                    continue;
                }
            };
            info!(task_id = %id, agent = %agent, iteration, "Task admitted");
            self.sink.emit(
                TeamEvent::new(EventKind::TaskCreated, agent, format!("{id} created for {agent}"))
                    .with_details(serde_json::json!({
                        "task_id": id,
                        "description": assignment.description,
                        "dependencies": dependencies,
                    })),
            );
            report.admitted.push(id);
        }

        report
    }

    /// One default task per member, built from the manager's raw text.
    /// Only applies to an empty store.
    pub fn create_fallback_tasks(
        &self,
        manager_text: &str,
        store: &mut TaskStore,
        iteration: u32,
    ) -> AdmissionReport {
        if !store.is_empty() {
            return AdmissionReport::default();
        }
        warn!(
            members = self.members.len(),
            "No assignments found; creating one default task per collaborator"
        );
        let description = prompts::default_task(manager_text);
        let defaults: Vec<Assignment> = self
            .members
            .iter()
            .map(|m| Assignment::new(m.clone(), description.clone()))
            .collect();
        let mut report = self.create_tasks(&defaults, store, iteration);
        report
            .notes
            .push("No assignments could be read; every collaborator received a default task".into());
        report
    }

    /// Apply cancellations then dependency revisions. Only `pending` tasks are
    /// affected, and a revision that would close a cycle is refused.
    pub fn apply_directives(
        &self,
        cancellations: &[TaskId],
        revisions: &[Revision],
        store: &mut TaskStore,
        report: &mut AdmissionReport,
    ) {
        for id in cancellations {
            match store.cancel(id) {
                Ok(()) => {
                    info!(task_id = %id, "Task canceled by manager");
                    self.sink.emit(
                        TeamEvent::new(EventKind::TaskStatusChanged, "manager", format!("{id} canceled"))
                            .with_details(serde_json::json!({ "task_id": id, "status": "canceled" })),
                    );
                    report.canceled.push(id.clone());
                }
                Err(e) => report.note(format!("Could not cancel {id}: {e}")),
            }
        }

        for revision in revisions {
            let id = &revision.task;
            let cycles = detect_cycles(id, &revision.dependencies, store);
            if !cycles.is_empty() {
                let chains: Vec<String> = cycles.iter().map(|c| format_cycle(c)).collect();
                report.note(format!(
                    "Rejected revision of {id}: dependency cycle {}",
                    chains.join("; ")
                ));
                continue;
            }
            match store.set_dependencies(id, revision.dependencies.clone()) {
                Ok(()) => {
                    info!(task_id = %id, "Dependencies revised by manager");
                    report.revised.push(id.clone());
                }
                Err(e) => report.note(format!("Could not revise {id}: {e}")),
            }
        }
    }

    /// Cascade dependency failures, then list every ready task.
    /// Returns `(ready, cascaded)`.
    pub fn find_ready(&self, store: &mut TaskStore) -> (Vec<TaskId>, Vec<TaskId>) {
        let cascaded = store.cascade_failures();
        for id in &cascaded {
            let reason = store
                .get(id)
                .and_then(|t| t.result())
                .unwrap_or_default()
                .to_string();
            warn!(task_id = %id, reason = %reason, "Task failed by dependency");
            self.sink.emit(
                TeamEvent::new(EventKind::TaskStatusChanged, "team", format!("{id} failed: {reason}"))
                    .with_details(serde_json::json!({ "task_id": id, "status": "failed" })),
            );
        }
        (store.ready_ids(), cascaded)
    }

    /// Move ready tasks to `in_progress` and detach them as jobs.
    pub fn start_jobs(&self, ready: &[TaskId], store: &mut TaskStore) -> Vec<TaskJob> {
        let mut jobs = Vec::with_capacity(ready.len());
        for id in ready {
            if let Err(e) = store.mark_in_progress(id) {
                warn!(task_id = %id, error = %e, "Ready task could not start");
                continue;
            }
            let Some(task) = store.get(id) else { continue };
            self.sink.emit(
                TeamEvent::new(
                    EventKind::TaskStatusChanged,
                    &task.agent_name,
                    format!("{id} in progress"),
                )
                .with_details(serde_json::json!({ "task_id": id, "status": "in_progress" })),
            );
            jobs.push(TaskJob {
                task_id: id.clone(),
                agent_name: task.agent_name.clone(),
                description: task.description.clone(),
                upstream: store.dependency_results(id),
            });
        }
        jobs
    }

    /// Run every job concurrently and wait for all of them.
    ///
    /// A worker that panics is reported as a failed outcome for its task.
    pub async fn dispatch(
        &self,
        jobs: Vec<TaskJob>,
        executor: &TaskExecutor,
        collaborators: &HashMap<String, Arc<dyn Collaborator>>,
    ) -> Vec<TaskOutcome> {
        let mut pending = Vec::with_capacity(jobs.len());
        let mut immediate = Vec::new();

        for job in jobs {
            let Some(collaborator) = collaborators.get(&job.agent_name).cloned() else {
                immediate.push(TaskOutcome::aborted(
                    job.task_id.clone(),
                    job.agent_name.clone(),
                    format!("no collaborator named '{}'", job.agent_name),
                ));
                continue;
            };
            let executor = executor.clone();
            let task_id = job.task_id.clone();
            let agent = job.agent_name.clone();
            let handle = tokio::spawn(async move { executor.execute(job, collaborator).await });
            pending.push((task_id, agent, handle));
        }

        let (meta, handles): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .map(|(id, agent, handle)| ((id, agent), handle))
            .unzip();
        let joined = join_all(handles).await;

        let mut outcomes = immediate;
        for ((task_id, agent), result) in meta.into_iter().zip(joined) {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => outcomes.push(TaskOutcome::aborted(task_id, agent, format!("worker aborted: {e}"))),
            }
        }
        outcomes
    }
}
