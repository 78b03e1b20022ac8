use crate::config::{RunOptions, TeamConfig};
use crate::deadlock::DeadlockHandler;
use crate::executor::{OutcomeStatus, TaskExecutor, TaskOutcome};
use crate::manager::{ManagerPhase, ManagerSession};
use crate::monitor::{CollaboratorMonitor, CollaboratorState};
use crate::parser::AssignmentParser;
use crate::prompts::{self, RosterEntry};
use crate::rate_limit::{RateLimiter, Throttled};
use crate::scheduler::{AdmissionReport, Scheduler};
use crate::task_store::TaskStore;
use crate::transcript::{Transcript, TranscriptEntry};
use crate::types::{truncate_chars, TaskId, TaskStatus, TaskSummary};
use cohort_core::{
    Collaborator, CohortError, CohortResult, EventKind, EventSink, NoopSink, TeamEvent, TokenUsage,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Why the scheduling loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The manager's text contained a completion marker.
    ManagerDeclared,
    /// Every task reached a terminal status.
    AllTasksTerminal,
    /// The iteration ceiling was reached first.
    IterationLimit,
}

/// Number of tasks per status at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// All tasks.
    pub total: usize,
    /// Tasks never dispatched.
    pub pending: usize,
    /// Tasks still running. Always zero after a run.
    pub in_progress: usize,
    /// Tasks with a result.
    pub completed: usize,
    /// Tasks that failed or lost a dependency.
    pub failed: usize,
    /// Tasks withdrawn by the manager.
    pub canceled: usize,
}

impl StatusCounts {
    fn from_store(store: &TaskStore) -> Self {
        Self {
            total: store.len(),
            pending: store.count(TaskStatus::Pending),
            in_progress: store.count(TaskStatus::InProgress),
            completed: store.count(TaskStatus::Completed),
            failed: store.count(TaskStatus::Failed),
            canceled: store.count(TaskStatus::Canceled),
        }
    }
}

/// Everything known about a finished run besides the final answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Identifier shared by every log line and event of the run.
    pub run_id: Uuid,
    /// Scheduling iterations executed.
    pub iterations: u32,
    /// Why the scheduling loop stopped.
    pub completion: CompletionReason,
    /// True unless the run stopped at the iteration ceiling or left tasks unfinished.
    pub converged: bool,
    /// Every task in admission order.
    pub tasks: Vec<TaskSummary>,
    /// Tasks per final status.
    pub counts: StatusCounts,
    /// Tokens used by the manager and all collaborators.
    pub token_usage: TokenUsage,
    /// Collaborator states at the end of the run, sorted by name.
    pub collaborators: Vec<CollaboratorState>,
    /// Most recent transcript entries.
    pub transcript: Vec<TranscriptEntry>,
    /// Wall-clock time of the whole run.
    pub duration_ms: u64,
}

/// Result of [`Team::run`]: the manager's final synthesis plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamOutput {
    /// The manager's final answer.
    pub output: String,
    /// Tasks, counts, usage and transcript of the run.
    pub metadata: RunMetadata,
}

/// A manager plus the members it delegates to.
///
/// Each call to [`Team::run`] builds a fresh task store, transcript, monitor
/// and rate limiter; nothing is carried over between runs.
pub struct Team {
    manager: Arc<dyn Collaborator>,
    members: Vec<Arc<dyn Collaborator>>,
    config: TeamConfig,
    parser: AssignmentParser,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Team")
            .field("manager", &self.manager.name())
            .field(
                "members",
                &self.members.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish()
    }
}

impl Team {
    /// Validate the roster and configuration and build a team.
    pub fn new(
        manager: Arc<dyn Collaborator>,
        members: Vec<Arc<dyn Collaborator>>,
        config: TeamConfig,
    ) -> CohortResult<Self> {
        validate_roster(manager.as_ref(), &members)?;
        config.validate()?;
        let parser = AssignmentParser::new(members.iter().map(|m| m.name().to_string()))?;
        Ok(Self {
            manager,
            members,
            config,
            parser,
            sink: Arc::new(NoopSink),
        })
    }

    /// Report progress events to `sink` instead of discarding them.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Static configuration of this team.
    pub fn config(&self) -> &TeamConfig {
        &self.config
    }

    /// Names of the member collaborators in roster order.
    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name()).collect()
    }

    /// Name of the manager collaborator.
    pub fn manager_name(&self) -> &str {
        self.manager.name()
    }

    /// Run the team on `task` and return the manager's final answer.
    ///
    /// Per-task problems never surface here: they end up in task statuses and
    /// in the metadata. Only a structurally invalid team or a failing manager
    /// call is returned as an error.
    pub async fn run(&self, task: &str, options: RunOptions) -> CohortResult<TeamOutput> {
        validate_roster(self.manager.as_ref(), &self.members)?;
        let run_id = Uuid::new_v4();
        let limiter = self.config.limiter_for(&options);
        info!(
            run_id = %run_id,
            manager = %self.manager.name(),
            members = self.members.len(),
            rate_limit = ?limiter,
            "Team: starting run"
        );

        self.manager.reset_conversation().await;
        for member in &self.members {
            member.reset_conversation().await;
        }

        let result = self.drive(run_id, task, &options, limiter.clone()).await;

        if let Some(limiter) = &limiter {
            limiter.close();
        }
        match &result {
            Ok(out) => info!(
                run_id = %run_id,
                iterations = out.metadata.iterations,
                completion = ?out.metadata.completion,
                converged = out.metadata.converged,
                duration_ms = out.metadata.duration_ms,
                "Team: run complete"
            ),
            Err(e) => error!(run_id = %run_id, error = %e, "Team: run aborted"),
        }
        result
    }

    async fn drive(
        &self,
        run_id: Uuid,
        task: &str,
        options: &RunOptions,
        limiter: Option<RateLimiter>,
    ) -> CohortResult<TeamOutput> {
        let start = Instant::now();
        let max_iterations = self.config.max_iterations;
        let preview = self.config.result_preview_chars;
        let agent_options = options.agent_options();

        let monitor = Arc::new(CollaboratorMonitor::new(
            std::iter::once(self.manager.name()).chain(self.members.iter().map(|m| m.name())),
        ));
        let throttled_manager: Arc<dyn Collaborator> =
            Arc::new(Throttled::new(self.manager.clone(), limiter.clone()));
        let collaborators: HashMap<String, Arc<dyn Collaborator>> = self
            .members
            .iter()
            .map(|m| {
                let wrapped: Arc<dyn Collaborator> =
                    Arc::new(Throttled::new(m.clone(), limiter.clone()));
                (m.name().to_string(), wrapped)
            })
            .collect();

        let mut manager = ManagerSession::new(
            throttled_manager,
            agent_options.clone(),
            monitor.clone(),
            self.sink.clone(),
            options.verbose_trace,
        );
        let executor = TaskExecutor::new(agent_options, monitor.clone(), self.sink.clone())
            .with_verbose(options.verbose_trace)
            .with_preview_chars(preview);
        let scheduler = Scheduler::new(
            self.members.iter().map(|m| m.name().to_string()).collect(),
            self.sink.clone(),
        );
        let deadlock = DeadlockHandler::new(preview);
        let mut store = TaskStore::new();
        let mut transcript = Transcript::new(self.config.transcript_capacity);
        let roster = self.roster();

        // Init
        let mut manager_text = manager
            .ask(&prompts::initial_prompt(task, &roster, max_iterations), ManagerPhase::Planning)
            .await?;
        transcript.record(0, manager.name(), "Initial plan received");

        // Planning: one format reminder if nothing was readable.
        if self.parser.parse_plan(&manager_text).assignments.is_empty()
            && !self.config.is_completion(&manager_text)
        {
            warn!(run_id = %run_id, "Manager plan had no readable assignments; sending format reminder");
            manager_text = manager
                .ask(&prompts::format_reminder(task, &roster), ManagerPhase::FormatReminder)
                .await?;
            transcript.record(0, manager.name(), "Plan resent after format reminder");
        }

        let mut iteration = 0;
        let mut member_usage = TokenUsage::default();
        let mut completion = CompletionReason::IterationLimit;

        while iteration < max_iterations {
            iteration += 1;

            if self.config.is_completion(&manager_text) {
                info!(run_id = %run_id, iteration, "Manager declared the work complete");
                transcript.record(iteration, manager.name(), "Declared the work complete");
                completion = CompletionReason::ManagerDeclared;
                break;
            }

            let plan = self.parser.parse_plan(&manager_text);
            let mut report = AdmissionReport::default();
            scheduler.apply_directives(&plan.cancellations, &plan.revisions, &mut store, &mut report);
            let admitted = scheduler.create_tasks(&plan.assignments, &mut store, iteration);
            merge_reports(&mut report, admitted);
            if store.is_empty() {
                let fallback = scheduler.create_fallback_tasks(&manager_text, &mut store, iteration);
                merge_reports(&mut report, fallback);
            }
            record_admission(&mut transcript, iteration, &report);

            let (ready, cascaded) = scheduler.find_ready(&mut store);
            for id in &cascaded {
                transcript.record(iteration, "team", format!("{id} failed: a dependency did not complete"));
            }

            if store.is_finished() {
                info!(run_id = %run_id, iteration, "All tasks reached a terminal status");
                completion = CompletionReason::AllTasksTerminal;
                break;
            }

            if DeadlockHandler::is_deadlocked(&store, ready.len()) {
                let notes = transcript.take_unreported();
                manager_text = deadlock.resolve(&mut manager, &store, &notes).await?;
                transcript.record(iteration, manager.name(), "Answered deadlock report");
                continue;
            }

            info!(run_id = %run_id, iteration, ready = ready.len(), "Dispatching ready tasks");
            let jobs = scheduler.start_jobs(&ready, &mut store);
            let outcomes = scheduler.dispatch(jobs, &executor, &collaborators).await;
            let settled = self.apply_outcomes(
                &mut store,
                &mut transcript,
                iteration,
                outcomes,
                &mut member_usage,
            );
            let cascaded = scheduler.find_ready(&mut store).1;
            for id in &cascaded {
                transcript.record(iteration, "team", format!("{id} failed: a dependency did not complete"));
            }

            if store.is_finished() {
                info!(run_id = %run_id, iteration, "All tasks reached a terminal status");
                completion = CompletionReason::AllTasksTerminal;
                break;
            }

            let all = store.summaries(preview);
            let finished: Vec<TaskSummary> = all
                .iter()
                .filter(|s| settled.contains(&s.id) || cascaded.contains(&s.id))
                .cloned()
                .collect();
            let notes = transcript.take_unreported();
            let report = prompts::progress_report(&finished, &all, &notes, iteration, max_iterations);
            manager_text = manager.ask(&report, ManagerPhase::Progress).await?;
            transcript.record(iteration, manager.name(), "Answered progress report");
        }

        if completion == CompletionReason::IterationLimit {
            warn!(run_id = %run_id, max_iterations, "Iteration ceiling reached; finalizing");
        }

        // Finalizing
        let summaries = store.summaries(preview);
        let output = manager
            .ask(&prompts::final_synthesis(task, &summaries), ManagerPhase::Synthesis)
            .await?;
        transcript.record(iteration, manager.name(), "Final answer produced");

        let counts = StatusCounts::from_store(&store);
        let converged = completion != CompletionReason::IterationLimit && !store.has_unfinished();
        let mut token_usage = manager.token_usage();
        token_usage.accumulate(member_usage);

        Ok(TeamOutput {
            output,
            metadata: RunMetadata {
                run_id,
                iterations: iteration,
                completion,
                converged,
                tasks: summaries,
                counts,
                token_usage,
                collaborators: monitor.snapshot().await,
                transcript: transcript.to_vec(),
                duration_ms: start.elapsed().as_millis() as u64,
            },
        })
    }

    /// Apply executor outcomes to the store, serially. Returns the ids settled.
    fn apply_outcomes(
        &self,
        store: &mut TaskStore,
        transcript: &mut Transcript,
        iteration: u32,
        outcomes: Vec<TaskOutcome>,
        usage: &mut TokenUsage,
    ) -> Vec<TaskId> {
        let mut settled = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            usage.accumulate(outcome.token_usage);
            let id = outcome.task_id;
            let applied = match outcome.status {
                OutcomeStatus::Completed => store.mark_completed(&id, outcome.result.clone()),
                OutcomeStatus::Failed => store.mark_failed(&id, outcome.result.clone()),
            };
            if let Err(e) = applied {
                warn!(task_id = %id, error = %e, "Outcome could not be applied");
                continue;
            }
            let status = match outcome.status {
                OutcomeStatus::Completed => TaskStatus::Completed,
                OutcomeStatus::Failed => TaskStatus::Failed,
            };
            self.sink.emit(
                TeamEvent::new(
                    EventKind::TaskStatusChanged,
                    &outcome.agent_name,
                    format!("{id} {status}"),
                )
                .with_details(serde_json::json!({
                    "task_id": id,
                    "status": status,
                    "calls": outcome.calls,
                    "duration_ms": outcome.duration_ms,
                })),
            );
            let summary = match status {
                TaskStatus::Completed => format!("{id} completed"),
                _ => format!(
                    "{id} failed: {}",
                    truncate_chars(&outcome.result, self.config.result_preview_chars)
                ),
            };
            transcript.record(iteration, outcome.agent_name, summary);
            settled.push(id);
        }
        settled
    }

    fn roster(&self) -> Vec<RosterEntry> {
        self.members
            .iter()
            .map(|m| RosterEntry {
                name: m.name().to_string(),
                has_tools: m.has_tools(),
            })
            .collect()
    }
}

/// Reject rosters the controller cannot address unambiguously.
fn validate_roster(manager: &dyn Collaborator, members: &[Arc<dyn Collaborator>]) -> CohortResult<()> {
    if members.is_empty() {
        return Err(CohortError::Config("a team needs at least one member".into()));
    }
    if manager.name().trim().is_empty() {
        return Err(CohortError::Config("the manager needs a name".into()));
    }
    let mut seen = HashSet::new();
    for member in members {
        let name = member.name();
        if name.trim().is_empty() {
            return Err(CohortError::Config("every member needs a name".into()));
        }
        if name == manager.name() {
            return Err(CohortError::Config(format!(
                "member '{name}' has the same name as the manager"
            )));
        }
        if !seen.insert(name) {
            return Err(CohortError::Config(format!("duplicate member name '{name}'")));
        }
    }
    Ok(())
}

fn merge_reports(into: &mut AdmissionReport, other: AdmissionReport) {
    into.admitted.extend(other.admitted);
    into.canceled.extend(other.canceled);
    into.revised.extend(other.revised);
    into.notes.extend(other.notes);
}

fn record_admission(transcript: &mut Transcript, iteration: u32, report: &AdmissionReport) {
    if !report.admitted.is_empty() {
        let ids: Vec<String> = report.admitted.iter().map(|id| id.to_string()).collect();
        transcript.record(iteration, "team", format!("Admitted {}", ids.join(", ")));
    }
    for id in &report.canceled {
        transcript.record(iteration, "team", format!("Canceled {id}"));
    }
    for id in &report.revised {
        transcript.record(iteration, "team", format!("Revised dependencies of {id}"));
    }
    for note in &report.notes {
        transcript.record(iteration, "team", note.clone());
    }
}
