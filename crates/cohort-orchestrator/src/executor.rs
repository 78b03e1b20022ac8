use crate::monitor::CollaboratorMonitor;
use crate::prompts::{self, CANNOT_OBTAIN};
use crate::types::{truncate_chars, TaskId};
use cohort_core::{
    AgentResponse, AgentRunOptions, Collaborator, CohortResult, EventKind, EventSink, TeamEvent,
    TokenUsage,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[allow(clippy::expect_used)]
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+\-]*)[^\n]*\n.*?```").expect("static regex is valid")
});

#[allow(clippy::expect_used)]
static RESULT_EVIDENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?ix)
        \b(?:result|results|found|output|returned|returns|shows|yields)\b
        | \{\s*"
        | \[\s*[\{"\d]
        | \b\d+(?:[.,]\d+)?\b
        | "[^"\n]+"
        "#,
    )
    .expect("static regex is valid")
});

/// Fence languages that carry data rather than code to run.
const DATA_FENCES: &[&str] = &["json", "text", "txt", "output", "csv", "markdown", "md", "console"];

/// True if `response` shows code in a fenced block without any sign that the
/// code was run: nothing after the last code block looks like a result.
pub fn shows_unexecuted_code(response: &str) -> bool {
    let mut last_code_end = None;
    for caps in FENCED_BLOCK.captures_iter(response) {
        let lang = caps
            .get(1)
            .map(|m| m.as_str().to_ascii_lowercase())
            .unwrap_or_default();
        if DATA_FENCES.contains(&lang.as_str()) {
            continue;
        }
        if let Some(whole) = caps.get(0) {
            last_code_end = Some(whole.end());
        }
    }
    match last_code_end {
        Some(end) => !RESULT_EVIDENCE.is_match(&response[end..]),
        None => false,
    }
}

/// Terminal status an execution ends in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The task produced a result.
    Completed,
    /// The task failed.
    Failed,
}

/// What one execution produced. The controller applies it to the task store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Task the outcome belongs to.
    pub task_id: TaskId,
    /// Collaborator that ran it.
    pub agent_name: String,
    /// Status to apply to the task.
    pub status: OutcomeStatus,
    /// The collaborator's answer, or the failure text.
    pub result: String,
    /// Collaborator calls made, corrective follow-ups included.
    pub calls: u32,
    /// Tokens used across all calls.
    pub token_usage: TokenUsage,
    /// Wall-clock time of the execution.
    pub duration_ms: u64,
}

impl TaskOutcome {
    /// Outcome for a task whose worker never reported back.
    pub fn aborted(task_id: TaskId, agent_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            task_id,
            agent_name: agent_name.into(),
            status: OutcomeStatus::Failed,
            result: format!("Error executing task: {reason}"),
            calls: 0,
            token_usage: TokenUsage::default(),
            duration_ms: 0,
        }
    }
}

/// A ready task, detached from the store so it can run on its own.
#[derive(Debug, Clone)]
pub struct TaskJob {
    /// Task to run.
    pub task_id: TaskId,
    /// Collaborator to run it.
    pub agent_name: String,
    /// What the collaborator is asked to do.
    pub description: String,
    /// `(dependency id, its collaborator, its result)` for every dependency.
    pub upstream: Vec<(TaskId, String, String)>,
}

/// Runs single tasks against their collaborators.
///
/// Never touches the task store and never returns an error: every failure is
/// folded into a [`TaskOutcome`] with [`OutcomeStatus::Failed`].
#[derive(Clone)]
pub struct TaskExecutor {
    options: AgentRunOptions,
    monitor: Arc<CollaboratorMonitor>,
    sink: Arc<dyn EventSink>,
    verbose: bool,
    preview_chars: usize,
}

struct Calls {
    count: u32,
    usage: TokenUsage,
}

impl TaskExecutor {
    /// Executor passing `options` to every collaborator call.
    pub fn new(
        options: AgentRunOptions,
        monitor: Arc<CollaboratorMonitor>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            options,
            monitor,
            sink,
            verbose: false,
            preview_chars: 500,
        }
    }

    /// Log full call bodies instead of previews.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Characters of output kept in event payloads.
    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    /// Run one task to a [`TaskOutcome`]. Never fails: errors become a failed outcome.
    pub async fn execute(&self, job: TaskJob, collaborator: Arc<dyn Collaborator>) -> TaskOutcome {
        let start = Instant::now();
        let name = job.agent_name.clone();
        info!(task_id = %job.task_id, agent = %name, "Executing task");
        self.monitor.start_task(&name, &job.task_id).await;
        self.sink.emit(
            TeamEvent::new(
                EventKind::TaskAssigned,
                &name,
                format!("{} dispatched to {}", job.task_id, name),
            )
            .with_details(serde_json::json!({
                "task_id": job.task_id,
                "dependencies": job.upstream.iter().map(|(id, _, _)| id).collect::<Vec<_>>(),
            })),
        );

        let mut calls = Calls {
            count: 0,
            usage: TokenUsage::default(),
        };
        let input = prompts::task_input(&job.description, &job.upstream);
        let settled = self.run_task(&job, collaborator.as_ref(), &input, &mut calls).await;

        let duration_ms = start.elapsed().as_millis() as u64;
        self.monitor.record_duration(&name, duration_ms).await;

        let (status, result) = match settled {
            Ok(Settled::Done(output)) => (OutcomeStatus::Completed, output),
            Ok(Settled::CouldNotObtain(statement)) => {
                warn!(task_id = %job.task_id, agent = %name, "Task failed: data could not be obtained");
                (OutcomeStatus::Failed, statement)
            }
            Err(e) => {
                error!(task_id = %job.task_id, agent = %name, error = %e, "Task failed");
                (OutcomeStatus::Failed, format!("Error executing task: {e}"))
            }
        };
        if status == OutcomeStatus::Failed {
            self.monitor.record_error(&name).await;
            self.sink.emit(
                TeamEvent::new(
                    EventKind::TaskError,
                    &name,
                    format!("{} failed", job.task_id),
                )
                .with_details(serde_json::json!({
                    "task_id": job.task_id,
                    "error": truncate_chars(&result, self.preview_chars),
                })),
            );
        }
        self.monitor.finish_task(&name).await;

        TaskOutcome {
            task_id: job.task_id,
            agent_name: name,
            status,
            result,
            calls: calls.count,
            token_usage: calls.usage,
            duration_ms,
        }
    }

    async fn run_task(
        &self,
        job: &TaskJob,
        collaborator: &dyn Collaborator,
        input: &str,
        calls: &mut Calls,
    ) -> CohortResult<Settled> {
        let first = self.call(job, collaborator, input, calls).await?;
        if !(collaborator.has_tools() && shows_unexecuted_code(&first)) {
            return Ok(Settled::Done(first));
        }

        warn!(
            task_id = %job.task_id,
            agent = %job.agent_name,
            "Response shows tool code without results; requesting execution"
        );
        let demand = prompts::execution_demand(&job.description);
        let second = self.call(job, collaborator, &demand, calls).await?;
        if !shows_unexecuted_code(&second) {
            return Ok(Settled::Done(second));
        }

        warn!(
            task_id = %job.task_id,
            agent = %job.agent_name,
            "Tool code still not executed; requesting acknowledgment"
        );
        let ack = match self
            .call(job, collaborator, &prompts::acknowledgment_demand(), calls)
            .await
        {
            Ok(ack) => ack,
            Err(e) => {
                warn!(
                    task_id = %job.task_id,
                    agent = %job.agent_name,
                    error = %e,
                    "Acknowledgment request failed; using the fixed failure statement"
                );
                String::new()
            }
        };
        Ok(Settled::CouldNotObtain(acknowledgment_or_statement(
            &ack,
            &job.agent_name,
            &job.task_id,
        )))
    }

    async fn call(
        &self,
        job: &TaskJob,
        collaborator: &dyn Collaborator,
        input: &str,
        calls: &mut Calls,
    ) -> CohortResult<String> {
        if self.verbose {
            debug!(task_id = %job.task_id, agent = %job.agent_name, input = %input, "Collaborator input");
        } else {
            debug!(
                task_id = %job.task_id,
                agent = %job.agent_name,
                input = %truncate_chars(input, 200),
                "Collaborator input"
            );
        }
        calls.count += 1;
        let response: AgentResponse = collaborator.run(input, &self.options).await?;
        self.monitor.record_call(&job.agent_name, &response.metadata).await;
        if let Some(usage) = response.metadata.token_usage {
            calls.usage.accumulate(usage);
        }
        self.sink.emit(
            TeamEvent::new(
                EventKind::AgentResponse,
                &job.agent_name,
                format!("{} answered for {}", job.agent_name, job.task_id),
            )
            .with_details(serde_json::json!({
                "task_id": job.task_id,
                "output": truncate_chars(&response.output, self.preview_chars),
                "execution_time_ms": response.metadata.execution_time_ms,
            })),
        );
        if response.output.trim().is_empty() {
            return Err(cohort_core::CohortError::Agent(format!(
                "{} returned an empty response",
                job.agent_name
            )));
        }
        Ok(response.output)
    }
}

enum Settled {
    Done(String),
    CouldNotObtain(String),
}

/// Keep the collaborator's own acknowledgment only if it really is one and
/// carries no figures; otherwise use a fixed statement.
fn acknowledgment_or_statement(ack: &str, agent: &str, task_id: &TaskId) -> String {
    let ack = ack.trim();
    let is_ack = ack.to_lowercase().contains("cannot obtain");
    let has_figures = ack.chars().any(|c| c.is_ascii_digit());
    if is_ack && !has_figures {
        ack.to_string()
    } else {
        format!("{CANNOT_OBTAIN}: {agent} did not execute the tools required for {task_id}.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cohort_core::{CohortError, MemorySink, ResponseMetadata};
    use parking_lot::Mutex;

    /// Replays canned replies and records every input.
    struct Scripted {
        name: String,
        tools: bool,
        replies: Mutex<Vec<CohortResult<String>>>,
        inputs: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(tools: bool, replies: Vec<CohortResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                name: "Researcher".into(),
                tools,
                replies: Mutex::new(replies.into_iter().rev().collect()),
                inputs: Mutex::new(Vec::new()),
            })
        }

        fn inputs(&self) -> Vec<String> {
            self.inputs.lock().clone()
        }
    }

    #[async_trait]
    impl Collaborator for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn has_tools(&self) -> bool {
            self.tools
        }

        async fn run(&self, input: &str, _options: &AgentRunOptions) -> CohortResult<AgentResponse> {
            self.inputs.lock().push(input.to_string());
            let reply = self
                .replies
                .lock()
                .pop()
                .unwrap_or_else(|| Ok("no more replies".into()))?;
            Ok(AgentResponse::text(reply).with_metadata(ResponseMetadata {
                token_usage: Some(TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                }),
                execution_time_ms: 1,
                tool_calls: None,
            }))
        }
    }

    fn executor(sink: Arc<MemorySink>) -> TaskExecutor {
        let monitor = Arc::new(CollaboratorMonitor::new(["Researcher"]));
        TaskExecutor::new(AgentRunOptions::default(), monitor, sink)
    }

    fn job(upstream: Vec<(TaskId, String, String)>) -> TaskJob {
        TaskJob {
            task_id: TaskId::from_seq(2),
            agent_name: "Researcher".into(),
            description: "Find the current price of copper".into(),
            upstream,
        }
    }

    const CODE_ONLY: &str = "I will run this:\n```python\nprint(search('copper price'))\n```\n";

    #[test]
    fn test_detects_code_without_evidence() {
        assert!(shows_unexecuted_code(CODE_ONLY));
        assert!(shows_unexecuted_code("```\nsearch()\n```\nLet me know."));
    }

    #[test]
    fn test_evidence_after_code_counts_as_executed() {
        assert!(!shows_unexecuted_code(
            "```python\nsearch()\n```\nThe result: copper is 4.1 USD/lb"
        ));
        assert!(!shows_unexecuted_code("```sh\nls\n```\n{\"files\": []}"));
        assert!(!shows_unexecuted_code("```py\nx()\n```\nIt found \"Cu\" quotes."));
    }

    #[test]
    fn test_plain_text_and_data_fences_are_not_code() {
        assert!(!shows_unexecuted_code("Copper trades at 4.1 USD/lb."));
        assert!(!shows_unexecuted_code("```json\n{\"price\": 4.1}\n```"));
    }

    #[tokio::test]
    async fn test_success_embeds_upstream_results() {
        let sink = Arc::new(MemorySink::new());
        let collab = Scripted::new(false, vec![Ok("Copper is 4.1 USD/lb".into())]);
        let upstream = vec![(TaskId::from_seq(1), "Scout".into(), "Use LME data".into())];

        let outcome = executor(sink.clone()).execute(job(upstream), collab.clone()).await;

        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.result, "Copper is 4.1 USD/lb");
        assert_eq!(outcome.calls, 1);
        assert_eq!(outcome.token_usage.total(), 15);
        let inputs = collab.inputs();
        assert!(inputs[0].contains("=== Result of task-1 (Scout) ==="));
        assert!(inputs[0].contains("Use LME data"));
        assert_eq!(sink.of_kind(EventKind::TaskAssigned).len(), 1);
        assert_eq!(sink.of_kind(EventKind::AgentResponse).len(), 1);
        assert!(sink.of_kind(EventKind::TaskError).is_empty());
    }

    #[tokio::test]
    async fn test_collaborator_error_becomes_failed_outcome() {
        let sink = Arc::new(MemorySink::new());
        let collab = Scripted::new(false, vec![Err(CohortError::Agent("quota exceeded".into()))]);

        let outcome = executor(sink.clone()).execute(job(vec![]), collab).await;

        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.result.starts_with("Error executing task:"));
        assert!(outcome.result.contains("quota exceeded"));
        assert_eq!(sink.of_kind(EventKind::TaskError).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_response_is_failure() {
        let sink = Arc::new(MemorySink::new());
        let collab = Scripted::new(false, vec![Ok("   ".into())]);
        let outcome = executor(sink).execute(job(vec![]), collab).await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.result.contains("empty response"));
    }

    #[tokio::test]
    async fn test_code_without_tools_is_accepted() {
        let sink = Arc::new(MemorySink::new());
        let collab = Scripted::new(false, vec![Ok(CODE_ONLY.into())]);
        let outcome = executor(sink).execute(job(vec![]), collab.clone()).await;
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(collab.inputs().len(), 1);
    }

    #[tokio::test]
    async fn test_single_corrective_call_recovers() {
        let sink = Arc::new(MemorySink::new());
        let collab = Scripted::new(
            true,
            vec![Ok(CODE_ONLY.into()), Ok("Result: copper is 4.1 USD/lb".into())],
        );
        let outcome = executor(sink).execute(job(vec![]), collab.clone()).await;
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.result, "Result: copper is 4.1 USD/lb");
        assert_eq!(outcome.calls, 2);
        assert!(collab.inputs()[1].contains("actually call your tools"));
    }

    #[tokio::test]
    async fn test_unexecuted_twice_fails_with_acknowledgment() {
        let sink = Arc::new(MemorySink::new());
        let collab = Scripted::new(
            true,
            vec![
                Ok(CODE_ONLY.into()),
                Ok(CODE_ONLY.into()),
                Ok("I cannot obtain this data: the price feed is unreachable.".into()),
            ],
        );
        let outcome = executor(sink).execute(job(vec![]), collab.clone()).await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(
            outcome.result,
            "I cannot obtain this data: the price feed is unreachable."
        );
        assert_eq!(outcome.calls, 3);
        assert!(collab.inputs()[2].contains(CANNOT_OBTAIN));
    }

    #[tokio::test]
    async fn test_fabricated_acknowledgment_is_replaced() {
        let sink = Arc::new(MemorySink::new());
        let collab = Scripted::new(
            true,
            vec![
                Ok(CODE_ONLY.into()),
                Ok(CODE_ONLY.into()),
                Ok("Sure! Copper is 9.99 USD/lb".into()),
            ],
        );
        let outcome = executor(sink).execute(job(vec![]), collab).await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.result.starts_with(CANNOT_OBTAIN));
        assert!(outcome.result.contains("task-2"));
        assert!(!outcome.result.contains("9.99"));
    }

    #[tokio::test]
    async fn test_failed_acknowledgment_call_uses_fixed_statement() {
        let sink = Arc::new(MemorySink::new());
        let collab = Scripted::new(
            true,
            vec![
                Ok(CODE_ONLY.into()),
                Ok(CODE_ONLY.into()),
                Err(CohortError::RateLimiterClosed),
            ],
        );
        let outcome = executor(sink.clone()).execute(job(vec![]), collab).await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(
            outcome.result,
            format!("{CANNOT_OBTAIN}: Researcher did not execute the tools required for task-2.")
        );
        assert_eq!(outcome.calls, 3);
        assert_eq!(sink.of_kind(EventKind::AgentResponse).len(), 2);
    }

    #[test]
    fn test_aborted_outcome() {
        let outcome = TaskOutcome::aborted(TaskId::from_seq(4), "Writer", "worker panicked");
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.result, "Error executing task: worker panicked");
    }
}
