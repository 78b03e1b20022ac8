use crate::monitor::CollaboratorMonitor;
use crate::types::truncate_chars;
use cohort_core::{
    AgentRunOptions, Collaborator, CohortError, CohortResult, EventKind, EventSink, TeamEvent,
    TokenUsage,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Phase of the run a manager call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerPhase {
    /// Initial decomposition of the task.
    Planning,
    /// Second planning attempt after an unreadable plan.
    FormatReminder,
    /// Report of tasks finished this iteration.
    Progress,
    /// Report of a stalled graph.
    Deadlock,
    /// Closing request for the final answer.
    Synthesis,
}

impl std::fmt::Display for ManagerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagerPhase::Planning => write!(f, "planning"),
            ManagerPhase::FormatReminder => write!(f, "format_reminder"),
            ManagerPhase::Progress => write!(f, "progress"),
            ManagerPhase::Deadlock => write!(f, "deadlock"),
            ManagerPhase::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// The manager collaborator for one run, with call accounting.
pub struct ManagerSession {
    collaborator: Arc<dyn Collaborator>,
    options: AgentRunOptions,
    monitor: Arc<CollaboratorMonitor>,
    sink: Arc<dyn EventSink>,
    verbose: bool,
    usage: TokenUsage,
    calls: u32,
}

impl ManagerSession {
    /// Wrap the manager collaborator.
    pub fn new(
        collaborator: Arc<dyn Collaborator>,
        options: AgentRunOptions,
        monitor: Arc<CollaboratorMonitor>,
        sink: Arc<dyn EventSink>,
        verbose: bool,
    ) -> Self {
        Self {
            collaborator,
            options,
            monitor,
            sink,
            verbose,
            usage: TokenUsage::default(),
            calls: 0,
        }
    }

    /// Name of the manager collaborator.
    pub fn name(&self) -> &str {
        self.collaborator.name()
    }

    /// Send `prompt` to the manager and return its text.
    ///
    /// A failing manager call is fatal for the run and is returned as
    /// [`CohortError::Agent`].
    pub async fn ask(&mut self, prompt: &str, phase: ManagerPhase) -> CohortResult<String> {
        let name = self.collaborator.name().to_string();
        if self.verbose {
            debug!(agent = %name, phase = %phase, prompt = %prompt, "Manager prompt");
        } else {
            debug!(agent = %name, phase = %phase, prompt = %truncate_chars(prompt, 200), "Manager prompt");
        }

        let start = Instant::now();
        self.calls += 1;
        let response = match self.collaborator.run(prompt, &self.options).await {
            Ok(response) => response,
            Err(e) => {
                error!(agent = %name, phase = %phase, error = %e, "Manager call failed");
                self.monitor.record_error(&name).await;
                self.sink.emit(
                    TeamEvent::new(EventKind::TaskError, &name, format!("Manager call failed during {phase}"))
                        .with_details(serde_json::json!({ "phase": phase.to_string(), "error": e.to_string() })),
                );
                return Err(CohortError::Agent(format!("manager '{name}' failed during {phase}: {e}")));
            }
        };
        self.monitor
            .record_duration(&name, start.elapsed().as_millis() as u64)
            .await;
        self.monitor.record_call(&name, &response.metadata).await;
        if let Some(usage) = response.metadata.token_usage {
            self.usage.accumulate(usage);
        }

        info!(agent = %name, phase = %phase, chars = response.output.len(), "Manager responded");
        if self.verbose {
            debug!(agent = %name, phase = %phase, output = %response.output, "Manager output");
        }
        self.sink.emit(
            TeamEvent::new(EventKind::AgentResponse, &name, format!("Manager replied ({phase})"))
                .with_details(serde_json::json!({
                    "phase": phase.to_string(),
                    "output": truncate_chars(&response.output, 500),
                })),
        );
        Ok(response.output)
    }

    /// Tokens used by manager calls so far.
    pub fn token_usage(&self) -> TokenUsage {
        self.usage
    }

    /// Manager calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cohort_core::{AgentResponse, MemorySink, ResponseMetadata};

    struct Boss {
        fail: bool,
    }

    #[async_trait]
    impl Collaborator for Boss {
        fn name(&self) -> &str {
            "boss"
        }

        async fn run(&self, input: &str, _options: &AgentRunOptions) -> CohortResult<AgentResponse> {
            if self.fail {
                return Err(CohortError::Agent("offline".into()));
            }
            Ok(AgentResponse::text(format!("ack: {input}")).with_metadata(ResponseMetadata {
                token_usage: Some(TokenUsage {
                    input_tokens: 3,
                    output_tokens: 4,
                }),
                execution_time_ms: 1,
                tool_calls: None,
            }))
        }
    }

    fn session(fail: bool, sink: Arc<MemorySink>) -> ManagerSession {
        ManagerSession::new(
            Arc::new(Boss { fail }),
            AgentRunOptions::default(),
            Arc::new(CollaboratorMonitor::new(["boss"])),
            sink,
            false,
        )
    }

    #[tokio::test]
    async fn test_ask_accounts_usage() {
        let sink = Arc::new(MemorySink::new());
        let mut manager = session(false, sink.clone());
        let reply = manager.ask("plan", ManagerPhase::Planning).await.unwrap();
        assert_eq!(reply, "ack: plan");
        manager.ask("report", ManagerPhase::Progress).await.unwrap();
        assert_eq!(manager.calls(), 2);
        assert_eq!(manager.token_usage().total(), 14);
        assert_eq!(sink.of_kind(EventKind::AgentResponse).len(), 2);
    }

    #[tokio::test]
    async fn test_manager_failure_is_agent_error() {
        let sink = Arc::new(MemorySink::new());
        let mut manager = session(true, sink.clone());
        let err = manager.ask("plan", ManagerPhase::Planning).await.unwrap_err();
        assert!(matches!(err, CohortError::Agent(msg) if msg.contains("planning")));
        assert_eq!(sink.of_kind(EventKind::TaskError).len(), 1);
    }
}
