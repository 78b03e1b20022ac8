//! Team files: a TOML description of a team whose collaborators replay
//! scripted responses.
//!
//! ```toml
//! [team]
//! max_iterations = 5
//! rate_limit = { requests_per_interval = 10, interval = "minute" }
//!
//! [manager]
//! name = "Lead"
//! responses = ["Researcher: find the copper price", "WORKFLOW COMPLETE", "Copper is up."]
//!
//! [[members]]
//! name = "Researcher"
//! has_tools = true
//! delay_ms = 200
//! responses = ["Copper trades at 4.1 USD/lb."]
//! ```

use async_trait::async_trait;
use cohort_core::{
    AgentResponse, AgentRunOptions, Collaborator, CohortError, CohortResult, ResponseMetadata,
};
use cohort_orchestrator::{Team, TeamConfig};
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One collaborator entry of a team file.
#[derive(Debug, Clone, Deserialize)]
pub struct CollaboratorSpec {
    /// Name the manager and the task parser address it by.
    pub name: String,
    /// Whether the collaborator claims to run tools.
    #[serde(default)]
    pub has_tools: bool,
    /// Replies in call order. The last one repeats once the list runs out.
    #[serde(default)]
    pub responses: Vec<String>,
    /// Simulated latency per call.
    #[serde(default)]
    pub delay_ms: u64,
}

/// Parsed team file.
#[derive(Debug, Clone, Deserialize)]
pub struct TeamFile {
    /// Team settings. Defaults apply when the table is absent.
    #[serde(default)]
    pub team: TeamConfig,
    /// The planning and synthesizing collaborator.
    pub manager: CollaboratorSpec,
    /// Collaborators tasks are assigned to.
    #[serde(default)]
    pub members: Vec<CollaboratorSpec>,
}

impl TeamFile {
    /// Parse and validate a team file.
    pub fn from_toml_str(raw: &str) -> CohortResult<Self> {
        let file: Self = toml::from_str(raw)
            .map_err(|e| CohortError::Config(format!("invalid team file: {e}")))?;
        file.team.validate()?;
        Ok(file)
    }

    /// Read and parse a team file from disk.
    pub async fn load(path: &Path) -> CohortResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&raw)
    }

    /// Build a [`Team`] of scripted collaborators.
    pub fn build_team(&self) -> CohortResult<Team> {
        let manager: Arc<dyn Collaborator> = Arc::new(ScriptedCollaborator::new(self.manager.clone()));
        let members: Vec<Arc<dyn Collaborator>> = self
            .members
            .iter()
            .map(|spec| Arc::new(ScriptedCollaborator::new(spec.clone())) as Arc<dyn Collaborator>)
            .collect();
        Team::new(manager, members, self.team.clone())
    }
}

/// Collaborator that replays a fixed list of replies.
pub struct ScriptedCollaborator {
    spec: CollaboratorSpec,
    cursor: AtomicUsize,
}

impl ScriptedCollaborator {
    /// Collaborator replaying `spec.responses` from the start.
    pub fn new(spec: CollaboratorSpec) -> Self {
        Self {
            spec,
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Collaborator for ScriptedCollaborator {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn has_tools(&self) -> bool {
        self.spec.has_tools
    }

    async fn run(&self, input: &str, _options: &AgentRunOptions) -> CohortResult<AgentResponse> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .spec
            .responses
            .get(index)
            .or_else(|| self.spec.responses.last())
            .ok_or_else(|| {
                CohortError::Agent(format!("'{}' has no scripted responses", self.spec.name))
            })?;
        debug!(agent = %self.spec.name, call = index + 1, input_chars = input.len(), "Scripted reply");
        if self.spec.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.spec.delay_ms)).await;
        }
        Ok(AgentResponse::text(reply.clone()).with_metadata(ResponseMetadata {
            token_usage: None,
            execution_time_ms: self.spec.delay_ms,
            tool_calls: None,
        }))
    }

    async fn reset_conversation(&self) {
        self.cursor.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use cohort_orchestrator::{CompletionReason, RateInterval, RunOptions, TaskStatus};
    use std::io::Write;

    const TEAM: &str = r#"
[team]
max_iterations = 4
rate_limit = { requests_per_interval = 20, interval = "second" }

[manager]
name = "Lead"
responses = [
    "Researcher: find the copper price\nWriter: draft a note (depends on task-1)",
    "Looks good so far.",
    "Copper is 4.1 USD/lb; see the note.",
]

[[members]]
name = "Researcher"
responses = ["Copper trades at 4.1 USD/lb."]

[[members]]
name = "Writer"
delay_ms = 5
responses = ["Note drafted."]
"#;

    fn spec(name: &str, responses: &[&str]) -> CollaboratorSpec {
        CollaboratorSpec {
            name: name.into(),
            has_tools: false,
            responses: responses.iter().map(|r| r.to_string()).collect(),
            delay_ms: 0,
        }
    }

    #[test]
    fn test_parse_team_file() {
        let file = TeamFile::from_toml_str(TEAM).unwrap();
        assert_eq!(file.team.max_iterations, 4);
        let rate = file.team.rate_limit.as_ref().unwrap();
        assert_eq!(rate.requests_per_interval, 20);
        assert_eq!(rate.interval, RateInterval::Second);
        assert_eq!(file.manager.name, "Lead");
        assert_eq!(file.members.len(), 2);
        assert_eq!(file.members[1].delay_ms, 5);
    }

    #[test]
    fn test_defaults_and_invalid_files() {
        let minimal = "[manager]\nname = \"Lead\"\n\n[[members]]\nname = \"Solo\"\n";
        let file = TeamFile::from_toml_str(minimal).unwrap();
        assert_eq!(file.team, TeamConfig::default());
        assert!(!file.members[0].has_tools);

        assert!(matches!(
            TeamFile::from_toml_str("[[members]]\nname = \"Solo\"\n"),
            Err(CohortError::Config(_))
        ));
        assert!(TeamFile::from_toml_str(
            "[team]\nmax_iterations = 0\n[manager]\nname = \"Lead\"\n"
        )
        .is_err());
    }

    #[test]
    fn test_build_team_rejects_bad_roster() {
        let mut file = TeamFile::from_toml_str(TEAM).unwrap();
        file.members[1].name = "Researcher".into();
        assert!(file.build_team().is_err());
    }

    #[tokio::test]
    async fn test_scripted_replies_repeat_last_and_reset() {
        let collab = ScriptedCollaborator::new(spec("Lead", &["one", "two"]));
        let options = AgentRunOptions::default();
        assert_eq!(collab.run("a", &options).await.unwrap().output, "one");
        assert_eq!(collab.run("b", &options).await.unwrap().output, "two");
        assert_eq!(collab.run("c", &options).await.unwrap().output, "two");
        assert_eq!(collab.cursor.load(Ordering::SeqCst), 3);
        collab.reset_conversation().await;
        assert_eq!(collab.run("d", &options).await.unwrap().output, "one");

        let silent = ScriptedCollaborator::new(spec("Mute", &[]));
        assert!(matches!(silent.run("x", &options).await, Err(CohortError::Agent(_))));
    }

    #[tokio::test]
    async fn test_load_and_run_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(TEAM.as_bytes()).unwrap();

        let file = TeamFile::load(tmp.path()).await.unwrap();
        let team = file.build_team().unwrap();
        let output = team.run("Copper note", RunOptions::default()).await.unwrap();

        assert_eq!(output.output, "Copper is 4.1 USD/lb; see the note.");
        assert_eq!(output.metadata.completion, CompletionReason::AllTasksTerminal);
        assert_eq!(output.metadata.iterations, 2);
        assert!(output
            .metadata
            .tasks
            .iter()
            .all(|t| t.status == TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TeamFile::load(&dir.path().join("absent.toml")).await.unwrap_err();
        assert!(matches!(err, CohortError::Io(_)));
    }
}
