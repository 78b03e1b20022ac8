use crate::CohortResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-call options forwarded to a collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRunOptions {
    /// Soft wall-clock budget for the call, in milliseconds.
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
    /// Maximum number of internal turns the collaborator may take.
    #[serde(default)]
    pub turn_budget: Option<u32>,
    /// Ask the collaborator to stream its output.
    #[serde(default)]
    pub streaming: bool,
    /// Ask the collaborator to mirror streamed output to the console.
    #[serde(default)]
    pub console_stream: bool,
}

/// Token accounting reported by a collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Input plus output tokens.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Add another usage record into this one.
    pub fn accumulate(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Metadata attached to every collaborator response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Token counts, when the backend reports them.
    #[serde(default)]
    pub token_usage: Option<TokenUsage>,
    /// Wall-clock time of the call as measured by the collaborator.
    pub execution_time_ms: u64,
    /// Tool invocations made while answering, if the backend reports them.
    #[serde(default)]
    pub tool_calls: Option<u32>,
}

/// Response from a collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Text of the reply.
    pub output: String,
    /// What the collaborator reported about the call.
    pub metadata: ResponseMetadata,
}

impl AgentResponse {
    /// Text-only response with empty metadata.
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            metadata: ResponseMetadata::default(),
        }
    }

    /// Replace the call metadata.
    pub fn with_metadata(mut self, metadata: ResponseMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The capability every team participant (manager or member) exposes.
///
/// The engine treats a collaborator as opaque: it only sends text in, reads
/// text out, and consults [`Collaborator::has_tools`] when deciding whether an
/// unexecuted tool snippet in a response deserves a corrective follow-up.
///
/// To plug in a new kind of agent:
/// 1. Implement `Collaborator` for your type
/// 2. Register it with the team as the manager or as a member
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Unique name used by the manager to address this collaborator.
    fn name(&self) -> &str;

    /// Whether this collaborator can call tools on its own.
    fn has_tools(&self) -> bool {
        false
    }

    /// Run one request/response exchange.
    async fn run(&self, input: &str, options: &AgentRunOptions) -> CohortResult<AgentResponse>;

    /// Drop any conversation state held from previous calls.
    async fn reset_conversation(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Collaborator for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn run(&self, input: &str, _options: &AgentRunOptions) -> CohortResult<AgentResponse> {
            Ok(AgentResponse::text(input))
        }
    }

    #[tokio::test]
    async fn test_default_capabilities() {
        let echo = Echo;
        assert!(!echo.has_tools());
        echo.reset_conversation().await;
        let resp = echo.run("hello", &AgentRunOptions::default()).await.unwrap();
        assert_eq!(resp.output, "hello");
        assert!(resp.metadata.token_usage.is_none());
    }

    #[test]
    fn test_token_usage_accumulate() {
        let mut total = TokenUsage::default();
        total.accumulate(TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        total.accumulate(TokenUsage {
            input_tokens: 1,
            output_tokens: 2,
        });
        assert_eq!(total.input_tokens, 11);
        assert_eq!(total.total(), 18);
    }

    #[test]
    fn test_run_options_deserialize_defaults() {
        let opts: AgentRunOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, AgentRunOptions::default());
    }
}
