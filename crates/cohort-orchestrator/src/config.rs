use crate::rate_limit::RateLimiter;
use cohort_core::{AgentRunOptions, CohortError, CohortResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Completion markers recognized in manager text (case-insensitive).
pub const DEFAULT_COMPLETION_MARKERS: [&str; 4] = [
    "WORKFLOW COMPLETE",
    "ALL TASKS COMPLETE",
    "FINAL RESPONSE",
    "FINAL ANSWER",
];

/// Length of the fixed rate-limit window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateInterval {
    /// One second.
    Second,
    /// One minute.
    #[default]
    Minute,
    /// A custom window in milliseconds.
    Millis(u64),
}

impl RateInterval {
    /// Length of the window.
    pub fn as_duration(self) -> Duration {
        match self {
            RateInterval::Second => Duration::from_secs(1),
            RateInterval::Minute => Duration::from_secs(60),
            RateInterval::Millis(ms) => Duration::from_millis(ms),
        }
    }
}

/// Token-bucket settings shared by every collaborator call of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens granted per interval.
    pub requests_per_interval: u32,
    /// Refill window. Defaults to one minute.
    #[serde(default)]
    pub interval: RateInterval,
}

impl RateLimitConfig {
    /// Fresh limiter with these settings.
    pub fn build(&self) -> RateLimiter {
        RateLimiter::new(self.requests_per_interval, self.interval.as_duration())
    }
}

/// Static configuration of a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamConfig {
    /// Ceiling on scheduling/reporting iterations per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Throttle for all collaborator calls. `None` disables throttling.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Characters of task output kept in reports to the manager.
    #[serde(default = "default_result_preview_chars")]
    pub result_preview_chars: usize,
    /// Maximum number of transcript entries kept per run.
    #[serde(default = "default_transcript_capacity")]
    pub transcript_capacity: usize,
    /// Phrases in a manager reply that end the scheduling loop early.
    #[serde(default = "default_completion_markers")]
    pub completion_markers: Vec<String>,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            rate_limit: None,
            result_preview_chars: default_result_preview_chars(),
            transcript_capacity: default_transcript_capacity(),
            completion_markers: default_completion_markers(),
        }
    }
}

fn default_max_iterations() -> u32 {
    10
}
fn default_result_preview_chars() -> usize {
    500
}
fn default_transcript_capacity() -> usize {
    100
}
fn default_completion_markers() -> Vec<String> {
    DEFAULT_COMPLETION_MARKERS
        .iter()
        .map(|m| m.to_string())
        .collect()
}

impl TeamConfig {
    /// Parse a `[team]` table and validate it.
    pub fn from_toml_str(raw: &str) -> CohortResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| CohortError::Config(format!("invalid team config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings a run cannot work with.
    pub fn validate(&self) -> CohortResult<()> {
        if self.max_iterations == 0 {
            return Err(CohortError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if let Some(rate) = &self.rate_limit {
            if rate.requests_per_interval == 0 {
                return Err(CohortError::Config(
                    "rate_limit.requests_per_interval must be at least 1".to_string(),
                ));
            }
            if rate.interval.as_duration().is_zero() {
                return Err(CohortError::Config(
                    "rate_limit.interval must be longer than zero".to_string(),
                ));
            }
        }
        if self.completion_markers.iter().any(|m| m.trim().is_empty()) {
            return Err(CohortError::Config(
                "completion markers must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// True if `text` contains any completion marker, ignoring case.
    pub fn is_completion(&self, text: &str) -> bool {
        let upper = text.to_uppercase();
        self.completion_markers
            .iter()
            .any(|marker| upper.contains(&marker.to_uppercase()))
    }

    /// Limiter for one run. A per-run capacity overrides the configured one
    /// and keeps the configured interval (one minute if none).
    pub fn limiter_for(&self, options: &RunOptions) -> Option<RateLimiter> {
        match (options.rate_limit_per_interval, &self.rate_limit) {
            (Some(capacity), Some(rate)) => {
                Some(RateLimiter::new(capacity, rate.interval.as_duration()))
            }
            (Some(capacity), None) => Some(RateLimiter::per_minute(capacity)),
            (None, Some(rate)) => Some(rate.build()),
            (None, None) => None,
        }
    }
}

/// Per-call options of [`Team::run`](crate::engine::Team::run).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Override of the configured capacity for this run only.
    #[serde(default)]
    pub rate_limit_per_interval: Option<u32>,
    /// Log full prompt and response bodies at debug level.
    #[serde(default)]
    pub verbose_trace: bool,
    /// Ask collaborators to stream partial output.
    #[serde(default)]
    pub streaming_enabled: bool,
    /// Ask collaborators to echo streamed output to the console.
    #[serde(default)]
    pub console_stream_enabled: bool,
}

impl RunOptions {
    /// Set [`RunOptions::rate_limit_per_interval`].
    pub fn with_rate_limit(mut self, per_interval: u32) -> Self {
        self.rate_limit_per_interval = Some(per_interval);
        self
    }

    /// Enable [`RunOptions::verbose_trace`].
    pub fn verbose(mut self) -> Self {
        self.verbose_trace = true;
        self
    }

    pub(crate) fn agent_options(&self) -> AgentRunOptions {
        AgentRunOptions {
            streaming: self.streaming_enabled,
            console_stream: self.console_stream_enabled,
            ..AgentRunOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TeamConfig::default();
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.result_preview_chars, 500);
        assert_eq!(config.transcript_capacity, 100);
        assert_eq!(config.completion_markers.len(), 4);
        assert!(config.rate_limit.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = TeamConfig::from_toml_str(
            r#"
max_iterations = 4

[rate_limit]
requests_per_interval = 30
"#,
        )
        .unwrap();
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.result_preview_chars, 500);
        let rate = config.rate_limit.unwrap();
        assert_eq!(rate.requests_per_interval, 30);
        assert_eq!(rate.interval, RateInterval::Minute);
    }

    #[test]
    fn test_interval_forms() {
        let config = TeamConfig::from_toml_str(
            "[rate_limit]\nrequests_per_interval = 2\ninterval = \"second\"\n",
        )
        .unwrap();
        assert_eq!(config.rate_limit.unwrap().interval, RateInterval::Second);

        let config = TeamConfig::from_toml_str(
            "[rate_limit]\nrequests_per_interval = 2\ninterval = { millis = 250 }\n",
        )
        .unwrap();
        let interval = config.rate_limit.unwrap().interval;
        assert_eq!(interval, RateInterval::Millis(250));
        assert_eq!(interval.as_duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(TeamConfig::from_toml_str("max_iterations = 0").is_err());
        assert!(TeamConfig::from_toml_str(
            "[rate_limit]\nrequests_per_interval = 0\n"
        )
        .is_err());
        assert!(TeamConfig::from_toml_str(
            "[rate_limit]\nrequests_per_interval = 1\ninterval = { millis = 0 }\n"
        )
        .is_err());
        let err = TeamConfig::from_toml_str("max_iterations = \"many\"").unwrap_err();
        assert!(matches!(err, CohortError::Config(_)));
    }

    #[test]
    fn test_completion_markers_case_insensitive() {
        let config = TeamConfig::default();
        assert!(config.is_completion("ok, workflow complete."));
        assert!(config.is_completion("Here is my Final Answer:"));
        assert!(!config.is_completion("work continues"));
    }

    #[tokio::test]
    async fn test_limiter_override() {
        let mut config = TeamConfig::default();
        assert!(config.limiter_for(&RunOptions::default()).is_none());

        let limiter = config
            .limiter_for(&RunOptions::default().with_rate_limit(7))
            .unwrap();
        assert_eq!(limiter.capacity(), 7);
        assert_eq!(limiter.interval(), Duration::from_secs(60));

        config.rate_limit = Some(RateLimitConfig {
            requests_per_interval: 3,
            interval: RateInterval::Second,
        });
        let limiter = config.limiter_for(&RunOptions::default()).unwrap();
        assert_eq!(limiter.capacity(), 3);
        let limiter = config
            .limiter_for(&RunOptions::default().with_rate_limit(9))
            .unwrap();
        assert_eq!(limiter.capacity(), 9);
        assert_eq!(limiter.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_agent_options_forward_streaming() {
        let options = RunOptions {
            streaming_enabled: true,
            console_stream_enabled: true,
            ..RunOptions::default()
        };
        let agent = options.agent_options();
        assert!(agent.streaming);
        assert!(agent.console_stream);
        assert!(agent.turn_budget.is_none());
    }
}
