//! Core types and error definitions for the Cohort team orchestration engine.
//!
//! This crate provides the foundational types shared across all Cohort crates:
//! error handling, the collaborator capability contract, and the structured
//! event stream a run reports through.
//!
//! # Main types
//!
//! - [`CohortError`]: Unified error enum for all Cohort subsystems.
//! - [`CohortResult`]: Convenience alias for `Result<T, CohortError>`.
//! - [`Collaborator`]: The opaque request/response capability every agent exposes.
//! - [`AgentResponse`]: Output text plus call metadata returned by a collaborator.
//! - [`TeamEvent`]: A structured progress event emitted during a run.
//! - [`EventSink`]: Observer that receives [`TeamEvent`]s.

/// Collaborator capability contract.
pub mod collaborator;
/// Team progress events and sinks.
pub mod event;

pub use collaborator::{AgentResponse, AgentRunOptions, Collaborator, ResponseMetadata, TokenUsage};
pub use event::{ChannelSink, EventKind, EventSink, MemorySink, NoopSink, TeamEvent, TracingSink};

// --- Error types ---

/// Top-level error type for the Cohort engine.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum CohortError {
    /// A collaborator call failed.
    #[error("Agent error: {0}")]
    Agent(String),

    /// The team or its configuration is structurally invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// A proposed task was refused before entering the task store.
    #[error("Admission error: {0}")]
    Admission(String),

    /// A task status change that the state machine does not allow.
    #[error("Invalid transition for {task}: {from} -> {to}")]
    InvalidTransition {
        /// The task that was asked to transition.
        task: String,
        /// Its current status.
        from: String,
        /// The requested status.
        to: String,
    },

    /// The rate limiter was shut down while a caller was still waiting.
    #[error("Rate limiter closed")]
    RateLimiterClosed,

    /// Manager output could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the team orchestrator.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),
}

/// A convenience `Result` alias using [`CohortError`].
pub type CohortResult<T> = Result<T, CohortError>;
