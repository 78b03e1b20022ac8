//! Manager-driven team orchestration for Cohort.
//!
//! A manager collaborator proposes subtasks in free text; the engine turns that
//! text into a dependency-ordered task graph, runs every ready task
//! concurrently through a shared rate limiter, reports results back to the
//! manager, breaks deadlocks by asking the manager how to proceed, and finally
//! asks for one synthesized answer.
//!
//! # Main types
//!
//! - [`Team`]: Top-level controller; [`Team::run`] drives a whole run.
//! - [`TaskStore`]: Task map and status state machine for one run.
//! - [`AssignmentParser`]: Extracts task proposals and directives from manager text.
//! - [`RateLimiter`]: FIFO token bucket shared by every collaborator call.
//! - [`TaskExecutor`]: Runs one ready task and reports a [`TaskOutcome`].
//! - [`Scheduler`]: Admission, readiness and concurrent dispatch.
//! - [`DeadlockHandler`]: Asks the manager to resolve a stalled graph.
//! - [`TeamConfig`]: Iteration ceiling, rate limit and report settings.

/// Team configuration and per-run options.
pub mod config;
/// Stall detection and manager-driven recovery.
pub mod deadlock;
/// The team controller and run output types.
pub mod engine;
/// Single-task execution.
pub mod executor;
/// Dependency cycle detection.
pub mod graph;
/// Manager calls with accounting.
pub mod manager;
/// Collaborator state and metrics.
pub mod monitor;
/// Manager text parsing.
pub mod parser;
/// Prompt texts sent to the manager and to collaborators.
pub mod prompts;
/// Token-bucket rate limiting and the throttled collaborator wrapper.
pub mod rate_limit;
/// Admission, readiness and dispatch.
pub mod scheduler;
/// The task map and its state machine.
pub mod task_store;
/// Bounded run transcript.
pub mod transcript;
/// Task, id and status types.
pub mod types;

pub use config::{RateInterval, RateLimitConfig, RunOptions, TeamConfig, DEFAULT_COMPLETION_MARKERS};
pub use deadlock::DeadlockHandler;
pub use engine::{CompletionReason, RunMetadata, StatusCounts, Team, TeamOutput};
pub use executor::{shows_unexecuted_code, OutcomeStatus, TaskExecutor, TaskJob, TaskOutcome};
pub use graph::{creates_cycle, detect_cycles, format_cycle};
pub use manager::{ManagerPhase, ManagerSession};
pub use monitor::{CollaboratorMetrics, CollaboratorMonitor, CollaboratorState, WorkerStatus};
pub use parser::{AssignmentParser, ManagerPlan, PlanSource, Revision};
pub use rate_limit::{RateLimiter, Throttled};
pub use scheduler::{AdmissionReport, Scheduler};
pub use task_store::TaskStore;
pub use transcript::{Transcript, TranscriptEntry};
pub use types::{Assignment, Task, TaskId, TaskStatus, TaskSummary};
