use crate::types::TaskId;
use cohort_core::ResponseMetadata;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What a collaborator is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// No task assigned.
    Idle,
    /// Running a task.
    Working,
    /// The last task or manager call failed.
    Error,
}

/// Cumulative call metrics for one collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorMetrics {
    /// Collaborator calls made.
    pub calls: u32,
    /// Tool invocations reported by the collaborator.
    pub total_tool_calls: u32,
    /// Failed tasks and failed manager calls.
    pub errors: u32,
    /// Total time spent in tasks.
    pub duration_ms: u64,
    /// Input plus output tokens reported.
    pub tokens_used: u64,
}

/// Current state of one collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorState {
    /// Collaborator name.
    pub name: String,
    /// Task being worked on, if any.
    pub current_task: Option<TaskId>,
    /// What it is doing.
    pub status: WorkerStatus,
    /// Cumulative metrics.
    pub metrics: CollaboratorMetrics,
}

/// Tracks state and metrics for every collaborator in a team.
pub struct CollaboratorMonitor {
    states: Arc<RwLock<HashMap<String, CollaboratorState>>>,
}

impl CollaboratorMonitor {
    /// Monitor with every collaborator idle.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let states = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                (
                    name.clone(),
                    CollaboratorState {
                        name,
                        current_task: None,
                        status: WorkerStatus::Idle,
                        metrics: CollaboratorMetrics::default(),
                    },
                )
            })
            .collect();
        Self {
            states: Arc::new(RwLock::new(states)),
        }
    }

    /// Mark a collaborator as working on a task.
    pub async fn start_task(&self, name: &str, task_id: &TaskId) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(name) {
            state.current_task = Some(task_id.clone());
            state.status = WorkerStatus::Working;
        }
    }

    /// Mark a collaborator as idle. An error status is kept until the next task starts.
    pub async fn finish_task(&self, name: &str) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(name) {
            state.current_task = None;
            if state.status == WorkerStatus::Working {
                state.status = WorkerStatus::Idle;
            }
        }
    }

    /// Count a failure and mark the collaborator as errored.
    pub async fn record_error(&self, name: &str) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(name) {
            state.metrics.errors += 1;
            state.status = WorkerStatus::Error;
        }
    }

    /// Record one call and whatever the collaborator reported about it.
    pub async fn record_call(&self, name: &str, metadata: &ResponseMetadata) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(name) {
            state.metrics.calls += 1;
            state.metrics.total_tool_calls += metadata.tool_calls.unwrap_or(0);
            state.metrics.tokens_used += metadata.token_usage.map(|u| u.total()).unwrap_or(0);
        }
    }

    /// Add the duration of a finished task.
    pub async fn record_duration(&self, name: &str, duration_ms: u64) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(name) {
            state.metrics.duration_ms += duration_ms;
        }
    }

    /// Snapshot of all collaborator states, sorted by name.
    pub async fn snapshot(&self) -> Vec<CollaboratorState> {
        let states = self.states.read().await;
        let mut all: Vec<CollaboratorState> = states.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// State of one collaborator, if it is known.
    pub async fn get_state(&self, name: &str) -> Option<CollaboratorState> {
        let states = self.states.read().await;
        states.get(name).cloned()
    }

    /// Metrics summed over all collaborators.
    pub async fn aggregate_metrics(&self) -> CollaboratorMetrics {
        let states = self.states.read().await;
        let mut total = CollaboratorMetrics::default();
        for state in states.values() {
            total.calls += state.metrics.calls;
            total.total_tool_calls += state.metrics.total_tool_calls;
            total.errors += state.metrics.errors;
            total.duration_ms += state.metrics.duration_ms;
            total.tokens_used += state.metrics.tokens_used;
        }
        total
    }

    /// Snapshot as a JSON object keyed by collaborator name.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "collaborators": states,
            "aggregate": aggregate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::TokenUsage;

    #[tokio::test]
    async fn test_initial_state() {
        let monitor = CollaboratorMonitor::new(["manager", "writer"]);
        let states = monitor.snapshot().await;
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].name, "manager");
        for state in &states {
            assert_eq!(state.status, WorkerStatus::Idle);
            assert!(state.current_task.is_none());
        }
    }

    #[tokio::test]
    async fn test_start_and_finish_task() {
        let monitor = CollaboratorMonitor::new(["writer"]);
        let task = TaskId::from_seq(1);

        monitor.start_task("writer", &task).await;
        let state = monitor.get_state("writer").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Working);
        assert_eq!(state.current_task, Some(task));

        monitor.finish_task("writer").await;
        let state = monitor.get_state("writer").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Idle);
        assert!(state.current_task.is_none());
    }

    #[tokio::test]
    async fn test_error_status_survives_finish() {
        let monitor = CollaboratorMonitor::new(["writer"]);
        monitor.start_task("writer", &TaskId::from_seq(1)).await;
        monitor.record_error("writer").await;
        monitor.finish_task("writer").await;
        let state = monitor.get_state("writer").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Error);
        assert_eq!(state.metrics.errors, 1);
    }

    #[tokio::test]
    async fn test_record_call_metrics() {
        let monitor = CollaboratorMonitor::new(["analyst", "writer"]);
        let metadata = ResponseMetadata {
            token_usage: Some(TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            }),
            execution_time_ms: 12,
            tool_calls: Some(2),
        };
        monitor.record_call("analyst", &metadata).await;
        monitor.record_call("analyst", &ResponseMetadata::default()).await;
        monitor.record_call("writer", &metadata).await;
        monitor.record_duration("analyst", 300).await;

        let state = monitor.get_state("analyst").await.unwrap();
        assert_eq!(state.metrics.calls, 2);
        assert_eq!(state.metrics.total_tool_calls, 2);
        assert_eq!(state.metrics.tokens_used, 150);
        assert_eq!(state.metrics.duration_ms, 300);

        let agg = monitor.aggregate_metrics().await;
        assert_eq!(agg.calls, 3);
        assert_eq!(agg.tokens_used, 300);
    }

    #[tokio::test]
    async fn test_unknown_name_ignored() {
        let monitor = CollaboratorMonitor::new(["writer"]);
        monitor.record_error("ghost").await;
        assert!(monitor.get_state("ghost").await.is_none());
        assert_eq!(monitor.aggregate_metrics().await.errors, 0);
    }

    #[tokio::test]
    async fn test_to_json() {
        let monitor = CollaboratorMonitor::new(["writer"]);
        let json = monitor.to_json().await;
        assert!(json["collaborators"].is_array());
        assert!(json["aggregate"].is_object());
    }
}
