use crate::manager::{ManagerPhase, ManagerSession};
use crate::prompts;
use crate::task_store::TaskStore;
use crate::transcript::TranscriptEntry;
use crate::types::TaskStatus;
use cohort_core::CohortResult;
use tracing::warn;

/// Asks the manager how to get unstuck when no task is ready but the graph
/// is not finished.
///
/// The handler makes exactly one manager call per invocation and returns the
/// raw reply for the controller to parse on its next pass. It never retries
/// on its own; the iteration ceiling bounds how often it can run.
#[derive(Debug, Clone)]
pub struct DeadlockHandler {
    preview_chars: usize,
}

impl DeadlockHandler {
    /// Handler truncating task results to `preview_chars` in reports.
    pub fn new(preview_chars: usize) -> Self {
        Self { preview_chars }
    }

    /// True if nothing can run and some task is still unfinished.
    pub fn is_deadlocked(store: &TaskStore, ready_count: usize) -> bool {
        ready_count == 0 && store.has_unfinished()
    }

    /// Status report of every task, as shown to the manager.
    pub fn report(&self, store: &TaskStore, notes: &[TranscriptEntry]) -> String {
        prompts::deadlock_prompt(&store.summaries(self.preview_chars), notes)
    }

    /// Report the stalled graph to the manager and return its reply.
    pub async fn resolve(
        &self,
        manager: &mut ManagerSession,
        store: &TaskStore,
        notes: &[TranscriptEntry],
    ) -> CohortResult<String> {
        let blocked: Vec<String> = store
            .all_tasks()
            .into_iter()
            .filter(|t| t.status() == TaskStatus::Pending)
            .map(|t| t.id.to_string())
            .collect();
        warn!(
            blocked = %blocked.join(", "),
            "Deadlock: no task is ready; asking the manager to resolve"
        );
        manager
            .ask(&self.report(store, notes), ManagerPhase::Deadlock)
            .await
    }
}
