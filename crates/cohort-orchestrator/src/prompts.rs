//! Prompt templates sent to the manager and to team members.

use crate::transcript::TranscriptEntry;
use crate::types::{TaskId, TaskSummary};
use std::fmt::Write;

/// Name and tool capability of one team member, as shown in the roster.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    /// Collaborator name.
    pub name: String,
    /// Shown as "(can use tools)" in the roster.
    pub has_tools: bool,
}

/// Fixed result of a task whose collaborator never produced real data.
pub const CANNOT_OBTAIN: &str = "I cannot obtain this data";

const ASSIGNMENT_FORMAT: &str = "\
Preferred format: one fenced ```json block listing the tasks, for example

```json
{\"tasks\": [
  {\"agent\": \"<member name>\", \"task\": \"<what to do>\", \"depends_on\": []},
  {\"agent\": \"<member name>\", \"task\": \"<what to do>\", \"depends_on\": [\"task-1\"]}
]}
```

If you cannot produce JSON, write one block per task:

**Task #:** <title>
**Team member:** <member name>
**Why:** <reason>
**Subtask:** <description>
**Depends on:** task-<n>, task-<m> | none

Tasks are numbered task-1, task-2, ... in the order you list them, across the whole run.
";

const NO_FABRICATION: &str = "\
Never invent data. If the completed results do not contain what is needed, say so.";

pub(crate) fn roster(members: &[RosterEntry]) -> String {
    let mut out = String::new();
    for member in members {
        let tools = if member.has_tools {
            " (can use tools)"
        } else {
            ""
        };
        let _ = writeln!(out, "- {}{}", member.name, tools);
    }
    out
}

/// First prompt of a run: the task, the roster and the assignment format.
pub fn initial_prompt(task: &str, members: &[RosterEntry], max_iterations: u32) -> String {
    format!(
        "You are the manager of a team. Break the task below into subtasks and \
assign each one to a team member. Subtasks without dependencies run in parallel.\n\n\
Task:\n{task}\n\n\
Team members:\n{roster}\n\
{ASSIGNMENT_FORMAT}\n\
You will receive progress reports after each round (at most {max_iterations} rounds). \
When the work is done, reply with WORKFLOW COMPLETE.",
        roster = roster(members),
    )
}

/// Sent once when the first manager reply contained no usable assignment.
pub fn format_reminder(task: &str, members: &[RosterEntry]) -> String {
    format!(
        "Your previous reply did not contain any task assignment I could read. \
Assign the work again using exactly the format below and only these team members:\n{roster}\n\
{ASSIGNMENT_FORMAT}\nTask:\n{task}",
        roster = roster(members),
    )
}

pub(crate) fn status_lines(summaries: &[TaskSummary]) -> String {
    if summaries.is_empty() {
        return "(no tasks)\n".to_string();
    }
    let mut out = String::new();
    for s in summaries {
        let deps = if s.dependencies.is_empty() {
            "none".to_string()
        } else {
            s.dependencies
                .iter()
                .map(TaskId::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let _ = write!(
            out,
            "- {} [{}] {} (depends on: {})",
            s.id, s.agent_name, s.status, deps
        );
        if let Some(ms) = s.duration_ms {
            let _ = write!(out, " in {ms} ms");
        }
        let _ = writeln!(out, "\n  Task: {}", s.description);
        if let Some(preview) = &s.result_preview {
            let _ = writeln!(out, "  Result: {preview}");
        }
    }
    out
}

fn notes_section(notes: &[TranscriptEntry]) -> String {
    if notes.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nNotes since the last report:\n");
    for note in notes {
        let _ = writeln!(out, "- {}: {}", note.actor, note.summary);
    }
    out
}

/// Report sent after a round in which at least one task settled.
pub fn progress_report(
    finished: &[TaskSummary],
    all: &[TaskSummary],
    notes: &[TranscriptEntry],
    iteration: u32,
    max_iterations: u32,
) -> String {
    format!(
        "Round {iteration} of {max_iterations} finished.\n\n\
Settled this round:\n{finished}\n\
All tasks:\n{all}{notes}\n\
Assign further tasks if needed, using the same format and the task ids above for \
dependencies. Cancel pending tasks with `Cancel: task-<n>` and change dependencies with \
`Revise task-<n> depends on: task-<m>`. If the results are sufficient, reply with \
WORKFLOW COMPLETE.",
        finished = status_lines(finished),
        all = status_lines(all),
        notes = notes_section(notes),
    )
}

/// Asked when nothing can run but the graph is not finished.
pub fn deadlock_prompt(all: &[TaskSummary], notes: &[TranscriptEntry]) -> String {
    format!(
        "The team is stuck: no task can start, but some tasks are not finished.\n\n\
Current tasks:\n{all}{notes}\n\
Choose one:\n\
(a) cancel pending tasks that can no longer run, e.g. `Cancel: task-3, task-4`;\n\
(b) revise dependencies (`Revise task-3 depends on: task-1`) or add new tasks, \
using the task ids exactly as listed above;\n\
(c) if the completed results already answer the task, reply with WORKFLOW COMPLETE.\n\n\
{NO_FABRICATION}",
        all = status_lines(all),
        notes = notes_section(notes),
    )
}

/// Closing prompt. Its answer is the run's return value.
pub fn final_synthesis(task: &str, all: &[TaskSummary]) -> String {
    format!(
        "All work on this task has stopped.\n\nTask:\n{task}\n\n\
Task results:\n{all}\n\
Write the single final answer for the task from these results. Do not assign any \
new tasks. {NO_FABRICATION}",
        all = status_lines(all),
    )
}

/// Fallback task given to every member when no assignment could be read.
pub fn default_task(manager_text: &str) -> String {
    format!(
        "The manager's instructions could not be split into assignments. Do your part \
of the following plan:\n\n{manager_text}"
    )
}

/// Input for one member task: its description plus labeled upstream results.
pub fn task_input(description: &str, upstream: &[(TaskId, String, String)]) -> String {
    if upstream.is_empty() {
        return description.to_string();
    }
    let mut out = format!("{description}\n\n");
    for (id, agent, result) in upstream {
        let _ = writeln!(out, "=== Result of {id} ({agent}) ===\n{result}\n");
    }
    out.push_str(
        "The results above are already available. Use them directly and do not fetch \
or recompute that data again.",
    );
    out
}

/// Follow-up for a tool-capable member that only showed code.
pub fn execution_demand(description: &str) -> String {
    format!(
        "Your reply shows tool code but no results. Do not describe or print code: \
actually call your tools now and reply with the concrete results they return.\n\n\
Task:\n{description}"
    )
}

/// Final follow-up when the member still did not execute anything.
pub fn acknowledgment_demand() -> String {
    format!(
        "You still have not produced real results. Do not guess or invent any values. \
Reply with exactly one sentence that starts with \"{CANNOT_OBTAIN}\" and names what \
could not be obtained."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;

    fn members() -> Vec<RosterEntry> {
        vec![
            RosterEntry {
                name: "Researcher".into(),
                has_tools: true,
            },
            RosterEntry {
                name: "Writer".into(),
                has_tools: false,
            },
        ]
    }

    fn summary(n: u64, status: TaskStatus, deps: Vec<TaskId>, preview: Option<&str>) -> TaskSummary {
        TaskSummary {
            id: TaskId::from_seq(n),
            agent_name: "Writer".into(),
            description: format!("job {n}"),
            status,
            dependencies: deps,
            result_preview: preview.map(str::to_string),
            duration_ms: Some(42),
        }
    }

    #[test]
    fn test_initial_prompt_lists_roster_and_format() {
        let prompt = initial_prompt("Compare prices", &members(), 10);
        assert!(prompt.contains("Compare prices"));
        assert!(prompt.contains("- Researcher (can use tools)"));
        assert!(prompt.contains("- Writer\n"));
        assert!(prompt.contains("**Team member:**"));
        assert!(prompt.contains("```json"));
        assert!(prompt.contains("WORKFLOW COMPLETE"));
    }

    #[test]
    fn test_status_lines() {
        let lines = status_lines(&[
            summary(1, TaskStatus::Completed, vec![], Some("42 apples")),
            summary(2, TaskStatus::Pending, vec![TaskId::from_seq(1)], None),
        ]);
        assert!(lines.contains("- task-1 [Writer] completed (depends on: none) in 42 ms"));
        assert!(lines.contains("Result: 42 apples"));
        assert!(lines.contains("task-2 [Writer] pending (depends on: task-1)"));
        assert_eq!(status_lines(&[]), "(no tasks)\n");
    }

    #[test]
    fn test_deadlock_prompt_offers_all_options() {
        let prompt = deadlock_prompt(&[summary(1, TaskStatus::Pending, vec![], None)], &[]);
        assert!(prompt.contains("(a) cancel"));
        assert!(prompt.contains("(b) revise"));
        assert!(prompt.contains("(c) if the completed results"));
        assert!(prompt.contains("Never invent data"));
    }

    #[test]
    fn test_task_input_labels_upstream_results() {
        let input = task_input(
            "Write the summary",
            &[(TaskId::from_seq(1), "Researcher".into(), "Price is 10".into())],
        );
        assert!(input.starts_with("Write the summary"));
        assert!(input.contains("=== Result of task-1 (Researcher) ==="));
        assert!(input.contains("Price is 10"));
        assert!(input.contains("do not fetch"));
        assert_eq!(task_input("solo", &[]), "solo");
    }

    #[test]
    fn test_acknowledgment_demand_names_statement() {
        assert!(acknowledgment_demand().contains(CANNOT_OBTAIN));
    }
}
