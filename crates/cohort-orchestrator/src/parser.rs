//! Extraction of task proposals and directives from manager text.
//!
//! The manager is a language model, so its output is prose. Extraction tries
//! the most reliable channel first and degrades gracefully:
//!
//! 1. Fenced ```` ```json ```` blocks holding a task object, a task array, or
//!    an envelope `{ "tasks": [...], "cancel": [...], "revise": [...] }`.
//! 2. Markdown assignment blocks (`**Team member:** ... **Subtask:** ...`).
//! 3. Per-collaborator prose patterns (`Name: task`, `assign Name to: task`,
//!    `Name should ...`), first matching pattern wins.
//!
//! Cancel and revise directives are read from prose lines in every case.

use crate::types::{Assignment, TaskId};
use cohort_core::{CohortError, CohortResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static JSON_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)[ \t]*\n(.*?)```").expect("static regex is valid")
});

#[allow(clippy::expect_used)]
static TEAM_MEMBER_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\*\*\s*team\s+member\s*:?\s*\*\*\s*:?").expect("static regex is valid")
});

static MEMBER_VALUE: LazyLock<Regex> = LazyLock::new(|| field_regex(r"team\s+member"));
static SUBTASK_VALUE: LazyLock<Regex> = LazyLock::new(|| field_regex("subtask"));
static DEPENDS_VALUE: LazyLock<Regex> = LazyLock::new(|| field_regex(r"depends\s+on"));

#[allow(clippy::expect_used)]
static INLINE_DEPENDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)[\s,;.(\[-]*\(?\s*(?:\*\*)?depends\s+on(?:\*\*)?\s*:?(?:\*\*)?\s*:?\s*([^)\]\n]*)[)\]]?\s*\.?\s*$",
    )
    .expect("static regex is valid")
});

#[allow(clippy::expect_used)]
static DEPENDS_TRAILER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:\*\*)?depends\s+on(?:\*\*)?\s*:?(?:\*\*)?\s*:?\s*(.+?)\s*$")
        .expect("static regex is valid")
});

#[allow(clippy::expect_used)]
static CANCEL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:[-*+][ \t]+)?(?:\*\*)?cancel(?:\s+tasks?(?:\s*:|\s))?\s*:?(?:\*\*)?\s*:?[ \t]*(.+)$")
        .expect("static regex is valid")
});

#[allow(clippy::expect_used)]
static REVISE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:[-*+][ \t]+)?(?:\*\*)?revise(?:\*\*)?\s*:?(?:\*\*)?\s*:?[ \t]*(?:\*\*)?(task[ \t_#-]*\d+)(?:\*\*)?(.*)$",
    )
    .expect("static regex is valid")
});

#[allow(clippy::expect_used)]
static DEPENDS_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)depends\s+on(?:\*\*)?\s*:?(?:\*\*)?\s*:?\s*(.+)").expect("static regex is valid")
});

#[allow(clippy::expect_used)]
static BARE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d+)\b").expect("static regex is valid"));

/// A dependency change requested for an existing task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Pending task to revise.
    pub task: TaskId,
    /// Complete new dependency list. Empty means no dependencies.
    pub dependencies: Vec<TaskId>,
}

/// Which extraction channel produced the assignments of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    /// Nothing recognizable.
    #[default]
    None,
    /// Fenced JSON blocks.
    Structured,
    /// `**Team member:**` blocks.
    MarkdownBlocks,
    /// Per-collaborator prose patterns.
    Prose,
}

/// Everything actionable found in one manager response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerPlan {
    /// New task proposals in listing order.
    pub assignments: Vec<Assignment>,
    /// Tasks to cancel.
    pub cancellations: Vec<TaskId>,
    /// Dependency changes.
    pub revisions: Vec<Revision>,
    /// Channel the assignments came from.
    pub source: PlanSource,
}

impl ManagerPlan {
    /// True when the plan asks for nothing.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.cancellations.is_empty() && self.revisions.is_empty()
    }
}

// --- Structured (JSON) channel ---

#[derive(Debug, Deserialize)]
struct StructuredTask {
    #[serde(alias = "agent_name", alias = "agentName", alias = "team_member", alias = "member")]
    agent: String,
    #[serde(alias = "description", alias = "subtask")]
    task: String,
    #[serde(default, alias = "dependencies", alias = "dependsOn")]
    depends_on: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StructuredRevision {
    #[serde(alias = "task_id", alias = "id")]
    task: String,
    #[serde(default, alias = "dependencies", alias = "dependsOn")]
    depends_on: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PlanEnvelope {
    #[serde(default)]
    tasks: Vec<StructuredTask>,
    #[serde(default)]
    cancel: Vec<String>,
    #[serde(default)]
    revise: Vec<StructuredRevision>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StructuredPlan {
    Single(StructuredTask),
    List(Vec<StructuredTask>),
    Envelope(PlanEnvelope),
}

struct AgentPatterns {
    name: String,
    patterns: Vec<Regex>,
}

/// Extracts task proposals for a fixed roster of collaborators.
pub struct AssignmentParser {
    agents: Vec<AgentPatterns>,
}

impl AssignmentParser {
    /// Build the per-collaborator pattern set.
    pub fn new<I, S>(agent_names: I) -> CohortResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut agents = Vec::new();
        for name in agent_names {
            let name = name.as_ref();
            let n = regex::escape(name);
            let sources = [
                // Name: task
                format!(
                    r"(?im)^[ \t]*(?:[-*+][ \t]+|\d+[.)][ \t]+)?(?:\*\*)?{n}(?:\*\*)?[ \t]*:(?:\*\*)?[ \t]*(.+)$"
                ),
                // assign Name to: task
                format!(r"(?i)\bassign(?:ed)?[ \t]+(?:\*\*)?{n}(?:\*\*)?[ \t]+to[ \t]*:?[ \t]*(.+)"),
                // Name should ...
                format!(r"(?i)(?:^|[^\w]){n}[ \t]+should[ \t]+(.+)"),
            ];
            let patterns = sources
                .iter()
                .map(|src| {
                    Regex::new(src).map_err(|e| {
                        CohortError::Config(format!("invalid pattern for agent '{name}': {e}"))
                    })
                })
                .collect::<CohortResult<Vec<_>>>()?;
            agents.push(AgentPatterns {
                name: name.to_string(),
                patterns,
            });
        }
        Ok(Self { agents })
    }

    /// Names this parser recognizes.
    pub fn agent_names(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|a| a.name.as_str())
    }

    /// Task proposals only.
    pub fn extract(&self, text: &str) -> Vec<Assignment> {
        self.parse_plan(text).assignments
    }

    /// Task proposals plus cancel/revise directives.
    pub fn parse_plan(&self, text: &str) -> ManagerPlan {
        if let Some(plan) = self.parse_structured(text) {
            return plan;
        }

        let mut plan = ManagerPlan {
            cancellations: parse_cancellations(text),
            revisions: parse_revisions(text),
            ..ManagerPlan::default()
        };

        let blocks = self.parse_markdown_blocks(text);
        if !blocks.is_empty() {
            plan.assignments = blocks;
            plan.source = PlanSource::MarkdownBlocks;
            return plan;
        }

        let prose = self.parse_prose(text);
        if !prose.is_empty() {
            plan.assignments = prose;
            plan.source = PlanSource::Prose;
        }
        plan
    }

    /// Map a loosely written name onto a registered one.
    pub fn resolve_name(&self, raw: &str) -> Option<&str> {
        let cleaned = raw.trim().trim_matches(|c: char| c == '*' || c == '`' || c == '"');
        let lower = cleaned.to_lowercase();
        if let Some(agent) = self.agents.iter().find(|a| a.name.to_lowercase() == lower) {
            return Some(&agent.name);
        }
        // "Researcher (data specialist)" and similar decorations.
        self.agents
            .iter()
            .filter(|a| lower.contains(&a.name.to_lowercase()))
            .max_by_key(|a| a.name.len())
            .map(|a| a.name.as_str())
    }

    fn canonical_name(&self, raw: &str) -> String {
        self.resolve_name(raw)
            .map(str::to_string)
            .unwrap_or_else(|| raw.trim().trim_matches('*').trim().to_string())
    }

    fn parse_structured(&self, text: &str) -> Option<ManagerPlan> {
        let mut plan = ManagerPlan {
            source: PlanSource::Structured,
            ..ManagerPlan::default()
        };

        for caps in JSON_BLOCK.captures_iter(text) {
            let Some(body) = caps.get(1) else { continue };
            let Ok(parsed) = serde_json::from_str::<StructuredPlan>(body.as_str().trim()) else {
                continue;
            };
            match parsed {
                StructuredPlan::Single(task) => plan.assignments.push(self.structured_assignment(task)),
                StructuredPlan::List(tasks) => plan
                    .assignments
                    .extend(tasks.into_iter().map(|t| self.structured_assignment(t))),
                StructuredPlan::Envelope(env) => {
                    plan.assignments
                        .extend(env.tasks.into_iter().map(|t| self.structured_assignment(t)));
                    plan.cancellations
                        .extend(env.cancel.iter().filter_map(|c| TaskId::parse(c)));
                    plan.revisions.extend(env.revise.into_iter().filter_map(|r| {
                        Some(Revision {
                            task: TaskId::parse(&r.task)?,
                            dependencies: dependencies_from_json(r.depends_on.as_ref()),
                        })
                    }));
                }
            }
        }

        (!plan.is_empty()).then_some(plan)
    }

    fn structured_assignment(&self, task: StructuredTask) -> Assignment {
        Assignment::new(self.canonical_name(&task.agent), task.task.trim())
            .with_dependencies(dependencies_from_json(task.depends_on.as_ref()))
    }

    fn parse_markdown_blocks(&self, text: &str) -> Vec<Assignment> {
        let starts: Vec<usize> = TEAM_MEMBER_FIELD.find_iter(text).map(|m| m.start()).collect();
        let mut assignments = Vec::new();

        for (i, start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            let block = &text[*start..end];

            let Some(member) = field_value(block, &MEMBER_VALUE) else { continue };
            let Some(subtask) = field_value(block, &SUBTASK_VALUE) else { continue };
            let member = member.lines().next().unwrap_or_default();
            if member.trim().is_empty() || subtask.is_empty() {
                continue;
            }
            let dependencies = field_value(block, &DEPENDS_VALUE)
                .map(|d| parse_dependency_list(&d))
                .unwrap_or_default();
            assignments.push(
                Assignment::new(self.canonical_name(member), subtask).with_dependencies(dependencies),
            );
        }
        assignments
    }

    fn parse_prose(&self, text: &str) -> Vec<Assignment> {
        let mut found: Vec<(usize, Assignment)> = Vec::new();

        for agent in &self.agents {
            let hit = agent.patterns.iter().find_map(|re| {
                let caps = re.captures(text)?;
                let whole = caps.get(0)?;
                let body = caps.get(1)?;
                Some((whole.start(), body.as_str(), body.end()))
            });
            let Some((pos, body, body_end)) = hit else { continue };

            let (description, mut dependencies) = split_inline_dependencies(body);
            if dependencies.is_empty() {
                if let Some(trailer) = next_line_trailer(&text[body_end..]) {
                    dependencies = trailer;
                }
            }
            let description = description.trim().trim_matches('*').trim();
            if description.is_empty() {
                continue;
            }
            found.push((
                pos,
                Assignment::new(agent.name.clone(), description).with_dependencies(dependencies),
            ));
        }

        found.sort_by_key(|(pos, _)| *pos);
        found.into_iter().map(|(_, a)| a).collect()
    }
}

/// Pattern for the value of a `**Field:** value` entry, up to the next bold
/// field or a blank line or the end of the block.
#[allow(clippy::expect_used)]
fn field_regex(field: &str) -> Regex {
    Regex::new(&format!(
        r"(?is)\*\*\s*{field}\s*:?\s*\*\*\s*:?\s*(.*?)\s*(?:\n\s*\n|\n\s*\*\*[^*\n]+\*\*|\z)"
    ))
    .expect("static regex is valid")
}

fn field_value(block: &str, field: &Regex) -> Option<String> {
    let value = field.captures(block)?.get(1)?.as_str().trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Split `"do X (depends on task-1)"` into `("do X", [task-1])`.
fn split_inline_dependencies(body: &str) -> (String, Vec<TaskId>) {
    match INLINE_DEPENDS.captures(body) {
        Some(caps) => {
            let start = caps.get(0).map_or(body.len(), |m| m.start());
            let deps = caps
                .get(1)
                .map(|m| parse_dependency_list(m.as_str()))
                .unwrap_or_default();
            (body[..start].to_string(), deps)
        }
        None => (body.to_string(), Vec::new()),
    }
}

/// A `Depends on:` line directly following a prose assignment.
fn next_line_trailer(rest: &str) -> Option<Vec<TaskId>> {
    let line = rest.trim_start_matches(['\r', '\n']).lines().next()?;
    let caps = DEPENDS_TRAILER_LINE.captures(line)?;
    Some(parse_dependency_list(caps.get(1)?.as_str()))
}

/// Parse `task-1, task-2`, `Task 1 and Task 3`, `1, 2` or `none`.
pub fn parse_dependency_list(raw: &str) -> Vec<TaskId> {
    let cleaned = raw.trim().trim_matches('*').trim();
    if cleaned.is_empty() || cleaned.to_lowercase().starts_with("none") {
        return Vec::new();
    }
    let ids = TaskId::find_all(cleaned);
    if !ids.is_empty() {
        return ids;
    }
    let mut ids: Vec<TaskId> = Vec::new();
    for caps in BARE_NUMBER.captures_iter(cleaned) {
        if let Some(seq) = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) {
            let id = TaskId::from_seq(seq);
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

fn dependencies_from_json(value: Option<&serde_json::Value>) -> Vec<TaskId> {
    match value {
        Some(serde_json::Value::String(s)) => parse_dependency_list(s),
        Some(serde_json::Value::Number(n)) => n.as_u64().map(TaskId::from_seq).into_iter().collect(),
        Some(serde_json::Value::Array(items)) => {
            let mut ids: Vec<TaskId> = Vec::new();
            for item in items {
                for id in dependencies_from_json(Some(item)) {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
            ids
        }
        _ => Vec::new(),
    }
}

/// Task references at the start of `text`, separated only by commas, `and`, or markup.
/// Stops at the first word that is not a task reference, so trailing reasons
/// mentioning other tasks are not picked up.
fn leading_task_refs(text: &str) -> Vec<TaskId> {
    let mut ids = Vec::new();
    let mut cursor = 0;
    for (start, end, id) in TaskId::find_all_spans(text) {
        let gap = text[cursor..start]
            .trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '&' | '*' | ':'));
        if !(gap.is_empty() || gap.eq_ignore_ascii_case("and")) {
            break;
        }
        if !ids.contains(&id) {
            ids.push(id);
        }
        cursor = end;
    }
    ids
}

fn parse_cancellations(text: &str) -> Vec<TaskId> {
    let mut ids: Vec<TaskId> = Vec::new();
    for caps in CANCEL_LINE.captures_iter(text) {
        let Some(rest) = caps.get(1) else { continue };
        for id in leading_task_refs(rest.as_str()) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

fn parse_revisions(text: &str) -> Vec<Revision> {
    REVISE_LINE
        .captures_iter(text)
        .filter_map(|caps| {
            let task = TaskId::parse(caps.get(1)?.as_str())?;
            let clause = DEPENDS_CLAUSE.captures(caps.get(2)?.as_str())?;
            Some(Revision {
                task,
                dependencies: parse_dependency_list(clause.get(1)?.as_str()),
            })
        })
        .collect()
}
