use crate::task_store::TaskStore;
use crate::types::TaskId;
use std::collections::HashSet;

/// Find every dependency cycle that admitting `candidate` with
/// `dependencies` would create.
///
/// Each returned path starts and ends at `candidate`, e.g.
/// `[task-3, task-1, task-2, task-3]`. A dependency on the candidate itself
/// yields the one-node path `[task-3]`. Dependencies missing from the store
/// are ignored. The store is not modified.
pub fn detect_cycles(
    candidate: &TaskId,
    dependencies: &[TaskId],
    store: &TaskStore,
) -> Vec<Vec<TaskId>> {
    let mut cycles: Vec<Vec<TaskId>> = Vec::new();

    for dep in dependencies {
        if dep == candidate {
            push_unique(&mut cycles, vec![candidate.clone()]);
            continue;
        }
        if !store.contains(dep) {
            continue;
        }
        let mut path = vec![candidate.clone(), dep.clone()];
        let mut on_path: HashSet<TaskId> = HashSet::from([dep.clone()]);
        walk(candidate, dep, store, &mut path, &mut on_path, &mut cycles);
    }

    cycles
}

/// True if admitting `candidate` with `dependencies` would create any cycle.
pub fn creates_cycle(candidate: &TaskId, dependencies: &[TaskId], store: &TaskStore) -> bool {
    !detect_cycles(candidate, dependencies, store).is_empty()
}

fn walk(
    candidate: &TaskId,
    current: &TaskId,
    store: &TaskStore,
    path: &mut Vec<TaskId>,
    on_path: &mut HashSet<TaskId>,
    cycles: &mut Vec<Vec<TaskId>>,
) {
    let Some(task) = store.get(current) else {
        return;
    };
    for next in task.dependencies() {
        if next == candidate {
            let mut cycle = path.clone();
            cycle.push(candidate.clone());
            push_unique(cycles, cycle);
        } else if store.contains(next) && on_path.insert(next.clone()) {
            path.push(next.clone());
            walk(candidate, next, store, path, on_path, cycles);
            path.pop();
            on_path.remove(next);
        }
    }
}

fn push_unique(cycles: &mut Vec<Vec<TaskId>>, cycle: Vec<TaskId>) {
    if !cycles.contains(&cycle) {
        cycles.push(cycle);
    }
}

/// Render a cycle as `task-1 -> task-2 -> task-1`.
pub fn format_cycle(cycle: &[TaskId]) -> String {
    cycle
        .iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}
